//! Caller-facing request parameters, validated request objects, and results.
//!
//! Parameter structs are plain data with named optional fields. They are validated into
//! [`InteractiveRequest`] / [`SilentRequest`] before dispatch, so argument errors surface
//! immediately and never reach a worker.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, ScopeSet, TokenSecret, User},
	authority::Authority,
	authorization::Prompt,
	cache::AccessTokenCacheItem,
	config::PublicClientConfig,
	error::ArgumentError,
};

/// Parameters for interactive acquisition.
#[derive(Clone, Debug, Default)]
pub struct AcquireTokenParameters {
	/// Scopes to acquire; reserved OIDC scopes are added automatically and rejected here.
	pub scopes: Vec<String>,
	/// Authority override; the configured default is used when `None`.
	pub authority: Option<String>,
	/// Pre-fills the account name and supplies the ADFS validation domain.
	pub login_hint: Option<String>,
	/// Prompt behavior.
	pub prompt: Prompt,
	/// Extra scopes to consent to without receiving a token for them.
	pub extra_scopes_to_consent: Vec<String>,
	/// Additional query parameters for the authorize URL.
	pub extra_query_parameters: Vec<(String, String)>,
	/// Correlation id; a fresh one is generated when `None`.
	pub correlation_id: Option<Uuid>,
}
impl AcquireTokenParameters {
	/// Parameters requesting `scopes` with every other field at its default.
	pub fn new<I, S>(scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { scopes: scopes.into_iter().map(Into::into).collect(), ..Default::default() }
	}

	/// Validates the parameters against `config`.
	pub fn into_request(self, config: &PublicClientConfig) -> Result<InteractiveRequest> {
		let context = RequestContext::new(
			config,
			&self.scopes,
			self.authority.as_deref(),
			self.correlation_id,
		)?;
		let extra_scopes_to_consent = if self.extra_scopes_to_consent.is_empty() {
			ScopeSet::default()
		} else {
			validate_scopes(&self.extra_scopes_to_consent)?
		};

		Ok(InteractiveRequest {
			context,
			login_hint: self.login_hint.filter(|hint| !hint.trim().is_empty()),
			prompt: self.prompt,
			extra_scopes_to_consent,
			extra_query_parameters: self.extra_query_parameters,
		})
	}
}

/// Parameters for silent acquisition.
#[derive(Clone, Debug, Default)]
pub struct AcquireTokenSilentParameters {
	/// Scopes to acquire.
	pub scopes: Vec<String>,
	/// User whose tokens to use; `None` matches any user and fails on ambiguity.
	pub user: Option<User>,
	/// Authority override.
	pub authority: Option<String>,
	/// Skip the access-token cache and redeem the refresh token.
	pub force_refresh: bool,
	/// Correlation id; a fresh one is generated when `None`.
	pub correlation_id: Option<Uuid>,
}
impl AcquireTokenSilentParameters {
	/// Parameters requesting `scopes` for `user`.
	pub fn new<I, S>(scopes: I, user: Option<User>) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { scopes: scopes.into_iter().map(Into::into).collect(), user, ..Default::default() }
	}

	/// Validates the parameters against `config`.
	pub fn into_request(self, config: &PublicClientConfig) -> Result<SilentRequest> {
		let context = RequestContext::new(
			config,
			&self.scopes,
			self.authority.as_deref(),
			self.correlation_id,
		)?;

		Ok(SilentRequest { context, user: self.user, force_refresh: self.force_refresh })
	}
}

/// Fields shared by every validated request.
#[derive(Clone, Debug)]
pub struct RequestContext {
	/// Target authority.
	pub authority: Authority,
	/// Whether the authority is validated during resolution.
	pub validate_authority: bool,
	/// Requesting client id.
	pub client_id: ClientId,
	/// Redirect URI.
	pub redirect_uri: Url,
	/// Requested scopes without reserved scopes.
	pub scopes: ScopeSet,
	/// Correlation id for logs and the `client-request-id` header.
	pub correlation_id: Uuid,
}
impl RequestContext {
	fn new(
		config: &PublicClientConfig,
		scopes: &[String],
		authority: Option<&str>,
		correlation_id: Option<Uuid>,
	) -> Result<Self> {
		let scopes = validate_scopes(scopes)?;
		let authority = match authority {
			Some(raw) => Authority::parse(raw)?,
			None => config.default_authority()?,
		};

		Ok(Self {
			authority,
			validate_authority: config.validate_authority,
			client_id: config.client_id.clone(),
			redirect_uri: config.redirect_uri.clone(),
			scopes,
			correlation_id: correlation_id.unwrap_or_else(Uuid::new_v4),
		})
	}
}

/// Validated interactive request.
#[derive(Clone, Debug)]
pub struct InteractiveRequest {
	/// Shared fields.
	pub context: RequestContext,
	/// Login hint.
	pub login_hint: Option<String>,
	/// Prompt behavior.
	pub prompt: Prompt,
	/// Extra consent scopes.
	pub extra_scopes_to_consent: ScopeSet,
	/// Additional authorize URL parameters.
	pub extra_query_parameters: Vec<(String, String)>,
}
impl InteractiveRequest {
	/// Scopes sent to the authorization and token endpoints.
	pub fn wire_scopes(&self) -> ScopeSet {
		self.context.scopes.union(&self.extra_scopes_to_consent).with_reserved()
	}
}

/// Validated silent request.
#[derive(Clone, Debug)]
pub struct SilentRequest {
	/// Shared fields.
	pub context: RequestContext,
	/// User to disambiguate with.
	pub user: Option<User>,
	/// Skip the access-token cache.
	pub force_refresh: bool,
}

/// Where a returned token came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
	/// Local access-token cache.
	Cache,
	/// Token endpoint.
	IdentityProvider,
	/// Broker.
	Broker,
}

/// Successful acquisition.
#[derive(Clone, Debug)]
pub struct AuthenticationResult {
	/// Access token.
	pub access_token: TokenSecret,
	/// Token type.
	pub token_type: String,
	/// Expiry.
	pub expires_on: OffsetDateTime,
	/// `true` when the token is past its expiry but inside its extended lifetime.
	pub extended_lifetime_token: bool,
	/// Scopes the token covers.
	pub scopes: ScopeSet,
	/// Issuing tenant.
	pub tenant_id: Option<String>,
	/// Raw ID token.
	pub id_token: Option<String>,
	/// Signed-in user.
	pub user: Option<User>,
	/// Authority that issued the token.
	pub authority: String,
	/// Correlation id of the request.
	pub correlation_id: Uuid,
	/// Origin of the token.
	pub source: TokenSource,
}
impl AuthenticationResult {
	/// Builds a result from a cache record.
	pub fn from_cache_item(
		item: &AccessTokenCacheItem,
		correlation_id: Uuid,
		source: TokenSource,
	) -> Self {
		Self {
			access_token: item.access_token.clone(),
			token_type: item.token_type.clone(),
			expires_on: item.expires_on,
			extended_lifetime_token: false,
			scopes: item.scope.clone(),
			tenant_id: item.tenant_id.clone(),
			id_token: item.raw_id_token.clone(),
			user: item.user.clone(),
			authority: item.authority.clone(),
			correlation_id,
			source,
		}
	}
}

/// Validates caller scopes: non-empty, well formed, and free of reserved scopes.
pub fn validate_scopes(scopes: &[String]) -> Result<ScopeSet, ArgumentError> {
	let set = ScopeSet::new(scopes.iter().cloned())?;

	if set.is_empty() {
		return Err(ArgumentError::EmptyScopes);
	}
	if let Some(scope) = set.reserved_scope() {
		return Err(ArgumentError::ReservedScope { scope: scope.to_owned() });
	}

	Ok(set)
}
