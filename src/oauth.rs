//! Token-endpoint client and response normalization.

// crates.io
use oauth2::{HttpResponse, http::StatusCode};
// self
use crate::{
	_prelude::*,
	auth::{ClientInfo, IdToken, ScopeSet, TokenSecret, User},
	authority::AuthorityEndpoints,
	error::{ClientError, ServiceError},
	http::{
		Endpoint, HttpExecutor, PreparedRequest, TokenHttpClient, TransportErrorMapper, parse_json,
	},
	obs::{FlowKind, FlowOutcome, FlowSpan},
};

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::hours(1);

/// Form parameter names used by the token endpoint.
pub mod params {
	/// `grant_type`.
	pub const GRANT_TYPE: &str = "grant_type";
	/// `client_id`.
	pub const CLIENT_ID: &str = "client_id";
	/// `scope`.
	pub const SCOPE: &str = "scope";
	/// `code`.
	pub const CODE: &str = "code";
	/// `redirect_uri`.
	pub const REDIRECT_URI: &str = "redirect_uri";
	/// `code_verifier`.
	pub const CODE_VERIFIER: &str = "code_verifier";
	/// `refresh_token`.
	pub const REFRESH_TOKEN: &str = "refresh_token";
	/// `client_info` (asks AAD to return client info).
	pub const CLIENT_INFO: &str = "client_info";
	/// Grant type value for authorization codes.
	pub const AUTHORIZATION_CODE_GRANT: &str = "authorization_code";
	/// Grant type value for refresh tokens.
	pub const REFRESH_TOKEN_GRANT: &str = "refresh_token";
}

/// Executes one token-endpoint exchange.
///
/// Body parameters accumulate on the instance and [`OAuth2Client::get_token`] consumes it, so a
/// parameter set is never sent twice.
pub struct OAuth2Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	executor: HttpExecutor<C, M>,
	correlation_id: Uuid,
	body: Vec<(String, String)>,
}
impl<C, M> OAuth2Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client whose request carries `correlation_id`.
	pub fn new(executor: HttpExecutor<C, M>, correlation_id: Uuid) -> Self {
		Self { executor, correlation_id, body: Vec::new() }
	}

	/// Appends a form body parameter.
	pub fn add_body_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.body.push((name.into(), value.into()));
	}

	/// Builder-style variant of [`OAuth2Client::add_body_parameter`].
	pub fn with_body_parameter(
		mut self,
		name: impl Into<String>,
		value: impl Into<String>,
	) -> Self {
		self.add_body_parameter(name, value);

		self
	}

	/// Posts the accumulated parameters to the authority's token endpoint.
	///
	/// HTTP 200 yields [`TokenResponse::Success`]; other statuses carrying an OAuth error body
	/// yield [`TokenResponse::Failure`]. Bodies that are not JSON fail with
	/// [`ClientError::JsonParse`].
	pub async fn get_token(self, endpoints: &AuthorityEndpoints) -> Result<TokenResponse> {
		let span = FlowSpan::new(FlowKind::TokenRequest, "get_token")
			.with_correlation_id(self.correlation_id);
		let request = PreparedRequest::post_form(
			endpoints.token_endpoint.clone(),
			self.body.iter().map(|(k, v)| (k.as_str(), v.as_str())),
		)
		.with_correlation_id(self.correlation_id);
		let result = span
			.instrument(async {
				let response = self.executor.execute(Endpoint::Token, &request).await?;

				TokenResponse::from_http(&response, OffsetDateTime::now_utc())
			})
			.await;

		span.finish(match &result {
			Ok(TokenResponse::Success(_)) => FlowOutcome::Success,
			_ => FlowOutcome::Failure,
		});

		result
	}
}
impl<C, M> Debug for OAuth2Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let names = self.body.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>();

		f.debug_struct("OAuth2Client")
			.field("correlation_id", &self.correlation_id)
			.field("body_parameters", &names)
			.finish()
	}
}

/// Parsed token-endpoint answer.
#[derive(Clone, Debug)]
pub enum TokenResponse {
	/// HTTP 200 with token fields.
	Success(TokenSuccess),
	/// OAuth error body.
	Failure(TokenFailure),
}
impl TokenResponse {
	/// Normalizes a raw HTTP response.
	pub fn from_http(response: &HttpResponse, now: OffsetDateTime) -> Result<Self> {
		if response.status() == StatusCode::OK {
			let raw: RawTokenSuccess = parse_json(Endpoint::Token, response)?;

			Ok(Self::Success(TokenSuccess::from_raw(raw, now)?))
		} else {
			let mut failure: TokenFailure = parse_json(Endpoint::Token, response)?;

			failure.status = Some(response.status().as_u16());

			Ok(Self::Failure(failure))
		}
	}

	/// Converts a failure into [`ServiceError::Endpoint`].
	pub fn into_result(self) -> Result<TokenSuccess> {
		match self {
			Self::Success(success) => Ok(success),
			Self::Failure(failure) => {
				let status = failure.status;

				Err(failure.into_service_error(Endpoint::Token, status).into())
			},
		}
	}
}

/// Successful token response.
#[derive(Clone, Debug)]
pub struct TokenSuccess {
	/// Token to present to resources.
	pub access_token: TokenSecret,
	/// `true` when the response had no `access_token` and the ID token was substituted.
	pub access_token_from_id_token: bool,
	/// `token_type`, `Bearer` when omitted.
	pub token_type: String,
	/// Refresh token, if one was issued.
	pub refresh_token: Option<TokenSecret>,
	/// Raw ID token.
	pub id_token: Option<String>,
	/// Raw base64url client info.
	pub client_info: Option<String>,
	/// Granted scopes, if the service echoed them.
	pub scope: Option<ScopeSet>,
	/// Absolute expiry computed from `expires_in`.
	pub expires_on: OffsetDateTime,
	/// Absolute extended expiry computed from `ext_expires_in`.
	pub extended_expires_on: OffsetDateTime,
}
impl TokenSuccess {
	fn from_raw(raw: RawTokenSuccess, now: OffsetDateTime) -> Result<Self, ClientError> {
		let (access_token, access_token_from_id_token) = match (raw.access_token, &raw.id_token) {
			(Some(token), _) if !token.is_empty() => (token, false),
			(_, Some(id_token)) if !id_token.is_empty() => (id_token.clone(), true),
			_ => return Err(ClientError::InvalidTokenResponse { field: "access_token" }),
		};
		let expires_in = raw
			.expires_in
			.map(|value| value.seconds("expires_in"))
			.transpose()?
			.unwrap_or(DEFAULT_EXPIRES_IN);
		let ext_expires_in = raw
			.ext_expires_in
			.map(|value| value.seconds("ext_expires_in"))
			.transpose()?
			.unwrap_or(expires_in);
		let expires_on = now
			.checked_add(expires_in)
			.ok_or(ClientError::InvalidTokenResponse { field: "expires_in" })?;
		let extended_expires_on = now
			.checked_add(ext_expires_in.max(expires_in))
			.ok_or(ClientError::InvalidTokenResponse { field: "ext_expires_in" })?;
		let scope = match raw.scope {
			Some(scope) => Some(
				ScopeSet::from_str(&scope)
					.map_err(|_| ClientError::InvalidTokenResponse { field: "scope" })?,
			),
			None => None,
		};

		Ok(Self {
			access_token: TokenSecret::new(access_token),
			access_token_from_id_token,
			token_type: raw.token_type.unwrap_or_else(|| "Bearer".into()),
			refresh_token: raw.refresh_token.filter(|rt| !rt.is_empty()).map(TokenSecret::new),
			id_token: raw.id_token.filter(|token| !token.is_empty()),
			client_info: raw.client_info.filter(|info| !info.is_empty()),
			scope,
			expires_on,
			extended_expires_on,
		})
	}

	/// Derives the signed-in user from the ID token and client info, when present.
	pub fn user(&self) -> Result<Option<User>, ClientError> {
		let Some(raw_id_token) = &self.id_token else {
			return Ok(None);
		};
		let id_token = IdToken::parse(raw_id_token)?;
		let client_info = self.client_info.as_deref().map(ClientInfo::parse).transpose()?;

		User::from_tokens(&id_token, client_info.as_ref()).map(Some)
	}

	/// Tenant reported by the ID token.
	pub fn tenant_id(&self) -> Option<String> {
		self.id_token.as_deref().and_then(|raw| IdToken::parse(raw).ok()).and_then(|t| t.tenant_id)
	}
}

/// OAuth error body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFailure {
	/// OAuth `error` code.
	pub error: String,
	/// Human-readable description.
	#[serde(default)]
	pub error_description: Option<String>,
	/// Azure AD numeric error codes.
	#[serde(default)]
	pub error_codes: Vec<u64>,
	/// HTTP status the body arrived with.
	#[serde(skip)]
	pub status: Option<u16>,
}
impl TokenFailure {
	/// Wraps the body into [`ServiceError::Endpoint`].
	pub fn into_service_error(self, endpoint: Endpoint, status: Option<u16>) -> ServiceError {
		ServiceError::Endpoint {
			endpoint,
			status,
			error_code: self.error,
			description: self.error_description,
			error_codes: self.error_codes,
		}
	}
}

#[derive(Deserialize)]
struct RawTokenSuccess {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	id_token: Option<String>,
	#[serde(default)]
	client_info: Option<String>,
	#[serde(default)]
	scope: Option<String>,
	#[serde(default)]
	expires_in: Option<Seconds>,
	#[serde(default)]
	ext_expires_in: Option<Seconds>,
}

/// ADFS sends numeric fields as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
	Number(i64),
	Text(String),
}
impl Seconds {
	fn seconds(self, field: &'static str) -> Result<Duration, ClientError> {
		let value = match self {
			Self::Number(value) => value,
			Self::Text(text) =>
				text.trim().parse().map_err(|_| ClientError::InvalidTokenResponse { field })?,
		};

		if value < 0 {
			return Err(ClientError::InvalidTokenResponse { field });
		}

		Ok(Duration::seconds(value))
	}
}
