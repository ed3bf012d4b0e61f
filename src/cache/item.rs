//! Access- and refresh-token cache records.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret, User},
	cache::TokenCacheKey,
	error::ArgumentError,
	oauth::TokenSuccess,
};

/// Where a token response is being stored.
#[derive(Clone, Copy, Debug)]
pub struct CacheTarget<'a> {
	/// Canonical authority the request was sent to.
	pub authority: &'a str,
	/// Host of that authority; refresh tokens are shared across its tenants.
	pub authority_host: &'a str,
	/// Requesting client id.
	pub client_id: &'a str,
	/// B2C policy, if any.
	pub policy: Option<&'a str>,
}

/// Cached access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenCacheItem {
	/// Canonical authority (lowercase, no trailing slash).
	pub authority: String,
	/// Lowercased client id.
	pub client_id: String,
	/// B2C policy, if any.
	#[serde(default)]
	pub policy: Option<String>,
	/// Scopes the token is valid for; empty means unrestricted.
	pub scope: ScopeSet,
	/// Token value.
	pub access_token: TokenSecret,
	/// `token_type` reported by the service.
	pub token_type: String,
	/// Expiry instant.
	#[serde(with = "time::serde::timestamp")]
	pub expires_on: OffsetDateTime,
	/// Extended expiry instant, used only while the service is unavailable.
	#[serde(with = "time::serde::timestamp")]
	pub extended_expires_on: OffsetDateTime,
	/// Tenant reported by the ID token.
	#[serde(default)]
	pub tenant_id: Option<String>,
	/// Raw client info.
	#[serde(default)]
	pub raw_client_info: Option<String>,
	/// Raw ID token.
	#[serde(default)]
	pub raw_id_token: Option<String>,
	/// User derived from the ID token and client info.
	#[serde(default)]
	pub user: Option<User>,
}
impl AccessTokenCacheItem {
	/// Builds the record for a successful response.
	///
	/// The stored scope is the service-echoed scope when present, otherwise the requested one,
	/// with reserved scopes removed in both cases.
	pub fn from_response(
		target: CacheTarget<'_>,
		requested: &ScopeSet,
		response: &TokenSuccess,
		user: Option<User>,
	) -> Self {
		let scope = response.scope.as_ref().unwrap_or(requested).without_reserved();

		Self {
			authority: target.authority.to_ascii_lowercase(),
			client_id: target.client_id.to_ascii_lowercase(),
			policy: target.policy.map(str::to_owned),
			scope,
			access_token: response.access_token.clone(),
			token_type: response.token_type.clone(),
			expires_on: response.expires_on,
			extended_expires_on: response.extended_expires_on,
			tenant_id: response.tenant_id(),
			raw_client_info: response.client_info.clone(),
			raw_id_token: response.id_token.clone(),
			user,
		}
	}

	/// Key under which the record is stored.
	pub fn key(&self) -> Result<TokenCacheKey, ArgumentError> {
		TokenCacheKey::access_token(
			&self.authority,
			&self.client_id,
			&self.scope,
			self.user.as_ref(),
			self.policy.as_deref(),
		)
	}

	/// Returns `true` once `now + buffer` has reached the expiry, or when that sum is not
	/// representable.
	pub fn is_expired(&self, now: OffsetDateTime, buffer: Duration) -> bool {
		now.checked_add(buffer).is_none_or(|horizon| horizon >= self.expires_on)
	}

	/// Returns `true` once the extended expiry has passed.
	pub fn is_extended_expired(&self, now: OffsetDateTime) -> bool {
		now >= self.extended_expires_on
	}

	/// Cache identifier of the owning user.
	pub fn user_identifier(&self) -> Option<String> {
		self.user.as_ref().map(User::user_identifier)
	}
}

/// Cached refresh token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenCacheItem {
	/// Lowercased authority host.
	pub authority_host: String,
	/// Lowercased client id.
	pub client_id: String,
	/// Token value.
	pub refresh_token: TokenSecret,
	/// Raw client info.
	#[serde(default)]
	pub raw_client_info: Option<String>,
	/// Raw ID token.
	#[serde(default)]
	pub raw_id_token: Option<String>,
	/// User derived from the ID token and client info.
	#[serde(default)]
	pub user: Option<User>,
}
impl RefreshTokenCacheItem {
	/// Builds the record for a response that carried a refresh token.
	pub fn from_response(
		target: CacheTarget<'_>,
		response: &TokenSuccess,
		user: Option<User>,
	) -> Option<Self> {
		let refresh_token = response.refresh_token.clone()?;

		Some(Self {
			authority_host: target.authority_host.to_ascii_lowercase(),
			client_id: target.client_id.to_ascii_lowercase(),
			refresh_token,
			raw_client_info: response.client_info.clone(),
			raw_id_token: response.id_token.clone(),
			user,
		})
	}

	/// Key under which the record is stored.
	pub fn key(&self) -> Result<TokenCacheKey, ArgumentError> {
		TokenCacheKey::refresh_token(&self.authority_host, &self.client_id, self.user.as_ref())
	}

	/// Cache identifier of the owning user.
	pub fn user_identifier(&self) -> Option<String> {
		self.user.as_ref().map(User::user_identifier)
	}
}
