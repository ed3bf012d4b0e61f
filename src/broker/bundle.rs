//! Request and result bundles exchanged with the broker.

// self
use crate::{
	_prelude::*,
	auth::{ClientInfo, IdToken, ScopeSet, TokenSecret, User},
	error::ClientError,
};

/// Well-known bundle keys.
pub mod keys {
	/// Requesting client id.
	pub const CLIENT_ID: &str = "account.clientid.key";
	/// Redirect URI registered for the client.
	pub const REDIRECT_URI: &str = "account.redirect";
	/// Space-delimited scopes.
	pub const SCOPE: &str = "account.scope";
	/// Canonical authority.
	pub const AUTHORITY: &str = "account.authority";
	/// Correlation id.
	pub const CORRELATION_ID: &str = "account.correlationid";
	/// `"true"` to bypass the broker's access-token cache.
	pub const FORCE_REFRESH: &str = "force.refresh";
	/// Login hint.
	pub const LOGIN_HINT: &str = "account.login.hint";
	/// Home account id (`uid.utid`).
	pub const HOME_ACCOUNT_ID: &str = "account.home.account.id";
	/// Prompt behavior.
	pub const PROMPT: &str = "account.prompt";

	/// `"true"` or `"false"`.
	pub const RESULT_SUCCESS: &str = "broker.result.success";
	/// OAuth-style error code on failure.
	pub const RESULT_ERROR_CODE: &str = "broker.result.error.code";
	/// Error description on failure.
	pub const RESULT_ERROR_DESCRIPTION: &str = "broker.result.error.description";
	/// Access token.
	pub const RESULT_ACCESS_TOKEN: &str = "broker.result.access.token";
	/// Token type.
	pub const RESULT_TOKEN_TYPE: &str = "broker.result.token.type";
	/// Raw ID token.
	pub const RESULT_ID_TOKEN: &str = "broker.result.id.token";
	/// Raw client info.
	pub const RESULT_CLIENT_INFO: &str = "broker.result.client.info";
	/// Expiry as Unix seconds.
	pub const RESULT_EXPIRES_ON: &str = "broker.result.expires.on";
	/// Granted scopes.
	pub const RESULT_SCOPE: &str = "broker.result.scope";
	/// Tenant that issued the token.
	pub const RESULT_TENANT_ID: &str = "broker.result.tenant.id";
	/// Authority that issued the token.
	pub const RESULT_AUTHORITY: &str = "broker.result.authority";
}

/// Error code the broker uses when the user dismisses its UI.
pub const USER_CANCELLED: &str = "user_cancelled";

/// String-keyed bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerBundle(BTreeMap<String, String>);
impl BrokerBundle {
	/// Inserts or replaces `key`.
	pub fn insert(&mut self, key: &str, value: impl Into<String>) {
		self.0.insert(key.to_owned(), value.into());
	}

	/// Builder-style variant of [`BrokerBundle::insert`].
	pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
		self.insert(key, value);

		self
	}

	/// Value under `key`.
	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` when the bundle holds no entries.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl<K, V> FromIterator<(K, V)> for BrokerBundle
where
	K: Into<String>,
	V: Into<String>,
{
	fn from_iter<I>(iter: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
	{
		Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}

/// Decoded broker answer.
#[derive(Clone, Debug)]
pub enum BrokerResult {
	/// Tokens were issued.
	Success(BrokerTokens),
	/// The broker reported an error.
	Failure {
		/// Error code.
		error_code: String,
		/// Description, if any.
		description: Option<String>,
	},
	/// The user dismissed the broker UI.
	Cancelled,
}
impl BrokerResult {
	/// Decodes a result bundle.
	pub fn from_bundle(bundle: &BrokerBundle) -> Result<Self, ClientError> {
		let success = match bundle.get(keys::RESULT_SUCCESS) {
			Some(flag) if flag.eq_ignore_ascii_case("true") => true,
			Some(flag) if flag.eq_ignore_ascii_case("false") => false,
			_ => return Err(ClientError::MalformedBrokerResult { field: keys::RESULT_SUCCESS }),
		};

		if !success {
			let error_code = bundle
				.get(keys::RESULT_ERROR_CODE)
				.ok_or(ClientError::MalformedBrokerResult { field: keys::RESULT_ERROR_CODE })?;

			if error_code == USER_CANCELLED {
				return Ok(Self::Cancelled);
			}

			return Ok(Self::Failure {
				error_code: error_code.to_owned(),
				description: bundle.get(keys::RESULT_ERROR_DESCRIPTION).map(str::to_owned),
			});
		}

		let access_token = bundle
			.get(keys::RESULT_ACCESS_TOKEN)
			.filter(|token| !token.is_empty())
			.ok_or(ClientError::MalformedBrokerResult { field: keys::RESULT_ACCESS_TOKEN })?;
		let expires_on = bundle
			.get(keys::RESULT_EXPIRES_ON)
			.and_then(|raw| raw.parse::<i64>().ok())
			.and_then(|seconds| OffsetDateTime::from_unix_timestamp(seconds).ok())
			.ok_or(ClientError::MalformedBrokerResult { field: keys::RESULT_EXPIRES_ON })?;
		let scope = bundle
			.get(keys::RESULT_SCOPE)
			.map(ScopeSet::from_str)
			.transpose()
			.map_err(|_| ClientError::MalformedBrokerResult { field: keys::RESULT_SCOPE })?;

		Ok(Self::Success(BrokerTokens {
			access_token: TokenSecret::new(access_token),
			token_type: bundle.get(keys::RESULT_TOKEN_TYPE).unwrap_or("Bearer").to_owned(),
			id_token: bundle.get(keys::RESULT_ID_TOKEN).map(str::to_owned),
			client_info: bundle.get(keys::RESULT_CLIENT_INFO).map(str::to_owned),
			expires_on,
			scope,
			tenant_id: bundle.get(keys::RESULT_TENANT_ID).map(str::to_owned),
			authority: bundle.get(keys::RESULT_AUTHORITY).map(str::to_owned),
		}))
	}
}

/// Tokens returned by the broker.
#[derive(Clone, Debug)]
pub struct BrokerTokens {
	/// Access token.
	pub access_token: TokenSecret,
	/// Token type.
	pub token_type: String,
	/// Raw ID token.
	pub id_token: Option<String>,
	/// Raw client info.
	pub client_info: Option<String>,
	/// Expiry.
	pub expires_on: OffsetDateTime,
	/// Granted scopes.
	pub scope: Option<ScopeSet>,
	/// Issuing tenant.
	pub tenant_id: Option<String>,
	/// Issuing authority.
	pub authority: Option<String>,
}
impl BrokerTokens {
	/// Signed-in user, when the broker returned an ID token.
	pub fn user(&self) -> Result<Option<User>, ClientError> {
		let Some(raw) = &self.id_token else {
			return Ok(None);
		};
		let id_token = IdToken::parse(raw)?;
		let client_info = self.client_info.as_deref().map(ClientInfo::parse).transpose()?;

		User::from_tokens(&id_token, client_info.as_ref()).map(Some)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn success_bundle_decodes() {
		let bundle = BrokerBundle::default()
			.with(keys::RESULT_SUCCESS, "true")
			.with(keys::RESULT_ACCESS_TOKEN, "at")
			.with(keys::RESULT_EXPIRES_ON, "1700000000")
			.with(keys::RESULT_SCOPE, "User.Read Mail.Read");
		let BrokerResult::Success(tokens) =
			BrokerResult::from_bundle(&bundle).expect("Bundle should decode.")
		else {
			panic!("Bundle should decode as success.");
		};

		assert_eq!(tokens.access_token.expose(), "at");
		assert_eq!(tokens.token_type, "Bearer");
		assert_eq!(tokens.expires_on.unix_timestamp(), 1_700_000_000);
		assert!(tokens.user().expect("User decoding should succeed.").is_none());
		assert_eq!(tokens.scope.map(|scope| scope.len()), Some(2));
	}

	#[test]
	fn failure_and_cancel_bundles() {
		let failure = BrokerBundle::from_iter([
			(keys::RESULT_SUCCESS, "false"),
			(keys::RESULT_ERROR_CODE, "invalid_grant"),
		]);
		let cancelled = BrokerBundle::from_iter([
			(keys::RESULT_SUCCESS, "false"),
			(keys::RESULT_ERROR_CODE, USER_CANCELLED),
		]);

		assert!(matches!(
			BrokerResult::from_bundle(&failure),
			Ok(BrokerResult::Failure { error_code, description: None })
				if error_code == "invalid_grant"
		));
		assert!(matches!(BrokerResult::from_bundle(&cancelled), Ok(BrokerResult::Cancelled)));
	}

	#[test]
	fn malformed_bundles_name_the_missing_field() {
		let no_flag = BrokerBundle::default();
		let no_token = BrokerBundle::from_iter([(keys::RESULT_SUCCESS, "true")]);
		let bad_expiry = BrokerBundle::from_iter([
			(keys::RESULT_SUCCESS, "true"),
			(keys::RESULT_ACCESS_TOKEN, "at"),
			(keys::RESULT_EXPIRES_ON, "soon"),
		]);

		for (bundle, expected) in [
			(no_flag, keys::RESULT_SUCCESS),
			(no_token, keys::RESULT_ACCESS_TOKEN),
			(bad_expiry, keys::RESULT_EXPIRES_ON),
		] {
			assert!(matches!(
				BrokerResult::from_bundle(&bundle),
				Err(ClientError::MalformedBrokerResult { field }) if field == expected
			));
		}
	}
}
