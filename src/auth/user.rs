//! Signed-in user model derived from an ID token and client info pair.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::de::DeserializeOwned;
// self
use crate::{_prelude::*, error::ClientError};

/// Claims read from the ID token payload.
///
/// Only the claims the library consumes are modeled; everything else is ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdToken {
	/// `iss` claim.
	#[serde(default, rename = "iss")]
	pub issuer: Option<String>,
	/// `sub` claim.
	#[serde(default, rename = "sub")]
	pub subject: Option<String>,
	/// `oid` claim (object id in the home tenant).
	#[serde(default, rename = "oid")]
	pub object_id: Option<String>,
	/// `tid` claim.
	#[serde(default, rename = "tid")]
	pub tenant_id: Option<String>,
	/// `name` claim.
	#[serde(default)]
	pub name: Option<String>,
	/// `preferred_username` claim (v2 endpoints).
	#[serde(default)]
	pub preferred_username: Option<String>,
	/// `upn` claim (v1 and ADFS endpoints).
	#[serde(default)]
	pub upn: Option<String>,
	/// `email` claim.
	#[serde(default)]
	pub email: Option<String>,
}
impl IdToken {
	/// Decodes the payload segment of a compact JWT without verifying its signature.
	pub fn parse(raw: &str) -> Result<Self, ClientError> {
		let mut segments = raw.split('.');
		let payload = match (segments.next(), segments.next()) {
			(Some(_header), Some(payload)) if !payload.is_empty() => payload,
			_ =>
				return Err(ClientError::MalformedIdToken {
					reason: "expected a compact JWT with a payload segment".into(),
				}),
		};

		decode_json(payload).map_err(|reason| ClientError::MalformedIdToken { reason })
	}

	/// Name a user would recognize: `preferred_username`, then `upn`, then `email`.
	pub fn displayable_id(&self) -> Option<&str> {
		self.preferred_username.as_deref().or(self.upn.as_deref()).or(self.email.as_deref())
	}
}

/// Decoded `client_info` returned alongside tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
	/// Home object id.
	pub uid: String,
	/// Home tenant id.
	pub utid: String,
}
impl ClientInfo {
	/// Decodes the base64url JSON blob sent by the token endpoint.
	pub fn parse(raw: &str) -> Result<Self, ClientError> {
		decode_json(raw).map_err(|reason| ClientError::MalformedClientInfo { reason })
	}
}

/// Immutable account description derived once per token response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
	/// Human-readable account name (UPN or email).
	pub displayable_id: Option<String>,
	/// Display name.
	pub name: Option<String>,
	/// Token issuer.
	pub identity_provider: Option<String>,
	/// Unique id in the issuing tenant (`oid`, falling back to `sub`).
	pub unique_id: Option<String>,
	/// Tenant that issued the ID token.
	pub tenant_id: Option<String>,
	/// Home object id from client info.
	pub uid: String,
	/// Home tenant id from client info.
	pub utid: String,
}
impl User {
	/// Builds a user from an ID token and optional client info.
	///
	/// Without client info (ADFS), the home ids fall back to the ID token's `oid`/`sub` and
	/// `tid` claims. A user with neither home id cannot be keyed and is rejected.
	pub fn from_tokens(
		id_token: &IdToken,
		client_info: Option<&ClientInfo>,
	) -> Result<Self, ClientError> {
		let unique_id = id_token.object_id.clone().or_else(|| id_token.subject.clone());
		let (uid, utid) = match client_info {
			Some(info) => (info.uid.clone(), info.utid.clone()),
			None => (
				unique_id.clone().unwrap_or_default(),
				id_token.tenant_id.clone().unwrap_or_default(),
			),
		};

		if uid.is_empty() && utid.is_empty() {
			return Err(ClientError::MalformedIdToken {
				reason: "no home object id or tenant id to identify the user".into(),
			});
		}

		Ok(Self {
			displayable_id: id_token.displayable_id().map(str::to_owned),
			name: id_token.name.clone(),
			identity_provider: id_token.issuer.clone(),
			unique_id,
			tenant_id: id_token.tenant_id.clone(),
			uid,
			utid,
		})
	}

	/// Builds a user that is identified only by its home ids.
	pub fn from_home_ids(uid: impl Into<String>, utid: impl Into<String>) -> Self {
		Self {
			displayable_id: None,
			name: None,
			identity_provider: None,
			unique_id: None,
			tenant_id: None,
			uid: uid.into(),
			utid: utid.into(),
		}
	}

	/// Stable cache identifier: `base64url(uid) + "." + base64url(utid)`.
	///
	/// An empty id is written as `.`, so the identifier always has a joiner and is never the
	/// bare `.` that stands for "no user" in cache keys.
	pub fn user_identifier(&self) -> String {
		let encode =
			|id: &str| if id.is_empty() { ".".to_owned() } else { URL_SAFE_NO_PAD.encode(id) };

		format!("{}.{}", encode(&self.uid), encode(&self.utid))
	}
}

fn decode_json<T>(segment: &str) -> Result<T, String>
where
	T: DeserializeOwned,
{
	let bytes = URL_SAFE_NO_PAD
		.decode(segment.trim_end_matches('='))
		.map_err(|e| format!("invalid base64url: {e}"))?;

	serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON: {e}"))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn jwt(claims: &str) -> String {
		format!(
			"{}.{}.",
			URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
			URL_SAFE_NO_PAD.encode(claims)
		)
	}

	#[test]
	fn user_combines_id_token_and_client_info() {
		let id_token = IdToken::parse(&jwt(
			r#"{"iss":"https://login.microsoftonline.com/t1/v2.0","oid":"o1","tid":"t1","name":"Ada","preferred_username":"ada@contoso.com"}"#,
		))
		.expect("ID token fixture should decode.");
		let client_info = ClientInfo::parse(&URL_SAFE_NO_PAD.encode(r#"{"uid":"u1","utid":"ut1"}"#))
			.expect("Client info fixture should decode.");
		let user = User::from_tokens(&id_token, Some(&client_info))
			.expect("Client info should identify the user.");

		assert_eq!(user.displayable_id.as_deref(), Some("ada@contoso.com"));
		assert_eq!(user.unique_id.as_deref(), Some("o1"));
		assert_eq!(user.uid, "u1");
		assert_eq!(user.utid, "ut1");
		assert_eq!(user.user_identifier(), "dTE.dXQx");
	}

	#[test]
	fn falls_back_to_id_token_claims_without_client_info() {
		let id_token = IdToken::parse(&jwt(r#"{"sub":"s1","tid":"t1","upn":"bob@fabrikam.com"}"#))
			.expect("ID token fixture should decode.");
		let user =
			User::from_tokens(&id_token, None).expect("ID token claims should identify the user.");

		assert_eq!(user.uid, "s1");
		assert_eq!(user.utid, "t1");
		assert_eq!(user.displayable_id.as_deref(), Some("bob@fabrikam.com"));
	}

	#[test]
	fn users_without_home_ids_are_rejected() {
		let id_token = IdToken::parse(&jwt(r#"{"name":"Nobody","upn":"nobody@contoso.com"}"#))
			.expect("ID token fixture should decode.");

		assert!(matches!(
			User::from_tokens(&id_token, None),
			Err(ClientError::MalformedIdToken { .. })
		));
		assert_eq!(User::from_home_ids("", "").user_identifier(), "...");
		assert_eq!(User::from_home_ids("uid", "").user_identifier(), "dWlk..");
	}

	#[test]
	fn malformed_inputs_are_client_errors() {
		assert!(matches!(
			IdToken::parse("not-a-jwt"),
			Err(ClientError::MalformedIdToken { .. })
		));
		assert!(matches!(
			ClientInfo::parse("%%%"),
			Err(ClientError::MalformedClientInfo { .. })
		));
	}
}
