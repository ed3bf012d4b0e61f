//! Composite cache keys.
//!
//! A key joins base64url-encoded components with `$`. Authority and client id are lowercased
//! and scopes are sorted before encoding, so logically equal inputs always produce the same
//! key. Unset components are written as the single `.` sentinel. Base64url output never
//! contains `.`, and a user segment always joins its two home ids with `.`, so no encoded
//! component or user segment can equal the bare sentinel.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, User},
	error::ArgumentError,
};

/// Placeholder written for unset key components.
pub const KEY_SENTINEL: &str = ".";
const SEPARATOR: char = '$';

/// Opaque key addressing one record in a cache partition.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenCacheKey(String);
impl TokenCacheKey {
	/// Key for an access token: `authority$client_id$scopes$user[$policy]`.
	///
	/// A `None` user is encoded as the sentinel.
	pub fn access_token(
		authority: &str,
		client_id: &str,
		scopes: &ScopeSet,
		user: Option<&User>,
		policy: Option<&str>,
	) -> Result<Self, ArgumentError> {
		let mut segments = vec![
			encode_required(authority, "authority")?,
			encode_required(client_id, "client_id")?,
			encode(&scopes.normalized()),
			user_segment(user),
		];

		if let Some(policy) = policy {
			segments.push(encode(&policy.to_ascii_lowercase()));
		}

		Ok(Self::join(segments))
	}

	/// Key for a refresh token: `authority_host$client_id$user`.
	pub fn refresh_token(
		authority_host: &str,
		client_id: &str,
		user: Option<&User>,
	) -> Result<Self, ArgumentError> {
		let segments = vec![
			encode_required(authority_host, "authority_host")?,
			encode_required(client_id, "client_id")?,
			user_segment(user),
		];

		Ok(Self::join(segments))
	}

	/// Returns the encoded key.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	fn join(segments: Vec<String>) -> Self {
		let mut joined = String::new();

		for (idx, segment) in segments.into_iter().enumerate() {
			if idx > 0 {
				joined.push(SEPARATOR);
			}

			joined.push_str(&segment);
		}

		Self(joined)
	}
}
impl Display for TokenCacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}
impl AsRef<str> for TokenCacheKey {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

fn encode_required(value: &str, component: &'static str) -> Result<String, ArgumentError> {
	let trimmed = value.trim();

	if trimmed.is_empty() {
		return Err(ArgumentError::EmptyKeyComponent { component });
	}

	Ok(encode(&trimmed.to_ascii_lowercase()))
}

fn encode(value: &str) -> String {
	if value.is_empty() { KEY_SENTINEL.to_owned() } else { URL_SAFE_NO_PAD.encode(value) }
}

fn user_segment(user: Option<&User>) -> String {
	user.map(User::user_identifier).unwrap_or_else(|| KEY_SENTINEL.to_owned())
}
