//! Redacting wrapper for access tokens, refresh tokens, and authorization codes.

// self
use crate::_prelude::*;

/// Credential string that never appears in `Debug` or `Display` output.
///
/// Serialization is transparent so cache records persist the real value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a credential string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the credential. Callers must avoid logging it.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "TokenSecret(<redacted; {} bytes>)", self.0.len())
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatters_hide_credential() {
		let secret = TokenSecret::new("eyJ0eXAi");

		assert_eq!(format!("{secret:?}"), "TokenSecret(<redacted; 8 bytes>)");
		assert_eq!(format!("{secret}"), "<redacted>");
		assert_eq!(secret.expose(), "eyJ0eXAi");
	}

	#[test]
	fn serializes_as_plain_string() {
		let json =
			serde_json::to_string(&TokenSecret::new("rt")).expect("Secret should serialize.");

		assert_eq!(json, "\"rt\"");
	}
}
