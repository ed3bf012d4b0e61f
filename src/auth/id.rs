//! Application (client) identifier.

// std
use std::ops::Deref;
// self
use crate::_prelude::*;

const CLIENT_ID_MAX_LEN: usize = 128;

/// Why a client id was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// Empty input.
	#[error("Client id cannot be empty.")]
	Empty,
	/// Whitespace anywhere in the value.
	#[error("Client id contains whitespace.")]
	ContainsWhitespace,
	/// Longer than the registration portal allows.
	#[error("Client id exceeds {max} characters.")]
	TooLong {
		/// Maximum permitted character count.
		max: usize,
	},
}

/// Application (client) identifier registered with the identity platform.
///
/// The original casing is kept for the wire; cache keys use [`ClientId::normalized`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);
impl ClientId {
	/// Validates `value`.
	pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
		Self::try_from(value.into())
	}

	/// Lower-cased form used when deriving cache keys.
	pub fn normalized(&self) -> String {
		self.0.to_ascii_lowercase()
	}
}
impl TryFrom<String> for ClientId {
	type Error = IdentifierError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		if value.is_empty() {
			Err(IdentifierError::Empty)
		} else if value.chars().any(char::is_whitespace) {
			Err(IdentifierError::ContainsWhitespace)
		} else if value.len() > CLIENT_ID_MAX_LEN {
			Err(IdentifierError::TooLong { max: CLIENT_ID_MAX_LEN })
		} else {
			Ok(Self(value))
		}
	}
}
impl FromStr for ClientId {
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl From<ClientId> for String {
	fn from(value: ClientId) -> Self {
		value.0
	}
}
impl Deref for ClientId {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl AsRef<str> for ClientId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl Debug for ClientId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "ClientId({})", self.0)
	}
}
impl Display for ClientId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn rejects_whitespace_empty_and_oversized_values() {
		assert_eq!(ClientId::new(" 4b0db8c2"), Err(IdentifierError::ContainsWhitespace));
		assert_eq!(ClientId::new(""), Err(IdentifierError::Empty));
		assert!(ClientId::new("a".repeat(CLIENT_ID_MAX_LEN)).is_ok());
		assert_eq!(
			ClientId::new("a".repeat(CLIENT_ID_MAX_LEN + 1)),
			Err(IdentifierError::TooLong { max: CLIENT_ID_MAX_LEN })
		);
	}

	#[test]
	fn keeps_casing_but_normalizes_for_keys() {
		let client = ClientId::new("4B0DB8C2-9F26-4417-8BDE-3F0E3656F8E0")
			.expect("GUID client id should be valid.");

		assert_eq!(client.normalized(), "4b0db8c2-9f26-4417-8bde-3f0e3656f8e0");
		assert_eq!(client.to_string(), "4B0DB8C2-9F26-4417-8BDE-3F0E3656F8E0");
	}

	#[test]
	fn serde_enforces_validation() {
		let client: ClientId =
			serde_json::from_str("\"my-app\"").expect("Client id should deserialize.");

		assert_eq!(&*client, "my-app");
		assert!(serde_json::from_str::<ClientId>("\" my-app\"").is_err());
	}
}
