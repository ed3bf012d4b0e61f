//! Scope sets as requested, sent on the wire, and stored in the cache.

// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError};
// self
use crate::_prelude::*;

/// Scopes the library always sends and callers may not request explicitly.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Why a scope list was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// An entry was empty.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// An entry contained whitespace.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// Offending entry.
		scope: String,
	},
}

/// Deduplicated, sorted set of OAuth scopes.
///
/// Sorting happens once at construction, so [`ScopeSet::normalized`] is the same string for the
/// same scopes in any order. That string feeds cache keys and the `scope` form parameter.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeSet(Arc<[String]>);
impl ScopeSet {
	/// Validates and sorts `scopes`.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Ok(Self(normalize(scopes)?))
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// `true` for the empty set, which a cached access token treats as unrestricted.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Exact, case-sensitive membership.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.binary_search_by(|candidate| candidate.as_str().cmp(scope)).is_ok()
	}

	/// Scopes in sorted order.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(|s| s.as_str())
	}

	/// Space-joined form.
	pub fn normalized(&self) -> String {
		self.0.join(" ")
	}

	/// Returns true when every scope in `other` is present in `self`.
	pub fn is_superset_of(&self, other: &ScopeSet) -> bool {
		other.iter().all(|scope| self.contains(scope))
	}

	/// Returns true when the sets share at least one scope.
	pub fn intersects(&self, other: &ScopeSet) -> bool {
		other.iter().any(|scope| self.contains(scope))
	}

	/// Returns the union of both sets.
	pub fn union(&self, other: &ScopeSet) -> ScopeSet {
		let merged = self.0.iter().chain(other.0.iter()).cloned().collect::<BTreeSet<_>>();

		Self(Arc::from(merged.into_iter().collect::<Vec<_>>()))
	}

	/// Returns the set extended with [`RESERVED_SCOPES`], as sent on the wire.
	pub fn with_reserved(&self) -> ScopeSet {
		let reserved = RESERVED_SCOPES.iter().map(|scope| scope.to_string()).collect::<Vec<_>>();

		self.union(&Self(Arc::from(reserved)))
	}

	/// Returns the set without [`RESERVED_SCOPES`], as stored in the cache.
	pub fn without_reserved(&self) -> ScopeSet {
		let kept = self
			.0
			.iter()
			.filter(|scope| !RESERVED_SCOPES.contains(&scope.as_str()))
			.cloned()
			.collect::<Vec<_>>();

		Self(Arc::from(kept))
	}

	/// Returns the first reserved scope found in the set, if any.
	pub fn reserved_scope(&self) -> Option<&str> {
		self.iter().find(|scope| RESERVED_SCOPES.contains(scope))
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.0).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	/// Parses a space-delimited `scope` value; an empty string yields an empty set.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}
		if s.chars().all(char::is_whitespace) {
			return Err(ScopeValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.collect_seq(self.iter())
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		ScopeSet::new(values).map_err(DeError::custom)
	}
}

fn normalize<I, S>(scopes: I) -> Result<Arc<[String]>, ScopeValidationError>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut set = BTreeSet::new();

	for scope in scopes {
		let owned: String = scope.into();

		if owned.is_empty() {
			return Err(ScopeValidationError::Empty);
		}
		if owned.chars().any(char::is_whitespace) {
			return Err(ScopeValidationError::ContainsWhitespace { scope: owned });
		}

		set.insert(owned);
	}

	Ok(Arc::from(set.into_iter().collect::<Vec<_>>()))
}
