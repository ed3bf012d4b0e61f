//! Owned cache of resolved authority endpoints.

// self
use crate::{_prelude::*, authority::AuthorityEndpoints};

/// Resolved endpoints keyed by canonical authority string.
///
/// The registry is owned by one application instance; separate instances never share it.
/// Entries only speed up resolution: an authority resolves to the same endpoints with or
/// without one.
#[derive(Debug, Default)]
pub struct AuthorityRegistry(RwLock<HashMap<String, AuthorityEndpoints>>);
impl AuthorityRegistry {
	/// Endpoints recorded for `authority`, if any.
	pub fn get(&self, authority: &str) -> Option<AuthorityEndpoints> {
		self.0.read().get(authority).cloned()
	}

	/// Records endpoints for `authority`, keeping an existing entry if one raced in first.
	pub fn insert(&self, authority: &str, endpoints: AuthorityEndpoints) -> AuthorityEndpoints {
		self.0.write().entry(authority.to_owned()).or_insert(endpoints).clone()
	}

	/// Number of resolved authorities.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing has been resolved.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Forgets every resolved authority.
	pub fn clear(&self) {
		self.0.write().clear();
	}
}
