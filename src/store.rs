//! Persistence contract for cached token records and the built-in backends.
//!
//! Stores hold opaque `key → JSON` pairs split into an access-token and a refresh-token
//! partition. Keys come from [`TokenCacheKey`](crate::cache::TokenCacheKey); records are the
//! serialized cache items. Every mutation replaces one key as a unit, so concurrent readers
//! observe either the previous record or the new one, never a partial write.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::_prelude::*;

/// Boxed future returned by [`TokenCacheStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Logical partition of the cache layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePartition {
	/// Access-token records keyed with their scope set.
	AccessToken,
	/// Refresh-token records keyed without scope.
	RefreshToken,
}
impl CachePartition {
	/// Stable label used in logs and persisted snapshots.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::AccessToken => "access_token",
			Self::RefreshToken => "refresh_token",
		}
	}
}
impl Display for CachePartition {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Storage backend contract for the token cache.
pub trait TokenCacheStore
where
	Self: Send + Sync,
{
	/// Inserts or replaces the record stored under `key`.
	fn write<'a>(
		&'a self,
		partition: CachePartition,
		key: &'a str,
		value: String,
	) -> StoreFuture<'a, ()>;

	/// Reads the record stored under `key`, if any.
	fn read<'a>(&'a self, partition: CachePartition, key: &'a str)
	-> StoreFuture<'a, Option<String>>;

	/// Snapshot of every `(key, record)` pair in the partition.
	fn entries(&self, partition: CachePartition) -> StoreFuture<'_, Vec<(String, String)>>;

	/// Deletes the record under `key`, returning whether one existed.
	fn remove<'a>(&'a self, partition: CachePartition, key: &'a str) -> StoreFuture<'a, bool>;
}

/// Error type produced by [`TokenCacheStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// A record or snapshot could not be (de)serialized.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_error_converts_into_crate_error_with_source() {
		let store_error = StoreError::Backend { message: "disk unavailable".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk unavailable"));

		let source =
			StdError::source(&error).expect("Crate error should expose the store error as source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn partitions_serialize_as_snake_case() {
		let payload = serde_json::to_string(&CachePartition::RefreshToken)
			.expect("Partition should serialize to JSON.");

		assert_eq!(payload, "\"refresh_token\"");
		assert_eq!(CachePartition::AccessToken.to_string(), "access_token");
	}
}
