//! Thread-safe in-memory [`TokenCacheStore`] for tests and short-lived processes.

// self
use crate::{
	_prelude::*,
	store::{CachePartition, StoreError, StoreFuture, TokenCacheStore},
};

type PartitionMap = HashMap<CachePartition, HashMap<String, String>>;

/// Storage backend that keeps serialized records in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<PartitionMap>>);
impl MemoryStore {
	/// Number of records in the partition.
	pub fn len(&self, partition: CachePartition) -> usize {
		self.0.read().get(&partition).map_or(0, HashMap::len)
	}

	/// Returns `true` when the partition holds no records.
	pub fn is_empty(&self, partition: CachePartition) -> bool {
		self.len(partition) == 0
	}

	fn write_now(&self, partition: CachePartition, key: &str, value: String) {
		self.0.write().entry(partition).or_default().insert(key.to_owned(), value);
	}

	fn read_now(&self, partition: CachePartition, key: &str) -> Option<String> {
		self.0.read().get(&partition).and_then(|map| map.get(key).cloned())
	}

	fn entries_now(&self, partition: CachePartition) -> Vec<(String, String)> {
		self.0
			.read()
			.get(&partition)
			.map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
			.unwrap_or_default()
	}

	fn remove_now(&self, partition: CachePartition, key: &str) -> bool {
		self.0.write().get_mut(&partition).is_some_and(|map| map.remove(key).is_some())
	}
}
impl TokenCacheStore for MemoryStore {
	fn write<'a>(
		&'a self,
		partition: CachePartition,
		key: &'a str,
		value: String,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.write_now(partition, key, value);

			Ok::<_, StoreError>(())
		})
	}

	fn read<'a>(
		&'a self,
		partition: CachePartition,
		key: &'a str,
	) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move { Ok(self.read_now(partition, key)) })
	}

	fn entries(&self, partition: CachePartition) -> StoreFuture<'_, Vec<(String, String)>> {
		Box::pin(async move { Ok(self.entries_now(partition)) })
	}

	fn remove<'a>(&'a self, partition: CachePartition, key: &'a str) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.remove_now(partition, key)) })
	}
}
