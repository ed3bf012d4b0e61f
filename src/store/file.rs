//! File-backed [`TokenCacheStore`] that persists the whole cache as one JSON document.

// std
use std::{
	fs::{self, File},
	io::{self, ErrorKind, Write},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{CachePartition, StoreError, StoreFuture, TokenCacheStore},
};

/// On-disk layout: one object per partition mapping cache keys to serialized records.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Snapshot {
	#[serde(default)]
	access_token: BTreeMap<String, String>,
	#[serde(default)]
	refresh_token: BTreeMap<String, String>,
}
impl Snapshot {
	fn partition(&self, partition: CachePartition) -> &BTreeMap<String, String> {
		match partition {
			CachePartition::AccessToken => &self.access_token,
			CachePartition::RefreshToken => &self.refresh_token,
		}
	}

	fn partition_mut(&mut self, partition: CachePartition) -> &mut BTreeMap<String, String> {
		match partition {
			CachePartition::AccessToken => &mut self.access_token,
			CachePartition::RefreshToken => &mut self.refresh_token,
		}
	}
}

/// Persists cache records to a JSON file after each mutation.
///
/// Writes go to a sibling `.tmp` file which is then renamed over the target, so a crash
/// mid-write leaves the previous snapshot intact.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		let bytes = match fs::read(path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Snapshot::default()),
			Err(e) => return Err(io_failure("read", path, e)),
		};

		if bytes.is_empty() {
			return Ok(Snapshot::default());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("{} is not a cache snapshot: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
			Some(parent) => fs::create_dir_all(parent).map_err(|e| io_failure("create", parent, e)),
			None => Ok(()),
		}
	}

	// Called with the write lock held so snapshots reach the disk in mutation order.
	fn persist_locked(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
		let serialized =
			serde_json::to_vec_pretty(snapshot).map_err(|e| StoreError::Serialization {
				message: format!("cache snapshot could not be encoded: {e}"),
			})?;
		let tmp_path = self.path.with_extension("tmp");
		let mut file = File::create(&tmp_path).map_err(|e| io_failure("create", &tmp_path, e))?;

		file.write_all(&serialized).map_err(|e| io_failure("write", &tmp_path, e))?;
		file.sync_all().map_err(|e| io_failure("sync", &tmp_path, e))?;
		drop(file);

		fs::rename(&tmp_path, &self.path).map_err(|e| io_failure("replace", &self.path, e))
	}
}
impl TokenCacheStore for FileStore {
	fn write<'a>(
		&'a self,
		partition: CachePartition,
		key: &'a str,
		value: String,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let records = guard.partition_mut(partition);

			if records.get(key) == Some(&value) {
				return Ok(());
			}

			records.insert(key.to_owned(), value);

			self.persist_locked(&guard)
		})
	}

	fn read<'a>(
		&'a self,
		partition: CachePartition,
		key: &'a str,
	) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move { Ok(self.inner.read().partition(partition).get(key).cloned()) })
	}

	fn entries(&self, partition: CachePartition) -> StoreFuture<'_, Vec<(String, String)>> {
		Box::pin(async move {
			Ok(self
				.inner
				.read()
				.partition(partition)
				.iter()
				.map(|(k, v)| (k.clone(), v.clone()))
				.collect())
		})
	}

	fn remove<'a>(&'a self, partition: CachePartition, key: &'a str) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			if guard.partition_mut(partition).remove(key).is_none() {
				return Ok(false);
			}

			self.persist_locked(&guard)?;

			Ok(true)
		})
	}
}

fn io_failure(action: &str, path: &Path, error: io::Error) -> StoreError {
	StoreError::Backend { message: format!("failed to {action} {}: {error}", path.display()) }
}
