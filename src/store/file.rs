//! File-backed [`SessionStore`] that survives process restarts.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{SessionStore, StoreError, StoreFuture, StoreKey},
};

/// Persists every key into one JSON snapshot after each mutation.
///
/// Writes go to a sibling `.tmp` file that is synced and renamed over the snapshot, so a crash
/// mid-write leaves the previous snapshot intact.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<Mutex<BTreeMap<String, String>>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	///
	/// A snapshot that cannot be parsed is ignored (and overwritten by the next write) rather
	/// than failing the open; IO failures are reported.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(Mutex::new(snapshot)) })
	}

	/// Location of the JSON snapshot.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
		if !path.exists() {
			return Ok(BTreeMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(BTreeMap::new());
		}

		match serde_json::from_slice(&bytes) {
			Ok(entries) => Ok(entries),
			Err(_e) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(
					path = %path.display(),
					error = %_e,
					"Ignoring corrupt session snapshot."
				);

				Ok(BTreeMap::new())
			},
		}
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &BTreeMap<String, String>) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn mutate(
		&self,
		f: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
	) -> Result<(), StoreError> {
		let mut guard = self.inner.lock();

		if f(&mut guard) {
			self.persist_locked(&guard)?;
		}

		Ok(())
	}
}
impl SessionStore for FileStore {
	fn load<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move { Ok(self.inner.lock().get(&key.to_string()).cloned()) })
	}

	fn save<'a>(&'a self, key: &'a StoreKey, value: String) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.mutate(|map| {
				map.insert(key.to_string(), value);

				true
			})
		})
	}

	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.mutate(|map| map.remove(&key.to_string()).is_some()) })
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;
	use crate::store::StoreSlot;

	fn temp_path(tag: &str) -> PathBuf {
		let unique = format!(
			"oauth2_session_file_store_{tag}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[tokio::test]
	async fn values_survive_reopen_and_delete_persists() {
		let path = temp_path("reopen");
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let token_key = StoreKey::new("ns", StoreSlot::TokenRecord);
		let context_key = StoreKey::new("ns", StoreSlot::EphemeralContext);

		store.save(&token_key, "token".into()).await.expect("Failed to save token value.");
		store.save(&context_key, "context".into()).await.expect("Failed to save context value.");
		store.delete(&context_key).await.expect("Failed to delete context value.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");

		assert_eq!(
			reopened.load(&token_key).await.expect("Failed to load token value.").as_deref(),
			Some("token")
		);
		assert_eq!(reopened.load(&context_key).await.expect("Failed to load context."), None);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[tokio::test]
	async fn corrupt_snapshot_opens_empty() {
		let path = temp_path("corrupt");

		fs::write(&path, b"{ definitely not json").expect("Failed to seed corrupt snapshot.");

		let store = FileStore::open(&path).expect("Corrupt snapshots should not fail the open.");
		let key = StoreKey::new("ns", StoreSlot::TokenRecord);

		assert_eq!(store.load(&key).await.expect("Load should succeed."), None);

		store.save(&key, "fresh".into()).await.expect("Save should overwrite the snapshot.");

		let raw = fs::read_to_string(&path).expect("Snapshot should be readable.");

		assert!(raw.contains("ns/token_record"));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
