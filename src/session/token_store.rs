//! In-memory authoritative token cache mirrored to the persistence adapter.

// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	obs::events,
	store::{self, SessionStore, StoreError, StoreKey, StoreSlot},
};

/// Current [`TokenRecord`] plus its durability mirror.
///
/// Records are swapped as a whole, so readers observe either the previous record or the new
/// one. Mirror writes are serialized and always persist the latest in-memory value, so the
/// persisted copy can lag behind memory but never overtake it with an older record.
pub struct TokenStore {
	current: RwLock<Option<TokenRecord>>,
	store: Arc<dyn SessionStore>,
	key: StoreKey,
	writer: AsyncMutex<()>,
}
impl TokenStore {
	/// Creates an empty token store persisting under `namespace`.
	pub fn new(store: Arc<dyn SessionStore>, namespace: &str) -> Self {
		Self {
			current: RwLock::new(None),
			store,
			key: StoreKey::new(namespace, StoreSlot::TokenRecord),
			writer: AsyncMutex::new(()),
		}
	}

	/// Persistence key of the token record.
	pub fn key(&self) -> &StoreKey {
		&self.key
	}

	/// Current record.
	pub fn current(&self) -> Option<TokenRecord> {
		self.current.read().clone()
	}

	/// Atomically replaces the in-memory record; [`Self::sync`] mirrors it.
	pub fn replace(&self, record: TokenRecord) {
		*self.current.write() = Some(record);
	}

	/// Removes the in-memory record; [`Self::sync`] deletes the persisted copy.
	pub fn clear(&self) {
		self.current.write().take();
	}

	/// Loads the persisted record; undecodable data counts as absent.
	pub async fn load(&self) -> Result<Option<TokenRecord>, StoreError> {
		store::load_typed(self.store.as_ref(), &self.key)
			.await
			.inspect_err(|e| events::persistence_degraded("load", &self.key, e))
	}

	/// Writes the current in-memory record (or its absence) to the persistence adapter.
	pub async fn sync(&self) -> Result<(), StoreError> {
		let _writer = self.writer.lock().await;
		let snapshot = self.current();
		let (op, result) = match &snapshot {
			Some(record) =>
				("save", store::save_typed(self.store.as_ref(), &self.key, record).await),
			None => ("delete", self.store.delete(&self.key).await),
		};

		result.inspect_err(|e| events::persistence_degraded(op, &self.key, e))
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenStore")
			.field("key", &self.key)
			.field("current", &self.current.read())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{auth::ScopeSet, store::MemoryStore};

	#[derive(Debug, Default)]
	struct FailingStore;
	impl SessionStore for FailingStore {
		fn load<'a>(&'a self, _key: &'a StoreKey) -> store::StoreFuture<'a, Option<String>> {
			Box::pin(async { Err(StoreError::Backend { message: "offline".into() }) })
		}

		fn save<'a>(&'a self, _key: &'a StoreKey, _value: String) -> store::StoreFuture<'a, ()> {
			Box::pin(async { Err(StoreError::Backend { message: "offline".into() }) })
		}

		fn delete<'a>(&'a self, _key: &'a StoreKey) -> store::StoreFuture<'a, ()> {
			Box::pin(async { Err(StoreError::Backend { message: "offline".into() }) })
		}
	}

	fn record(access: &str) -> TokenRecord {
		TokenRecord::builder(ScopeSet::new(["streaming"]).expect("Scope fixture should be valid."))
			.access_token(access)
			.refresh_token("R1")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token record fixture should build.")
	}

	#[tokio::test]
	async fn replace_and_clear_mirror_to_storage() {
		let backend = Arc::new(MemoryStore::default());
		let tokens = TokenStore::new(backend.clone(), "player");

		tokens.replace(record("T1"));
		tokens.sync().await.expect("Replace should persist.");
		tokens.replace(record("T2"));
		tokens.sync().await.expect("Second replace should persist.");

		assert_eq!(tokens.current().map(|r| r.access_token.expose().to_owned()), Some("T2".into()));
		assert_eq!(
			tokens.load().await.expect("Load should succeed.").map(|r| r.access_token),
			Some(record("T2").access_token)
		);
		assert_eq!(tokens.key().to_string(), "player/token_record");

		tokens.clear();
		tokens.sync().await.expect("Clear should persist.");

		assert!(tokens.current().is_none());
		assert!(backend.is_empty());
	}

	#[tokio::test]
	async fn storage_failures_never_block_memory() {
		let tokens = TokenStore::new(Arc::new(FailingStore), "player");
		tokens.replace(record("T1"));

		let err = tokens.sync().await.expect_err("Failing backend should error.");

		assert!(matches!(err, StoreError::Backend { .. }));
		assert_eq!(tokens.current().map(|r| r.access_token), Some(record("T1").access_token));
		assert!(tokens.load().await.is_err());

		tokens.clear();
		tokens.sync().await.expect_err("Failing backend should error on delete.");

		assert!(tokens.current().is_none());
	}
}
