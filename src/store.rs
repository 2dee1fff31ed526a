//! Persistence adapter contract and built-in store implementations.
//!
//! The session manager treats the store as a durability mirror: it writes a versioned JSON
//! envelope per key and reads it back only at startup. Anything that fails to decode is
//! reported through [`obs::events`](crate::obs::events) and treated as absent.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{_prelude::*, obs::events};

/// Boxed future returned by [`SessionStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Key/value persistence adapter consumed by the session manager.
///
/// Implementations must report backend failures as [`StoreError`] and absence as `Ok(None)`;
/// the two are handled differently by the manager.
pub trait SessionStore
where
	Self: Send + Sync,
{
	/// Loads the raw value stored under `key`, if any.
	fn load<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<String>>;

	/// Stores `value` under `key`, replacing any previous value.
	fn save<'a>(&'a self, key: &'a StoreKey, value: String) -> StoreFuture<'a, ()>;

	/// Removes `key`; deleting an absent key succeeds.
	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`SessionStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced while encoding or decoding a value.
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

/// Logical slots the session manager persists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreSlot {
	/// Pending [`EphemeralAuthContext`](crate::session::EphemeralAuthContext).
	EphemeralContext,
	/// Current [`TokenRecord`](crate::auth::TokenRecord).
	TokenRecord,
}
impl StoreSlot {
	/// Returns the key suffix used for this slot.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::EphemeralContext => "ephemeral_context",
			Self::TokenRecord => "token_record",
		}
	}
}

/// Namespaced key identifying one persisted value (rendered as `namespace/slot`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
	/// Namespace shared by every key of one session manager.
	pub namespace: String,
	/// Slot within the namespace.
	pub slot: StoreSlot,
}
impl StoreKey {
	/// Builds a key for `slot` inside `namespace`.
	pub fn new(namespace: impl Into<String>, slot: StoreSlot) -> Self {
		Self { namespace: namespace.into(), slot }
	}
}
impl Display for StoreKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}/{}", self.namespace, self.slot.as_str())
	}
}

/// Envelope version written by this crate.
pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
	version: u32,
	payload: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
	version: u32,
}

#[derive(Deserialize)]
struct Envelope<T> {
	payload: T,
}

/// Encodes `payload` inside a versioned envelope.
pub fn encode<T>(payload: &T) -> Result<String, StoreError>
where
	T: Serialize,
{
	serde_json::to_string(&EnvelopeRef { version: ENVELOPE_VERSION, payload }).map_err(|e| {
		StoreError::Serialization { message: format!("Failed to encode envelope: {e}") }
	})
}

/// Decodes a versioned envelope, rejecting foreign versions and shape mismatches.
pub fn decode<T>(raw: &str) -> Result<T, StoreError>
where
	T: DeserializeOwned,
{
	let header: EnvelopeHeader = serde_json::from_str(raw).map_err(|e| {
		StoreError::Serialization { message: format!("Envelope header is unreadable: {e}") }
	})?;

	if header.version != ENVELOPE_VERSION {
		return Err(StoreError::Serialization {
			message: format!("Unsupported envelope version {}", header.version),
		});
	}

	let mut de = serde_json::Deserializer::from_str(raw);
	let envelope: Envelope<T> = serde_path_to_error::deserialize(&mut de).map_err(|e| {
		StoreError::Serialization {
			message: format!("Envelope payload is invalid at {}: {}", e.path(), e.inner()),
		}
	})?;

	Ok(envelope.payload)
}

/// Loads and decodes `key`; undecodable values are logged and reported as absent.
pub async fn load_typed<T>(
	store: &dyn SessionStore,
	key: &StoreKey,
) -> Result<Option<T>, StoreError>
where
	T: DeserializeOwned,
{
	let Some(raw) = store.load(key).await? else {
		return Ok(None);
	};

	match decode(&raw) {
		Ok(value) => Ok(Some(value)),
		Err(e) => {
			events::unparseable_persisted(key, &e.to_string());

			Ok(None)
		},
	}
}

/// Encodes and saves `value` under `key`.
pub async fn save_typed<T>(
	store: &dyn SessionStore,
	key: &StoreKey,
	value: &T,
) -> Result<(), StoreError>
where
	T: Serialize,
{
	let raw = encode(value)?;

	store.save(key, raw).await
}
