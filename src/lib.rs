//! OAuth 2.0 Authorization Code + PKCE session manager for a single end user.
//!
//! The session facade validates callbacks against a one-shot CSRF state and keeps the access
//! token fresh with a single-flight refresh. Tokens persist through a pluggable store.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod error;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod session;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		provider::ProviderDescriptor,
		session::{ManualClock, SessionConfig, SessionManager},
		store::{MemoryStore, SessionStore},
	};

	/// Session manager type alias used by reqwest-backed integration tests.
	pub type ReqwestTestSession = SessionManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Constructs a [`SessionManager`] backed by an in-memory store, a manual clock pinned to
	/// the current instant, and the reqwest transport used across integration tests.
	pub fn build_reqwest_test_session(
		descriptor: ProviderDescriptor,
		config: SessionConfig,
	) -> (ReqwestTestSession, Arc<MemoryStore>, ManualClock) {
		let store_backend = Arc::new(MemoryStore::default());
		let session = build_reqwest_test_session_with_store(
			descriptor,
			config,
			store_backend.clone(),
			ManualClock::default(),
		);

		(session.0, store_backend, session.1)
	}

	/// Same as [`build_reqwest_test_session`] but with a caller-provided persistence adapter
	/// and clock.
	pub fn build_reqwest_test_session_with_store(
		descriptor: ProviderDescriptor,
		config: SessionConfig,
		store: Arc<dyn SessionStore>,
		clock: ManualClock,
	) -> (ReqwestTestSession, ManualClock) {
		let session = SessionManager::with_http_client(
			config,
			descriptor,
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		)
		.store(store)
		.clock(Arc::new(clock.clone()))
		.build();

		(session, clock)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
