//! Session manager facade.
//!
//! [`SessionManager`] composes the authorization request builder, the callback/exchange
//! handler, the token store, the refresh scheduler, and the entitlement verifier behind one
//! cloneable handle. In-memory state (epoch, pending authorization, token record, session
//! state) mutates under a single lock and is the source of truth while the process is live;
//! the persistence adapter only mirrors it and is read back by [`SessionManager::restore`].
//!
//! Every exchange, refresh, and entitlement result is tagged with the session epoch it was
//! launched in. [`SessionManager::begin_authorization`] and [`SessionManager::logout`] bump
//! the epoch, so results that arrive afterwards are discarded instead of resurrecting a
//! cleared session.

pub mod authorize;
pub mod clock;
pub mod config;
pub mod entitlement;
pub mod refresh;
pub mod state;
pub mod token_store;

mod exchange;

pub use authorize::*;
pub use clock::*;
pub use config::*;
pub use entitlement::*;
pub use refresh::*;
pub use state::*;
pub use token_store::*;

// crates.io
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	auth::{Entitlement, TokenRecord},
	http::ProviderHttpClient,
	oauth::{TokenEndpoint, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan, events},
	provider::{DefaultProviderStrategy, ProviderDescriptor, ProviderStrategy},
	store::{self, MemoryStore, SessionStore, StoreKey, StoreSlot},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Session manager specialized for the crate's default reqwest transport stack.
pub type ReqwestSessionManager = SessionManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Single public contract for one OAuth session.
///
/// Clones share the same session. Consumers never mutate the token record or the state
/// directly; they call the operations below and observe the results through
/// [`subscribe`](Self::subscribe) and [`subscribe_entitlement`](Self::subscribe_entitlement).
pub struct SessionManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	shared: Arc<SessionShared<C, M>>,
}
impl<C, M> SessionManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Starts a builder that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		config: SessionConfig,
		descriptor: ProviderDescriptor,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> SessionManagerBuilder<C, M> {
		SessionManagerBuilder {
			config,
			descriptor,
			http_client: http_client.into(),
			mapper: mapper.into(),
			strategy: None,
			store: None,
			clock: None,
		}
	}

	/// Adopts persisted state at startup and returns the resulting session state.
	///
	/// A persisted token record that is still valid yields [`SessionState::Authenticated`]
	/// with the refresh timer armed. An expired record with a refresh token is refreshed
	/// immediately; one without is discarded. A pending authorization context yields
	/// [`SessionState::Authorizing`] so the callback can still complete after a restart.
	/// Unreadable data is treated as absent, and nothing is adopted once the in-memory
	/// session has moved past [`SessionState::LoggedOut`].
	pub async fn restore(&self) -> SessionState {
		const KIND: FlowKind = FlowKind::Restore;

		let span = FlowSpan::new(KIND, "restore");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let state = span.instrument(self.shared.restore()).await;

		obs::record_flow_outcome(KIND, FlowOutcome::Success);

		state
	}

	/// Current session state.
	pub fn session_state(&self) -> SessionState {
		*self.shared.state_tx.borrow()
	}

	/// Subscribes to session state changes.
	pub fn subscribe(&self) -> watch::Receiver<SessionState> {
		self.shared.state_tx.subscribe()
	}

	/// Latest entitlement, if a lookup completed for the current token.
	pub fn entitlement(&self) -> Option<Entitlement> {
		self.shared.entitlement_tx.borrow().clone()
	}

	/// Subscribes to entitlement changes (`None` after logout or re-authorization).
	pub fn subscribe_entitlement(&self) -> watch::Receiver<Option<Entitlement>> {
		self.shared.entitlement_tx.subscribe()
	}

	/// Most recent failure, cleared by the next successful exchange, refresh, or logout.
	pub fn last_error(&self) -> Option<LastError> {
		self.shared.core.lock().last_error.clone()
	}

	/// Current token record without any expiry check.
	///
	/// Use [`get_valid_access_token`](Self::get_valid_access_token) to obtain a token that is
	/// safe to send.
	pub fn current(&self) -> Option<TokenRecord> {
		self.shared.tokens.current()
	}

	/// Refresh attempt counters.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		self.shared.scheduler.metrics()
	}

	/// Configuration this manager was built with.
	pub fn config(&self) -> &SessionConfig {
		&self.shared.config
	}

	/// Provider descriptor this manager was built with.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.shared.descriptor
	}

	/// Clears the session from any state.
	///
	/// The token record, entitlement, and pending authorization are removed from memory and
	/// from the persistence adapter, and scheduled refreshes are cancelled. A refresh already
	/// in flight completes against a stale epoch and is discarded.
	pub async fn logout(&self) {
		const KIND: FlowKind = FlowKind::Logout;

		let span = FlowSpan::new(KIND, "logout");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		span.instrument(self.shared.logout()).await;
		obs::record_flow_outcome(KIND, FlowOutcome::Success);
	}
}
#[cfg(feature = "reqwest")]
impl SessionManager<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Starts a builder with the default reqwest transport.
	pub fn builder(
		config: SessionConfig,
		descriptor: ProviderDescriptor,
	) -> SessionManagerBuilder<ReqwestHttpClient, ReqwestTransportErrorMapper> {
		Self::with_http_client(
			config,
			descriptor,
			ReqwestHttpClient::default(),
			ReqwestTransportErrorMapper,
		)
	}
}
impl<C, M> Clone for SessionManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { shared: Arc::clone(&self.shared) }
	}
}
impl<C, M> Debug for SessionManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionManager")
			.field("provider", &self.shared.descriptor.id)
			.field("state", &self.session_state())
			.finish()
	}
}

/// Builder for [`SessionManager`].
///
/// Defaults: [`DefaultProviderStrategy`], an in-process [`MemoryStore`], and the
/// [`SystemClock`].
pub struct SessionManagerBuilder<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	config: SessionConfig,
	descriptor: ProviderDescriptor,
	http_client: Arc<C>,
	mapper: Arc<M>,
	strategy: Option<Arc<dyn ProviderStrategy>>,
	store: Option<Arc<dyn SessionStore>>,
	clock: Option<Arc<dyn Clock>>,
}
impl<C, M> SessionManagerBuilder<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Overrides the provider strategy.
	pub fn strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = Some(strategy);

		self
	}

	/// Overrides the persistence adapter.
	pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Overrides the time source.
	///
	/// Expiry checks read this clock, but background timers sleep on the tokio timer. A timer
	/// armed from a manual clock waits the computed delay in real time, and a clock moved
	/// afterwards is only observed once that timer fires or a caller asks for a token.
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);

		self
	}

	/// Builds the manager in [`SessionState::LoggedOut`].
	///
	/// Configuration is validated lazily by
	/// [`begin_authorization`](SessionManager::begin_authorization) so a misconfigured manager
	/// can still restore and log out.
	pub fn build(self) -> SessionManager<C, M> {
		let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::default()));
		let endpoint = TokenEndpoint::from_descriptor(
			&self.descriptor,
			&self.config.client_id,
			self.config.client_secret.as_deref(),
			Arc::clone(&self.http_client),
			self.mapper,
		);
		let verifier =
			EntitlementVerifier::new(self.descriptor.endpoints.profile.clone(), self.http_client);
		let (state_tx, _) = watch::channel(SessionState::LoggedOut);
		let (entitlement_tx, _) = watch::channel(None);
		let shared = SessionShared {
			tokens: TokenStore::new(Arc::clone(&store), &self.config.namespace),
			context_key: StoreKey::new(&self.config.namespace, StoreSlot::EphemeralContext),
			context_writer: AsyncMutex::new(()),
			store,
			strategy: self.strategy.unwrap_or_else(|| Arc::new(DefaultProviderStrategy)),
			clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
			endpoint,
			verifier,
			config: self.config,
			descriptor: self.descriptor,
			core: Mutex::new(SessionCore::default()),
			state_tx,
			entitlement_tx,
			scheduler: RefreshScheduler::default(),
		};

		SessionManager { shared: Arc::new(shared) }
	}
}

/// State shared between the facade, spawned refresh timers, and entitlement lookups.
struct SessionShared<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	config: SessionConfig,
	descriptor: ProviderDescriptor,
	strategy: Arc<dyn ProviderStrategy>,
	endpoint: TokenEndpoint<C, M>,
	verifier: EntitlementVerifier<C>,
	tokens: TokenStore,
	store: Arc<dyn SessionStore>,
	context_key: StoreKey,
	context_writer: AsyncMutex<()>,
	clock: Arc<dyn Clock>,
	core: Mutex<SessionCore>,
	state_tx: watch::Sender<SessionState>,
	entitlement_tx: watch::Sender<Option<Entitlement>>,
	scheduler: RefreshScheduler,
}
impl<C, M> SessionShared<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Applies `event` and publishes the new state. Callers must hold the core lock.
	fn transition(&self, core: &mut SessionCore, event: SessionEvent) {
		let from = core.state;
		let to = from.apply(event);

		if from != to {
			core.state = to;
			self.state_tx.send_replace(to);

			events::state_transition(from, to);
		}
	}

	/// Starts a new epoch with no credentials; persistence is left to [`Self::persist`].
	fn reset(&self, core: &mut SessionCore, event: SessionEvent) {
		core.epoch += 1;
		core.pending = None;

		self.scheduler.cancel();
		self.tokens.clear();
		self.entitlement_tx.send_replace(None);
		self.transition(core, event);
	}

	/// Commits a freshly issued record if `epoch` is still current, then arms the refresh
	/// timer, starts the entitlement lookup, and mirrors the record to storage.
	async fn commit(
		self: &Arc<Self>,
		kind: FlowKind,
		epoch: u64,
		record: &TokenRecord,
		event: SessionEvent,
	) -> Result<()> {
		{
			let mut core = self.core.lock();

			if core.epoch != epoch {
				drop(core);
				events::stale_result_discarded(kind);

				return Err(Error::SessionReset);
			}

			self.tokens.replace(record.clone());

			core.last_error = None;

			self.transition(&mut core, event);
		}

		self.arm(epoch, record);
		self.spawn_entitlement(epoch, record);
		self.persist_tokens().await;

		Ok(())
	}

	/// Records `error` as the last failure.
	fn note_error(&self, error: &Error) {
		self.core.lock().last_error = Some(error.into());
	}

	async fn persist_tokens(&self) {
		if let Err(e) = self.tokens.sync().await {
			self.note_error(&e.into());
		}
	}

	async fn persist(&self) {
		self.persist_tokens().await;
		self.sync_pending().await;
	}

	async fn logout(&self) {
		{
			let mut core = self.core.lock();

			self.reset(&mut core, SessionEvent::Cleared);

			core.last_error = None;
		}

		self.persist().await;
	}

	async fn restore(self: &Arc<Self>) -> SessionState {
		let record = self.tokens.load().await.unwrap_or_else(|e| {
			self.note_error(&e.into());

			None
		});
		let pending = match store::load_typed::<EphemeralAuthContext>(
			self.store.as_ref(),
			&self.context_key,
		)
		.await
		{
			Ok(pending) => pending,
			Err(e) => {
				events::persistence_degraded("load", &self.context_key, &e);

				None
			},
		};
		let now = self.clock.now();
		let restored = {
			let mut core = self.core.lock();

			if core.state != SessionState::LoggedOut
				|| core.pending.is_some()
				|| self.tokens.current().is_some()
			{
				Restored::Skipped
			} else {
				match (pending, record) {
					(Some(context), record) => {
						core.pending = Some(context);

						self.transition(&mut core, SessionEvent::AuthorizationResumed);

						Restored::Pending { discard_tokens: record.is_some() }
					},
					(None, Some(record))
						if !record.is_expired_at(now) || record.refresh_token.is_some() =>
					{
						self.tokens.replace(record.clone());
						self.transition(&mut core, SessionEvent::TokensRestored);

						Restored::Tokens { epoch: core.epoch, record }
					},
					(None, Some(_)) => Restored::Expired,
					(None, None) => Restored::Nothing,
				}
			}
		};

		match restored {
			Restored::Tokens { epoch, record } =>
				if record.is_expired_at(now) {
					// Failures are already reflected in the session state.
					let _ = self.refresh_exclusive(epoch, 0).await;
				} else {
					self.arm(epoch, &record);
					self.spawn_entitlement(epoch, &record);
				},
			Restored::Expired | Restored::Pending { discard_tokens: true } =>
				self.persist_tokens().await,
			Restored::Pending { discard_tokens: false }
			| Restored::Nothing
			| Restored::Skipped => (),
		}

		*self.state_tx.borrow()
	}
}

/// Mutable in-memory session state guarded by one lock.
#[derive(Debug, Default)]
struct SessionCore {
	epoch: u64,
	state: SessionState,
	pending: Option<EphemeralAuthContext>,
	last_error: Option<LastError>,
}

enum Restored {
	Tokens { epoch: u64, record: TokenRecord },
	Pending { discard_tokens: bool },
	Expired,
	Nothing,
	Skipped,
}
