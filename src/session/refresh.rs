//! Refresh scheduler with a single-flight gate, background timer, and bounded retries.
//!
//! Refreshes start either lazily from [`SessionManager::get_valid_access_token`] or from the
//! timer armed after every commit. Both paths run behind one async gate, so at most one
//! refresh request is in flight. A caller that queued behind an attempt which finished while
//! it waited reuses that attempt's outcome instead of sending a second request.

mod metrics;

pub use metrics::RefreshMetrics;

// std
use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Duration as StdDuration,
};
// crates.io
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenSecret},
	error::{ErrorClass, TransientError},
	http::ProviderHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, events},
	session::{FailureReason, SessionEvent, SessionManager, SessionShared},
};

/// Single-flight gate and background timer shared by every refresh trigger.
#[derive(Debug, Default)]
pub(crate) struct RefreshScheduler {
	gate: AsyncMutex<()>,
	completed: AtomicU64,
	next_timer: AtomicU64,
	timer: Mutex<Option<Timer>>,
	metrics: RefreshMetrics,
}
impl RefreshScheduler {
	pub(crate) fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Aborts the scheduled refresh, if any.
	pub(crate) fn cancel(&self) {
		if let Some(timer) = self.timer.lock().take() {
			timer.handle.abort();
		}
	}

	/// Removes timer `id` from the slot; `false` means a newer timer superseded it.
	fn release(&self, id: u64) -> bool {
		let mut slot = self.timer.lock();

		if slot.as_ref().is_some_and(|timer| timer.id == id) {
			slot.take();

			true
		} else {
			false
		}
	}

	/// Replaces the scheduled timer with the task built by `spawn`.
	fn install(&self, spawn: impl FnOnce(u64) -> JoinHandle<()>) {
		let id = self.next_timer.fetch_add(1, Ordering::Relaxed);
		// Hold the slot while spawning so the task cannot try to release it before it is stored.
		let mut slot = self.timer.lock();
		let handle = spawn(id);

		if let Some(previous) = slot.replace(Timer { id, handle }) {
			previous.handle.abort();
		}
	}
}
impl Drop for RefreshScheduler {
	fn drop(&mut self) {
		self.cancel();
	}
}

#[derive(Debug)]
struct Timer {
	id: u64,
	handle: JoinHandle<()>,
}

impl<C, M> SessionManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns an access token that is outside its refresh window, refreshing first if needed.
	///
	/// Concurrent callers share one refresh request. When a refresh fails transiently and the
	/// current token has not expired yet, that token is returned and a background retry is
	/// scheduled; an expired token is never returned.
	///
	/// # Errors
	///
	/// - [`Error::NotAuthenticated`] when no token record exists.
	/// - [`Error::CredentialInvalid`] when the provider rejected the refresh token (the session
	///   is logged out) or the token expired without a refresh token.
	/// - Transient errors when the refresh failed and the token already expired.
	pub async fn get_valid_access_token(&self) -> Result<TokenSecret> {
		let shared = &self.shared;
		let record = shared.tokens.current().ok_or(Error::NotAuthenticated)?;

		if !shared.is_due(&record) {
			return Ok(record.access_token);
		}

		let span = FlowSpan::new(FlowKind::Refresh, "get_valid_access_token");

		span.instrument(shared.refresh_on_demand()).await
	}
}

impl<C, M> SessionShared<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn is_due(&self, record: &TokenRecord) -> bool {
		record.is_refresh_due_at(self.clock.now(), self.config.refresh_buffer)
	}

	fn snapshot(&self) -> (u64, Option<TokenRecord>) {
		let core = self.core.lock();

		(core.epoch, self.tokens.current())
	}

	/// Arms the background timer for `record`'s refresh instant.
	pub(super) fn arm(self: &Arc<Self>, epoch: u64, record: &TokenRecord) {
		if record.refresh_token.is_none() {
			self.scheduler.cancel();

			return;
		}

		let delay = record.refresh_at(self.config.refresh_buffer) - self.clock.now();

		self.arm_after(epoch, delay, 0);
	}

	fn arm_after(self: &Arc<Self>, epoch: u64, delay: Duration, attempt: u32) {
		let weak = Arc::downgrade(self);
		let sleep = StdDuration::try_from(delay).unwrap_or_default();

		self.scheduler.install(|id| {
			tokio::spawn(async move {
				tokio::time::sleep(sleep).await;

				let Some(shared) = weak.upgrade() else {
					return;
				};

				if shared.scheduler.release(id) {
					let _ = shared.refresh_exclusive(epoch, attempt).await;
				}
			})
		});
	}

	async fn refresh_on_demand(self: &Arc<Self>) -> Result<TokenSecret> {
		let seen = self.scheduler.completed.load(Ordering::Acquire);
		let _gate = self.scheduler.gate.lock().await;
		let (epoch, record) = self.snapshot();
		let record = record.ok_or(Error::NotAuthenticated)?;

		if !self.is_due(&record) {
			return Ok(record.access_token);
		}
		if self.scheduler.completed.load(Ordering::Acquire) != seen {
			return self.reuse_finished_attempt(record).map(|record| record.access_token);
		}

		match self.refresh_locked(epoch, record.clone(), 0).await {
			Ok(fresh) => Ok(fresh.access_token),
			Err(e) if e.is_transient() && !record.is_expired_at(self.clock.now()) =>
				Ok(record.access_token),
			Err(e) => Err(e),
		}
	}

	/// An attempt finished while this caller waited and the token is still due, so that
	/// attempt failed; answer from its outcome.
	fn reuse_finished_attempt(&self, record: TokenRecord) -> Result<TokenRecord> {
		if !record.is_expired_at(self.clock.now()) {
			return Ok(record);
		}

		let message = self
			.core
			.lock()
			.last_error
			.as_ref()
			.map(|last| last.message.clone())
			.unwrap_or_else(|| "the previous refresh attempt did not complete".into());

		Err(TransientError::RefreshDeferred { message }.into())
	}

	/// Takes the gate and refreshes if the current record of `epoch` is due; otherwise
	/// re-arms the timer.
	pub(super) async fn refresh_exclusive(
		self: &Arc<Self>,
		epoch: u64,
		attempt: u32,
	) -> Result<TokenRecord> {
		let seen = self.scheduler.completed.load(Ordering::Acquire);
		let _gate = self.scheduler.gate.lock().await;
		let (current, record) = self.snapshot();

		if current != epoch {
			return Err(Error::SessionReset);
		}

		let record = record.ok_or(Error::NotAuthenticated)?;

		if !self.is_due(&record) {
			self.arm(epoch, &record);

			return Ok(record);
		}
		// The attempt that finished meanwhile owns any retry.
		if self.scheduler.completed.load(Ordering::Acquire) != seen {
			return self.reuse_finished_attempt(record);
		}

		self.refresh_locked(epoch, record, attempt).await
	}

	/// Sends the refresh request. Callers must hold the gate.
	async fn refresh_locked(
		self: &Arc<Self>,
		epoch: u64,
		record: TokenRecord,
		attempt: u32,
	) -> Result<TokenRecord> {
		const KIND: FlowKind = FlowKind::Refresh;

		let Some(refresh_token) = record.refresh_token.clone() else {
			if !record.is_expired_at(self.clock.now()) {
				return Ok(record);
			}

			return Err(self.invalidate(epoch).await);
		};

		{
			let mut core = self.core.lock();

			if core.epoch != epoch {
				return Err(Error::SessionReset);
			}

			self.transition(&mut core, SessionEvent::RefreshStarted);
		}

		self.scheduler.metrics.record_attempt();
		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = match self.endpoint.refresh(self.strategy.as_ref(), &refresh_token).await {
			Ok(grant) =>
				grant.into_record(record.scope.clone(), self.clock.now(), Some(refresh_token)),
			Err(e) => Err(e),
		};
		let outcome = match result {
			Ok(fresh) => self
				.commit(KIND, epoch, &fresh, SessionEvent::RefreshSucceeded)
				.await
				.map(|()| fresh),
			Err(e) => Err(self.refresh_failed(epoch, attempt, e).await),
		};

		match &outcome {
			Ok(_) => {
				self.scheduler.metrics.record_success();
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
			},
			Err(_) => {
				self.scheduler.metrics.record_failure();
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
			},
		}

		self.scheduler.completed.fetch_add(1, Ordering::AcqRel);

		outcome
	}

	/// Applies a failed refresh to the session and returns the error to surface.
	async fn refresh_failed(self: &Arc<Self>, epoch: u64, attempt: u32, error: Error) -> Error {
		let class = error.class();
		let current = {
			let mut core = self.core.lock();

			if core.epoch == epoch {
				match class {
					ErrorClass::CredentialInvalid =>
						self.reset(&mut core, SessionEvent::RefreshRejected),
					ErrorClass::TransientNetwork => self.transition(
						&mut core,
						SessionEvent::RefreshFailed { reason: FailureReason::Transient },
					),
					_ => self.transition(
						&mut core,
						SessionEvent::RefreshFailed { reason: FailureReason::Protocol },
					),
				}

				core.last_error = Some((&error).into());

				true
			} else {
				false
			}
		};

		if !current {
			events::stale_result_discarded(FlowKind::Refresh);

			return Error::SessionReset;
		}

		match class {
			ErrorClass::CredentialInvalid => self.persist().await,
			ErrorClass::TransientNetwork => self.schedule_retry(epoch, attempt + 1, &error),
			_ => (),
		}

		error
	}

	fn schedule_retry(self: &Arc<Self>, epoch: u64, attempt: u32, error: &Error) {
		let policy = self.config.retry;

		if !policy.allows(attempt) {
			events::refresh_abandoned(attempt.saturating_sub(1), error);

			return;
		}

		let delay = policy.delay_for(attempt, error.retry_after());

		events::refresh_retry(attempt, delay, error);

		self.arm_after(epoch, delay, attempt);
	}

	/// Drops an expired record that cannot be refreshed.
	async fn invalidate(&self, epoch: u64) -> Error {
		let error = Error::CredentialInvalid {
			reason: "access token expired and no refresh token is available".into(),
		};
		let cleared = {
			let mut core = self.core.lock();

			if core.epoch == epoch {
				self.reset(&mut core, SessionEvent::Cleared);

				core.last_error = Some((&error).into());

				true
			} else {
				false
			}
		};

		if cleared {
			self.persist().await;
		}

		error
	}
}
