//! Structured log events emitted by the session manager (no-ops without the `tracing` feature).
//!
//! Secrets never reach these helpers; callers pass keys, states, and error values only.

// self
use crate::{
	_prelude::*,
	obs,
	session::SessionState,
	store::{StoreError, StoreKey},
};

/// A persistence mirror operation failed; in-memory state stays authoritative.
pub fn persistence_degraded(op: &'static str, key: &StoreKey, error: &StoreError) {
	obs::record_persistence_failure(op);

	#[cfg(feature = "tracing")]
	tracing::warn!(op, key = %key, error = %error, "Session persistence degraded.");
	#[cfg(not(feature = "tracing"))]
	let _ = (key, error);
}

/// Persisted data could not be decoded and is treated as absent.
pub fn unparseable_persisted(key: &StoreKey, reason: &str) {
	#[cfg(feature = "tracing")]
	tracing::warn!(key = %key, reason, "Ignoring unparseable persisted session data.");
	#[cfg(not(feature = "tracing"))]
	let _ = (key, reason);
}

/// The session state machine moved between states.
pub fn state_transition(from: SessionState, to: SessionState) {
	#[cfg(feature = "tracing")]
	tracing::debug!(from = %from, to = %to, "Session state changed.");
	#[cfg(not(feature = "tracing"))]
	let _ = (from, to);
}

/// A background refresh failed transiently and was rescheduled.
pub fn refresh_retry(attempt: u32, delay: Duration, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::info!(
		attempt,
		delay_ms = delay.whole_milliseconds() as u64,
		error = %error,
		"Token refresh failed transiently; retry scheduled."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (attempt, delay, error);
}

/// A background refresh gave up after exhausting its retry budget.
pub fn refresh_abandoned(attempts: u32, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::warn!(attempts, error = %error, "Token refresh retries exhausted.");
	#[cfg(not(feature = "tracing"))]
	let _ = (attempts, error);
}

/// The profile lookup failed; entitlement falls back to `Unknown`.
pub fn entitlement_lookup_failed(error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::debug!(error = %error, "Entitlement lookup failed.");
	#[cfg(not(feature = "tracing"))]
	let _ = error;
}

/// A result arrived after logout or re-authorization and was dropped.
pub fn stale_result_discarded(kind: obs::FlowKind) {
	obs::record_flow_outcome(kind, obs::FlowOutcome::Discarded);

	#[cfg(feature = "tracing")]
	tracing::debug!(flow = kind.as_str(), "Discarded result from a previous session epoch.");
}
