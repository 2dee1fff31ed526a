//! Session state machine.
//!
//! Every state change goes through [`SessionState::apply`], a pure function of the current
//! state and a [`SessionEvent`]; the manager publishes the result on a watch channel.

// self
use crate::{_prelude::*, error::ErrorClass};

/// Why the session is in [`SessionState::Failed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
	/// Network failure or provider 5xx; the existing token (if any) is retained.
	Transient,
	/// The provider answered a refresh with an unusable response; the token is retained but
	/// no retry is scheduled.
	Protocol,
}
impl FailureReason {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Transient => "transient",
			Self::Protocol => "protocol",
		}
	}
}

/// Read-only view of the session exposed to consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	/// No credentials; authorization must run.
	#[default]
	LoggedOut,
	/// Authorization redirect issued; waiting for the callback.
	Authorizing,
	/// Callback accepted; code exchange in flight.
	Exchanging,
	/// A usable token record is committed.
	Authenticated,
	/// Refresh request in flight.
	Refreshing,
	/// Last operation failed; see [`FailureReason`].
	Failed(FailureReason),
}
impl SessionState {
	/// Computes the state that follows `event`.
	///
	/// Events that make no sense in the current state leave it unchanged, so a late or
	/// replayed result can never move the session backwards.
	pub fn apply(self, event: SessionEvent) -> Self {
		use SessionEvent as E;
		use SessionState as S;

		match (self, event) {
			(_, E::AuthorizationStarted) => S::Authorizing,
			(_, E::ExchangeStarted) => S::Exchanging,
			(_, E::ExchangeSucceeded) => S::Authenticated,
			(S::Authorizing | S::Exchanging, E::ExchangeFailed { transient: true }) =>
				S::Failed(FailureReason::Transient),
			(S::Authorizing | S::Exchanging, E::ExchangeFailed { transient: false }) =>
				S::LoggedOut,
			(state, E::ExchangeFailed { .. }) => state,
			(S::Authenticated | S::Failed(_) | S::Refreshing, E::RefreshStarted) => S::Refreshing,
			(state, E::RefreshStarted) => state,
			(S::Refreshing | S::Failed(_) | S::Authenticated, E::RefreshSucceeded) =>
				S::Authenticated,
			(state, E::RefreshSucceeded) => state,
			(S::Refreshing | S::Failed(_) | S::Authenticated, E::RefreshFailed { reason }) =>
				S::Failed(reason),
			(state, E::RefreshFailed { .. }) => state,
			(_, E::RefreshRejected) => S::LoggedOut,
			(_, E::TokensRestored) => S::Authenticated,
			(_, E::AuthorizationResumed) => S::Authorizing,
			(_, E::Cleared) => S::LoggedOut,
		}
	}

	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::LoggedOut => "logged_out",
			Self::Authorizing => "authorizing",
			Self::Exchanging => "exchanging",
			Self::Authenticated => "authenticated",
			Self::Refreshing => "refreshing",
			Self::Failed(_) => "failed",
		}
	}

	/// Returns `true` when a token record is expected to be available.
	pub fn has_credentials(self) -> bool {
		matches!(self, Self::Authenticated | Self::Refreshing | Self::Failed(_))
	}
}
impl Display for SessionState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Failed(reason) => write!(f, "failed({})", reason.as_str()),
			state => f.write_str(state.as_str()),
		}
	}
}

/// Typed events driving [`SessionState::apply`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
	/// A new authorization attempt replaced any previous session.
	AuthorizationStarted,
	/// Callback preconditions passed; the code exchange is being sent.
	ExchangeStarted,
	/// The exchange produced a committed token record.
	ExchangeSucceeded,
	/// The callback or exchange failed.
	ExchangeFailed {
		/// Whether the failure was a transient network/provider error.
		transient: bool,
	},
	/// A refresh request is being sent.
	RefreshStarted,
	/// A refreshed record was committed.
	RefreshSucceeded,
	/// The refresh failed without invalidating the credentials; the old record is retained.
	RefreshFailed {
		/// Failure category published with [`SessionState::Failed`].
		reason: FailureReason,
	},
	/// The provider rejected the refresh token.
	RefreshRejected,
	/// A persisted token record was adopted at startup.
	TokensRestored,
	/// A persisted authorization context was adopted at startup.
	AuthorizationResumed,
	/// Logout or invalidation removed every credential.
	Cleared,
}

/// Most recent failure recorded by the manager, for consumers that want details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
	/// Taxonomy class.
	pub class: ErrorClass,
	/// Rendered error message.
	pub message: String,
}
impl From<&Error> for LastError {
	fn from(error: &Error) -> Self {
		Self { class: error.class(), message: error.to_string() }
	}
}
