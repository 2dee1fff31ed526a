//! Session configuration and retry policy.

// self
use crate::{_prelude::*, auth::ScopeSet, error::ConfigError};

/// Client registration and scheduling knobs for one
/// [`SessionManager`](crate::session::SessionManager).
#[derive(Clone, Debug)]
pub struct SessionConfig {
	/// OAuth client identifier.
	pub client_id: String,
	/// Client secret, used only when the descriptor selects a confidential auth method.
	pub client_secret: Option<String>,
	/// Redirect target registered with the provider.
	pub redirect_uri: Option<Url>,
	/// Scopes requested during authorization.
	pub scope: ScopeSet,
	/// Safety margin before expiry at which tokens are refreshed.
	pub refresh_buffer: Duration,
	/// Backoff policy for background refresh retries.
	pub retry: RetryPolicy,
	/// Prefix applied to every persisted key.
	pub namespace: String,
}
impl SessionConfig {
	/// Default refresh buffer.
	pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);
	/// Default persistence namespace.
	pub const DEFAULT_NAMESPACE: &'static str = "oauth2_session";

	/// Creates a public-client configuration with default buffer, retry, and namespace.
	pub fn new(client_id: impl Into<String>, redirect_uri: Url, scope: ScopeSet) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: None,
			redirect_uri: Some(redirect_uri),
			scope,
			refresh_buffer: Self::DEFAULT_REFRESH_BUFFER,
			retry: RetryPolicy::default(),
			namespace: Self::DEFAULT_NAMESPACE.into(),
		}
	}

	/// Sets the client secret for confidential-client deployments.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Overrides the refresh buffer; negative values are clamped to zero.
	pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
		self.refresh_buffer = buffer.max(Duration::ZERO);

		self
	}

	/// Overrides the background retry policy.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Overrides the persistence namespace.
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();

		self
	}

	/// Checks the fields required before any storage or network interaction.
	pub fn validate(&self) -> Result<&Url, ConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(ConfigError::MissingClientId);
		}

		self.redirect_uri.as_ref().ok_or(ConfigError::MissingRedirectUri)
	}
}

/// Bounded exponential backoff for transient refresh failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Maximum background attempts after the first failure.
	pub max_attempts: u32,
	/// Delay before the first retry.
	pub base_delay: Duration,
	/// Upper bound for any single delay.
	pub max_delay: Duration,
}
impl RetryPolicy {
	/// Delay before retry number `attempt` (1-based). A provider `Retry-After` hint wins, still
	/// capped at `max_delay`.
	pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
		let delay = match hint {
			Some(hint) if hint.is_positive() => hint,
			_ => {
				let factor = 2_i32.saturating_pow(attempt.saturating_sub(1).min(30));

				self.base_delay.saturating_mul(factor)
			},
		};

		delay.min(self.max_delay).max(Duration::ZERO)
	}

	/// Returns `true` while `attempt` (1-based) is within the budget.
	pub fn allows(&self, attempt: u32) -> bool {
		attempt <= self.max_attempts
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_attempts: 5, base_delay: Duration::seconds(1), max_delay: Duration::seconds(60) }
	}
}
