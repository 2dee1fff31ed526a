//! Session-level error types shared across the exchange handler, refresh scheduler, and stores.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical session error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// The authorization callback did not carry a `code`.
	#[error("Authorization response is missing the code parameter.")]
	MissingCode,
	/// The returned `state` is absent or differs from the pending CSRF state.
	#[error("Authorization response state does not match the pending authorization.")]
	StateMismatch,
	/// No pending authorization exists (expired, never started, or already consumed).
	#[error("No pending authorization matches this callback.")]
	ExpiredOrMissingSession,
	/// Token endpoint answered with an OAuth error or a non-success status.
	#[error("Token endpoint rejected the request: {code}.")]
	TokenExchangeFailed {
		/// OAuth `error` code, or `http_<status>` when the provider omitted one.
		code: String,
		/// OAuth `error_description`, when supplied.
		description: Option<String>,
	},
	/// Token endpoint answered successfully but the body is unusable.
	#[error("Token endpoint returned a malformed response: {reason}.")]
	MalformedTokenResponse {
		/// What was wrong with the body.
		reason: String,
	},
	/// Provider rejected the refresh token (`invalid_grant`/`invalid_token`).
	#[error("Provider rejected the stored credentials: {reason}.")]
	CredentialInvalid {
		/// Provider- or session-supplied reason string.
		reason: String,
	},
	/// Profile endpoint answered with an unusable response.
	#[error("Profile lookup failed: {reason}.")]
	ProfileLookupFailed {
		/// Status or decoding failure summary.
		reason: String,
	},
	/// No token record is available; authorization must run first.
	#[error("No authenticated session is available.")]
	NotAuthenticated,
	/// The session was logged out or restarted while the request was in flight.
	#[error("Session changed while the request was in flight; the result was discarded.")]
	SessionReset,
}
impl Error {
	/// Classifies the error into the session's failure taxonomy.
	pub fn class(&self) -> ErrorClass {
		match self {
			Self::Storage(_) => ErrorClass::PersistenceDegraded,
			Self::Config(_) => ErrorClass::Configuration,
			Self::Transient(_) | Self::Transport(_) => ErrorClass::TransientNetwork,
			Self::CredentialInvalid { .. } | Self::NotAuthenticated =>
				ErrorClass::CredentialInvalid,
			Self::MissingCode
			| Self::StateMismatch
			| Self::ExpiredOrMissingSession
			| Self::TokenExchangeFailed { .. }
			| Self::MalformedTokenResponse { .. }
			| Self::ProfileLookupFailed { .. }
			| Self::SessionReset => ErrorClass::Protocol,
		}
	}

	/// Returns `true` when retrying later may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self.class(), ErrorClass::TransientNetwork)
	}

	/// Provider `Retry-After` hint carried by transient token endpoint failures.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Transient(TransientError::TokenEndpoint { retry_after, .. }) => *retry_after,
			_ => None,
		}
	}
}

/// Failure taxonomy used to drive session state transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
	/// Missing client id/redirect or invalid descriptor; never retried.
	Configuration,
	/// State mismatch, malformed response, replayed callback; restart authorization.
	Protocol,
	/// Network failure or 5xx; the refresh scheduler retries with backoff.
	TransientNetwork,
	/// Refresh token rejected; full re-authorization is required.
	CredentialInvalid,
	/// Storage read/write failure; in-memory operation continues.
	PersistenceDegraded,
}
impl ErrorClass {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Configuration => "configuration",
			Self::Protocol => "protocol",
			Self::TransientNetwork => "transient_network",
			Self::CredentialInvalid => "credential_invalid",
			Self::PersistenceDegraded => "persistence_degraded",
		}
	}
}
impl Display for ErrorClass {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Configuration and validation failures raised before any network or storage interaction.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Client identifier is empty.
	#[error("Client identifier is not configured.")]
	MissingClientId,
	/// Redirect URI is not configured.
	#[error("Redirect URI is not configured.")]
	MissingRedirectUri,
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor failed validation.
	#[error("Provider descriptor is invalid.")]
	InvalidDescriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] crate::auth::TokenRecordBuilderError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Token endpoint returned a retryable failure (5xx, 429, `temporarily_unavailable`).
	#[error("Token endpoint returned a retryable failure: {message}.")]
	TokenEndpoint {
		/// Provider- or session-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// A concurrent refresh attempt failed while this caller waited for it.
	#[error("Token refresh is unavailable right now: {message}.")]
	RefreshDeferred {
		/// Summary of the failed attempt.
		message: String,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
