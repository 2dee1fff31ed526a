//! Random string and PKCE challenge helpers shared by the authorization flow.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};

/// Length of generated CSRF `state` values.
pub const STATE_LEN: usize = 32;
/// Length of generated PKCE code verifiers (RFC 7636 allows 43..=128).
pub const VERIFIER_LEN: usize = 64;

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Produces exactly `len` characters drawn from `[A-Za-z0-9]` using the thread-local CSPRNG.
///
/// The alphabet never needs escaping inside a query string, form body, or storage key.
pub fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

/// Derives the S256 code challenge: base64url (no padding) of the SHA-256 digest of `verifier`.
pub fn code_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	let digest = hasher.finalize();

	URL_SAFE_NO_PAD.encode(digest)
}

/// Compares two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(lhs: &str, rhs: &str) -> bool {
	let (lhs, rhs) = (lhs.as_bytes(), rhs.as_bytes());

	if lhs.len() != rhs.len() {
		return false;
	}

	lhs.iter().zip(rhs).fold(0_u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
