//! Provider descriptor data structures and presets.
//!
//! The module exposes validated metadata plus the builder used to assemble it, so providers
//! can describe their endpoints in a transport-agnostic way.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Grant identifiers used on the token endpoint.
pub mod grant;
/// Provider-specific quirk toggles.
pub mod quirks;

pub use builder::*;
pub use grant::*;
pub use quirks::*;

// self
use crate::{_prelude::*, auth::ProviderId};

/// Client authentication modes for token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// Public clients that prove possession via PKCE only; no secret is ever sent.
	#[default]
	NoneWithPkce,
	/// HTTP Basic with `client_id`/`client_secret` (confidential clients).
	ClientSecretBasic,
	/// Form POST body parameters for `client_id`/`client_secret` (confidential clients).
	ClientSecretPost,
}

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint the user agent is redirected to.
	pub authorization: Url,
	/// Token endpoint used for exchanges and refreshes.
	pub token: Url,
	/// Profile endpoint queried by the entitlement verifier.
	pub profile: Option<Url>,
}

/// Immutable provider descriptor consumed by the session manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Preferred client authentication mechanism.
	pub preferred_client_auth_method: ClientAuthMethod,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Spotify accounts service with the Web API `/v1/me` profile endpoint.
	pub fn spotify() -> Result<Self, ProviderDescriptorError> {
		let id = ProviderId::new("spotify")
			.map_err(|e| ProviderDescriptorError::InvalidIdentifier { reason: e.to_string() })?;

		Self::builder(id)
			.authorization_endpoint(parse_endpoint(
				"authorization",
				"https://accounts.spotify.com/authorize",
			)?)
			.token_endpoint(parse_endpoint("token", "https://accounts.spotify.com/api/token")?)
			.profile_endpoint(parse_endpoint("profile", "https://api.spotify.com/v1/me")?)
			.build()
	}
}

fn parse_endpoint(endpoint: &'static str, raw: &str) -> Result<Url, ProviderDescriptorError> {
	Url::parse(raw)
		.map_err(|e| ProviderDescriptorError::InvalidUrl { endpoint, reason: e.to_string() })
}
