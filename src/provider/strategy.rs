//! Provider strategy hooks that customize requests and classify responses.
//!
//! Implementations decorate outgoing authorization/token requests, normalize token error
//! mapping, and derive entitlement tiers without tying the session to any HTTP client.

// self
use crate::{
	_prelude::*,
	auth::{EntitlementTier, ProfileDocument},
	provider::descriptor::GrantType,
};

/// Strategy hook that allows providers to decorate requests and classify responses.
///
/// Implementors are required to be `Send + Sync`, and the hooks use crate-owned data types so
/// downstream crates never depend on reqwest-specific structures. Only
/// [`classify_token_error`](Self::classify_token_error) is mandatory.
pub trait ProviderStrategy: Send + Sync {
	/// Maps token endpoint failures into the session taxonomy.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;

	/// Adds provider-specific query parameters to the authorization URL.
	///
	/// Standard parameters are written after this hook runs, so a strategy cannot override
	/// `state`, `code_challenge`, or the other protocol fields.
	fn augment_authorization_request(&self, _params: &mut BTreeMap<String, String>) {}

	/// Gives providers a chance to add custom form parameters before dispatching.
	fn augment_token_request(&self, _grant: GrantType, _form: &mut BTreeMap<String, String>) {}

	/// Derives the entitlement tier from the profile document.
	fn classify_entitlement(&self, profile: &ProfileDocument) -> EntitlementTier {
		classify_product(profile.product.as_deref())
	}
}

/// Canonical provider error categories used by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Provider rejected the authorization grant (bad code/refresh token).
	InvalidGrant,
	/// Client authentication failed.
	InvalidClient,
	/// Requested scopes exceed what the token covers.
	InsufficientScope,
	/// Failure is temporary and should be retried.
	Transient,
	/// Any other rejection; surfaced verbatim to the caller.
	Rejected,
}

/// Context passed to provider strategies when classifying token errors.
///
/// Only primitive data (status codes, OAuth fields, body preview) is carried, so strategies
/// never see the HTTP client. The token endpoint codec populates the context before invoking
/// [`ProviderStrategy::classify_token_error`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Grant type associated with the failing request.
	pub grant_type: GrantType,
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
	/// Indicates whether the failure originated from the network/transport layer.
	pub network_error: bool,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates a new context scoped to the provided grant type.
	pub fn new(grant_type: GrantType) -> Self {
		Self {
			grant_type,
			http_status: None,
			oauth_error: None,
			error_description: None,
			body_preview: None,
			network_error: false,
		}
	}

	/// Convenience constructor for transport-level/network failures.
	pub fn network_failure(grant_type: GrantType) -> Self {
		let mut ctx = Self::new(grant_type);

		ctx.network_error = true;

		ctx
	}

	/// Overrides the network error flag.
	pub fn with_network_error(mut self, network_error: bool) -> Self {
		self.network_error = network_error;

		self
	}

	/// Adds an HTTP status code (e.g., 400, 401, 500).
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a body preview for providers that return non-JSON payloads.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}
}

/// Default strategy that applies RFC-guided heuristics.
///
/// It prioritizes structured OAuth fields (`error`, `error_description`), then
/// falls back to body text hints, and finally the HTTP status code. Network
/// failures are always treated as transient.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if ctx.network_error {
			return ProviderErrorKind::Transient;
		}

		if let Some(kind) =
			classify_oauth_error(ctx.oauth_error.as_deref(), ctx.error_description.as_deref())
		{
			return kind;
		}
		if let Some(kind) = classify_body(ctx.body_preview.as_deref()) {
			return kind;
		}

		classify_status(ctx.http_status)
	}
}

/// Spotify accounts service: default error mapping, and `show_dialog=true` so users can switch
/// accounts instead of being signed in silently.
#[derive(Debug, Default)]
pub struct SpotifyProviderStrategy;
impl ProviderStrategy for SpotifyProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		DefaultProviderStrategy.classify_token_error(ctx)
	}

	fn augment_authorization_request(&self, params: &mut BTreeMap<String, String>) {
		params.insert("show_dialog".into(), "true".into());
	}
}

/// Maps a subscription product label onto a tier (`premium` → premium, anything else →
/// standard, missing → unknown).
pub fn classify_product(product: Option<&str>) -> EntitlementTier {
	match product.map(str::trim) {
		Some(value) if value.eq_ignore_ascii_case("premium") => EntitlementTier::Premium,
		Some(value) if !value.is_empty() => EntitlementTier::Standard,
		_ => EntitlementTier::Unknown,
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ProviderErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = String::new();

	for (idx, ch) in body.chars().enumerate() {
		if idx >= ProviderErrorContext::BODY_PREVIEW_LIMIT {
			buf.push('…');

			break;
		}
		buf.push(ch);
	}

	buf
}

fn classify_oauth_error(
	oauth_error: Option<&str>,
	error_description: Option<&str>,
) -> Option<ProviderErrorKind> {
	oauth_error
		.and_then(match_exact_value)
		.or_else(|| error_description.and_then(match_exact_value))
		.or_else(|| classify_body(error_description))
}

fn match_exact_value(value: &str) -> Option<ProviderErrorKind> {
	if value.eq_ignore_ascii_case("invalid_grant") || value.eq_ignore_ascii_case("invalid_token") {
		Some(ProviderErrorKind::InvalidGrant)
	} else if value.eq_ignore_ascii_case("invalid_client")
		|| value.eq_ignore_ascii_case("unauthorized_client")
	{
		Some(ProviderErrorKind::InvalidClient)
	} else if value.eq_ignore_ascii_case("invalid_scope")
		|| value.eq_ignore_ascii_case("insufficient_scope")
	{
		Some(ProviderErrorKind::InsufficientScope)
	} else if value.eq_ignore_ascii_case("temporarily_unavailable")
		|| value.eq_ignore_ascii_case("server_error")
	{
		Some(ProviderErrorKind::Transient)
	} else {
		None
	}
}

fn classify_body(body: Option<&str>) -> Option<ProviderErrorKind> {
	let body = body?;
	let lowered = body.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") || text.contains("invalid_token") =>
			Some(ProviderErrorKind::InvalidGrant),
		text if text.contains("invalid_client") => Some(ProviderErrorKind::InvalidClient),
		text if text.contains("insufficient_scope") || text.contains("invalid_scope") =>
			Some(ProviderErrorKind::InsufficientScope),
		text if text.contains("temporarily_unavailable") || text.contains("retry") =>
			Some(ProviderErrorKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(401) => ProviderErrorKind::InvalidClient,
		Some(403) => ProviderErrorKind::InsufficientScope,
		Some(408 | 429) => ProviderErrorKind::Transient,
		Some(code) if code >= 500 => ProviderErrorKind::Transient,
		None => ProviderErrorKind::Transient,
		Some(_) => ProviderErrorKind::Rejected,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn refresh_rejections_map_to_invalid_grant() {
		let strategy = DefaultProviderStrategy;

		for code in ["invalid_grant", "invalid_token", "INVALID_GRANT"] {
			let ctx = ProviderErrorContext::new(GrantType::RefreshToken)
				.with_http_status(400)
				.with_oauth_error(code);

			assert_eq!(strategy.classify_token_error(&ctx), ProviderErrorKind::InvalidGrant);
		}
	}

	#[test]
	fn unknown_client_errors_are_rejected_not_retried() {
		let strategy = DefaultProviderStrategy;
		let ctx = ProviderErrorContext::new(GrantType::AuthorizationCode)
			.with_http_status(400)
			.with_oauth_error("invalid_request");

		assert_eq!(strategy.classify_token_error(&ctx), ProviderErrorKind::Rejected);

		let ctx = ProviderErrorContext::new(GrantType::RefreshToken).with_http_status(503);

		assert_eq!(strategy.classify_token_error(&ctx), ProviderErrorKind::Transient);
	}

	#[test]
	fn products_map_to_tiers() {
		assert_eq!(classify_product(Some("premium")), EntitlementTier::Premium);
		assert_eq!(classify_product(Some("free")), EntitlementTier::Standard);
		assert_eq!(classify_product(Some("open")), EntitlementTier::Standard);
		assert_eq!(classify_product(Some("")), EntitlementTier::Unknown);
		assert_eq!(classify_product(None), EntitlementTier::Unknown);
	}

	#[test]
	fn spotify_strategy_requests_account_dialog() {
		let mut params = BTreeMap::new();

		SpotifyProviderStrategy.augment_authorization_request(&mut params);

		assert_eq!(params.get("show_dialog").map(String::as_str), Some("true"));
	}
}
