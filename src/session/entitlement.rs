//! Entitlement verifier.
//!
//! Entitlement is informational: a failed lookup yields
//! [`EntitlementTier::Unknown`](crate::auth::EntitlementTier::Unknown) and never changes the
//! session state. Callers that require a tier enforce that policy themselves.

// crates.io
use oauth2::{
	AsyncHttpClient,
	http::{
		Method, Request,
		header::{ACCEPT, AUTHORIZATION},
	},
};
// self
use crate::{
	_prelude::*,
	auth::{Entitlement, ProfileDocument, ProfileId, TokenRecord, TokenSecret},
	error::{ConfigError, TransportError},
	http::{ProviderHttpClient, ResponseMetadataSlot},
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, events},
	provider::ProviderStrategy,
	session::{SessionManager, SessionShared},
};

type VerifyFuture<'a> = Pin<Box<dyn Future<Output = Entitlement> + 'a + Send>>;

/// Profile lookup bound to one provider's profile endpoint.
pub struct EntitlementVerifier<C>
where
	C: ?Sized + ProviderHttpClient,
{
	profile_url: Option<Url>,
	http_client: Arc<C>,
}
impl<C> EntitlementVerifier<C>
where
	C: ?Sized + ProviderHttpClient,
{
	/// Creates a verifier; without a profile endpoint every lookup yields `Unknown`.
	pub fn new(profile_url: Option<Url>, http_client: Arc<C>) -> Self {
		Self { profile_url, http_client }
	}

	/// Looks up the account behind `access_token` and classifies it with `strategy`.
	pub fn verify<'a>(
		&'a self,
		strategy: &'a dyn ProviderStrategy,
		access_token: &'a TokenSecret,
	) -> VerifyFuture<'a> {
		Box::pin(async move {
			const KIND: FlowKind = FlowKind::Entitlement;

			let span = FlowSpan::new(KIND, "verify");

			obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

			match span.instrument(self.lookup(strategy, access_token)).await {
				Ok(entitlement) => {
					obs::record_flow_outcome(KIND, FlowOutcome::Success);

					entitlement
				},
				Err(e) => {
					obs::record_flow_outcome(KIND, FlowOutcome::Failure);
					events::entitlement_lookup_failed(&e);

					Entitlement::unknown()
				},
			}
		})
	}

	async fn lookup(
		&self,
		strategy: &dyn ProviderStrategy,
		access_token: &TokenSecret,
	) -> Result<Entitlement> {
		let Some(profile_url) = &self.profile_url else {
			return Ok(Entitlement::unknown());
		};
		let request = Request::builder()
			.method(Method::GET)
			.uri(profile_url.as_str())
			.header(AUTHORIZATION, access_token.bearer())
			.header(ACCEPT, "application/json")
			.body(Vec::new())
			.map_err(ConfigError::from)?;
		let handle = self.http_client.with_metadata(ResponseMetadataSlot::default());
		let response = handle.call(request).await.map_err(TransportError::network)?;
		let status = response.status();

		if !status.is_success() {
			return Err(Error::ProfileLookupFailed {
				reason: format!("profile endpoint answered HTTP {}", status.as_u16()),
			});
		}

		let mut de = serde_json::Deserializer::from_slice(response.body());
		let profile: ProfileDocument = serde_path_to_error::deserialize(&mut de).map_err(|e| {
			Error::ProfileLookupFailed { reason: format!("{} at {}", e.inner(), e.path()) }
		})?;

		Ok(Entitlement {
			tier: strategy.classify_entitlement(&profile),
			profile_id: profile.id.as_deref().and_then(|id| ProfileId::new(id).ok()),
		})
	}
}
impl<C> Debug for EntitlementVerifier<C>
where
	C: ?Sized + ProviderHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EntitlementVerifier")
			.field("profile_url", &self.profile_url.as_ref().map(Url::as_str))
			.finish()
	}
}

impl<C, M> SessionManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Re-runs the entitlement lookup with a valid access token and publishes the result.
	///
	/// # Errors
	///
	/// Fails only when no valid access token can be obtained; lookup failures yield
	/// `Unknown`.
	pub async fn verify_entitlement(&self) -> Result<Entitlement> {
		let shared = &self.shared;
		let token = self.get_valid_access_token().await?;
		let epoch = shared.core.lock().epoch;

		Ok(shared.publish_entitlement(epoch, token).await)
	}
}

impl<C, M> SessionShared<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Starts a background lookup for `record`.
	pub(super) fn spawn_entitlement(self: &Arc<Self>, epoch: u64, record: &TokenRecord) {
		let shared = Arc::clone(self);
		let token = record.access_token.clone();

		tokio::spawn(async move {
			shared.publish_entitlement(epoch, token).await;
		});
	}

	/// Runs the lookup and publishes it if `token` is still the current access token of
	/// `epoch`.
	async fn publish_entitlement(&self, epoch: u64, token: TokenSecret) -> Entitlement {
		let entitlement = self.verifier.verify(self.strategy.as_ref(), &token).await;
		let core = self.core.lock();
		let current = self.tokens.current().is_some_and(|record| record.access_token == token);

		if core.epoch == epoch && current {
			self.entitlement_tx.send_replace(Some(entitlement.clone()));
		} else {
			drop(core);
			events::stale_result_discarded(FlowKind::Entitlement);
		}

		entitlement
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::{HttpClientError, HttpRequest, HttpResponse};
	// self
	use super::*;
	use crate::{auth::EntitlementTier, provider::DefaultProviderStrategy};

	#[derive(Debug)]
	struct Unreachable;
	impl Display for Unreachable {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.write_str("Provider is unreachable.")
		}
	}
	impl StdError for Unreachable {}

	struct CannedClient {
		status: u16,
		body: &'static str,
	}
	impl ProviderHttpClient for CannedClient {
		type Handle = CannedHandle;
		type TransportError = Unreachable;

		fn with_metadata(&self, _slot: ResponseMetadataSlot) -> Self::Handle {
			CannedHandle { status: self.status, body: self.body }
		}
	}

	struct CannedHandle {
		status: u16,
		body: &'static str,
	}
	impl<'c> AsyncHttpClient<'c> for CannedHandle {
		type Error = HttpClientError<Unreachable>;
		type Future =
			Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

		fn call(&'c self, request: HttpRequest) -> Self::Future {
			Box::pin(async move {
				assert_eq!(
					request.headers().get(AUTHORIZATION).and_then(|value| value.to_str().ok()),
					Some("Bearer T1")
				);

				if self.status == 0 {
					return Err(HttpClientError::Reqwest(Box::new(Unreachable)));
				}

				let mut response = HttpResponse::new(self.body.as_bytes().to_vec());

				*response.status_mut() = oauth2::http::StatusCode::from_u16(self.status)
					.expect("Canned status should be valid.");

				Ok(response)
			})
		}
	}

	fn verifier(status: u16, body: &'static str) -> EntitlementVerifier<CannedClient> {
		EntitlementVerifier::new(
			Some(Url::parse("https://api.example.com/v1/me").expect("Profile URL should parse.")),
			Arc::new(CannedClient { status, body }),
		)
	}

	#[tokio::test]
	async fn classifies_profile_product() {
		let token = TokenSecret::new("T1");
		let premium = verifier(200, r#"{"id":"wizzler","product":"premium"}"#)
			.verify(&DefaultProviderStrategy, &token)
			.await;

		assert_eq!(premium.tier, EntitlementTier::Premium);
		assert_eq!(premium.profile_id.as_deref(), Some("wizzler"));

		let free = verifier(200, r#"{"id":"x","product":"free"}"#)
			.verify(&DefaultProviderStrategy, &token)
			.await;

		assert_eq!(free.tier, EntitlementTier::Standard);
	}

	#[tokio::test]
	async fn failures_degrade_to_unknown() {
		let token = TokenSecret::new("T1");

		for (status, body) in [(500, "oops"), (200, "not json"), (0, "")] {
			let entitlement = verifier(status, body).verify(&DefaultProviderStrategy, &token).await;

			assert_eq!(entitlement, Entitlement::unknown(), "Status {status} should degrade.");
		}

		let without_endpoint = EntitlementVerifier::new(
			None,
			Arc::new(CannedClient { status: 200, body: r#"{"product":"premium"}"# }),
		);

		assert_eq!(
			without_endpoint.verify(&DefaultProviderStrategy, &token).await.tier,
			EntitlementTier::Unknown
		);
	}
}
