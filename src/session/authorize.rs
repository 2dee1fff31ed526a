//! Authorization request builder.

// self
use crate::{
	_prelude::*,
	auth::{self, PkceCodeChallengeMethod, TokenSecret},
	http::ProviderHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, events},
	session::{SessionEvent, SessionManager, SessionShared},
	store,
};

/// Pending authorization attempt, consumed exactly once by the callback.
///
/// The verifier never leaves this struct except in the token exchange body and the
/// persistence mirror; `Debug` redacts it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralAuthContext {
	code_verifier: TokenSecret,
	code_challenge: String,
	csrf_state: String,
	redirect_uri: Url,
	created_at: OffsetDateTime,
}
impl EphemeralAuthContext {
	/// Generates a fresh verifier, its S256 challenge, and an independent CSRF state.
	pub fn generate(redirect_uri: Url, created_at: OffsetDateTime) -> Self {
		let verifier = auth::random_string(auth::VERIFIER_LEN);

		Self {
			code_challenge: auth::code_challenge(&verifier),
			code_verifier: TokenSecret::new(verifier),
			csrf_state: auth::random_string(auth::STATE_LEN),
			redirect_uri,
			created_at,
		}
	}

	/// CSRF state sent as the `state` parameter.
	pub fn csrf_state(&self) -> &str {
		&self.csrf_state
	}

	/// S256 code challenge sent as `code_challenge`.
	pub fn code_challenge(&self) -> &str {
		&self.code_challenge
	}

	/// Redirect target used for this attempt.
	pub fn redirect_uri(&self) -> &Url {
		&self.redirect_uri
	}

	/// Instant the attempt started.
	pub fn created_at(&self) -> OffsetDateTime {
		self.created_at
	}

	/// Returns `true` if `returned` equals the CSRF state, compared in constant time.
	pub fn matches_state(&self, returned: &str) -> bool {
		auth::constant_time_eq(&self.csrf_state, returned)
	}

	pub(crate) fn code_verifier(&self) -> &TokenSecret {
		&self.code_verifier
	}
}
impl Debug for EphemeralAuthContext {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EphemeralAuthContext")
			.field("code_verifier", &self.code_verifier)
			.field("code_challenge", &self.code_challenge)
			.field("csrf_state", &self.csrf_state)
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("created_at", &self.created_at)
			.finish()
	}
}

/// Result of [`SessionManager::begin_authorization`].
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
	/// Authorization endpoint URL the UI layer must navigate to.
	pub url: Url,
	/// Pending context the callback will be checked against.
	pub context: EphemeralAuthContext,
}

impl<C, M> SessionManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Starts a new authorization attempt and returns the redirect target.
	///
	/// Any existing session is cleared first: tokens, entitlement, scheduled refreshes, and a
	/// previous pending attempt are dropped, and in-flight results from them are discarded.
	/// The new context is persisted so the callback can complete after a restart, and the
	/// state moves to [`SessionState::Authorizing`](crate::session::SessionState::Authorizing).
	///
	/// # Errors
	///
	/// Returns [`ConfigError`](crate::error::ConfigError) before touching storage or state
	/// when the client id or redirect URI is missing.
	pub async fn begin_authorization(&self) -> Result<AuthorizationRequest> {
		const KIND: FlowKind = FlowKind::Authorization;

		let span = FlowSpan::new(KIND, "begin_authorization");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.shared.begin_authorization()).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}
}

impl<C, M> SessionShared<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	async fn begin_authorization(&self) -> Result<AuthorizationRequest> {
		let redirect_uri = self.config.validate()?.clone();
		let context = EphemeralAuthContext::generate(redirect_uri, self.clock.now());
		let url = self.authorization_url(&context);

		{
			let mut core = self.core.lock();

			self.reset(&mut core, SessionEvent::AuthorizationStarted);

			core.pending = Some(context.clone());
			core.last_error = None;
		}

		self.persist().await;

		Ok(AuthorizationRequest { url, context })
	}

	/// Builds the authorization URL. Protocol parameters are written after the strategy's
	/// extras so a strategy cannot replace them.
	fn authorization_url(&self, context: &EphemeralAuthContext) -> Url {
		let mut params = BTreeMap::new();

		self.strategy.augment_authorization_request(&mut params);
		params.insert("response_type".into(), "code".into());
		params.insert("client_id".into(), self.config.client_id.clone());
		params.insert("redirect_uri".into(), context.redirect_uri.to_string());

		if let Some(scope) = self.config.scope.to_param(self.descriptor.quirks.scope_delimiter) {
			params.insert("scope".into(), scope);
		}

		params.insert("state".into(), context.csrf_state.clone());
		params.insert("code_challenge".into(), context.code_challenge.clone());
		params.insert(
			"code_challenge_method".into(),
			PkceCodeChallengeMethod::S256.as_str().into(),
		);

		let mut url = self.descriptor.endpoints.authorization.clone();

		url.query_pairs_mut().extend_pairs(params.iter());

		url
	}

	/// Mirrors the in-memory pending context (or its absence) to storage.
	pub(super) async fn sync_pending(&self) {
		let _writer = self.context_writer.lock().await;
		let pending = self.core.lock().pending.clone();
		let (op, result) = match &pending {
			Some(context) => (
				"save",
				store::save_typed(self.store.as_ref(), &self.context_key, context).await,
			),
			None => ("delete", self.store.delete(&self.context_key).await),
		};

		if let Err(e) = result {
			events::persistence_degraded(op, &self.context_key, &e);

			self.note_error(&e.into());
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn context() -> EphemeralAuthContext {
		EphemeralAuthContext::generate(
			Url::parse("https://app/cb").expect("Redirect fixture should parse."),
			OffsetDateTime::now_utc(),
		)
	}

	#[test]
	fn generated_context_binds_challenge_to_verifier() {
		let context = context();

		assert_eq!(context.code_verifier().expose().len(), auth::VERIFIER_LEN);
		assert_eq!(context.csrf_state().len(), auth::STATE_LEN);
		assert_eq!(
			context.code_challenge(),
			auth::code_challenge(context.code_verifier().expose())
		);
		assert_ne!(context.csrf_state(), context.code_verifier().expose());
		assert!(context.matches_state(&context.csrf_state().to_owned()));
		assert!(!context.matches_state("forged"));
		assert_ne!(context.csrf_state(), self::context().csrf_state());
	}

	#[test]
	fn debug_redacts_the_verifier_but_storage_keeps_it() {
		let context = context();
		let rendered = format!("{context:?}");

		assert!(!rendered.contains(context.code_verifier().expose()));
		assert!(rendered.contains(context.csrf_state()));

		let raw = store::encode(&context).expect("Context should encode.");
		let decoded: EphemeralAuthContext = store::decode(&raw).expect("Context should decode.");

		assert_eq!(decoded, context);
	}
}
