//! Callback validation and authorization code exchange.

// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	http::ProviderHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, events},
	session::{SessionEvent, SessionManager, SessionShared, SessionState},
};

impl<C, M> SessionManager<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Completes the pending authorization with the callback's `code` and `state`.
	///
	/// Checks run in order and stop at the first failure: the code must be present
	/// ([`Error::MissingCode`]), the state must be present ([`Error::StateMismatch`]), a
	/// pending context must exist ([`Error::ExpiredOrMissingSession`]), and the state must
	/// match it ([`Error::StateMismatch`]). The pending context is consumed by the check, so a
	/// replayed callback fails with [`Error::ExpiredOrMissingSession`] and never reaches the
	/// token endpoint.
	///
	/// On success the record is committed, the state moves to
	/// [`SessionState::Authenticated`], the refresh timer is armed, and an entitlement lookup
	/// starts in the background. A failed attempt returns the session to
	/// [`SessionState::LoggedOut`], or to [`SessionState::Failed`] for transient network
	/// errors; it is never retried automatically.
	pub async fn complete_authorization(
		&self,
		code: Option<&str>,
		state: Option<&str>,
	) -> Result<TokenRecord> {
		const KIND: FlowKind = FlowKind::CodeExchange;

		let span = FlowSpan::new(KIND, "complete_authorization");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.shared.complete_authorization(code, state)).await;

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
	async fn complete_authorization(
		self: &Arc<Self>,
		code: Option<&str>,
		state: Option<&str>,
	) -> Result<TokenRecord> {
		let Some(code) = code.filter(|value| !value.is_empty()) else {
			return Err(self.reject_callback(None, Error::MissingCode).await);
		};
		let Some(state) = state.filter(|value| !value.is_empty()) else {
			return Err(self.reject_callback(None, Error::StateMismatch).await);
		};
		let claim = {
			let mut core = self.core.lock();

			match core.pending.take() {
				None => Err(Error::ExpiredOrMissingSession),
				Some(context) if !context.matches_state(state) => Err(Error::StateMismatch),
				Some(context) => {
					self.transition(&mut core, SessionEvent::ExchangeStarted);

					Ok((core.epoch, context))
				},
			}
		};
		let (epoch, context) = match claim {
			Ok(claimed) => claimed,
			Err(e) => return Err(self.reject_callback(None, e).await),
		};

		self.sync_pending().await;

		let result = match self
			.endpoint
			.exchange_code(
				self.strategy.as_ref(),
				code,
				context.code_verifier(),
				context.redirect_uri(),
			)
			.await
		{
			Ok(grant) => grant.into_record(self.config.scope.clone(), self.clock.now(), None),
			Err(e) => Err(e),
		};

		match result {
			Ok(record) => {
				self.commit(
					FlowKind::CodeExchange,
					epoch,
					&record,
					SessionEvent::ExchangeSucceeded,
				)
				.await?;

				Ok(record)
			},
			Err(e) => Err(self.reject_callback(Some(epoch), e).await),
		}
	}

	/// Applies a failed callback to the session and returns the error to surface.
	///
	/// Only a session that is authorizing or exchanging changes state; a replayed callback
	/// against an authenticated session leaves it untouched.
	async fn reject_callback(&self, epoch: Option<u64>, error: Error) -> Error {
		let outcome = {
			let mut core = self.core.lock();

			if epoch.is_some_and(|epoch| epoch != core.epoch) {
				None
			} else {
				self.transition(
					&mut core,
					SessionEvent::ExchangeFailed { transient: error.is_transient() },
				);

				core.last_error = Some((&error).into());

				let logged_out = core.state == SessionState::LoggedOut;

				if logged_out {
					core.pending = None;
				}

				Some(logged_out)
			}
		};

		match outcome {
			None => {
				events::stale_result_discarded(FlowKind::CodeExchange);

				Error::SessionReset
			},
			Some(logged_out) => {
				if logged_out {
					self.sync_pending().await;
				}

				error
			},
		}
	}
}
