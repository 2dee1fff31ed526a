#![cfg(feature = "reqwest")]

// std
use std::time::Duration as StdDuration;
// crates.io
use httpmock::prelude::*;
// self
use oauth2_session::{
	_preludet::*,
	auth::{ProviderId, ScopeSet},
	error::{Error, ErrorClass},
	provider::ProviderDescriptor,
	session::{FailureReason, ManualClock, RetryPolicy, SessionConfig, SessionState},
	store::{MemoryStore, StoreKey, StoreSlot},
};

fn build_descriptor(server: &MockServer) -> ProviderDescriptor {
	let provider_id = ProviderId::new("mock-refresh")
		.expect("Provider identifier should be valid for refresh test.");

	ProviderDescriptor::builder(provider_id)
		.authorization_endpoint(
			Url::parse(&server.url("/authorize"))
				.expect("Mock authorize endpoint should parse successfully."),
		)
		.token_endpoint(
			Url::parse(&server.url("/token"))
				.expect("Mock token endpoint should parse successfully."),
		)
		.build()
		.expect("Provider descriptor should build successfully.")
}

fn build_config() -> SessionConfig {
	SessionConfig::new(
		"abc",
		Url::parse("https://app/cb").expect("Redirect URI should parse successfully."),
		ScopeSet::new(["streaming"]).expect("Scope set should be valid for refresh test."),
	)
}

/// Runs a full authorization against `server`, issuing `T1`/`R1` valid for `expires_in`
/// seconds.
async fn authenticate(
	server: &MockServer,
	config: SessionConfig,
	expires_in: i64,
) -> (ReqwestTestSession, Arc<MemoryStore>, ManualClock) {
	let (session, store, clock) = build_reqwest_test_session(build_descriptor(server), config);
	let request =
		session.begin_authorization().await.expect("Authorization should start successfully.");
	let mut mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "authorization_code");
			then.status(200).header("content-type", "application/json").body(format!(
				"{{\"access_token\":\"T1\",\"refresh_token\":\"R1\",\"expires_in\":{expires_in}}}"
			));
		})
		.await;

	session
		.complete_authorization(Some("goodcode"), Some(request.context.csrf_state()))
		.await
		.expect("Authorization code exchange should succeed.");
	mock.assert_async().await;
	mock.delete_async().await;

	(session, store, clock)
}

fn access(session: &ReqwestTestSession) -> Option<String> {
	session.current().map(|record| record.access_token.expose().to_owned())
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
	let server = MockServer::start_async().await;
	let (session, _store, clock) = authenticate(&server, build_config(), 3600).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "refresh_token")
				.form_urlencoded_tuple("refresh_token", "R1");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"T2\",\"expires_in\":3600}");
		})
		.await;

	clock.advance(Duration::minutes(59));

	let callers = (0..8)
		.map(|_| {
			let session = session.clone();

			tokio::spawn(async move { session.get_valid_access_token().await })
		})
		.collect::<Vec<_>>();

	for caller in callers {
		let token = caller
			.await
			.expect("Caller task should not panic.")
			.expect("Every caller should receive a token.");

		assert_eq!(token.expose(), "T2");
	}

	mock.assert_calls_async(1).await;

	assert_eq!(session.refresh_metrics().attempts(), 1);
	assert_eq!(session.refresh_metrics().successes(), 1);
	assert_eq!(session.session_state(), SessionState::Authenticated);

	let record = session.current().expect("Refreshed record should be current.");

	assert_eq!(
		record.refresh_token.as_ref().map(|secret| secret.expose()),
		Some("R1"),
		"A refresh response without a new refresh token keeps the previous one."
	);
}

#[tokio::test]
async fn tokens_outside_the_buffer_skip_the_network() {
	let server = MockServer::start_async().await;
	let (session, _store, clock) = authenticate(&server, build_config(), 3600).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(500);
		})
		.await;

	clock.advance(Duration::minutes(30));

	let token = session.get_valid_access_token().await.expect("Token should still be valid.");

	assert_eq!(token.expose(), "T1");
	assert_eq!(session.refresh_metrics().attempts(), 0);

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn rejected_refresh_logs_the_session_out() {
	let server = MockServer::start_async().await;
	let (session, store, clock) = authenticate(&server, build_config(), 3600).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "refresh_token");
			then.status(400)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_grant\",\"error_description\":\"revoked\"}");
		})
		.await;

	clock.advance(Duration::minutes(59));

	let err = session
		.get_valid_access_token()
		.await
		.expect_err("A revoked refresh token should surface as invalid credentials.");

	assert!(matches!(err, Error::CredentialInvalid { .. }));
	assert_eq!(session.session_state(), SessionState::LoggedOut);
	assert!(session.current().is_none());
	assert_eq!(session.last_error().map(|last| last.class), Some(ErrorClass::CredentialInvalid));
	assert!(
		store
			.peek(&StoreKey::new(SessionConfig::DEFAULT_NAMESPACE, StoreSlot::TokenRecord))
			.is_none()
	);

	let err = session
		.get_valid_access_token()
		.await
		.expect_err("A logged out session has no token to hand out.");

	assert!(matches!(err, Error::NotAuthenticated));

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn transient_failures_keep_serving_the_unexpired_token() {
	let server = MockServer::start_async().await;
	let config = build_config().with_retry(RetryPolicy {
		max_attempts: 0,
		base_delay: Duration::seconds(1),
		max_delay: Duration::seconds(1),
	});
	let (session, _store, clock) = authenticate(&server, config, 3600).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "refresh_token");
			then.status(503);
		})
		.await;

	clock.advance(Duration::minutes(59));

	let token = session
		.get_valid_access_token()
		.await
		.expect("The unexpired token should be served while the provider is down.");

	assert_eq!(token.expose(), "T1");
	assert_eq!(session.session_state(), SessionState::Failed(FailureReason::Transient));
	assert_eq!(session.last_error().map(|last| last.class), Some(ErrorClass::TransientNetwork));
	assert_eq!(session.refresh_metrics().failures(), 1);

	clock.advance(Duration::minutes(2));

	let err = session
		.get_valid_access_token()
		.await
		.expect_err("An expired token must never be handed out.");

	assert!(err.is_transient());
	assert_eq!(access(&session), Some("T1".into()), "Transient failures keep the record.");

	mock.assert_calls_async(2).await;
}

#[tokio::test]
async fn transient_failures_retry_in_the_background() {
	let server = MockServer::start_async().await;
	let config = build_config().with_retry(RetryPolicy {
		max_attempts: 3,
		base_delay: Duration::milliseconds(500),
		max_delay: Duration::seconds(1),
	});
	let (session, _store, clock) = authenticate(&server, config, 3600).await;
	let mut outage = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "refresh_token");
			then.status(503);
		})
		.await;

	clock.advance(Duration::minutes(59));

	let token = session.get_valid_access_token().await.expect("Stale token should be served.");

	assert_eq!(token.expose(), "T1");

	outage.assert_calls_async(1).await;
	outage.delete_async().await;

	let recovery = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "refresh_token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"T2\",\"refresh_token\":\"R2\",\"expires_in\":3600}");
		})
		.await;
	let mut states = session.subscribe();

	tokio::time::timeout(
		StdDuration::from_secs(5),
		states.wait_for(|state| *state == SessionState::Authenticated),
	)
	.await
	.expect("Background retry should recover the session in time.")
	.expect("State channel should stay open.");

	recovery.assert_calls_async(1).await;

	assert_eq!(access(&session), Some("T2".into()));
	assert!(session.last_error().is_none());
	assert_eq!(session.refresh_metrics().attempts(), 2);
}

#[tokio::test]
async fn logout_discards_an_in_flight_refresh() {
	let server = MockServer::start_async().await;
	let (session, store, clock) = authenticate(&server, build_config(), 3600).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "refresh_token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"T2\",\"expires_in\":3600}")
				.delay(StdDuration::from_millis(500));
		})
		.await;

	clock.advance(Duration::minutes(59));

	let refreshing = tokio::spawn({
		let session = session.clone();

		async move { session.get_valid_access_token().await }
	});

	tokio::time::sleep(StdDuration::from_millis(100)).await;
	session.logout().await;

	let err = refreshing
		.await
		.expect("Refresh task should not panic.")
		.expect_err("A refresh finishing after logout must be discarded.");

	assert!(matches!(err, Error::SessionReset));
	assert_eq!(session.session_state(), SessionState::LoggedOut);
	assert!(session.current().is_none());
	assert!(session.entitlement().is_none());
	assert!(store.is_empty());

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn background_timer_refreshes_before_expiry() {
	let server = MockServer::start_async().await;
	let (session, _store, clock) = authenticate(&server, build_config(), 4).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "refresh_token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"T2\",\"expires_in\":3600}");
		})
		.await;

	// A 4 second lifetime caps the buffer at 2 seconds, so the timer fires 2 seconds in.
	clock.advance(Duration::seconds(3));

	tokio::time::timeout(StdDuration::from_secs(5), async {
		while access(&session).as_deref() != Some("T2") {
			tokio::time::sleep(StdDuration::from_millis(50)).await;
		}
	})
	.await
	.expect("Timer should refresh the token without any caller.");

	mock.assert_calls_async(1).await;

	assert_eq!(session.session_state(), SessionState::Authenticated);
}

#[tokio::test]
async fn timer_waiting_on_a_failed_lazy_refresh_sends_nothing() {
	let server = MockServer::start_async().await;
	let config = build_config().with_retry(RetryPolicy {
		max_attempts: 0,
		base_delay: Duration::seconds(1),
		max_delay: Duration::seconds(1),
	});
	let (session, _store, clock) = authenticate(&server, config, 4).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "refresh_token");
			then.status(503).delay(StdDuration::from_millis(2_500));
		})
		.await;

	// The timer fires 2 seconds in, while the lazy attempt below is still in flight.
	clock.advance(Duration::seconds(3));

	let token = session
		.get_valid_access_token()
		.await
		.expect("The unexpired token should be served while the provider is down.");

	assert_eq!(token.expose(), "T1");

	tokio::time::sleep(StdDuration::from_millis(500)).await;

	mock.assert_calls_async(1).await;

	assert_eq!(session.refresh_metrics().attempts(), 1);
	assert_eq!(session.session_state(), SessionState::Failed(FailureReason::Transient));
}
