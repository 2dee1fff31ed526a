#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use oauth2_session::{
	_preludet::*,
	auth::{ProviderId, ScopeSet},
	error::{ConfigError, Error},
	oauth::ReqwestTransportErrorMapper,
	provider::{ProviderDescriptor, SpotifyProviderStrategy},
	session::{SessionConfig, SessionManager, SessionState},
	store::{MemoryStore, StoreKey, StoreSlot},
};

fn build_descriptor(server: &MockServer) -> ProviderDescriptor {
	let provider_id = ProviderId::new("mock-authorize")
		.expect("Provider identifier should be valid for authorization test.");

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
		ScopeSet::new(["streaming"]).expect("Scope set should be valid for authorization test."),
	)
}

#[tokio::test]
async fn begin_authorization_builds_pkce_request() {
	let server = MockServer::start_async().await;
	let (session, store, _clock) =
		build_reqwest_test_session(build_descriptor(&server), build_config());

	assert_eq!(session.session_state(), SessionState::LoggedOut);

	let request =
		session.begin_authorization().await.expect("Authorization should start successfully.");
	let pairs: HashMap<_, _> = request.url.query_pairs().into_owned().collect();

	assert!(request.url.as_str().starts_with(&server.url("/authorize")));
	assert_eq!(pairs.get("response_type"), Some(&"code".into()));
	assert_eq!(pairs.get("client_id"), Some(&"abc".into()));
	assert_eq!(pairs.get("redirect_uri"), Some(&"https://app/cb".into()));
	assert_eq!(pairs.get("scope"), Some(&"streaming".into()));
	assert_eq!(pairs.get("code_challenge_method"), Some(&"S256".into()));
	assert_eq!(pairs.get("code_challenge"), Some(&request.context.code_challenge().into()));
	assert_eq!(pairs.get("state"), Some(&request.context.csrf_state().into()));
	assert_eq!(session.session_state(), SessionState::Authorizing);

	let persisted = store
		.peek(&StoreKey::new(SessionConfig::DEFAULT_NAMESPACE, StoreSlot::EphemeralContext))
		.expect("Pending context should be persisted.");

	assert!(persisted.contains(request.context.csrf_state()));
}

#[tokio::test]
async fn each_attempt_gets_fresh_secrets() {
	let server = MockServer::start_async().await;
	let (session, _store, _clock) =
		build_reqwest_test_session(build_descriptor(&server), build_config());
	let first = session.begin_authorization().await.expect("First attempt should start.");
	let second = session.begin_authorization().await.expect("Second attempt should start.");

	assert_ne!(first.context.csrf_state(), second.context.csrf_state());
	assert_ne!(first.context.code_challenge(), second.context.code_challenge());
	assert_eq!(session.session_state(), SessionState::Authorizing);

	let err = session
		.complete_authorization(Some("code"), Some(first.context.csrf_state()))
		.await
		.expect_err("The superseded attempt's state must be rejected.");

	assert!(matches!(err, Error::StateMismatch));
}

#[tokio::test]
async fn configuration_errors_fire_before_any_side_effect() {
	let server = MockServer::start_async().await;
	let descriptor = build_descriptor(&server);
	let mut config = build_config();

	config.redirect_uri = None;

	let (session, store, _clock) = build_reqwest_test_session(descriptor.clone(), config);
	let err = session
		.begin_authorization()
		.await
		.expect_err("A missing redirect URI should be rejected.");

	assert!(matches!(err, Error::Config(ConfigError::MissingRedirectUri)));
	assert_eq!(session.session_state(), SessionState::LoggedOut);
	assert!(store.is_empty());

	let config = SessionConfig::new(
		"",
		Url::parse("https://app/cb").expect("Redirect URI should parse successfully."),
		ScopeSet::default(),
	);
	let (session, store, _clock) = build_reqwest_test_session(descriptor, config);
	let err =
		session.begin_authorization().await.expect_err("An empty client id should be rejected.");

	assert!(matches!(err, Error::Config(ConfigError::MissingClientId)));
	assert_eq!(session.session_state(), SessionState::LoggedOut);
	assert!(store.is_empty());
}

#[tokio::test]
async fn spotify_strategy_adds_the_account_dialog() {
	let server = MockServer::start_async().await;
	let session: ReqwestTestSession = SessionManager::with_http_client(
		build_config(),
		build_descriptor(&server),
		test_reqwest_http_client(),
		Arc::new(ReqwestTransportErrorMapper),
	)
	.strategy(Arc::new(SpotifyProviderStrategy))
	.store(Arc::new(MemoryStore::default()))
	.build();
	let request =
		session.begin_authorization().await.expect("Authorization should start successfully.");
	let pairs: HashMap<_, _> = request.url.query_pairs().into_owned().collect();

	assert_eq!(pairs.get("show_dialog"), Some(&"true".into()));
	assert_eq!(pairs.get("client_id"), Some(&"abc".into()));
}
