// self
use oauth2_session::{
	_preludet::*,
	auth::{ProviderId, ScopeSet, TokenRecord},
	error::{ConfigError, Error, Result, TransientError, TransportError},
	http::{ProviderHttpClient, ResponseMetadata, ResponseMetadataSlot},
	oauth::{
		TransportErrorMapper,
		oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse},
	},
	provider::{GrantType, ProviderDescriptor, ProviderStrategy},
	session::{
		Clock, FailureReason, ManualClock, RetryPolicy, SessionConfig, SessionManager,
		SessionState,
	},
	store::{self, MemoryStore, StoreKey, StoreSlot},
};

#[derive(Debug)]
enum FakeTransportError {
	Throttled,
}
impl Display for FakeTransportError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Throttled => write!(f, "Transport throttled."),
		}
	}
}
impl StdError for FakeTransportError {}

#[derive(Clone, Copy)]
struct FakeHttpClient {
	retry_after: Duration,
}
impl FakeHttpClient {
	fn throttled(retry_after: Duration) -> Self {
		Self { retry_after }
	}
}
impl ProviderHttpClient for FakeHttpClient {
	type Handle = FakeHttpHandle;
	type TransportError = FakeTransportError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		FakeHttpHandle { slot, retry_after: self.retry_after }
	}
}

struct FakeHttpHandle {
	slot: ResponseMetadataSlot,
	retry_after: Duration,
}
impl<'a> AsyncHttpClient<'a> for FakeHttpHandle {
	type Error = HttpClientError<FakeTransportError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'a + Send + Sync>>;

	fn call(&'a self, _request: HttpRequest) -> Self::Future {
		let slot = self.slot.clone();
		let retry_after = self.retry_after;

		Box::pin(async move {
			assert!(
				slot.take().is_none(),
				"ResponseMetadataSlot must be clear before dispatching a request."
			);
			slot.store(ResponseMetadata { status: Some(429), retry_after: Some(retry_after) });

			Err(HttpClientError::Reqwest(Box::new(FakeTransportError::Throttled)))
		})
	}
}

#[derive(Clone, Default)]
struct RecordingTransportErrorMapper {
	calls: Arc<Mutex<Vec<(GrantType, Option<ResponseMetadata>)>>>,
}
impl RecordingTransportErrorMapper {
	fn recorded(&self) -> Vec<(GrantType, Option<ResponseMetadata>)> {
		self.calls.lock().clone()
	}
}
impl TransportErrorMapper<FakeTransportError> for RecordingTransportErrorMapper {
	fn map_transport_error(
		&self,
		_strategy: &dyn ProviderStrategy,
		grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<FakeTransportError>,
	) -> Error {
		let status = meta.and_then(|value| value.status);
		let retry_after = meta.and_then(|value| value.retry_after);

		self.calls.lock().push((grant, meta.cloned()));

		match err {
			HttpClientError::Reqwest(inner) => TransientError::TokenEndpoint {
				message: format!("Fake transport error: {inner}"),
				status,
				retry_after,
			}
			.into(),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			other => TransientError::TokenEndpoint {
				message: format!("Unhandled HTTP client error variant: {other:?}"),
				status,
				retry_after,
			}
			.into(),
		}
	}
}

type FakeSession = SessionManager<FakeHttpClient, RecordingTransportErrorMapper>;

fn build_descriptor() -> ProviderDescriptor {
	let provider_id =
		ProviderId::new("mock-provider-http").expect("Failed to build mock provider identifier.");

	ProviderDescriptor::builder(provider_id)
		.authorization_endpoint(
			Url::parse("https://mock.example.com/authorize")
				.expect("Failed to parse mock authorization endpoint URL."),
		)
		.token_endpoint(
			Url::parse("https://mock.example.com/token")
				.expect("Failed to parse mock token endpoint URL."),
		)
		.build()
		.expect("Failed to build mock provider descriptor.")
}

fn build_session(
	retry_after: Duration,
	mapper: RecordingTransportErrorMapper,
	store: Arc<MemoryStore>,
	clock: ManualClock,
) -> FakeSession {
	let config = SessionConfig::new(
		"throttled-client",
		Url::parse("https://app/cb").expect("Redirect URI should parse successfully."),
		ScopeSet::new(["profile.read"]).expect("Failed to build mock scope set."),
	)
	.with_retry(RetryPolicy { max_attempts: 0, ..RetryPolicy::default() });

	SessionManager::with_http_client(
		config,
		build_descriptor(),
		FakeHttpClient::throttled(retry_after),
		mapper,
	)
	.store(store)
	.clock(Arc::new(clock))
	.build()
}

#[tokio::test]
async fn throttled_exchange_surfaces_metadata() {
	let mapper = RecordingTransportErrorMapper::default();
	let session = build_session(
		Duration::seconds(5),
		mapper.clone(),
		Arc::new(MemoryStore::default()),
		ManualClock::default(),
	);
	let request =
		session.begin_authorization().await.expect("Authorization should start successfully.");
	let err = session
		.complete_authorization(Some("code"), Some(request.context.csrf_state()))
		.await
		.expect_err("Exchange should be throttled with HTTP 429.");

	match err {
		Error::Transient(TransientError::TokenEndpoint { status, retry_after, .. }) => {
			assert_eq!(status, Some(429));
			assert_eq!(retry_after, Some(Duration::seconds(5)));
		},
		other => panic!("Unexpected error variant: {other:?}."),
	}

	assert_eq!(session.session_state(), SessionState::Failed(FailureReason::Transient));

	let observed = mapper.recorded();

	assert_eq!(observed.len(), 1, "Mapper must record a single request.");
	assert_eq!(observed[0].0, GrantType::AuthorizationCode);
}

#[tokio::test]
async fn throttled_refresh_keeps_the_record_for_a_later_retry() {
	let mapper = RecordingTransportErrorMapper::default();
	let backend = Arc::new(MemoryStore::default());
	let clock = ManualClock::default();
	let record = TokenRecord::builder(
		ScopeSet::new(["profile.read"]).expect("Failed to build mock scope set."),
	)
	.access_token("T1")
	.refresh_token("R1")
	.issued_at(clock.now() - Duration::hours(2))
	.expires_in(Duration::hours(1))
	.build()
	.expect("Token record fixture should build successfully.");

	store::save_typed(
		backend.as_ref(),
		&StoreKey::new(SessionConfig::DEFAULT_NAMESPACE, StoreSlot::TokenRecord),
		&record,
	)
	.await
	.expect("Failed to seed the token record into the store.");

	let session = build_session(Duration::seconds(30), mapper.clone(), backend, clock);

	assert_eq!(session.restore().await, SessionState::Failed(FailureReason::Transient));
	assert!(session.current().is_some(), "Transient failures must keep the record.");

	let err = session
		.get_valid_access_token()
		.await
		.expect_err("An expired token must not be served while the provider throttles.");

	assert_eq!(err.retry_after(), Some(Duration::seconds(30)));

	let observed = mapper.recorded();

	assert_eq!(observed.len(), 2);

	let (grant, meta) = observed.first().cloned().expect("Refresh metadata should be recorded.");
	let meta = meta.expect("Response metadata should be recorded.");

	assert_eq!(grant, GrantType::RefreshToken);
	assert_eq!(meta.status, Some(429));
	assert_eq!(meta.retry_after, Some(Duration::seconds(30)));
}
