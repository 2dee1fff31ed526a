//! Token endpoint wire codec.
//!
//! Requests are form-encoded `POST`s assembled here and dispatched through the configured
//! [`ProviderHttpClient`]; responses are interpreted leniently (a missing `token_type` is
//! fine, a missing `access_token` or `expires_in` is not) and classified through the
//! provider's [`ProviderStrategy`].

pub use oauth2;

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest,
	http::{
		Method, Request,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenRecord, TokenSecret},
	error::{ConfigError, TransientError, TransportError},
	http::{ProviderHttpClient, ResponseMetadata, ResponseMetadataSlot, parse_retry_after},
	provider::{
		ClientAuthMethod, GrantType, ProviderDescriptor, ProviderErrorContext, ProviderErrorKind,
		ProviderQuirks, ProviderStrategy,
	},
};

type EndpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Maps HTTP transport failures into session [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a session error.
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		grant: GrantType,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		_strategy: &dyn ProviderStrategy,
		_grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => map_generic_transport_error(meta, message),
			_ => map_unknown_transport_error(meta),
		}
	}
}

/// Successful token endpoint payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
	/// Issued access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, when the provider sent one.
	pub refresh_token: Option<TokenSecret>,
	/// Provider-reported token type.
	pub token_type: Option<String>,
	/// Relative lifetime (`expires_in`), always positive.
	pub expires_in: Duration,
}
impl TokenGrant {
	/// Builds the authoritative record, keeping `previous_refresh` when the provider did not
	/// rotate the refresh token.
	pub fn into_record(
		self,
		scope: ScopeSet,
		issued_at: OffsetDateTime,
		previous_refresh: Option<TokenSecret>,
	) -> Result<TokenRecord> {
		let mut builder = TokenRecord::builder(scope)
			.access_token(self.access_token.expose())
			.refresh_secret(self.refresh_token.or(previous_refresh))
			.issued_at(issued_at)
			.expires_in(self.expires_in);

		if let Some(token_type) = self.token_type {
			builder = builder.token_type(token_type);
		}

		builder.build().map_err(|e| Error::MalformedTokenResponse { reason: e.to_string() })
	}
}

// Ten years.
const MAX_EXPIRES_IN: i64 = 315_360_000;

#[derive(Debug, Default, Deserialize)]
struct TokenResponseBody {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
}
impl TokenResponseBody {
	fn into_grant(self) -> Result<TokenGrant> {
		let access_token = self.access_token.filter(|value| !value.is_empty()).ok_or_else(|| {
			Error::MalformedTokenResponse { reason: "access_token is missing".into() }
		})?;
		let expires_in = self.expires_in.ok_or_else(|| Error::MalformedTokenResponse {
			reason: "expires_in is missing".into(),
		})?;

		if expires_in <= 0 {
			return Err(Error::MalformedTokenResponse {
				reason: format!("expires_in must be positive, got {expires_in}"),
			});
		}
		if expires_in > MAX_EXPIRES_IN {
			return Err(Error::MalformedTokenResponse {
				reason: format!("expires_in exceeds {MAX_EXPIRES_IN} seconds, got {expires_in}"),
			});
		}

		Ok(TokenGrant {
			access_token: TokenSecret::new(access_token),
			refresh_token: self
				.refresh_token
				.filter(|value| !value.is_empty())
				.map(TokenSecret::new),
			token_type: self.token_type,
			expires_in: Duration::seconds(expires_in),
		})
	}
}

/// Token endpoint client bound to one provider descriptor and client registration.
pub struct TokenEndpoint<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	token_url: Url,
	auth_method: ClientAuthMethod,
	quirks: ProviderQuirks,
	client_id: String,
	client_secret: Option<TokenSecret>,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> TokenEndpoint<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Binds the endpoint to `descriptor`; the secret is dropped for public (PKCE-only) clients.
	pub fn from_descriptor(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: Option<&str>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Self {
		let client_secret =
			if matches!(descriptor.preferred_client_auth_method, ClientAuthMethod::NoneWithPkce) {
				None
			} else {
				client_secret.map(TokenSecret::new)
			};

		Self {
			token_url: descriptor.endpoints.token.clone(),
			auth_method: descriptor.preferred_client_auth_method,
			quirks: descriptor.quirks,
			client_id: client_id.to_owned(),
			client_secret,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
		}
	}

	/// Exchanges an authorization code plus PKCE verifier for tokens.
	pub fn exchange_code<'a>(
		&'a self,
		strategy: &'a dyn ProviderStrategy,
		code: &'a str,
		code_verifier: &'a TokenSecret,
		redirect_uri: &'a Url,
	) -> EndpointFuture<'a, TokenGrant> {
		Box::pin(async move {
			let grant = GrantType::AuthorizationCode;
			let request = self.build_request(
				strategy,
				grant,
				[
					("code", code),
					("redirect_uri", redirect_uri.as_str()),
					("code_verifier", code_verifier.expose()),
				],
			)?;

			self.execute(strategy, grant, request).await
		})
	}

	/// Redeems a refresh token.
	pub fn refresh<'a>(
		&'a self,
		strategy: &'a dyn ProviderStrategy,
		refresh_token: &'a TokenSecret,
	) -> EndpointFuture<'a, TokenGrant> {
		Box::pin(async move {
			let grant = GrantType::RefreshToken;
			let request =
				self.build_request(strategy, grant, [("refresh_token", refresh_token.expose())])?;

			self.execute(strategy, grant, request).await
		})
	}

	/// Assembles the form-encoded token request, including client authentication.
	pub fn build_request<'p>(
		&self,
		strategy: &dyn ProviderStrategy,
		grant: GrantType,
		fields: impl IntoIterator<Item = (&'p str, &'p str)>,
	) -> Result<HttpRequest> {
		let mut form = BTreeMap::new();

		strategy.augment_token_request(grant, &mut form);
		form.insert("grant_type".to_owned(), grant.as_str().to_owned());

		for (key, value) in fields {
			form.insert(key.to_owned(), value.to_owned());
		}

		let mut builder = Request::builder()
			.method(Method::POST)
			.uri(self.token_url.as_str())
			.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
			.header(ACCEPT, "application/json");

		match (self.auth_method, self.client_secret.as_ref()) {
			(ClientAuthMethod::ClientSecretBasic, Some(secret)) => {
				builder = builder.header(AUTHORIZATION, basic_auth(&self.client_id, secret));

				if self.quirks.client_id_in_form {
					form.insert("client_id".to_owned(), self.client_id.clone());
				}
			},
			(ClientAuthMethod::ClientSecretPost, Some(secret)) => {
				form.insert("client_id".to_owned(), self.client_id.clone());
				form.insert("client_secret".to_owned(), secret.expose().to_owned());
			},
			_ => {
				form.insert("client_id".to_owned(), self.client_id.clone());
			},
		}

		let body =
			form_urlencoded::Serializer::new(String::new()).extend_pairs(form.iter()).finish();

		builder.body(body.into_bytes()).map_err(|e| ConfigError::from(e).into())
	}

	async fn execute(
		&self,
		strategy: &dyn ProviderStrategy,
		grant: GrantType,
		request: HttpRequest,
	) -> Result<TokenGrant> {
		let meta = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(meta.clone());
		let response = handle.call(request).await.map_err(|err| {
			self.error_mapper.map_transport_error(strategy, grant, meta.take().as_ref(), err)
		})?;
		let retry_after = parse_retry_after(response.headers());

		interpret_token_response(
			strategy,
			grant,
			response.status().as_u16(),
			retry_after,
			response.body(),
		)
	}
}
impl<C, M> Debug for TokenEndpoint<C, M>
where
	C: ?Sized + ProviderHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenEndpoint")
			.field("token_url", &self.token_url.as_str())
			.field("auth_method", &self.auth_method)
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret)
			.finish()
	}
}

/// Interprets a token endpoint response.
///
/// A 2xx body without an `error` field must carry `access_token` and a positive
/// `expires_in`. Everything else is classified through `strategy`: transient kinds become
/// [`TransientError::TokenEndpoint`], a rejected refresh token becomes
/// [`Error::CredentialInvalid`], and the rest surface as [`Error::TokenExchangeFailed`].
pub fn interpret_token_response(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	status: u16,
	retry_after: Option<Duration>,
	body: &[u8],
) -> Result<TokenGrant> {
	let success = (200..300).contains(&status);
	let mut de = serde_json::Deserializer::from_slice(body);
	let parsed: Result<TokenResponseBody, _> = serde_path_to_error::deserialize(&mut de);

	match parsed {
		Ok(body) if success && body.error.is_none() => body.into_grant(),
		Ok(body) => Err(classify_failure(
			strategy,
			grant,
			status,
			retry_after,
			body.error,
			body.error_description,
			None,
		)),
		Err(e) if success => Err(Error::MalformedTokenResponse {
			reason: format!("{} at {}", e.inner(), e.path()),
		}),
		Err(_) => Err(classify_failure(
			strategy,
			grant,
			status,
			retry_after,
			None,
			None,
			Some(String::from_utf8_lossy(body).into_owned()),
		)),
	}
}

fn classify_failure(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	status: u16,
	retry_after: Option<Duration>,
	error: Option<String>,
	description: Option<String>,
	body_preview: Option<String>,
) -> Error {
	let mut ctx = ProviderErrorContext::new(grant).with_http_status(status);

	if let Some(error) = &error {
		ctx = ctx.with_oauth_error(error.clone());
	}
	if let Some(description) = &description {
		ctx = ctx.with_error_description(description.clone());
	}
	if let Some(body) = body_preview.filter(|body| !body.trim().is_empty()) {
		ctx = ctx.with_body_preview(body);
	}

	let code = error.unwrap_or_else(|| format!("http_{status}"));

	match strategy.classify_token_error(&ctx) {
		ProviderErrorKind::Transient => TransientError::TokenEndpoint {
			message: description.unwrap_or(code),
			status: Some(status),
			retry_after,
		}
		.into(),
		ProviderErrorKind::InvalidGrant if grant == GrantType::RefreshToken =>
			Error::CredentialInvalid { reason: code },
		ProviderErrorKind::InvalidGrant
		| ProviderErrorKind::InvalidClient
		| ProviderErrorKind::InsufficientScope
		| ProviderErrorKind::Rejected => Error::TokenExchangeFailed { code, description },
	}
}

fn basic_auth(client_id: &str, secret: &TokenSecret) -> String {
	let encode =
		|value: &str| form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>();
	let credentials = format!("{}:{}", encode(client_id), encode(secret.expose()));

	format!("Basic {}", STANDARD.encode(credentials))
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: "Request timed out while calling the token endpoint".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

#[cfg(feature = "reqwest")]
fn map_generic_transport_error(meta: Option<&ResponseMetadata>, message: impl Display) -> Error {
	TransientError::TokenEndpoint {
		message: format!("HTTP client error occurred while calling the token endpoint: {message}"),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

#[cfg(feature = "reqwest")]
fn map_unknown_transport_error(meta: Option<&ResponseMetadata>) -> Error {
	TransientError::TokenEndpoint {
		message: "HTTP client error occurred while calling the token endpoint".into(),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

#[cfg(feature = "reqwest")]
fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

#[cfg(feature = "reqwest")]
fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
