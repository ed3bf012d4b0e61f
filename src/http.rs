//! Transport primitives for discovery and token-endpoint requests.
//!
//! [`TokenHttpClient`] is the crate's only dependency on an HTTP stack. Every outbound call
//! goes through [`HttpExecutor`], which owns the transient-failure policy: a request that
//! times out or answers 500/503/504 is retried exactly once after a fixed pause, and a second
//! failure of the same class surfaces as
//! [`ServiceError::RequestTimeout`] or [`ServiceError::ServiceNotAvailable`].

// std
use std::ops::Deref;
// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
	http::{
		HeaderMap, HeaderValue, Method, StatusCode,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	error::{ClientError, ServiceError, TransportError},
	oauth::TokenFailure,
	obs,
};

/// Header carrying the caller's correlation id.
pub const CLIENT_REQUEST_ID: &str = "client-request-id";
/// Header asking the service to echo the correlation id.
pub const RETURN_CLIENT_REQUEST_ID: &str = "return-client-request-id";

/// Remote endpoint classes, used to label errors and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
	/// AAD instance discovery.
	InstanceDiscovery,
	/// OpenID configuration document.
	TenantDiscovery,
	/// ADFS device registration service.
	DeviceRegistration,
	/// ADFS WebFinger realm check.
	WebFinger,
	/// Authorization endpoint (redirect-delivered errors).
	Authorization,
	/// Token endpoint.
	Token,
	/// Broker IPC (broker-reported errors).
	Broker,
}
impl Endpoint {
	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::InstanceDiscovery => "instance discovery",
			Self::TenantDiscovery => "tenant discovery",
			Self::DeviceRegistration => "device registration",
			Self::WebFinger => "WebFinger",
			Self::Authorization => "authorization",
			Self::Token => "token",
			Self::Broker => "broker",
		}
	}
}
impl Display for Endpoint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Abstraction over HTTP transports.
///
/// Implementations must be `Send + Sync + 'static` so one transport can back every
/// application instance, and the handles they return must own whatever state the request
/// future needs so those futures stay `Send`.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle used for a single request.
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds a handle for the next request.
	fn handle(&self) -> Self::Handle;
}

/// Maps transport failures into [`TransportError`] so the executor can classify them.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport.
	///
	/// Only [`TransportError::Timeout`] is retried, so mappers must classify timeouts precisely.
	fn map_transport_error(&self, endpoint: Endpoint, error: HttpClientError<E>)
	-> TransportError;
}

/// Thin wrapper around [`ReqwestClient`].
///
/// Identity endpoints answer directly, so a custom client should disable redirect following
/// and set a request timeout; timeouts are the transient class [`HttpExecutor`] retries.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client with the provided request timeout and redirects disabled.
	pub fn with_timeout(timeout: std::time::Duration) -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder()
			.timeout(timeout)
			.redirect(reqwest::redirect::Policy::none())
			.build()?;

		Ok(Self(client))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = ReqwestHandle;
	type TransportError = ReqwestError;

	fn handle(&self) -> Self::Handle {
		ReqwestHandle(self.0.clone())
	}
}

/// [`AsyncHttpClient`] handle returned by [`ReqwestHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestHandle(ReqwestClient);
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for ReqwestHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = self.0.clone();

		Box::pin(async move {
			let response =
				client.execute(request.try_into().map_err(Box::new)?).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		_endpoint: Endpoint,
		error: HttpClientError<ReqwestError>,
	) -> TransportError {
		match error {
			HttpClientError::Reqwest(inner) => TransportError::from(*inner),
			HttpClientError::Http(inner) => TransportError::Request(inner),
			HttpClientError::Io(inner) => TransportError::Io(inner),
			HttpClientError::Other(message) => TransportError::Other { message },
			_ => TransportError::Other { message: "unknown transport failure".into() },
		}
	}
}

/// Owned request description that can be replayed for the transient retry.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
	method: Method,
	url: Url,
	headers: HeaderMap,
	body: Vec<u8>,
}
impl PreparedRequest {
	/// `GET` request accepting JSON.
	pub fn get(url: Url) -> Self {
		let mut headers = HeaderMap::new();

		headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

		Self { method: Method::GET, url, headers, body: Vec::new() }
	}

	/// Form-encoded `POST` request accepting JSON.
	pub fn post_form<'p, I>(url: Url, params: I) -> Self
	where
		I: IntoIterator<Item = (&'p str, &'p str)>,
	{
		let body = url::form_urlencoded::Serializer::new(String::new())
			.extend_pairs(params)
			.finish()
			.into_bytes();
		let mut headers = HeaderMap::new();

		headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
		headers.insert(
			CONTENT_TYPE,
			HeaderValue::from_static("application/x-www-form-urlencoded"),
		);

		Self { method: Method::POST, url, headers, body }
	}

	/// Adds the correlation headers understood by Microsoft identity endpoints.
	pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
		if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
			self.headers.insert(CLIENT_REQUEST_ID, value);
			self.headers.insert(RETURN_CLIENT_REQUEST_ID, HeaderValue::from_static("true"));
		}

		self
	}

	/// Adds an arbitrary header; invalid values are rejected.
	pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self, TransportError> {
		let value = HeaderValue::from_str(value)
			.map_err(|e| TransportError::Other { message: format!("invalid header value: {e}") })?;

		self.headers.insert(name, value);

		Ok(self)
	}

	/// Target URL.
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Request body bytes.
	pub fn body(&self) -> &[u8] {
		&self.body
	}

	fn to_http(&self) -> Result<HttpRequest, TransportError> {
		let mut builder = oauth2::http::Request::builder()
			.method(self.method.clone())
			.uri(self.url.as_str());

		for (name, value) in &self.headers {
			builder = builder.header(name, value);
		}

		Ok(builder.body(self.body.clone())?)
	}
}

/// Executes requests with the single-retry transient policy.
pub struct HttpExecutor<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	client: Arc<C>,
	mapper: Arc<M>,
	retry_delay: std::time::Duration,
}
impl<C, M> HttpExecutor<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an executor that waits `retry_delay` before the transient retry.
	pub fn new(
		client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
		retry_delay: std::time::Duration,
	) -> Self {
		Self { client: client.into(), mapper: mapper.into(), retry_delay }
	}

	/// Sends `request`, retrying once on timeout or 500/503/504.
	pub async fn execute(
		&self,
		endpoint: Endpoint,
		request: &PreparedRequest,
	) -> Result<HttpResponse> {
		let mut retried = false;

		loop {
			match self.attempt(endpoint, request).await {
				Ok(response) if is_transient_status(response.status()) => {
					let status = response.status().as_u16();

					if retried {
						return Err(ServiceError::ServiceNotAvailable { endpoint, status }.into());
					}

					obs::warn(format_args!(
						"{endpoint} endpoint answered HTTP {status}; retrying once"
					));
				},
				Ok(response) => return Ok(response),
				Err(error) if error.is_timeout() => {
					if retried {
						return Err(ServiceError::RequestTimeout { endpoint, source: error }.into());
					}

					obs::warn(format_args!("{endpoint} request timed out; retrying once"));
				},
				Err(error) => return Err(ClientError::Transport(error).into()),
			}

			retried = true;

			tokio::time::sleep(self.retry_delay).await;
		}
	}

	/// Sends a `GET` and decodes a successful JSON body; error bodies become service errors.
	pub async fn get_json<T>(&self, endpoint: Endpoint, request: &PreparedRequest) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let response = self.execute(endpoint, request).await?;

		if response.status().is_success() {
			parse_json(endpoint, &response)
		} else {
			Err(service_error(endpoint, &response))
		}
	}

	async fn attempt(
		&self,
		endpoint: Endpoint,
		request: &PreparedRequest,
	) -> Result<HttpResponse, TransportError> {
		let http_request = request.to_http()?;
		let handle = self.client.handle();

		handle
			.call(http_request)
			.await
			.map_err(|error| self.mapper.map_transport_error(endpoint, error))
	}
}
impl<C, M> Clone for HttpExecutor<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			client: Arc::clone(&self.client),
			mapper: Arc::clone(&self.mapper),
			retry_delay: self.retry_delay,
		}
	}
}
impl<C, M> Debug for HttpExecutor<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpExecutor").field("retry_delay", &self.retry_delay).finish()
	}
}

/// Decodes a JSON body, reporting the failing path on error.
pub fn parse_json<T>(endpoint: Endpoint, response: &HttpResponse) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(response.body());

	serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
		ClientError::JsonParse { endpoint, status: response.status().as_u16(), source }.into()
	})
}

/// Converts a non-success response carrying an OAuth error body into an [`Error`].
///
/// A body that is not JSON yields [`ClientError::JsonParse`] instead of a service error.
pub fn service_error(endpoint: Endpoint, response: &HttpResponse) -> Error {
	match parse_json::<TokenFailure>(endpoint, response) {
		Ok(failure) =>
			failure.into_service_error(endpoint, Some(response.status().as_u16())).into(),
		Err(error) => error,
	}
}

fn is_transient_status(status: StatusCode) -> bool {
	matches!(
		status,
		StatusCode::INTERNAL_SERVER_ERROR
			| StatusCode::SERVICE_UNAVAILABLE
			| StatusCode::GATEWAY_TIMEOUT
	)
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		io,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// self
	use super::*;

	#[derive(Default)]
	struct ScriptedClient {
		statuses: Mutex<Vec<Option<u16>>>,
		attempts: Arc<AtomicUsize>,
	}
	impl ScriptedClient {
		fn new(script: Vec<Option<u16>>) -> Self {
			Self { statuses: Mutex::new(script), attempts: Default::default() }
		}
	}
	impl TokenHttpClient for ScriptedClient {
		type Handle = ScriptedHandle;
		type TransportError = io::Error;

		fn handle(&self) -> Self::Handle {
			self.attempts.fetch_add(1, Ordering::SeqCst);

			let mut statuses = self.statuses.lock();
			let next = if statuses.is_empty() { Some(200) } else { statuses.remove(0) };

			ScriptedHandle(next)
		}
	}

	struct ScriptedHandle(Option<u16>);
	impl<'c> AsyncHttpClient<'c> for ScriptedHandle {
		type Error = HttpClientError<io::Error>;
		type Future =
			Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

		fn call(&'c self, _request: HttpRequest) -> Self::Future {
			let next = self.0;

			Box::pin(async move {
				match next {
					Some(code) => {
						let mut response = HttpResponse::new(br#"{"ok":true}"#.to_vec());

						*response.status_mut() = StatusCode::from_u16(code)
							.map_err(|e| HttpClientError::Other(e.to_string()))?;

						Ok(response)
					},
					None => Err(HttpClientError::Reqwest(Box::new(io::Error::new(
						io::ErrorKind::TimedOut,
						"socket timeout",
					)))),
				}
			})
		}
	}

	struct IoMapper;
	impl TransportErrorMapper<io::Error> for IoMapper {
		fn map_transport_error(
			&self,
			_endpoint: Endpoint,
			error: HttpClientError<io::Error>,
		) -> TransportError {
			match error {
				HttpClientError::Reqwest(inner) if inner.kind() == io::ErrorKind::TimedOut =>
					TransportError::timeout(*inner),
				HttpClientError::Reqwest(inner) => TransportError::Io(*inner),
				other => TransportError::Other { message: other.to_string() },
			}
		}
	}

	fn executor(
		script: Vec<Option<u16>>,
	) -> (HttpExecutor<ScriptedClient, IoMapper>, Arc<AtomicUsize>) {
		let client = ScriptedClient::new(script);
		let attempts = client.attempts.clone();

		(HttpExecutor::new(client, IoMapper, std::time::Duration::ZERO), attempts)
	}

	fn request() -> PreparedRequest {
		PreparedRequest::get(Url::parse("https://login.example.com/x").expect("URL should parse."))
	}

	#[tokio::test]
	async fn retries_transient_status_once() {
		let (executor, attempts) = executor(vec![Some(503), Some(200)]);
		let response = executor
			.execute(Endpoint::Token, &request())
			.await
			.expect("Second attempt should succeed.");

		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(attempts.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn second_transient_status_is_service_not_available() {
		let (executor, attempts) = executor(vec![Some(500), Some(504)]);
		let err = executor
			.execute(Endpoint::TenantDiscovery, &request())
			.await
			.expect_err("Two transient failures should surface.");

		assert!(matches!(
			err,
			Error::Service(ServiceError::ServiceNotAvailable { status: 504, .. })
		));
		assert_eq!(attempts.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn second_timeout_preserves_cause() {
		let (executor, attempts) = executor(vec![None, None]);
		let err = executor
			.execute(Endpoint::InstanceDiscovery, &request())
			.await
			.expect_err("Two timeouts should surface.");

		assert!(err.is_service_unavailable());
		assert_eq!(attempts.load(Ordering::SeqCst), 2);

		let source = StdError::source(&err).expect("Timeout should keep its transport cause.");

		assert!(matches!(
			source.downcast_ref::<TransportError>(),
			Some(TransportError::Timeout { .. })
		));
	}

	#[tokio::test]
	async fn client_errors_are_not_retried() {
		let (executor, attempts) = executor(vec![Some(400)]);
		let response = executor
			.execute(Endpoint::Token, &request())
			.await
			.expect("4xx responses are returned to the caller.");

		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn form_requests_carry_correlation_headers() {
		let id = Uuid::new_v4();
		let request = PreparedRequest::post_form(
			Url::parse("https://login.example.com/token").expect("URL should parse."),
			[("grant_type", "refresh_token"), ("scope", "a b")],
		)
		.with_correlation_id(id);
		let http = request.to_http().expect("Request should build.");

		assert_eq!(request.body(), b"grant_type=refresh_token&scope=a+b");
		assert_eq!(
			http.headers().get(CLIENT_REQUEST_ID).and_then(|v| v.to_str().ok()),
			Some(id.to_string().as_str())
		);
		assert_eq!(http.method(), Method::POST);
	}
}
