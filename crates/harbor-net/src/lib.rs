//! # Harbor Net
//!
//! Request and response model shared by the background process and the page.
//!
//! ## Design Goals
//!
//! 1. **One fetch seam**: everything that reaches the network goes through [`Fetcher`]
//! 2. **Consumable bodies**: a response body can be read once; cache writes clone first
//! 3. **Synthetic responses**: offline fallbacks are ordinary [`Response`] values

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};

pub use url::Url;

pub mod mock;
pub mod pattern;

pub use pattern::{PatternType, UrlPattern};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Body already used")]
    BodyUsed,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    #[default]
    SameOrigin,
    Cors,
    NoCors,
}

/// An outgoing request as seen by the interception layer.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::new(Method::POST, url)
        }
    }

    /// Create a POST request with a JSON body.
    pub fn post_json<T: serde::Serialize>(url: Url, value: &T) -> Result<Self, NetError> {
        let body = serde_json::to_vec(value).map_err(|e| NetError::RequestFailed(e.to_string()))?;
        Ok(Self::post(url, body).header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether the scheme is http or https.
    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }
}

/// Response classification, mirroring the fetch `Response.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    Opaque,
    /// Network-error response; never cached.
    Error,
}

/// A response whose body can be consumed once.
#[derive(Debug)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    /// Served from a cache snapshot rather than the network.
    pub from_cache: bool,
    body: Option<Bytes>,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers,
            response_type: ResponseType::Basic,
            from_cache: false,
            body: Some(body.into()),
        }
    }

    /// 200 response with the given content type.
    pub fn ok_with(content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(http::header::CONTENT_TYPE, value);
        }
        Self::new(StatusCode::OK, headers, body)
    }

    /// Synthetic 503 with a plain-text body.
    pub fn offline_text(message: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            headers,
            Bytes::copy_from_slice(message.as_bytes()),
        )
    }

    /// Synthetic 503 carrying `{ "error": message, "data": null }`.
    pub fn offline_json(message: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({ "error": message, "data": null }).to_string();
        Self::new(StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }

    /// Network-error response (status 0 semantics are not representable, so 502 is used).
    pub fn network_error() -> Self {
        Self {
            response_type: ResponseType::Error,
            ..Self::new(StatusCode::BAD_GATEWAY, HeaderMap::new(), Bytes::new())
        }
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn body_used(&self) -> bool {
        self.body.is_none()
    }

    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Copy this response, failing once the body has been consumed.
    pub fn try_clone(&self) -> Result<Self, NetError> {
        let body = self.body.clone().ok_or(NetError::BodyUsed)?;
        Ok(Self {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            response_type: self.response_type,
            from_cache: self.from_cache,
            body: Some(body),
        })
    }

    /// Consume the body.
    pub fn take_body(&mut self) -> Result<Bytes, NetError> {
        self.body.take().ok_or(NetError::BodyUsed)
    }

    pub fn bytes(mut self) -> Result<Bytes, NetError> {
        self.take_body()
    }

    pub fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        let bytes = self.bytes()?;
        serde_json::from_slice(&bytes).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Anything that can put a request on the wire.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub user_agent: String,
    pub default_timeout: Duration,
    pub max_redirects: usize,
    pub cookies_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Harbor/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(config.cookies_enabled)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(request.timeout.unwrap_or_default())
            } else if e.is_connect() {
                NetError::Offline(e.to_string())
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(url = %url, status = %status, body_len = body.len(), "Response received");

        Ok(Response::new(status, headers, body).with_url(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/api/list").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert!(request.is_http());
    }

    #[test]
    fn test_non_http_scheme() {
        let request = Request::get(Url::parse("chrome-extension://abc/x.js").unwrap());
        assert!(!request.is_http());
    }

    #[test]
    fn test_body_consumed_once() {
        let mut response = Response::ok_with("text/css", "body{}");
        assert!(response.try_clone().is_ok());
        assert_eq!(response.take_body().unwrap(), Bytes::from("body{}"));
        assert!(response.body_used());
        assert!(matches!(response.try_clone(), Err(NetError::BodyUsed)));
    }

    #[test]
    fn test_offline_json_shape() {
        let response = Response::offline_json("Offline - API not available");
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers.get("content-type").unwrap(),
            "application/json"
        );
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["error"], "Offline - API not available");
        assert!(value["data"].is_null());
    }

    #[tokio::test]
    async fn test_http_fetcher_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.css"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/css")
                    .set_body_string("body{}"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/app.css", server.uri())).unwrap();
        let response = fetcher.fetch(&Request::get(url)).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.content_type().unwrap().subtype(), "css");
        assert_eq!(response.text().unwrap(), "body{}");
    }

    #[tokio::test]
    async fn test_http_fetcher_connection_refused_is_error() {
        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let url = Url::parse("http://127.0.0.1:9/unreachable").unwrap();
        assert!(fetcher.fetch(&Request::get(url)).await.is_err());
    }
}
