//! Request identities and stored response snapshots.

use harbor_net::{Request, Response, ResponseType, Url};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::CacheError;

/// Method plus fragment-less URL. Header variance is carried by the entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub method: String,
    pub url: String,
}

impl RequestIdentity {
    pub fn of(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET.as_str()
    }
}

/// An immutable copy of a successful response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identity: RequestIdentity,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Request header values named by the response's `Vary` header.
    pub vary: Vec<(String, Option<String>)>,
    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot `response` for `request`, consuming the (cloned) body.
    pub fn capture(request: &Request, response: &Response) -> Result<Self, CacheError> {
        let identity = RequestIdentity::of(request);
        if !identity.is_cacheable() {
            return Err(CacheError::Uncacheable(format!(
                "method {} is not cacheable",
                identity.method
            )));
        }
        if !response.ok() || response.response_type == ResponseType::Error {
            return Err(CacheError::Uncacheable(format!(
                "status {} is not storable",
                response.status
            )));
        }

        let vary = vary_values(request, &response.headers)?;
        let body = response
            .try_clone()
            .and_then(|r| r.bytes())
            .map_err(|e| CacheError::Clone(e.to_string()))?;

        let headers = response
            .headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();

        Ok(Self {
            identity,
            status: response.status.as_u16(),
            headers,
            body: body.to_vec(),
            vary,
            cached_at: now_ms(),
        })
    }

    /// Storage key: the identity plus the varied request header values, so
    /// variants of one URL sit side by side.
    pub fn key(&self) -> String {
        let mut key = self.identity.key();
        for (name, value) in &self.vary {
            key.push_str(&format!(" {name}={}", value.as_deref().unwrap_or_default()));
        }
        key
    }

    /// Whether the stored variance matches the incoming request's headers.
    pub fn matches_variance(&self, request_headers: &HeaderMap) -> bool {
        self.vary.iter().all(|(name, expected)| {
            let actual = request_headers.get(name.as_str()).and_then(|v| v.to_str().ok());
            actual == expected.as_deref()
        })
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = Response::new(status, headers, self.body.clone());
        response.from_cache = true;
        if let Ok(url) = Url::parse(&self.identity.url) {
            response = response.with_url(url);
        }
        response
    }
}

fn vary_values(
    request: &Request,
    response_headers: &HeaderMap,
) -> Result<Vec<(String, Option<String>)>, CacheError> {
    let mut vary = Vec::new();
    for value in response_headers.get_all(http::header::VARY) {
        let Ok(value) = value.to_str() else { continue };
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == "*" {
                return Err(CacheError::Uncacheable("Vary: *".to_string()));
            }
            let name = name.to_ascii_lowercase();
            let current = request
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            vary.push((name, current));
        }
    }
    Ok(vary)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
