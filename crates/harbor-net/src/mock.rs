//! Scripted [`Fetcher`] for tests and offline demos.
//!
//! Routes are keyed by full URL string. Unknown URLs and every URL while the
//! fetcher is offline fail with [`NetError::Offline`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
struct Route {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<String, Route>,
    calls: HashMap<String, usize>,
    offline: bool,
}

/// In-memory fetcher with per-URL call counting.
#[derive(Debug, Default)]
pub struct MockFetcher {
    state: Mutex<State>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 and the given content type.
    pub fn route(&self, url: &str, content_type: &str, body: impl Into<Bytes>) -> &Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(http::header::CONTENT_TYPE, value);
        }
        self.route_with(url, StatusCode::OK, headers, body)
    }

    pub fn route_with(
        &self,
        url: &str,
        status: StatusCode,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> &Self {
        self.lock().routes.insert(
            url.to_string(),
            Route {
                status,
                headers,
                body: body.into(),
            },
        );
        self
    }

    pub fn remove_route(&self, url: &str) {
        self.lock().routes.remove(url);
    }

    /// Simulate losing (or regaining) the network.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Number of fetches issued for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.lock().calls.get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panicking test thread must not poison every later assertion.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.url.to_string();
        let mut state = self.lock();
        *state.calls.entry(key.clone()).or_insert(0) += 1;

        if state.offline {
            return Err(NetError::Offline(key));
        }

        match state.routes.get(&key) {
            Some(route) => Ok(Response::new(route.status, route.headers.clone(), route.body.clone())
                .with_url(request.url.clone())),
            None => Err(NetError::Offline(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Url;

    #[tokio::test]
    async fn test_counts_calls_and_goes_offline() {
        let fetcher = MockFetcher::new();
        fetcher.route("https://app.test/a.js", "text/javascript", "1");
        let request = Request::get(Url::parse("https://app.test/a.js").unwrap());

        assert!(fetcher.fetch(&request).await.is_ok());
        fetcher.set_offline(true);
        assert!(matches!(
            fetcher.fetch(&request).await,
            Err(NetError::Offline(_))
        ));
        assert_eq!(fetcher.calls("https://app.test/a.js"), 2);
    }
}
