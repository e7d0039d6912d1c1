//! Request interception: pick a serving strategy and mirror successes into
//! the active generation's tiers.

use std::sync::{Arc, Mutex, MutexGuard};

use harbor_net::pattern::{any_match, is_image};
use harbor_net::{Fetcher, Request, Response, UrlPattern};
use http::Method;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cache::{trim, CacheEntry, CacheStore, Generation, RequestIdentity, Tier};
use crate::config::WorkerConfig;
use crate::lifecycle::ActiveWorker;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not intercepted; the host performs the request.
    PassThrough,
    /// Static assets: cache, then network.
    CacheFirst,
    /// API calls: network, then the API tier, then a JSON 503.
    NetworkFirst,
    /// Navigations: network, then the page's snapshot, then the root route.
    PageFallback,
}

/// Routes intercepted requests against the tiered cache.
pub struct StrategyRouter {
    config: Arc<WorkerConfig>,
    store: CacheStore,
    fetcher: Arc<dyn Fetcher>,
    active: watch::Receiver<Option<ActiveWorker>>,
    static_patterns: Vec<UrlPattern>,
    api_patterns: Vec<UrlPattern>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl StrategyRouter {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: CacheStore,
        fetcher: Arc<dyn Fetcher>,
        active: watch::Receiver<Option<ActiveWorker>>,
    ) -> Self {
        Self {
            static_patterns: config.static_patterns(),
            api_patterns: config.api_url_patterns(),
            config,
            store,
            fetcher,
            active,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn classify(&self, request: &Request) -> Strategy {
        if request.method != Method::GET || !request.is_http() {
            Strategy::PassThrough
        } else if any_match(&self.static_patterns, &request.url) {
            Strategy::CacheFirst
        } else if any_match(&self.api_patterns, &request.url) {
            Strategy::NetworkFirst
        } else {
            Strategy::PageFallback
        }
    }

    /// Serve an intercepted request. `None` means the request is not
    /// intercepted, either because of its shape or because no worker is active.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        let generation = self.generation()?;
        let strategy = self.classify(&request);
        trace!(url = %request.url, ?strategy, "Routing request");

        let response = match strategy {
            Strategy::PassThrough => return None,
            Strategy::CacheFirst => self.cache_first(&request, &generation).await,
            Strategy::NetworkFirst => self.network_first(&request, &generation).await,
            Strategy::PageFallback => self.page_fallback(&request, &generation).await,
        };
        Some(response)
    }

    /// Wait for every mirror write spawned so far.
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.pending());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    debug!(error = %e, "Cache write task failed");
                }
            }
        }
    }

    fn generation(&self) -> Option<Generation> {
        self.active
            .borrow()
            .as_ref()
            .map(|w| Generation::new(&self.config.cache_prefix, &w.version))
    }

    async fn cache_first(&self, request: &Request, generation: &Generation) -> Response {
        let tier = if is_image(&request.url) {
            Tier::Images
        } else {
            Tier::Static
        };
        let names = if tier == Tier::Images {
            vec![generation.cache_name(Tier::Images), generation.cache_name(Tier::Static)]
        } else {
            vec![generation.cache_name(Tier::Static)]
        };

        let identity = RequestIdentity::of(request);
        if let Some(entry) = self.store.match_in(&names, &identity, &request.headers).await {
            trace!(url = %request.url, "Cache hit");
            return entry.to_response();
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.mirror(request, &response, tier, generation);
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset unavailable");
                Response::offline_text(&self.config.offline.asset)
            }
        }
    }

    async fn network_first(&self, request: &Request, generation: &Generation) -> Response {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.mirror(request, &response, Tier::Api, generation);
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "API unreachable, trying cache");
                let names = [generation.cache_name(Tier::Api)];
                let identity = RequestIdentity::of(request);
                match self.store.match_in(&names, &identity, &request.headers).await {
                    Some(entry) => entry.to_response(),
                    None => Response::offline_json(&self.config.offline.api),
                }
            }
        }
    }

    async fn page_fallback(&self, request: &Request, generation: &Generation) -> Response {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.mirror(request, &response, Tier::Runtime, generation);
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Page unreachable, trying cache");
                let names = [
                    generation.cache_name(Tier::Runtime),
                    generation.cache_name(Tier::Static),
                ];
                let identity = RequestIdentity::of(request);
                if let Some(entry) = self.store.match_in(&names, &identity, &request.headers).await {
                    return entry.to_response();
                }

                if let Ok(root) = request.url.join(&self.config.root_route) {
                    let root = RequestIdentity::new(&Method::GET, &root);
                    if let Some(entry) = self.store.match_in(&names, &root, &request.headers).await
                    {
                        trace!(url = %request.url, "Serving root route");
                        return entry.to_response();
                    }
                }
                Response::offline_text(&self.config.offline.page)
            }
        }
    }

    /// Snapshot a successful response and write it in the background, then
    /// trim the tier. Ineligible responses and failed writes are skipped.
    fn mirror(&self, request: &Request, response: &Response, tier: Tier, generation: &Generation) {
        let entry = match CacheEntry::capture(request, response) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Not caching response");
                return;
            }
        };

        let store = self.store.clone();
        let active = self.active.clone();
        let cache = generation.cache_name(tier);
        let version = generation.version().to_string();
        let capacity = tier.capacity(&self.config);

        let handle = tokio::spawn(async move {
            let current = active
                .borrow()
                .as_ref()
                .is_some_and(|w| w.version == version);
            if !current {
                debug!(cache = %cache, "Generation retired, dropping write");
                return;
            }
            if let Err(e) = store.put(&cache, entry).await {
                debug!(cache = %cache, error = %e, "Cache write failed");
                return;
            }
            if let Some(capacity) = capacity {
                trim(&store, &cache, capacity).await;
            }
        });

        let mut pending = self.pending();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    fn pending(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ServiceWorkerId;
    use harbor_net::mock::MockFetcher;
    use harbor_net::Url;
    use http::StatusCode;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn router(
        fetcher: Arc<MockFetcher>,
    ) -> (StrategyRouter, CacheStore, watch::Sender<Option<ActiveWorker>>) {
        let store = CacheStore::new(None);
        let (tx, rx) = watch::channel(None);
        let router = StrategyRouter::new(
            Arc::new(WorkerConfig::default()),
            store.clone(),
            fetcher,
            rx,
        );
        (router, store, tx)
    }

    fn activate(tx: &watch::Sender<Option<ActiveWorker>>, version: &str) {
        tx.send_replace(Some(ActiveWorker {
            id: ServiceWorkerId::new(),
            version: version.to_string(),
        }));
    }

    #[test]
    fn test_classify() {
        let (router, _, _) = router(Arc::new(MockFetcher::new()));
        let cases = [
            (Request::get(url("https://app.test/app.css")), Strategy::CacheFirst),
            (Request::get(url("https://app.test/logo.PNG")), Strategy::CacheFirst),
            (Request::get(url("https://app.test/api/list")), Strategy::NetworkFirst),
            (Request::get(url("https://db.test/rest/v1/rows")), Strategy::NetworkFirst),
            (Request::navigate(url("https://app.test/sessions")), Strategy::PageFallback),
            (Request::post(url("https://app.test/api/list"), "{}"), Strategy::PassThrough),
            (Request::get(url("ws://app.test/socket")), Strategy::PassThrough),
        ];
        for (request, expected) in cases {
            assert_eq!(router.classify(&request), expected, "{}", request.url);
        }
    }

    #[tokio::test]
    async fn test_no_active_worker_passes_through() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route("https://app.test/app.css", "text/css", "a");
        let (router, _, _tx) = router(fetcher.clone());

        assert!(router.handle(Request::get(url("https://app.test/app.css"))).await.is_none());
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_images_go_to_image_tier() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route("https://app.test/a.png", "image/png", vec![1u8, 2, 3]);
        let (router, store, tx) = router(fetcher);
        activate(&tx, "v1");

        router.handle(Request::get(url("https://app.test/a.png"))).await.unwrap();
        router.settle().await;

        assert_eq!(store.len("harbor-images-v1").await, 1);
        assert_eq!(store.len("harbor-static-v1").await, 0);
    }

    #[tokio::test]
    async fn test_static_miss_offline() {
        let fetcher = Arc::new(MockFetcher::new());
        let (router, _, tx) = router(fetcher);
        activate(&tx, "v1");

        let response = router.handle(Request::get(url("https://app.test/app.js"))).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text().unwrap(), "Offline - Resource not available");
    }

    #[tokio::test]
    async fn test_error_status_not_mirrored() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route_with(
            "https://app.test/api/broken",
            StatusCode::INTERNAL_SERVER_ERROR,
            http::HeaderMap::new(),
            "boom",
        );
        let (router, store, tx) = router(fetcher);
        activate(&tx, "v1");

        let response = router.handle(Request::get(url("https://app.test/api/broken"))).await.unwrap();
        router.settle().await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.len("harbor-api-v1").await, 0);
    }

    #[tokio::test]
    async fn test_page_falls_back_to_root() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route("https://app.test/", "text/html", "<shell>");
        let (router, _, tx) = router(fetcher.clone());
        activate(&tx, "v1");

        router.handle(Request::navigate(url("https://app.test/"))).await.unwrap();
        router.settle().await;
        fetcher.set_offline(true);

        let response = router
            .handle(Request::navigate(url("https://app.test/agenda")))
            .await
            .unwrap();
        assert!(response.from_cache);
        assert_eq!(response.text().unwrap(), "<shell>");
    }

    #[tokio::test]
    async fn test_page_offline_without_snapshot() {
        let fetcher = Arc::new(MockFetcher::new());
        let (router, _, tx) = router(fetcher);
        activate(&tx, "v1");

        let response = router
            .handle(Request::navigate(url("https://app.test/agenda")))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text().unwrap(), "Offline - Page not available");
    }

    #[tokio::test]
    async fn test_write_for_retired_generation_is_dropped() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.route("https://app.test/api/me", "application/json", "{}");
        let (router, store, tx) = router(fetcher);
        activate(&tx, "v1");

        router.handle(Request::get(url("https://app.test/api/me"))).await.unwrap();
        activate(&tx, "v2");
        router.settle().await;

        assert!(!store.has("harbor-api-v1").await);
    }
}
