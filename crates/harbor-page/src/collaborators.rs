//! Contracts for the services push subscription depends on, with HTTP
//! implementations that go through the [`Fetcher`] seam.

use std::sync::Arc;

use async_trait::async_trait;
use harbor_common::{retry_with_backoff, HarborError, RetryConfig};
use harbor_net::{Fetcher, Request};
use http::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::PushError;

/// Where a token was issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub user_agent: String,
    pub platform: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            user_agent: format!("Harbor/{}", env!("CARGO_PKG_VERSION")),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// A delivery token as persisted remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub user_id: String,
    pub token: String,
    pub device_info: DeviceInfo,
}

/// Body of a test delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestNotification {
    pub token: String,
    pub title: String,
    pub body: String,
}

/// Remote persistence of delivery tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save(&self, record: &TokenRecord) -> Result<(), PushError>;
    async fn delete(&self, user_id: &str, token: &str) -> Result<(), PushError>;
}

/// Remote endpoint that sends a notification to a token.
#[async_trait]
pub trait DeliveryEndpoint: Send + Sync {
    async fn send_test(&self, message: &TestNotification) -> Result<(), PushError>;
}

/// Source of the signed-in user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self) -> Option<String>;
}

/// An identity that never changes.
#[derive(Debug, Clone, Default)]
pub struct FixedIdentity(pub Option<String>);

#[async_trait]
impl IdentityProvider for FixedIdentity {
    async fn current_user(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Send one JSON request; 5xx and transport failures are retryable.
async fn send_json<T: Serialize + Sync>(
    fetcher: &dyn Fetcher,
    method: Method,
    url: &Url,
    body: &T,
) -> Result<(), HarborError> {
    let mut request = Request::post_json(url.clone(), body)
        .map_err(|e| HarborError::push(format!("encode request: {e}")))?;
    request.method = method;

    let response = fetcher
        .fetch(&request)
        .await
        .map_err(|e| HarborError::network_with_source(format!("{} {url}", request.method), e))?;

    if response.ok() {
        Ok(())
    } else if response.status.is_server_error() {
        Err(HarborError::network(format!("{url} returned {}", response.status)))
    } else {
        Err(HarborError::push(format!("{url} rejected with {}", response.status)))
    }
}

/// Token store backed by a JSON HTTP endpoint: `POST` saves, `DELETE` removes.
pub struct HttpTokenStore {
    fetcher: Arc<dyn Fetcher>,
    endpoint: Url,
    retry: RetryConfig,
}

impl HttpTokenStore {
    pub fn new(fetcher: Arc<dyn Fetcher>, endpoint: Url, retry: RetryConfig) -> Self {
        Self {
            fetcher,
            endpoint,
            retry,
        }
    }
}

#[async_trait]
impl TokenStore for HttpTokenStore {
    async fn save(&self, record: &TokenRecord) -> Result<(), PushError> {
        let fetcher = self.fetcher.as_ref();
        let endpoint = &self.endpoint;
        retry_with_backoff(&self.retry, move || async move {
            send_json(fetcher, Method::POST, endpoint, record).await
        })
        .await
        .map_err(|e| PushError::Persistence(e.to_string()))?;

        info!(user = %record.user_id, "Push token saved");
        Ok(())
    }

    async fn delete(&self, user_id: &str, token: &str) -> Result<(), PushError> {
        let body = serde_json::json!({ "user_id": user_id, "token": token });
        let fetcher = self.fetcher.as_ref();
        let endpoint = &self.endpoint;
        let body = &body;
        retry_with_backoff(&self.retry, move || async move {
            send_json(fetcher, Method::DELETE, endpoint, body).await
        })
        .await
        .map_err(|e| PushError::Persistence(e.to_string()))?;

        debug!(user = user_id, "Push token deleted");
        Ok(())
    }
}

/// Test-delivery trigger backed by a JSON HTTP endpoint.
pub struct RemoteDelivery {
    fetcher: Arc<dyn Fetcher>,
    endpoint: Url,
}

impl RemoteDelivery {
    pub fn new(fetcher: Arc<dyn Fetcher>, endpoint: Url) -> Self {
        Self { fetcher, endpoint }
    }
}

#[async_trait]
impl DeliveryEndpoint for RemoteDelivery {
    async fn send_test(&self, message: &TestNotification) -> Result<(), PushError> {
        send_json(self.fetcher.as_ref(), Method::POST, &self.endpoint, message)
            .await
            .map_err(|e| PushError::Delivery(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_net::{HttpFetcher, LoaderConfig};
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    fn record() -> TokenRecord {
        TokenRecord {
            user_id: "user-1".to_string(),
            token: "tok-abc".to_string(),
            device_info: DeviceInfo {
                user_agent: "test-agent".to_string(),
                platform: "linux".to_string(),
            },
        }
    }

    fn fetcher() -> Arc<dyn Fetcher> {
        Arc::new(HttpFetcher::new(LoaderConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_save_posts_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/push-tokens"))
            .and(body_json(serde_json::to_value(record()).unwrap()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/push-tokens", server.uri())).unwrap();
        let store = HttpTokenStore::new(fetcher(), endpoint, fast_retry());
        store.save(&record()).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/push-tokens", server.uri())).unwrap();
        let store = HttpTokenStore::new(fetcher(), endpoint, fast_retry());
        let err = store.save(&record()).await.unwrap_err();
        assert!(matches!(err, PushError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/push-tokens", server.uri())).unwrap();
        let store = HttpTokenStore::new(fetcher(), endpoint, fast_retry());
        assert!(store.delete("user-1", "tok-abc").await.is_err());
    }

    #[tokio::test]
    async fn test_remote_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(body_json(serde_json::json!({
                "token": "tok", "title": "Test", "body": "Hello"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/send", server.uri())).unwrap();
        let delivery = RemoteDelivery::new(fetcher(), endpoint);
        delivery
            .send_test(&TestNotification {
                token: "tok".to_string(),
                title: "Test".to_string(),
                body: "Hello".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fixed_identity() {
        assert_eq!(
            FixedIdentity(Some("u".into())).current_user().await.as_deref(),
            Some("u")
        );
        assert!(FixedIdentity::default().current_user().await.is_none());
    }
}
