//! The background process: one registration serving cache routing, messages
//! and push under a single lifecycle.

use std::sync::Arc;

use harbor_net::{Fetcher, Request, Response};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::cache::CacheStore;
use crate::clients::{ClientId, Clients};
use crate::config::WorkerConfig;
use crate::lifecycle::{LifecycleManager, ServiceWorkerEvent};
use crate::message::{ClientMessage, Envelope, MessageReceiver};
use crate::notification::{ClickOutcome, Notification, NotificationDispatcher, NotificationId};
use crate::router::StrategyRouter;
use crate::ServiceWorkerError;

/// Composes the router, lifecycle, clients and notifications of one scope.
pub struct BackgroundProcess {
    scope: Url,
    config: Arc<WorkerConfig>,
    store: CacheStore,
    lifecycle: LifecycleManager,
    router: StrategyRouter,
    clients: Arc<RwLock<Clients>>,
    notifications: Mutex<NotificationDispatcher>,
}

impl BackgroundProcess {
    /// Build a process for `origin`. The scope comes from the registration config.
    pub fn new(
        origin: Url,
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        config.validate()?;
        let scope = origin
            .join(&config.registration.scope)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
        let config = Arc::new(config);
        let store = CacheStore::new(config.storage_quota_bytes);
        let clients = Arc::new(RwLock::new(Clients::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let lifecycle = LifecycleManager::new(
            scope.clone(),
            config.clone(),
            store.clone(),
            fetcher.clone(),
            clients.clone(),
            event_tx,
        )?;
        let router = StrategyRouter::new(config.clone(), store.clone(), fetcher, lifecycle.subscribe());
        let notifications = Mutex::new(NotificationDispatcher::new(config.notifications.clone()));

        info!(scope = %scope, version = %config.cache_version, "Background process created");
        Ok((
            Arc::new(Self {
                scope,
                config,
                store,
                lifecycle,
                router,
                clients,
                notifications,
            }),
            event_rx,
        ))
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn router(&self) -> &StrategyRouter {
        &self.router
    }

    pub fn clients(&self) -> &Arc<RwLock<Clients>> {
        &self.clients
    }

    /// Install the configured cache version.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.lifecycle.install(&self.config.cache_version).await?;
        Ok(())
    }

    /// Intercept a request; `None` leaves it to the host.
    pub async fn handle_fetch(&self, request: Request) -> Option<Response> {
        self.router.handle(request).await
    }

    /// Handle a posted value. Unknown messages and failed adoptions are logged
    /// and dropped; nothing is reported back to the sender.
    pub async fn handle_message(&self, payload: &Value) {
        let Some(message) = ClientMessage::parse(payload) else {
            return;
        };
        match message {
            ClientMessage::AdoptWaiting => match self.lifecycle.skip_waiting().await {
                Ok(true) => info!("Waiting worker adopted"),
                Ok(false) => debug!("Adopt requested with nothing waiting"),
                Err(e) => debug!(error = %e, "Adopt failed"),
            },
            ClientMessage::ShowNotification { title, options } => {
                self.notifications.lock().await.on_message(title, options);
            }
        }
    }

    /// Render a push delivery.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Notification {
        self.notifications.lock().await.on_push(data)
    }

    pub async fn handle_notification_click(
        &self,
        id: NotificationId,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        let controller = self.lifecycle.active().map(|w| w.id);
        let mut notifications = self.notifications.lock().await;
        let mut clients = self.clients.write().await;
        notifications.on_click(id, &self.scope, &mut clients, controller)
    }

    pub async fn displayed_notifications(&self) -> Vec<Notification> {
        self.notifications.lock().await.displayed().to_vec()
    }

    pub async fn close_notifications(&self, tag: &str) -> usize {
        self.notifications.lock().await.close(tag)
    }

    pub async fn expire_notifications(&self) -> usize {
        self.notifications.lock().await.expire()
    }

    /// Drain page messages until every sender is gone.
    pub fn spawn_message_loop(self: &Arc<Self>, mut rx: MessageReceiver) -> JoinHandle<()> {
        let process = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(Envelope { source, payload }) = rx.recv().await {
                debug!(?source, "Message received");
                process.handle_message(&payload).await;
            }
            debug!("Message channel closed");
        })
    }

    /// Open a window under the current controller.
    pub async fn open_client(&self, url: Url) -> ClientId {
        let controller = self.lifecycle.active().map(|w| w.id);
        self.clients.write().await.open_window(url, controller)
    }

    /// Close a window. Closing the last one lets a waiting worker take over.
    pub async fn close_client(&self, id: ClientId) -> Result<bool, ServiceWorkerError> {
        if self.clients.write().await.remove(id).is_none() {
            return Err(ServiceWorkerError::NotFound(format!("client {id:?}")));
        }
        self.lifecycle.on_clients_changed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::channel;
    use harbor_net::mock::MockFetcher;
    use serde_json::json;

    fn origin() -> Url {
        Url::parse("https://app.test/").unwrap()
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = WorkerConfig::default();
        config.cache_version.clear();
        let result = BackgroundProcess::new(origin(), config, Arc::new(MockFetcher::new()));
        assert!(matches!(result, Err(ServiceWorkerError::Config(_))));
    }

    #[tokio::test]
    async fn test_show_notification_message() {
        let (process, _events) =
            BackgroundProcess::new(origin(), WorkerConfig::default(), Arc::new(MockFetcher::new()))
                .unwrap();

        process
            .handle_message(&json!({
                "type": "SHOW_NOTIFICATION",
                "title": "Saved",
                "options": { "body": "Draft stored", "icon": "/mine.png" }
            }))
            .await;
        process.handle_message(&json!({ "type": "BOGUS" })).await;

        let shown = process.displayed_notifications().await;
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Saved");
        assert_eq!(shown[0].options.icon.as_deref(), Some("/mine.png"));
        assert_eq!(shown[0].options.badge.as_deref(), Some("/icons/icon-72x72.png"));
    }

    #[tokio::test]
    async fn test_message_loop_adopts_waiting() {
        let (process, _events) =
            BackgroundProcess::new(origin(), WorkerConfig::default(), Arc::new(MockFetcher::new()))
                .unwrap();
        process.lifecycle().install("v1").await.unwrap();
        let v2 = process.lifecycle().install("v2").await.unwrap();

        let (tx, rx) = channel();
        let worker = process.spawn_message_loop(rx);
        tx.post(&ClientMessage::AdoptWaiting).unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(process.lifecycle().active().unwrap().id, v2);
    }

    #[tokio::test]
    async fn test_closing_last_client_activates_waiting() {
        let (process, _events) =
            BackgroundProcess::new(origin(), WorkerConfig::default(), Arc::new(MockFetcher::new()))
                .unwrap();
        process.lifecycle().install("v1").await.unwrap();
        let a = process.open_client(origin()).await;
        let b = process.open_client(origin()).await;
        let v2 = process.lifecycle().install("v2").await.unwrap();

        assert!(!process.close_client(a).await.unwrap());
        assert!(process.close_client(b).await.unwrap());
        assert_eq!(process.lifecycle().active().unwrap().id, v2);
        assert!(process.close_client(b).await.is_err());
    }

    #[tokio::test]
    async fn test_click_opens_controlled_window() {
        let (process, _events) =
            BackgroundProcess::new(origin(), WorkerConfig::default(), Arc::new(MockFetcher::new()))
                .unwrap();
        process.install().await.unwrap();

        let n = process.handle_push(Some(br#"{"data":{"url":"/agenda"}}"#)).await;
        let outcome = process.handle_notification_click(n.id).await.unwrap();

        let ClickOutcome::Opened(id) = outcome else {
            panic!("expected a new window");
        };
        let clients = process.clients().read().await;
        let client = clients.get(id).unwrap();
        assert_eq!(client.url.as_str(), "https://app.test/agenda");
        assert_eq!(client.controller, process.lifecycle().active().map(|w| w.id));
    }
}
