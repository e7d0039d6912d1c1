//! Push subscription: permission, token acquisition bound to the active
//! worker, and token persistence.
//!
//! ```text
//! request_permission ──granted──▶ ready() ──▶ PushService::subscribe ──▶ TokenStore::save
//!         │                        (timeout)          (bound to worker id)      (retried)
//!         └─default/denied──▶ None
//! ```

use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;

use async_trait::async_trait;
use harbor_common::{with_timeout, HarborError, RetryConfig};
use harbor_sw::{ActiveWorker, BackgroundProcess, ServiceWorkerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::collaborators::{
    DeliveryEndpoint, DeviceInfo, IdentityProvider, TestNotification, TokenRecord, TokenStore,
};
use crate::connectivity::lock;

/// Outcome of the acquisition in flight; `None` until it settles.
type Attempt = watch::Receiver<Option<Option<String>>>;

/// Clears the in-flight slot when the leading call finishes or is dropped.
struct InflightSlot<'a>(&'a SyncMutex<Option<Attempt>>);

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        lock(self.0).take();
    }
}

/// Push subscription errors. Surfaced to callers as strings in
/// [`SubscriptionState::error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("Notification permission is {0}")]
    PermissionNotGranted(PermissionState),

    #[error("No active worker after {0:?}")]
    NoActiveWorker(Duration),

    #[error("Token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("No signed-in user")]
    NotAuthenticated,

    #[error("Token persistence failed: {0}")]
    Persistence(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("No push token")]
    NoToken,
}

impl From<PushError> for HarborError {
    fn from(err: PushError) -> Self {
        HarborError::push(err.to_string())
    }
}

/// OS notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// Not asked yet.
    #[default]
    Default,
    Granted,
    Denied,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PermissionState::Default => "default",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
        })
    }
}

/// The host's permission dialog.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    fn current(&self) -> PermissionState;

    /// Show the dialog and return the user's answer.
    async fn request(&self) -> PermissionState;
}

/// Issues delivery tokens bound to a worker.
#[async_trait]
pub trait PushService: Send + Sync {
    async fn subscribe(
        &self,
        worker: &ActiveWorker,
        vapid_key: Option<&str>,
    ) -> Result<String, PushError>;
}

/// Push subscription configuration.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// How long to wait for an activated worker before giving up.
    pub activation_timeout: Duration,
    /// Application server key passed to the push service.
    pub vapid_key: Option<String>,
    pub device: DeviceInfo,
    /// Retry policy for token persistence.
    pub retry: RetryConfig,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            activation_timeout: Duration::from_secs(10),
            vapid_key: None,
            device: DeviceInfo::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Observable subscription state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    pub permission: PermissionState,
    pub token: Option<String>,
    /// Worker the token was issued for.
    pub bound_worker: Option<ServiceWorkerId>,
    /// Whether the token reached the remote store.
    pub persisted: bool,
    pub error: Option<String>,
    pub loading: bool,
}

/// Owns the subscription and is the only writer of the token to the store.
pub struct PushSubscriptionManager {
    config: PushConfig,
    process: Arc<BackgroundProcess>,
    prompt: Arc<dyn PermissionPrompt>,
    service: Arc<dyn PushService>,
    store: Arc<dyn TokenStore>,
    identity: Arc<dyn IdentityProvider>,
    delivery: Option<Arc<dyn DeliveryEndpoint>>,
    state: watch::Sender<SubscriptionState>,
    permission_lock: Mutex<()>,
    acquire_lock: Mutex<()>,
    inflight: SyncMutex<Option<Attempt>>,
}

impl PushSubscriptionManager {
    pub fn new(
        config: PushConfig,
        process: Arc<BackgroundProcess>,
        prompt: Arc<dyn PermissionPrompt>,
        service: Arc<dyn PushService>,
        store: Arc<dyn TokenStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let (state, _) = watch::channel(SubscriptionState {
            permission: prompt.current(),
            ..Default::default()
        });
        Self {
            config,
            process,
            prompt,
            service,
            store,
            identity,
            delivery: None,
            state,
            permission_lock: Mutex::new(()),
            acquire_lock: Mutex::new(()),
            inflight: SyncMutex::new(None),
        }
    }

    /// Enable [`send_test_notification`](Self::send_test_notification).
    pub fn with_delivery(mut self, delivery: Arc<dyn DeliveryEndpoint>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Ask for permission once; later calls return the settled answer.
    pub async fn request_permission(&self) -> PermissionState {
        let _guard = self.permission_lock.lock().await;

        let current = self.prompt.current();
        let permission = if current == PermissionState::Default {
            let answer = self.prompt.request().await;
            info!(%answer, "Notification permission answered");
            answer
        } else {
            current
        };
        self.state.send_modify(|s| s.permission = permission);
        permission
    }

    /// Token bound to the still-active worker, if any.
    pub fn token(&self) -> Option<String> {
        let active = self.process.lifecycle().active().map(|w| w.id);
        let state = self.state.borrow();
        match (&state.token, state.bound_worker) {
            (Some(token), Some(bound)) if Some(bound) == active => Some(token.clone()),
            _ => None,
        }
    }

    /// Obtain a delivery token, prompting for permission if it was never asked.
    ///
    /// Concurrent calls collapse onto the one in flight and share its outcome,
    /// `None` included. Failures are recorded in the state and yield `None`.
    pub async fn acquire_token(&self) -> Option<String> {
        loop {
            let joined = {
                let mut inflight = lock(&self.inflight);
                match inflight.as_ref() {
                    Some(attempt) => Ok(attempt.clone()),
                    None => {
                        let (leader, attempt) = watch::channel(None);
                        *inflight = Some(attempt);
                        Err(leader)
                    }
                }
            };

            match joined {
                Ok(mut attempt) => {
                    debug!("Joining in-flight token acquisition");
                    if let Ok(outcome) = attempt.wait_for(|o| o.is_some()).await {
                        return outcome.clone().flatten();
                    }
                    // The leading call was dropped before settling.
                }
                Err(leader) => {
                    let _slot = InflightSlot(&self.inflight);
                    let outcome = self.run_acquisition().await;
                    leader.send_replace(Some(outcome.clone()));
                    return outcome;
                }
            }
        }
    }

    async fn run_acquisition(&self) -> Option<String> {
        let _guard = self.acquire_lock.lock().await;

        if let Some(token) = self.token() {
            return Some(token);
        }
        if self.state.borrow().token.is_some() {
            debug!("Token bound to a replaced worker, re-acquiring");
            self.state.send_modify(|s| {
                s.token = None;
                s.bound_worker = None;
                s.persisted = false;
            });
        }

        let permission = self.request_permission().await;
        if permission != PermissionState::Granted {
            self.record_error(PushError::PermissionNotGranted(permission));
            return None;
        }

        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
        let result = self.issue_token().await;
        self.state.send_modify(|s| s.loading = false);

        let (token, worker) = match result {
            Ok(issued) => issued,
            Err(e) => {
                self.record_error(e);
                return None;
            }
        };
        self.state.send_modify(|s| {
            s.token = Some(token.clone());
            s.bound_worker = Some(worker.id);
        });
        info!(worker = worker.id.raw(), "Push token acquired");

        match self.persist(&token).await {
            Ok(()) => self.state.send_modify(|s| s.persisted = true),
            Err(e) => {
                warn!(error = %e, "Token kept locally only");
                self.state.send_modify(|s| s.error = Some(e.to_string()));
            }
        }
        Some(token)
    }

    async fn issue_token(&self) -> Result<(String, ActiveWorker), PushError> {
        let timeout = self.config.activation_timeout;
        let worker = with_timeout(timeout, self.process.lifecycle().ready())
            .await
            .map_err(|_| PushError::NoActiveWorker(timeout))?
            .map_err(|e| PushError::TokenUnavailable(e.to_string()))?;

        let token = self
            .service
            .subscribe(&worker, self.config.vapid_key.as_deref())
            .await?;
        if token.is_empty() {
            return Err(PushError::TokenUnavailable("empty token".to_string()));
        }
        Ok((token, worker))
    }

    async fn persist(&self, token: &str) -> Result<(), PushError> {
        let user_id = self
            .identity
            .current_user()
            .await
            .ok_or(PushError::NotAuthenticated)?;
        let record = TokenRecord {
            user_id,
            token: token.to_string(),
            device_info: self.config.device.clone(),
        };
        self.store.save(&record).await
    }

    /// Forget the local token. Removing it remotely is the caller's call.
    pub async fn release_subscription(&self) -> Option<String> {
        let _guard = self.acquire_lock.lock().await;
        let mut released = None;
        self.state.send_modify(|s| {
            released = s.token.take();
            s.bound_worker = None;
            s.persisted = false;
            s.error = None;
        });
        if released.is_some() {
            info!("Push subscription released");
        }
        released
    }

    /// Ask the remote delivery endpoint to push a test notification to our token.
    pub async fn send_test_notification(&self, title: &str, body: &str) -> Result<(), PushError> {
        let delivery = self
            .delivery
            .as_ref()
            .ok_or_else(|| PushError::Delivery("no delivery endpoint configured".to_string()))?;
        let token = self.token().ok_or(PushError::NoToken)?;
        delivery
            .send_test(&TestNotification {
                token,
                title: title.to_string(),
                body: body.to_string(),
            })
            .await
    }

    fn record_error(&self, error: PushError) {
        warn!(error = %error, "Push subscription failed");
        self.state.send_modify(|s| s.error = Some(error.to_string()));
    }
}
