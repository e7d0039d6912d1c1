//! Page-side registration and update flow.
//!
//! A new worker that finishes installing while another one controls the page
//! surfaces as "update available". Applying it posts `ADOPT_WAITING`; the page
//! reloads once when the new controller takes over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harbor_sw::{
    BackgroundProcess, ClientMessage, MessageSender, ServiceWorkerError, ServiceWorkerEvent,
    ServiceWorkerState,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The embedding page.
#[async_trait]
pub trait PageHost: Send + Sync {
    async fn reload(&self);
}

/// What the page shows about its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateState {
    pub registered: bool,
    /// A newer worker is waiting for adoption.
    pub update_available: bool,
    /// A worker controls the page.
    pub controlled: bool,
}

pub struct UpdateController {
    process: Arc<BackgroundProcess>,
    sender: MessageSender,
    host: Arc<dyn PageHost>,
    state: watch::Sender<UpdateState>,
    adopt_requested: AtomicBool,
    reloading: AtomicBool,
}

impl UpdateController {
    pub fn new(
        process: Arc<BackgroundProcess>,
        sender: MessageSender,
        host: Arc<dyn PageHost>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(UpdateState::default());
        Arc::new(Self {
            process,
            sender,
            host,
            state,
            adopt_requested: AtomicBool::new(false),
            reloading: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> UpdateState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.state.subscribe()
    }

    /// Register the configured worker version.
    pub async fn register(&self) -> Result<(), ServiceWorkerError> {
        let registration = &self.process.config().registration;
        info!(
            script = %registration.script_path,
            scope = %registration.scope,
            "Registering background process"
        );
        self.process.install().await?;
        self.state.send_modify(|s| s.registered = true);
        Ok(())
    }

    /// Install `version` if the check interval has passed (or `force`).
    /// Returns whether a worker is now waiting.
    pub async fn check_for_update(
        &self,
        version: &str,
        force: bool,
    ) -> Result<bool, ServiceWorkerError> {
        let lifecycle = self.process.lifecycle();
        let interval =
            Duration::from_secs(self.process.config().registration.update_check_interval_secs);
        if !force && !lifecycle.needs_update(interval).await {
            debug!("Update check skipped");
            return Ok(false);
        }

        lifecycle.install(version).await?;
        Ok(lifecycle.snapshot().await.waiting.is_some())
    }

    /// Ask the waiting worker to take over. The page reloads once the
    /// controller changes.
    pub fn apply_update(&self) -> Result<(), ServiceWorkerError> {
        self.adopt_requested.store(true, Ordering::SeqCst);
        self.sender.post(&ClientMessage::AdoptWaiting)
    }

    pub async fn handle_event(&self, event: &ServiceWorkerEvent) {
        match event {
            ServiceWorkerEvent::UpdateFound { version, .. } => {
                debug!(%version, "Update found");
            }
            ServiceWorkerEvent::StateChange {
                worker_id,
                version,
                new_state: ServiceWorkerState::Installed,
            } => {
                let lifecycle = self.process.lifecycle();
                let waiting = lifecycle.snapshot().await.waiting.map(|w| w.id);
                if waiting == Some(*worker_id) && lifecycle.active().is_some() {
                    info!(%version, "Update available");
                    self.state.send_modify(|s| s.update_available = true);
                }
            }
            ServiceWorkerEvent::StateChange { .. } => {}
            ServiceWorkerEvent::ControllerChange { version, .. } => {
                self.state.send_modify(|s| {
                    s.controlled = true;
                    s.update_available = false;
                });
                if self.adopt_requested.load(Ordering::SeqCst)
                    && !self.reloading.swap(true, Ordering::SeqCst)
                {
                    info!(%version, "New controller, reloading page");
                    self.host.reload().await;
                }
            }
            ServiceWorkerEvent::LifecycleFailed { phase, error, .. } => {
                warn!(?phase, %error, "Worker lifecycle failed");
            }
        }
    }

    /// Consume lifecycle events until the process goes away.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                controller.handle_event(&event).await;
            }
        })
    }
}
