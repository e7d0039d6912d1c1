//! Worker lifecycle: installing → waiting → activating → activated → redundant.
//!
//! ```text
//! ServiceWorkerRegistration (scope)
//!     ├── installing  seeding its generation's static tier
//!     ├── waiting     installed, held until adopted or all clients close
//!     └── active      activating → activated; serves requests
//! ```
//!
//! A single registration owns one active worker at a time. The active
//! worker's version selects the cache generation the router reads and writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use harbor_net::{Fetcher, Request};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStore, Generation, Tier};
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a worker version instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    #[default]
    Parsed,
    Installing,
    /// Installed and waiting for adoption.
    Installed,
    Activating,
    Activated,
    /// Replaced, failed, or unregistered.
    Redundant,
}

/// Whether update checks may be answered by the HTTP cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateViaCache {
    Imports,
    All,
    /// Always revalidate the script with the server.
    #[default]
    None,
}

/// Lifecycle phase that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Install,
    Activate,
}

/// A worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub script_url: Url,
    /// Cache generation tag this worker reads and writes.
    pub version: String,
    pub state: ServiceWorkerState,
    pub error: Option<String>,
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(script_url: Url, version: &str) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            version: version.to_string(),
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// The activated worker, as seen by request handling and push binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWorker {
    pub id: ServiceWorkerId,
    pub version: String,
}

/// Events delivered to the page.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceWorkerEvent {
    /// A new worker started installing.
    UpdateFound {
        worker_id: ServiceWorkerId,
        version: String,
    },
    StateChange {
        worker_id: ServiceWorkerId,
        version: String,
        new_state: ServiceWorkerState,
    },
    /// A different worker now controls the pages.
    ControllerChange {
        worker_id: ServiceWorkerId,
        version: String,
    },
    LifecycleFailed {
        worker_id: ServiceWorkerId,
        phase: LifecyclePhase,
        error: String,
    },
}

// ==================== Registration ====================

/// A worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    pub scope: Url,
    pub script_url: Url,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
    pub update_via_cache: UpdateViaCache,
    pub last_update_check: Option<Instant>,
}

impl ServiceWorkerRegistration {
    pub fn new(scope: Url, script_url: Url, update_via_cache: UpdateViaCache) -> Self {
        Self {
            scope,
            script_url,
            installing: None,
            waiting: None,
            active: None,
            update_via_cache,
            last_update_check: None,
        }
    }

    pub fn needs_update(&self, check_interval: Duration) -> bool {
        match self.last_update_check {
            Some(last) => last.elapsed() > check_interval,
            None => true,
        }
    }

    /// Transition installing to waiting; a previous waiting worker is replaced.
    fn install_complete(&mut self) -> Vec<ServiceWorker> {
        let mut retired = Vec::new();
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(ServiceWorkerState::Installed);
            if let Some(mut old) = self.waiting.replace(worker) {
                old.set_state(ServiceWorkerState::Redundant);
                retired.push(old);
            }
        }
        retired
    }

    /// Retire every worker.
    fn unregister(&mut self) -> Vec<ServiceWorker> {
        [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
            .map(|mut worker| {
                worker.set_state(ServiceWorkerState::Redundant);
                worker
            })
            .collect()
    }
}

/// Point-in-time view of a registration.
#[derive(Debug, Clone)]
pub struct RegistrationSnapshot {
    pub scope: Url,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
}

// ==================== Lifecycle Manager ====================

/// Drives one registration through its lifecycle.
pub struct LifecycleManager {
    config: Arc<WorkerConfig>,
    store: CacheStore,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<Clients>>,
    registration: RwLock<ServiceWorkerRegistration>,
    active_tx: watch::Sender<Option<ActiveWorker>>,
    events: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl LifecycleManager {
    pub fn new(
        scope: Url,
        config: Arc<WorkerConfig>,
        store: CacheStore,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<RwLock<Clients>>,
        events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    ) -> Result<Self, ServiceWorkerError> {
        let script_url = scope
            .join(&config.registration.script_path)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
        let (active_tx, _) = watch::channel(None);

        Ok(Self {
            registration: RwLock::new(ServiceWorkerRegistration::new(
                scope,
                script_url,
                UpdateViaCache::None,
            )),
            config,
            store,
            fetcher,
            clients,
            active_tx,
            events,
        })
    }

    /// Currently activated worker.
    pub fn active(&self) -> Option<ActiveWorker> {
        self.active_tx.borrow().clone()
    }

    /// Generation served by the activated worker.
    pub fn generation(&self) -> Option<Generation> {
        self.active()
            .map(|w| Generation::new(&self.config.cache_prefix, w.version))
    }

    /// Watch the activated worker.
    pub fn subscribe(&self) -> watch::Receiver<Option<ActiveWorker>> {
        self.active_tx.subscribe()
    }

    /// Wait until some worker is activated.
    pub async fn ready(&self) -> Result<ActiveWorker, ServiceWorkerError> {
        let mut rx = self.active_tx.subscribe();
        let active = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ServiceWorkerError::StateError("lifecycle shut down".to_string()))?;
        (*active)
            .clone()
            .ok_or_else(|| ServiceWorkerError::StateError("no active worker".to_string()))
    }

    pub async fn snapshot(&self) -> RegistrationSnapshot {
        let reg = self.registration.read().await;
        RegistrationSnapshot {
            scope: reg.scope.clone(),
            installing: reg.installing.clone(),
            waiting: reg.waiting.clone(),
            active: reg.active.clone(),
        }
    }

    pub async fn needs_update(&self, check_interval: Duration) -> bool {
        self.registration.read().await.needs_update(check_interval)
    }

    /// Install `version`. Seeds its static tier, then waits for adoption
    /// unless no worker is active yet, in which case it activates at once.
    ///
    /// Installing the version that is already active or waiting is a no-op.
    pub async fn install(&self, version: &str) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let worker_id = {
            let mut reg = self.registration.write().await;
            reg.last_update_check = Some(Instant::now());

            let current = reg
                .waiting
                .iter()
                .chain(reg.active.iter())
                .find(|w| w.version == version)
                .map(|w| w.id);
            if let Some(id) = current {
                debug!(version, "Script unchanged, no update");
                return Ok(id);
            }

            let mut worker = ServiceWorker::new(reg.script_url.clone(), version);
            worker.set_state(ServiceWorkerState::Installing);
            let id = worker.id;
            if let Some(mut superseded) = reg.installing.replace(worker) {
                superseded.set_state(ServiceWorkerState::Redundant);
                self.emit_state(&superseded);
            }
            id
        };

        info!(version, worker = worker_id.raw(), "Installing worker");
        self.emit(ServiceWorkerEvent::UpdateFound {
            worker_id,
            version: version.to_string(),
        });
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            version: version.to_string(),
            new_state: ServiceWorkerState::Installing,
        });

        self.seed(version).await;

        let has_active = {
            let mut reg = self.registration.write().await;
            if reg.installing.as_ref().map(|w| w.id) == Some(worker_id) {
                for retired in reg.install_complete() {
                    self.emit_state(&retired);
                }
                if let Some(ref waiting) = reg.waiting {
                    self.emit_state(waiting);
                }
                Some(reg.active.is_some())
            } else {
                None
            }
        };
        let Some(has_active) = has_active else {
            let error = ServiceWorkerError::StateError(format!("install of {version} superseded"));
            self.fail(worker_id, LifecyclePhase::Install, &error);
            return Err(error);
        };

        if !has_active {
            self.activate().await?;
        } else {
            info!(version, "Worker installed, waiting for adoption");
        }
        Ok(worker_id)
    }

    /// Store the seed list into the installing version's static tier.
    /// Individual failures are logged and skipped.
    async fn seed(&self, version: &str) -> usize {
        let cache = Generation::new(&self.config.cache_prefix, version).cache_name(Tier::Static);
        self.store.open(&cache).await;
        let scope = self.registration.read().await.scope.clone();

        let mut stored = 0;
        for path in &self.config.seed_paths {
            let url = match scope.join(path) {
                Ok(url) => url,
                Err(e) => {
                    debug!(path = %path, error = %e, "Skipping unresolvable seed");
                    continue;
                }
            };
            let request = Request::get(url);
            let result = match self.fetcher.fetch(&request).await {
                Ok(response) => CacheEntry::capture(&request, &response).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match result {
                Ok(entry) => match self.store.put(&cache, entry).await {
                    Ok(()) => stored += 1,
                    Err(e) => debug!(path = %path, error = %e, "Seed not stored"),
                },
                Err(e) => debug!(path = %path, error = %e, "Seed fetch failed"),
            }
        }

        debug!(cache = %cache, stored, total = self.config.seed_paths.len(), "Seeding finished");
        stored
    }

    /// Promote the waiting worker: purge stale generations, then take control.
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        let worker = {
            let mut reg = self.registration.write().await;
            let mut worker = reg
                .waiting
                .take()
                .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".to_string()))?;
            worker.set_state(ServiceWorkerState::Activating);
            if let Some(mut old) = reg.active.replace(worker.clone()) {
                old.set_state(ServiceWorkerState::Redundant);
                self.emit_state(&old);
            }
            worker
        };
        self.emit_state(&worker);

        let generation = Generation::new(&self.config.cache_prefix, &worker.version);
        let purged = self.purge_stale(&generation).await;

        let superseded = {
            let mut reg = self.registration.write().await;
            match reg.active.as_mut() {
                Some(active) if active.id == worker.id => {
                    active.set_state(ServiceWorkerState::Activated);
                    false
                }
                _ => true,
            }
        };
        if superseded {
            let error =
                ServiceWorkerError::StateError(format!("activation of {} superseded", worker.version));
            self.fail(worker.id, LifecyclePhase::Activate, &error);
            return Err(error);
        }

        self.active_tx.send_replace(Some(ActiveWorker {
            id: worker.id,
            version: worker.version.clone(),
        }));
        self.clients.write().await.claim(worker.id);

        // Writes that raced the first sweep land in the old generation.
        let purged = purged + self.purge_stale(&generation).await;

        info!(version = %worker.version, purged, "Worker activated");
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id: worker.id,
            version: worker.version.clone(),
            new_state: ServiceWorkerState::Activated,
        });
        self.emit(ServiceWorkerEvent::ControllerChange {
            worker_id: worker.id,
            version: worker.version,
        });
        Ok(())
    }

    /// Activate the waiting worker now. Returns false when nothing is waiting.
    pub async fn skip_waiting(&self) -> Result<bool, ServiceWorkerError> {
        if self.registration.read().await.waiting.is_none() {
            return Ok(false);
        }
        self.activate().await?;
        Ok(true)
    }

    /// Called when a window closes; with no windows left a waiting worker takes over.
    pub async fn on_clients_changed(&self) -> Result<bool, ServiceWorkerError> {
        if !self.clients.read().await.is_empty() {
            return Ok(false);
        }
        self.skip_waiting().await
    }

    /// Retire all workers and stop controlling requests.
    pub async fn unregister(&self) -> bool {
        let retired = self.registration.write().await.unregister();
        self.active_tx.send_replace(None);
        for worker in &retired {
            self.emit_state(worker);
        }
        info!(retired = retired.len(), "Registration removed");
        !retired.is_empty()
    }

    async fn purge_stale(&self, current: &Generation) -> usize {
        let mut purged = 0;
        for name in self.store.keys().await {
            if !current.owns(&name) && self.store.delete(&name).await {
                debug!(cache = %name, "Deleted stale cache");
                purged += 1;
            }
        }
        purged
    }

    fn fail(&self, worker_id: ServiceWorkerId, phase: LifecyclePhase, error: &ServiceWorkerError) {
        warn!(worker = worker_id.raw(), ?phase, error = %error, "Lifecycle attempt failed");
        self.emit(ServiceWorkerEvent::LifecycleFailed {
            worker_id,
            phase,
            error: error.to_string(),
        });
    }

    fn emit_state(&self, worker: &ServiceWorker) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id: worker.id,
            version: worker.version.clone(),
            new_state: worker.state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.events.send(event);
    }
}
