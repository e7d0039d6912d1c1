//! # Harbor Background Process
//!
//! Client-resident resilience for a web application: requests are served
//! from a tiered cache when the network fails, worker versions roll over
//! without mixing cache generations, and push deliveries become notifications
//! whether or not a page is focused.
//!
//! ## Architecture
//!
//! ```text
//! BackgroundProcess (one scope)
//!     ├── LifecycleManager   installing → waiting → active, generation purge
//!     ├── StrategyRouter     cache-first / network-first / page fallback
//!     │       └── CacheStore <prefix>-<tier>-<version>, FIFO-trimmed
//!     ├── Clients            open windows, focus, claim
//!     └── NotificationDispatcher
//!
//! page ──ClientMessage──▶ MessageReceiver ──▶ BackgroundProcess
//! BackgroundProcess ──ServiceWorkerEvent──▶ page
//! ```

use harbor_common::HarborError;
use harbor_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod message;
pub mod notification;
pub mod process;
pub mod router;

pub use cache::{CacheEntry, CacheError, CacheStore, Generation, RequestIdentity, Tier};
pub use clients::{Client, ClientId, Clients, UrlMatch};
pub use config::WorkerConfig;
pub use lifecycle::{
    ActiveWorker, LifecycleManager, LifecyclePhase, RegistrationSnapshot, ServiceWorker,
    ServiceWorkerEvent, ServiceWorkerId, ServiceWorkerState, UpdateViaCache,
};
pub use message::{channel, ClientMessage, Envelope, MessageReceiver, MessageSender};
pub use notification::{
    ClickOutcome, Notification, NotificationDispatcher, NotificationId, NotificationOptions,
    NotificationSource,
};
pub use process::BackgroundProcess;
pub use router::{Strategy, StrategyRouter};

/// Errors raised by the background process.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Message error: {0}")]
    Message(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error(transparent)]
    Config(#[from] HarborError),
}

impl From<ServiceWorkerError> for HarborError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Config(inner) => inner,
            ServiceWorkerError::Network(e) => HarborError::network_with_source("fetch failed", e),
            ServiceWorkerError::Cache(e) => HarborError::cache(e.to_string()),
            ServiceWorkerError::NotFound(what) => HarborError::NotFound(what),
            other => HarborError::lifecycle(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: HarborError = ServiceWorkerError::StateError("no waiting worker".into()).into();
        assert_eq!(err.category(), "lifecycle");

        let err: HarborError = ServiceWorkerError::Network(NetError::Offline("x".into())).into();
        assert!(err.is_retryable());

        let err: HarborError = ServiceWorkerError::Cache(CacheError::QuotaExceeded {
            needed: 10,
            quota: 5,
        })
        .into();
        assert_eq!(err.category(), "cache");
    }
}
