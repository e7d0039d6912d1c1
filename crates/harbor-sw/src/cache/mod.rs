//! Tiered cache store.
//!
//! ```text
//! CacheStore (Arc<RwLock<CacheStorage>>)
//!     └── Cache "<prefix>-<tier>-<version>"
//!             └── RequestIdentity → CacheEntry (insertion-ordered)
//! ```

use thiserror::Error;

pub mod entry;
pub mod eviction;
pub mod store;
pub mod tier;

pub use entry::{CacheEntry, RequestIdentity};
pub use eviction::trim;
pub use store::{Cache, CacheStorage, CacheStore};
pub use tier::{Generation, Tier};

/// Errors raised while writing to the cache store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Not cacheable: {0}")]
    Uncacheable(String),

    #[error("Response clone failed: {0}")]
    Clone(String),

    #[error("Quota exceeded: {needed} bytes needed, quota is {quota}")]
    QuotaExceeded { needed: usize, quota: usize },
}
