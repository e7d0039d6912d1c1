//! FIFO trimming of capped tiers.

use tracing::debug;

use super::store::CacheStore;

/// Remove the oldest-inserted entries of `cache` until at most `capacity` remain.
///
/// The entry list is re-read before every removal, so overlapping trims of
/// the same cache converge. The loop is bounded by the excess seen on the
/// first read; writes that land during the trim are handled by the next pass.
/// Returns the number of entries this call removed.
pub async fn trim(store: &CacheStore, cache: &str, capacity: usize) -> usize {
    let excess = store.len(cache).await.saturating_sub(capacity);
    let mut removed = 0;

    for _ in 0..excess {
        let keys = store.entry_keys(cache).await;
        if keys.len() <= capacity {
            break;
        }
        if store.delete_entry(cache, &keys[0]).await {
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(cache, removed, capacity, "Trimmed cache");
    }
    removed
}
