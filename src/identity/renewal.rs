//! Background session renewal.
//!
//! One task per cached session. Each tick takes the cache lock, renews the
//! session, and on failure evicts it and exits. The task never retries; the
//! next request with the same credentials logs in again.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::credentials::CredentialKey;
use super::provider::UpstreamSession;
use super::session::CacheInner;

pub(crate) fn spawn(
    cache: Weak<CacheInner>,
    key: CredentialKey,
    session: Weak<dyn UpstreamSession>,
    cancel: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(run(cache, key, session, cancel, interval))
}

async fn run(
    cache: Weak<CacheInner>,
    key: CredentialKey,
    session: Weak<dyn UpstreamSession>,
    cancel: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: "renewal", "renewal task cancelled");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(cache) = cache.upgrade() else { return; };
        let mut entries = cache.entries.lock().await;
        if cancel.is_cancelled() {
            return;
        }
        // Stop if the entry was evicted or replaced while we slept.
        let current = match entries.get(&key) {
            Some(entry) if Weak::ptr_eq(&session, &Arc::downgrade(&entry.session)) => entry.session.clone(),
            _ => return,
        };

        match cache.bounded(current.renew()).await {
            Ok(()) => debug!(target: "renewal", "session renewed"),
            Err(e) => {
                warn!(target: "renewal", error = %e, "background renewal failed; evicting session");
                CacheInner::evict_locked(&mut entries, &key);
                return;
            }
        }
    }
}
