use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::credentials::CredentialKey;
use super::provider::{SessionFactory, UpstreamSession};
use super::renewal;
use crate::error::GatewayResult;
use crate::upstream::UpstreamError;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Start a renewal task for every new session.
    pub background_renewal: bool,
    pub renewal_interval: Duration,
    /// Upper bound on each login/renew call.
    pub upstream_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            background_renewal: true,
            renewal_interval: Duration::from_secs(5 * 60),
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

pub(crate) struct CachedSession {
    pub(crate) session: Arc<dyn UpstreamSession>,
    /// Stops this session's renewal task.
    pub(crate) cancel: CancellationToken,
}

pub(crate) struct CacheInner {
    pub(crate) entries: Mutex<HashMap<CredentialKey, CachedSession>>,
    factory: Arc<dyn SessionFactory>,
    pub(crate) config: CacheConfig,
    shutdown: CancellationToken,
}

impl CacheInner {
    pub(crate) async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, UpstreamError>>,
    ) -> Result<T, UpstreamError> {
        tokio::time::timeout(self.config.upstream_timeout, fut)
            .await
            .map_err(|_| UpstreamError::Timeout)?
    }

    /// Drop the entry for `key` and stop its renewal task. Caller holds the lock.
    pub(crate) fn evict_locked(entries: &mut HashMap<CredentialKey, CachedSession>, key: &CredentialKey) -> bool {
        match entries.remove(key) {
            Some(old) => {
                old.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

/// Credential-keyed cache of upstream sessions.
///
/// One lock covers lookup, creation, insertion and every renewal, so at most
/// one session (and one login) ever exists per key.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<CacheInner>,
}

impl SessionCache {
    pub fn new(factory: Arc<dyn SessionFactory>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                factory,
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig { &self.inner.config }

    /// Return a ready session for `key`, renewing or logging in as needed.
    ///
    /// A failed, timed out or cancelled login leaves no entry behind. A failed
    /// renewal on this path evicts the entry so the next call logs in afresh.
    pub async fn get_or_create(&self, key: &CredentialKey) -> GatewayResult<Arc<dyn UpstreamSession>> {
        let mut entries = self.inner.entries.lock().await;

        if let Some(entry) = entries.get(key) {
            let session = entry.session.clone();
            if !session.needs_renewal() {
                return Ok(session);
            }
            debug!(target: "session", "session needs renewal; renewing on use");
            return match self.inner.bounded(session.renew()).await {
                Ok(()) => Ok(session),
                Err(e) => {
                    warn!(target: "session", error = %e, "renewal on use failed; evicting session");
                    CacheInner::evict_locked(&mut entries, key);
                    Err(e.into())
                }
            };
        }

        let identity = key.decode()?;
        let session = match self.inner.bounded(self.inner.factory.login(&identity)).await {
            Ok(s) => s,
            Err(e) => {
                debug!(target: "session", user = %identity.email, error = %e, "upstream login failed");
                return Err(e.into());
            }
        };

        let cancel = self.inner.shutdown.child_token();
        entries.insert(key.clone(), CachedSession { session: session.clone(), cancel: cancel.clone() });
        if self.inner.config.background_renewal {
            renewal::spawn(
                Arc::downgrade(&self.inner),
                key.clone(),
                Arc::downgrade(&session),
                cancel,
                self.inner.config.renewal_interval,
            );
        }
        info!(target: "session", user = %identity.email, sessions = entries.len(), "upstream session created");
        Ok(session)
    }

    /// Remove the session for `key`, if any, stopping its renewal task.
    pub async fn evict(&self, key: &CredentialKey) -> bool {
        let mut entries = self.inner.entries.lock().await;
        CacheInner::evict_locked(&mut entries, key)
    }

    pub async fn contains(&self, key: &CredentialKey) -> bool {
        self.inner.entries.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop every renewal task. Cached sessions stay usable.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}
