//! In-memory upstream doubles for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::credentials::{CredentialKey, Identity};
use super::provider::{SessionFactory, UpstreamSession};
use crate::ident::EntityKey;
use crate::upstream::{EntityScope, Page, PageRange, Record, UpstreamError};

pub(crate) fn basic_key(user: &str, password: &str) -> CredentialKey {
    CredentialKey::for_identity(&Identity::new(user, password))
}

#[derive(Default)]
pub(crate) struct FakeSession {
    pub(crate) expired: AtomicBool,
    pub(crate) renew_fails: AtomicBool,
    pub(crate) renewals: AtomicUsize,
}

#[async_trait]
impl UpstreamSession for FakeSession {
    fn needs_renewal(&self) -> bool { self.expired.load(Ordering::SeqCst) }

    async fn renew(&self) -> Result<(), UpstreamError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if self.renew_fails.load(Ordering::SeqCst) {
            return Err(UpstreamError::Transient("token endpoint down".into()));
        }
        self.expired.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_page(&self, _scope: EntityScope, _range: PageRange) -> Result<Page<Record>, UpstreamError> {
        Ok(Page::last(Vec::new()))
    }

    async fn fetch_one(&self, key: &EntityKey) -> Result<Record, UpstreamError> {
        Err(UpstreamError::NotFound(format!("{:?}", key)))
    }
}

#[derive(Default)]
pub(crate) struct FakeFactory {
    pub(crate) delay: Duration,
    pub(crate) reject_logins: AtomicBool,
    pub(crate) logins: AtomicUsize,
    pub(crate) identities: Mutex<Vec<Identity>>,
    pub(crate) sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeFactory {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self { delay, ..Default::default() }
    }

    pub(crate) fn last_session(&self) -> Arc<FakeSession> {
        self.sessions.lock().last().cloned().expect("no session created yet")
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn login(&self, identity: &Identity) -> Result<Arc<dyn UpstreamSession>, UpstreamError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.identities.lock().push(identity.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.reject_logins.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unauthorized("invalid_grant".into()));
        }
        let session = Arc::new(FakeSession::default());
        self.sessions.lock().push(session.clone());
        Ok(session)
    }
}
