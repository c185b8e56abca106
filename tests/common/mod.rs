//! In-memory Tiime double shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use base64::Engine;

use tiime_carddav::config::CredentialSource;
use tiime_carddav::ident::{EntityKey, PathLayout};
use tiime_carddav::identity::{CacheConfig, Identity, SessionCache, SessionFactory, UpstreamSession};
use tiime_carddav::server::{router, AppState};
use tiime_carddav::upstream::{Client, Company, Contact, EntityScope, Page, PageRange, Record, UpstreamError};

pub const USER: &str = "Aladdin";
pub const PASSWORD: &str = "open sesame";
pub const ALADDIN: &str = "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==";
/// Organization whose listing always fails with a transient error.
pub const BROKEN_ORG: u64 = 500;

pub fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password)))
}

#[derive(Default)]
pub struct Directory {
    pub companies: Vec<Company>,
    pub clients: HashMap<u64, Vec<Client>>,
    pub contacts: HashMap<(u64, u64), Vec<Contact>>,
    pub page_calls: AtomicUsize,
}

impl Directory {
    /// Org 1 "ACME" with two clients (one with a contact), org 2 "Globex" with 150 clients.
    pub fn sample() -> Self {
        let mut dir = Directory {
            companies: vec![
                Company { id: 1, name: "ACME".into() },
                Company { id: 2, name: "Globex".into() },
                Company { id: BROKEN_ORG, name: "Broken".into() },
            ],
            ..Default::default()
        };
        dir.clients.insert(
            1,
            vec![
                Client {
                    id: 10,
                    name: "Wile E. Coyote".into(),
                    email: Some("wile@acme.test".into()),
                    phone: Some("+33 1 23 45 67 89".into()),
                    address: Some("1 Desert Road".into()),
                    ..Default::default()
                },
                Client { id: 11, name: "Road Runner".into(), ..Default::default() },
            ],
        );
        dir.contacts.insert(
            (1, 10),
            vec![Contact {
                id: 100,
                firstname: Some("Ada".into()),
                lastname: Some("Lovelace".into()),
                email: Some("ada@acme.test".into()),
                ..Default::default()
            }],
        );
        dir.clients.insert(
            2,
            (0..150).map(|i| Client { id: 1000 + i, name: format!("Client {}", i), ..Default::default() }).collect(),
        );
        dir
    }
}

pub struct MemorySession {
    dir: Arc<Directory>,
}

fn slice<T: Clone>(items: &[T], range: PageRange) -> (Vec<T>, bool) {
    let start = (range.offset as usize).min(items.len());
    let end = (start + range.limit as usize).min(items.len());
    (items[start..end].to_vec(), end < items.len())
}

#[async_trait]
impl UpstreamSession for MemorySession {
    fn needs_renewal(&self) -> bool { false }

    async fn renew(&self) -> Result<(), UpstreamError> { Ok(()) }

    async fn fetch_page(&self, scope: EntityScope, range: PageRange) -> Result<Page<Record>, UpstreamError> {
        self.dir.page_calls.fetch_add(1, Ordering::SeqCst);
        match scope {
            EntityScope::Companies => Ok(Page::last(self.dir.companies.iter().cloned().map(Record::Company).collect())),
            EntityScope::Clients { org_id } if org_id == BROKEN_ORG => Err(UpstreamError::Transient("HTTP 503".into())),
            EntityScope::Clients { org_id } => {
                let all = self.dir.clients.get(&org_id).cloned().unwrap_or_default();
                let (items, has_more) = slice(&all, range);
                Ok(Page { items: items.into_iter().map(Record::Client).collect(), has_more })
            }
            EntityScope::Contacts { org_id, client_id } => {
                let all = self.dir.contacts.get(&(org_id, client_id)).cloned().unwrap_or_default();
                let (items, has_more) = slice(&all, range);
                Ok(Page { items: items.into_iter().map(Record::Contact).collect(), has_more })
            }
        }
    }

    async fn fetch_one(&self, key: &EntityKey) -> Result<Record, UpstreamError> {
        let missing = || UpstreamError::NotFound(format!("{:?}", key));
        let client = self
            .dir
            .clients
            .get(&key.org_id)
            .and_then(|cs| cs.iter().find(|c| c.id == key.client_id))
            .ok_or_else(missing)?;
        match key.contact_id {
            None => Ok(Record::Client(client.clone())),
            Some(id) => self
                .dir
                .contacts
                .get(&(key.org_id, key.client_id))
                .and_then(|cs| cs.iter().find(|c| c.id == id))
                .map(|c| Record::Contact(c.clone()))
                .ok_or_else(missing),
        }
    }
}

/// Accepts exactly one identity.
pub struct MemoryFactory {
    pub accepted: Identity,
    pub dir: Arc<Directory>,
    pub logins: AtomicUsize,
}

impl MemoryFactory {
    pub fn new(accepted: Identity) -> Self {
        Self { accepted, dir: Arc::new(Directory::sample()), logins: AtomicUsize::new(0) }
    }

    pub fn logins(&self) -> usize { self.logins.load(Ordering::SeqCst) }
}

#[async_trait]
impl SessionFactory for MemoryFactory {
    async fn login(&self, identity: &Identity) -> Result<Arc<dyn UpstreamSession>, UpstreamError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if *identity != self.accepted {
            return Err(UpstreamError::Unauthorized("invalid_grant".into()));
        }
        Ok(Arc::new(MemorySession { dir: self.dir.clone() }))
    }
}

pub struct Harness {
    pub app: axum::Router,
    pub factory: Arc<MemoryFactory>,
    pub cache: SessionCache,
}

pub fn harness(layout: PathLayout, credentials: CredentialSource) -> Harness {
    let factory = Arc::new(MemoryFactory::new(Identity::new(USER, PASSWORD)));
    let config = CacheConfig { background_renewal: false, ..Default::default() };
    let cache = SessionCache::new(factory.clone(), config);
    let app = router(AppState::new(cache.clone(), layout, "Tiime", credentials));
    Harness { app, factory, cache }
}

pub fn nested() -> Harness {
    harness(PathLayout::Nested, CredentialSource::Presented)
}

pub fn request(method: &str, uri: &str, auth: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_string(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
