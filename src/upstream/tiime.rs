use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_RANGE, RANGE};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use super::{Client, Company, Contact, EntityScope, Page, PageRange, Record, UpstreamError};
use crate::ident::EntityKey;
use crate::identity::{Identity, SessionFactory, UpstreamSession};

pub const DEFAULT_API_URL: &str = "https://chronos-api.tiime-apps.com/v1/";
pub const DEFAULT_AUTH_URL: &str = "https://auth0.tiime.fr/oauth/token";
pub const DEFAULT_AUDIENCE: &str = "https://chronos/";
pub const DEFAULT_AUTH_REALM: &str = "Chronos-prod-db";
const PASSWORD_REALM_GRANT: &str = "http://auth0.com/oauth/grant-type/password-realm";

#[derive(Debug, Clone)]
pub struct TiimeConfig {
    pub api_url: String,
    pub auth_url: String,
    pub client_id: String,
    pub audience: String,
    pub auth_realm: String,
    /// Renew once less than this much token lifetime remains.
    pub renew_margin: Duration,
}

impl TiimeConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            client_id: client_id.into(),
            audience: DEFAULT_AUDIENCE.to_string(),
            auth_realm: DEFAULT_AUTH_REALM.to_string(),
            renew_margin: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 { 3600 }

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    expires_at: Instant,
}

impl TokenState {
    fn from_response(resp: TokenResponse) -> Self {
        Self { access_token: resp.access_token, expires_at: Instant::now() + Duration::from_secs(resp.expires_in) }
    }
}

/// Shared HTTP plumbing for the factory and every session it creates.
struct Endpoints {
    config: TiimeConfig,
    api: Url,
    auth: Url,
    http: reqwest::Client,
}

impl Endpoints {
    async fn request_token(&self, identity: &Identity) -> Result<TokenState, UpstreamError> {
        let body = serde_json::json!({
            "grant_type": PASSWORD_REALM_GRANT,
            "realm": self.config.auth_realm,
            "audience": self.config.audience,
            "client_id": self.config.client_id,
            "scope": "openid email",
            "username": identity.email,
            "password": identity.password,
        });
        let resp = self.http.post(self.auth.clone()).json(&body).send().await.map_err(transport_error)?;
        let status = resp.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST) {
            return Err(UpstreamError::Unauthorized(format!("token endpoint answered HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(UpstreamError::Transient(format!("token endpoint answered HTTP {}", status)));
        }
        let token: TokenResponse = resp.json().await.map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(TokenState::from_response(token))
    }
}

fn transport_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Transient(e.to_string())
    }
}

/// Logs in against the Tiime identity provider.
#[derive(Clone)]
pub struct TiimeFactory {
    endpoints: Arc<Endpoints>,
}

impl TiimeFactory {
    pub fn new(config: TiimeConfig) -> anyhow::Result<Self> {
        let api = Url::parse(&with_trailing_slash(&config.api_url)).context("invalid upstream API URL")?;
        let auth = Url::parse(&config.auth_url).context("invalid upstream auth URL")?;
        let http = reqwest::Client::builder().build().context("building upstream HTTP client")?;
        Ok(Self { endpoints: Arc::new(Endpoints { config, api, auth, http }) })
    }
}

#[async_trait]
impl SessionFactory for TiimeFactory {
    async fn login(&self, identity: &Identity) -> Result<Arc<dyn UpstreamSession>, UpstreamError> {
        let token = self.endpoints.request_token(identity).await?;
        debug!(target: "upstream", user = %identity.email, "tiime login ok");
        Ok(Arc::new(TiimeSession {
            endpoints: self.endpoints.clone(),
            identity: identity.clone(),
            token: RwLock::new(token),
        }))
    }
}

/// An authenticated Tiime API session. Renewal logs in again with the held identity.
pub struct TiimeSession {
    endpoints: Arc<Endpoints>,
    identity: Identity,
    token: RwLock<TokenState>,
}

impl TiimeSession {
    async fn get<T: DeserializeOwned>(&self, path: &str, range: Option<PageRange>) -> Result<(T, bool), UpstreamError> {
        let url = self.endpoints.api.join(path).map_err(|e| UpstreamError::Transient(e.to_string()))?;
        let bearer = self.token.read().access_token.clone();
        let mut req = self.endpoints.http.get(url).bearer_auth(bearer).header(ACCEPT, "application/json");
        if let Some(range) = range {
            req = req.header(RANGE, range.header_value());
        }
        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();
        match status {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(UpstreamError::Unauthorized(format!("GET {} answered HTTP {}", path, status)))
            }
            StatusCode::NOT_FOUND => return Err(UpstreamError::NotFound(path.to_string())),
            _ => return Err(UpstreamError::Transient(format!("GET {} answered HTTP {}", path, status))),
        }
        let has_more = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(content_range_has_more)
            .unwrap_or(false);
        let body = resp.json::<T>().await.map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok((body, has_more))
    }

    async fn find_contact(&self, org_id: u64, client_id: u64, contact_id: u64) -> Result<Contact, UpstreamError> {
        let scope = EntityScope::Contacts { org_id, client_id };
        let mut range = PageRange::first(crate::identity::PAGE_SIZE);
        loop {
            let page = self.fetch_page(scope, range).await?;
            for record in page.items {
                if let Record::Contact(c) = record {
                    if c.id == contact_id {
                        return Ok(c);
                    }
                }
            }
            if !page.has_more {
                return Err(UpstreamError::NotFound(format!("contact {}", contact_id)));
            }
            range = range.next();
        }
    }
}

#[async_trait]
impl UpstreamSession for TiimeSession {
    fn needs_renewal(&self) -> bool {
        let expires_at = self.token.read().expires_at;
        expires_at.saturating_duration_since(Instant::now()) < self.endpoints.config.renew_margin
    }

    async fn renew(&self) -> Result<(), UpstreamError> {
        let fresh = self.endpoints.request_token(&self.identity).await?;
        *self.token.write() = fresh;
        Ok(())
    }

    async fn fetch_page(&self, scope: EntityScope, range: PageRange) -> Result<Page<Record>, UpstreamError> {
        match scope {
            EntityScope::Companies => {
                let (companies, _) = self.get::<Vec<Company>>("companies", None).await?;
                Ok(Page::last(companies.into_iter().map(Record::Company).collect()))
            }
            EntityScope::Clients { org_id } => {
                let path = format!("companies/{}/clients", org_id);
                let (clients, has_more) = self.get::<Vec<Client>>(&path, Some(range)).await?;
                Ok(Page { items: clients.into_iter().map(Record::Client).collect(), has_more })
            }
            EntityScope::Contacts { org_id, client_id } => {
                let path = format!("companies/{}/clients/{}/contacts", org_id, client_id);
                let (contacts, has_more) = self.get::<Vec<Contact>>(&path, Some(range)).await?;
                Ok(Page { items: contacts.into_iter().map(Record::Contact).collect(), has_more })
            }
        }
    }

    async fn fetch_one(&self, key: &EntityKey) -> Result<Record, UpstreamError> {
        match key.contact_id {
            None => {
                let path = format!("companies/{}/clients/{}", key.org_id, key.client_id);
                let (client, _) = self.get::<Client>(&path, None).await?;
                Ok(Record::Client(client))
            }
            Some(contact_id) => {
                let contact = self.find_contact(key.org_id, key.client_id, contact_id).await?;
                Ok(Record::Contact(contact))
            }
        }
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') { url.to_string() } else { format!("{}/", url) }
}

/// `items 0-99/*` means more pages follow; a numeric total means more when
/// the range ends before it.
fn content_range_has_more(value: &str) -> bool {
    let Some((span, total)) = value.trim().trim_start_matches("items").trim().split_once('/') else {
        return false;
    };
    if total.trim() == "*" {
        return true;
    }
    let end = span.split_once('-').and_then(|(_, end)| end.trim().parse::<u64>().ok());
    match (end, total.trim().parse::<u64>()) {
        (Some(end), Ok(total)) => end + 1 < total,
        _ => false,
    }
}
