//! Upstream accounting service model.
//!
//! Plain records as the Tiime API returns them, the paging types shared by
//! every upstream implementation, and the upstream error taxonomy. The HTTP
//! client lives in [`tiime`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod tiime;

pub use tiime::{TiimeConfig, TiimeFactory, TiimeSession};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("upstream rejected credentials: {0}")]
    Unauthorized(String),
    #[error("upstream record not found: {0}")]
    NotFound(String),
    #[error("upstream unavailable: {0}")]
    Transient(String),
    #[error("upstream response could not be decoded: {0}")]
    Decode(String),
    #[error("upstream call timed out")]
    Timeout,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: u64,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Company(Company),
    Client(Client),
    Contact(Contact),
}

/// What a paged fetch lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityScope {
    Companies,
    Clients { org_id: u64 },
    Contacts { org_id: u64, client_id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub offset: u64,
    pub limit: u64,
}

impl PageRange {
    pub fn first(limit: u64) -> Self { Self { offset: 0, limit } }

    pub fn next(self) -> Self { Self { offset: self.offset + self.limit, limit: self.limit } }

    /// Inclusive `Range` header value, e.g. `items=0-99`.
    pub fn header_value(&self) -> String {
        format!("items={}-{}", self.offset, self.offset + self.limit.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self { Self { items, has_more: false } }
}
