//! Resource path codec
//! -------------------
//! Single source of truth for mapping CardDAV resource paths to the Tiime
//! entity identifiers they address, and back.
//!
//! All paths live under the address book home `/me/contacts/`. The layout
//! decides how many numeric segments follow it:
//!
//! ```text
//! SingleTenant   /me/contacts/                 /me/contacts/{client}
//! MultiTenant    /me/contacts/{org}/           /me/contacts/{org}/{client}
//! Nested         /me/contacts/{org}/           /me/contacts/{org}/{client}[/{contact}]
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const PRINCIPAL_PATH: &str = "/me/";
pub const HOME_PATH: &str = "/me/contacts/";

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path {0:?} is outside the address book home")]
    OutsideHome(String),
    #[error("path {0:?} is missing an identifier segment")]
    MissingSegment(String),
    #[error("segment {0:?} is not a valid identifier")]
    InvalidSegment(String),
    #[error("path {0:?} has unexpected trailing segments")]
    UnexpectedSegment(String),
}

/// Identifies the upstream record an item path addresses.
///
/// `contact_id` is `None` for client-level resources. Zero is a valid
/// identifier and never stands in for "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub org_id: u64,
    pub client_id: u64,
    pub contact_id: Option<u64>,
}

impl EntityKey {
    pub fn client(org_id: u64, client_id: u64) -> Self {
        Self { org_id, client_id, contact_id: None }
    }

    pub fn contact(org_id: u64, client_id: u64, contact_id: u64) -> Self {
        Self { org_id, client_id, contact_id: Some(contact_id) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLayout {
    /// One fixed organization; the home collection is the only address book.
    SingleTenant { org_id: u64 },
    /// One address book per organization, clients as items.
    MultiTenant,
    /// One address book per organization, clients and their contacts as items.
    Nested,
}

impl PathLayout {
    pub fn is_multi_tenant(&self) -> bool {
        !matches!(self, PathLayout::SingleTenant { .. })
    }

    /// Extract the organization of the address book a path lives in.
    ///
    /// Prefix match: `/me/contacts/1`, `/me/contacts/1/` and `/me/contacts/1/2/3`
    /// all resolve to organization 1.
    pub fn decode_collection_path(&self, path: &str) -> Result<u64, PathError> {
        let segments = home_segments(path)?;
        match self {
            PathLayout::SingleTenant { org_id } => Ok(*org_id),
            PathLayout::MultiTenant | PathLayout::Nested => {
                let first = segments.first().ok_or_else(|| PathError::MissingSegment(path.to_string()))?;
                parse_segment(first)
            }
        }
    }

    /// Extract the full entity key of an item path. Segment count is exact.
    pub fn decode_item_path(&self, path: &str) -> Result<EntityKey, PathError> {
        let segments = home_segments(path)?;
        if path.ends_with('/') {
            return Err(PathError::MissingSegment(path.to_string()));
        }
        let (min, max) = match self {
            PathLayout::SingleTenant { .. } => (1, 1),
            PathLayout::MultiTenant => (2, 2),
            PathLayout::Nested => (2, 3),
        };
        if segments.len() < min {
            return Err(PathError::MissingSegment(path.to_string()));
        }
        if segments.len() > max {
            return Err(PathError::UnexpectedSegment(path.to_string()));
        }
        let ids = segments.iter().map(|s| parse_segment(s)).collect::<Result<Vec<u64>, _>>()?;
        Ok(match self {
            PathLayout::SingleTenant { org_id } => EntityKey::client(*org_id, ids[0]),
            PathLayout::MultiTenant | PathLayout::Nested => EntityKey {
                org_id: ids[0],
                client_id: ids[1],
                contact_id: ids.get(2).copied(),
            },
        })
    }

    pub fn encode_collection_path(&self, org_id: u64) -> String {
        match self {
            PathLayout::SingleTenant { .. } => HOME_PATH.to_string(),
            PathLayout::MultiTenant | PathLayout::Nested => format!("{}{}/", HOME_PATH, org_id),
        }
    }

    pub fn encode_item_path(&self, key: &EntityKey) -> String {
        let base = match self {
            PathLayout::SingleTenant { .. } => format!("{}{}", HOME_PATH, key.client_id),
            PathLayout::MultiTenant | PathLayout::Nested => format!("{}{}/{}", HOME_PATH, key.org_id, key.client_id),
        };
        match key.contact_id {
            Some(contact) => format!("{}/{}", base, contact),
            None => base,
        }
    }

    /// True when `path` names the address book home itself.
    pub fn is_home(&self, path: &str) -> bool {
        normalize_dir(path) == HOME_PATH
    }

    /// True when `path` names an address book collection (not an item).
    pub fn is_collection(&self, path: &str) -> bool {
        match self {
            PathLayout::SingleTenant { .. } => self.is_home(path),
            PathLayout::MultiTenant | PathLayout::Nested => {
                matches!(home_segments(path), Ok(s) if s.len() == 1 && parse_segment(s[0]).is_ok())
            }
        }
    }
}

/// `/me/contacts` and `/me/contacts/` both normalize to the home; anything
/// else is returned unchanged.
pub fn normalize_dir(path: &str) -> String {
    if path.ends_with('/') { path.to_string() } else { format!("{}/", path) }
}

fn home_segments(path: &str) -> Result<Vec<&str>, PathError> {
    if path == &HOME_PATH[..HOME_PATH.len() - 1] {
        return Ok(Vec::new());
    }
    let rest = path
        .strip_prefix(HOME_PATH)
        .ok_or_else(|| PathError::OutsideHome(path.to_string()))?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    Ok(rest.split('/').collect())
}

fn parse_segment(segment: &str) -> Result<u64, PathError> {
    if !NUMERIC_SEGMENT.is_match(segment) {
        return Err(PathError::InvalidSegment(segment.to_string()));
    }
    segment.parse::<u64>().map_err(|_| PathError::InvalidSegment(segment.to_string()))
}
