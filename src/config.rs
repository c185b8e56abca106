//! Startup configuration, read once from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::ident::PathLayout;
use crate::identity::{CacheConfig, CredentialKey, Identity};
use crate::upstream::TiimeConfig;

pub const DEFAULT_ADDR: &str = "0.0.0.0:1234";
pub const DEFAULT_REALM: &str = "Tiime";

/// Where upstream credentials come from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Forward whatever the client presents in `Authorization`.
    Presented,
    /// Single-tenant deployments: one configured service account.
    ServiceAccount(CredentialKey),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    pub realm: String,
    pub layout: PathLayout,
    pub credentials: CredentialSource,
    pub cache: CacheConfig,
    pub upstream: TiimeConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let addr: SocketAddr = var("TIIME_CARDDAV_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse()
            .context("TIIME_CARDDAV_ADDR is not a socket address")?;
        let realm = var("TIIME_CARDDAV_REALM").unwrap_or_else(|| DEFAULT_REALM.to_string());

        let layout_name = var("TIIME_CARDDAV_LAYOUT").unwrap_or_else(|| "nested".to_string());
        let (layout, credentials) = match layout_name.to_ascii_lowercase().as_str() {
            "nested" => (PathLayout::Nested, CredentialSource::Presented),
            "multi" => (PathLayout::MultiTenant, CredentialSource::Presented),
            "single" => {
                let email = var("TIIME_EMAIL").ok_or_else(|| anyhow!("TIIME_EMAIL is required for the single layout"))?;
                let password =
                    var("TIIME_PASSWORD").ok_or_else(|| anyhow!("TIIME_PASSWORD is required for the single layout"))?;
                let org_raw =
                    var("TIIME_COMPANY_ID").ok_or_else(|| anyhow!("TIIME_COMPANY_ID is required for the single layout"))?;
                let org_id: u64 = org_raw.parse().with_context(|| format!("TIIME_COMPANY_ID {:?} is not an id", org_raw))?;
                let key = CredentialKey::for_identity(&Identity::new(email, password));
                (PathLayout::SingleTenant { org_id }, CredentialSource::ServiceAccount(key))
            }
            other => bail!("unknown TIIME_CARDDAV_LAYOUT {:?} (expected nested, multi or single)", other),
        };

        let background_renewal = match var("TIIME_CARDDAV_RENEWAL").as_deref() {
            None | Some("background") => true,
            Some("on-use") => false,
            Some(other) => bail!("unknown TIIME_CARDDAV_RENEWAL {:?} (expected background or on-use)", other),
        };
        let cache = CacheConfig {
            background_renewal,
            renewal_interval: secs(&var, "TIIME_CARDDAV_RENEWAL_INTERVAL_SECS", 300)?,
            upstream_timeout: secs(&var, "TIIME_CARDDAV_UPSTREAM_TIMEOUT_SECS", 30)?,
        };

        let client_id = var("TIIME_AUTH_CLIENT_ID").ok_or_else(|| anyhow!("TIIME_AUTH_CLIENT_ID is required"))?;
        let mut upstream = TiimeConfig::new(client_id);
        if let Some(v) = var("TIIME_API_URL") { upstream.api_url = v; }
        if let Some(v) = var("TIIME_AUTH_URL") { upstream.auth_url = v; }
        if let Some(v) = var("TIIME_AUTH_AUDIENCE") { upstream.audience = v; }
        if let Some(v) = var("TIIME_AUTH_REALM") { upstream.auth_realm = v; }

        Ok(Self { addr, realm, layout, credentials, cache, upstream })
    }
}

fn secs(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    let n = match var(key) {
        Some(v) => v.parse::<u64>().with_context(|| format!("{} {:?} is not a number of seconds", key, v))?,
        None => default,
    };
    if n == 0 {
        bail!("{} must be positive", key);
    }
    Ok(Duration::from_secs(n))
}
