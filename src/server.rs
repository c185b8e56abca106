//!
//! tiime-carddav HTTP server
//! -------------------------
//! Axum-based CardDAV endpoint in front of the Tiime API.
//!
//! Responsibilities:
//! - Gatekeeping: every request must carry credentials the upstream accepts;
//!   the upstream session for those credentials is looked up or created in
//!   the shared [`SessionCache`].
//! - Dispatching authenticated requests to the read-only DAV handler.
//! - Startup logging and graceful shutdown of background renewal.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{debug, info};

use crate::config::{CredentialSource, GatewayConfig};
use crate::ident::PathLayout;
use crate::identity::{CredentialKey, SessionCache, SessionFactory, UpstreamSession};
use crate::upstream::TiimeFactory;

pub mod dav;
pub mod query;
pub mod xml;

/// Shared server state injected into the gatekeeper and the DAV handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: SessionCache,
    pub layout: PathLayout,
    pub realm: Arc<str>,
    pub credentials: CredentialSource,
}

impl AppState {
    pub fn new(cache: SessionCache, layout: PathLayout, realm: &str, credentials: CredentialSource) -> Self {
        Self { cache, layout, realm: Arc::from(realm), credentials }
    }
}

/// The upstream session attached to an authenticated request.
#[derive(Clone)]
pub struct Upstream(pub Arc<dyn UpstreamSession>);

/// `401` with a Basic challenge. Every authentication failure looks like this.
pub fn unauthorized(realm: &str) -> Response {
    let challenge = format!("Basic realm=\"{}\"", realm.replace('\\', "\\\\").replace('"', "\\\""));
    let mut resp = (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    if let Ok(v) = HeaderValue::from_str(&challenge) {
        resp.headers_mut().insert(header::WWW_AUTHENTICATE, v);
    }
    resp
}

/// Authenticate the request against the upstream and attach its session.
///
/// Missing credentials, malformed credentials, upstream rejection and
/// upstream unavailability are all answered with the same challenge.
pub async fn gatekeeper(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    info!(target: "http", method = %req.method(), uri = %req.uri(), "request");
    let key = match &state.credentials {
        CredentialSource::ServiceAccount(key) => key.clone(),
        CredentialSource::Presented => {
            let presented = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty());
            match presented {
                Some(raw) => CredentialKey::new(raw),
                None => return unauthorized(&state.realm),
            }
        }
    };
    match state.cache.get_or_create(&key).await {
        Ok(session) => {
            req.extensions_mut().insert(Upstream(session));
            next.run(req).await
        }
        Err(e) => {
            debug!(target: "http", code = e.code_str(), error = %e, "session acquisition failed");
            unauthorized(&state.realm)
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(dav::dispatch)
        .layer(middleware::from_fn_with_state(state.clone(), gatekeeper))
        .with_state(state)
}

/// Build the cache and router from `config` and serve until Ctrl-C.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let factory: Arc<dyn SessionFactory> = Arc::new(TiimeFactory::new(config.upstream.clone())?);
    run_with_factory(config, factory).await
}

pub async fn run_with_factory(config: GatewayConfig, factory: Arc<dyn SessionFactory>) -> anyhow::Result<()> {
    let cache = SessionCache::new(factory, config.cache.clone());
    let state = AppState::new(cache.clone(), config.layout, &config.realm, config.credentials.clone());
    let app = router(state);

    info!(
        target: "startup",
        "CardDAV server listening on {} (layout={:?}, realm={:?}, background_renewal={}, renewal_interval={:?})",
        config.addr, config.layout, config.realm, config.cache.background_renewal, config.cache.renewal_interval
    );
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target: "startup", "shutdown requested");
        })
        .await?;
    cache.shutdown();
    Ok(())
}
