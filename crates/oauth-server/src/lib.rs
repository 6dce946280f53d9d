//! OAuth 2 authorization server
//!
//! Provides:
//! - RFC 8414 OAuth metadata discovery
//! - RFC 7591/7592 dynamic client registration and management
//! - Authorization code flow with PKCE
//! - Device authorization flow
//! - Token exchange and revocation

pub mod auth;
pub mod config;
pub mod crypto;
pub mod html;
pub mod kv;
pub mod oauth;
pub mod resolver;
pub mod storage;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::crypto::Keys;
use crate::kv::ExpiringStore;
use crate::oauth::device::DeviceLocks;
use crate::resolver::HostResolver;
use crate::storage::Storage;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
    pub keys: Keys,
    /// Device authorization requests and revocation markers
    pub kv: Arc<dyn ExpiringStore>,
    /// Resolves client URI hosts at registration
    pub resolver: Arc<dyn HostResolver>,
    /// Public URL of this service, without trailing slash
    pub public_url: String,
    pub device_locks: DeviceLocks,
}

impl AppState {
    pub fn new(
        config: Config,
        storage: Storage,
        kv: Arc<dyn ExpiringStore>,
        resolver: Arc<dyn HostResolver>,
        public_url: &str,
    ) -> anyhow::Result<Self> {
        let keys = config.keys()?;

        Ok(Self {
            config,
            storage,
            keys,
            kv,
            resolver,
            public_url: public_url.trim_end_matches('/').to_string(),
            device_locks: DeviceLocks::default(),
        })
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // OAuth metadata (RFC 8414)
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth::metadata::handler),
        )
        // Client registration and management (RFC 7591, RFC 7592)
        .route("/oauth/client", post(oauth::clients::create_handler))
        .route(
            "/oauth/client/{id}",
            get(oauth::clients::info_handler)
                .put(oauth::clients::update_handler)
                .delete(oauth::clients::delete_handler),
        )
        // Authorization endpoint
        .route(
            "/authorize",
            get(oauth::authorize::get_handler).post(oauth::authorize::post_handler),
        )
        // Device authorization (RFC 8628)
        .route("/oauth/device", post(oauth::device::create_handler))
        .route(
            "/device",
            get(oauth::device::page_get_handler).post(oauth::device::page_post_handler),
        )
        // Token endpoint
        .route("/oauth/token", post(oauth::token::handler))
        .route("/oauth/revoke", post(oauth::token::revoke_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
