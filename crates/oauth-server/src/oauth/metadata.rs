//! RFC 8414: OAuth 2.0 Authorization Server Metadata
//!
//! Provides the `/.well-known/oauth-authorization-server` endpoint that clients
//! use to discover OAuth endpoints and capabilities.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

use super::{GRANT_TYPE_AUTH_CODE, GRANT_TYPE_DEVICE_CODE};

/// OAuth 2.0 Authorization Server Metadata (RFC 8414)
#[derive(Debug, Serialize)]
pub struct AuthorizationServerMetadata {
    /// The authorization server's issuer identifier (URL)
    pub issuer: String,

    /// URL of the authorization endpoint
    pub authorization_endpoint: String,

    /// URL of the token endpoint
    pub token_endpoint: String,

    /// URL of the device authorization endpoint (RFC 8628)
    pub device_authorization_endpoint: String,

    /// URL of the dynamic client registration endpoint
    pub registration_endpoint: String,

    /// URL of the revocation endpoint
    pub revocation_endpoint: String,

    /// JSON array of OAuth 2.0 grant_type values supported
    pub grant_types_supported: Vec<&'static str>,

    /// JSON array of OAuth 2.0 response_type values supported
    pub response_types_supported: Vec<&'static str>,

    /// JSON array of scope values a client may request
    pub scopes_supported: Vec<String>,

    /// JSON array of PKCE code challenge methods supported
    pub code_challenge_methods_supported: Vec<&'static str>,

    /// JSON array of client authentication methods supported at token endpoint
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
}

/// Handler for `GET /.well-known/oauth-authorization-server`
pub async fn handler(State(state): State<Arc<AppState>>) -> Json<AuthorizationServerMetadata> {
    let base_url = &state.public_url;

    let metadata = AuthorizationServerMetadata {
        issuer: base_url.clone(),
        authorization_endpoint: format!("{}/authorize", base_url),
        token_endpoint: format!("{}/oauth/token", base_url),
        device_authorization_endpoint: format!("{}/oauth/device", base_url),
        registration_endpoint: format!("{}/oauth/client", base_url),
        revocation_endpoint: format!("{}/oauth/revoke", base_url),
        grant_types_supported: vec![GRANT_TYPE_AUTH_CODE, GRANT_TYPE_DEVICE_CODE],
        response_types_supported: vec!["code"],
        scopes_supported: state.config.scopes.iter().map(|s| s.name.clone()).collect(),
        code_challenge_methods_supported: vec!["S256"],
        token_endpoint_auth_methods_supported: vec!["none", "bearer"],
    };

    tracing::debug!("Serving authorization server metadata");
    Json(metadata)
}
