//! Authorization Code grant with PKCE
//!
//! Authorization codes are stateless: the whole request is serialized, sealed
//! with the authorization code key and handed to the client. Redeeming a code
//! opens it, checks the PKCE verifier (S256 only) and its expiry.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use url::Url;

use crate::auth::CurrentUser;
use crate::crypto::{CryptoError, Envelope};
use crate::storage::{StorageError, Token};
use crate::{html, AppState};

use super::clients::load_client;
use super::error::{found, ErrorKind, FieldError, OAuthError};
use super::extract::{is_checked, required, OAuthForm};
use super::scope::parse_scopes;
use super::token::{is_revoked, TokenResponse};
use super::GRANT_TYPE_AUTH_CODE;

/// Lifetime of an authorization code
pub const CODE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Error)]
pub enum CodeError {
    #[error("code cannot be opened: {0}")]
    Crypto(#[from] CryptoError),

    #[error("code payload is not valid: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("challenge is not valid")]
    InvalidChallenge,

    #[error("request has expired")]
    Expired,
}

/// The content of an authorization code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthCodeRequest {
    #[serde(rename = "c")]
    pub client_id: String,
    /// ID of the token this code will be exchanged for
    #[serde(rename = "t")]
    pub token_id: String,
    #[serde(rename = "s")]
    pub scopes: Vec<String>,
    /// base64url(SHA-256(code_verifier)), unpadded
    #[serde(rename = "p")]
    pub challenge: String,
    #[serde(rename = "u")]
    pub user_id: i64,
    #[serde(rename = "e", with = "chrono::serde::ts_seconds")]
    pub expires: DateTime<Utc>,
}

impl AuthCodeRequest {
    pub fn new(client_id: &str, user_id: i64, mut scopes: Vec<String>, challenge: &str) -> Self {
        scopes.sort();
        scopes.dedup();

        Self {
            client_id: client_id.to_string(),
            token_id: uuid::Uuid::new_v4().to_string(),
            scopes,
            challenge: challenge.to_string(),
            user_id,
            expires: Utc::now() + Duration::minutes(CODE_TTL_MINUTES),
        }
    }

    /// Seals the request into an opaque code.
    pub fn issue(&self, envelope: &Envelope) -> Result<String, CodeError> {
        let payload = serde_json::to_vec(self)?;
        Ok(envelope.seal_to_string(&payload)?)
    }

    /// Opens a code and checks it against the PKCE `verifier`.
    pub fn redeem(envelope: &Envelope, code: &str, verifier: &str) -> Result<Self, CodeError> {
        let payload = envelope.open_str(code)?;
        let request: Self = serde_json::from_slice(&payload)?;

        if !verify_challenge(&request.challenge, verifier) {
            return Err(CodeError::InvalidChallenge);
        }
        if Utc::now() > request.expires {
            return Err(CodeError::Expired);
        }

        Ok(request)
    }
}

/// Computes the S256 challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn verify_challenge(challenge: &str, verifier: &str) -> bool {
    let Ok(expected) = URL_SAFE_NO_PAD.decode(challenge) else {
        return false;
    };
    let digest = Sha256::digest(verifier.as_bytes());
    expected.as_slice().ct_eq(digest.as_slice()).into()
}

/// Authorization request parameters
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

/// Consent form posted back to `/authorize`
#[derive(Debug, Default, Deserialize)]
pub struct ConsentForm {
    #[serde(default)]
    pub granted: Option<String>,
}

/// A request that passed validation
struct ValidRequest {
    scopes: Vec<String>,
    challenge: String,
}

impl AuthorizeParams {
    fn validate(&self, state: &AppState) -> Result<ValidRequest, OAuthError> {
        let scopes = parse_scopes(self.scope.as_deref(), &state.config)
            .map_err(|err| err.into_oauth(ErrorKind::InvalidScope))?;

        let response_type = self.response_type.as_deref().unwrap_or("code").trim();
        if response_type != "code" {
            return Err(FieldError::new(
                "response_type",
                format!("\"{}\" is not one of the possible choices", response_type),
            )
            .into());
        }

        let challenge = required("code_challenge", self.code_challenge.as_deref())?;

        let method = required(
            "code_challenge_method",
            self.code_challenge_method.as_deref(),
        )?;
        if method != "S256" {
            return Err(FieldError::new(
                "code_challenge_method",
                format!("\"{}\" is not one of the possible choices", method),
            )
            .into());
        }

        Ok(ValidRequest { scopes, challenge })
    }
}

/// Handler for `GET /authorize`: shows the consent page
pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    authorize(&state, &user, &params, None)
}

/// Handler for `POST /authorize`: applies the resource owner's decision
pub async fn post_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<AuthorizeParams>,
    OAuthForm(form): OAuthForm<ConsentForm>,
) -> Response {
    authorize(&state, &user, &params, Some(is_checked(form.granted.as_deref())))
}

fn authorize(
    state: &AppState,
    user: &CurrentUser,
    params: &AuthorizeParams,
    decision: Option<bool>,
) -> Response {
    let client_id = params.client_id.as_deref().unwrap_or_default().trim();
    if client_id.is_empty() {
        return OAuthError::invalid_client().into_response();
    }
    let Some(client) = state.storage.get_client(client_id) else {
        return OAuthError::invalid_client().into_response();
    };

    // The redirect URI is checked first. Until it is known to be registered,
    // nothing may be sent to it.
    let redirect_uri = params.redirect_uri.as_deref().unwrap_or_default().trim();
    let redirect = match Url::parse(redirect_uri) {
        Ok(url) if client.redirect_uris.iter().any(|u| u == redirect_uri) => url,
        _ => {
            tracing::warn!(
                "Rejected authorization for client {} with unregistered redirect URI {:?}",
                client.id,
                redirect_uri
            );
            return (StatusCode::BAD_REQUEST, "invalid redirect URI").into_response();
        }
    };
    let client_state = params.state.as_deref().map(str::trim);

    if !client.supports_grant(GRANT_TYPE_AUTH_CODE) {
        return OAuthError::unauthorized_client().redirect(&redirect, client_state);
    }

    let request = match params.validate(state) {
        Ok(request) => request,
        Err(err) => return err.redirect(&redirect, client_state),
    };

    let mut response = match decision {
        None => {
            let origin = format!(
                "{}://{}",
                redirect.scheme(),
                redirect.host_str().unwrap_or_default()
            );
            let scopes = state.config.scope_details(&request.scopes);
            Html(html::authorize_page(&client, &user.username, &origin, &scopes)).into_response()
        }
        Some(false) => OAuthError::access_denied()
            .with_description("access denied")
            .redirect(&redirect, client_state),
        Some(true) => {
            let code = AuthCodeRequest::new(&client.id, user.id, request.scopes, &request.challenge);
            match code.issue(&state.keys.auth_code) {
                Ok(code) => {
                    tracing::info!(
                        "Issued authorization code for client {} to user {}",
                        client.id,
                        user.username
                    );
                    let mut target = redirect.clone();
                    {
                        let mut query = target.query_pairs_mut();
                        query.append_pair("code", &code);
                        if let Some(client_state) = client_state.filter(|s| !s.is_empty()) {
                            query.append_pair("state", client_state);
                        }
                    }
                    found(&target)
                }
                Err(err) => OAuthError::internal(err).redirect(&redirect, client_state),
            }
        }
    };

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Exchanges an authorization code for an access token.
///
/// A replayed code yields the token it already produced, as long as that
/// token is alive. A code whose token was revoked is refused.
pub fn exchange(
    state: &AppState,
    code: &str,
    verifier: &str,
    client_id: Option<&str>,
) -> Result<TokenResponse, OAuthError> {
    let request = AuthCodeRequest::redeem(&state.keys.auth_code, code, verifier).map_err(|err| {
        OAuthError::invalid_grant()
            .with_description("code is not valid")
            .with_source(err)
    })?;

    if client_id.is_some_and(|id| id != request.client_id) {
        return Err(OAuthError::invalid_grant().with_description("code is not valid"));
    }
    if is_revoked(state, &request.token_id) {
        return Err(OAuthError::invalid_grant().with_description("code is not valid"));
    }

    let user = state
        .config
        .find_user(request.user_id)
        .ok_or_else(|| OAuthError::invalid_grant().with_description("user not found"))?;

    let client = load_client(state, &request.client_id, GRANT_TYPE_AUTH_CODE)?;

    if let Some(token) = state.storage.get_token(&request.token_id) {
        tracing::warn!("Authorization code for token {} was replayed", token.id);
        return TokenResponse::new(state, &token);
    }

    let token = Token {
        id: request.token_id,
        user_id: user.id,
        client_id: Some(client.id.clone()),
        application: client.name.clone(),
        scopes: request.scopes,
        created_at: Utc::now(),
    };
    let token = match state.storage.create_token(token) {
        Ok(token) => token,
        Err(StorageError::AlreadyExists(id)) => state.storage.get_token(&id).ok_or_else(|| {
            OAuthError::invalid_grant().with_description("code is not valid")
        })?,
        Err(err) => {
            return Err(OAuthError::internal(err).with_description("can't create token"));
        }
    };

    tracing::info!("Issued token {} to client {}", token.id, client.id);
    TokenResponse::new(state, &token)
}
