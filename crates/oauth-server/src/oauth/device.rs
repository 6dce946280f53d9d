//! Device Authorization grant (RFC 8628)
//!
//! A device asks for a code pair. The user code is typed by a person on the
//! verification page, the device code (the user code sealed with the device
//! code key) is what the device polls the token endpoint with.
//!
//! The request state lives in the expiring store under the user code:
//! `pending` until the person decides, then `granted` or `denied`. When the
//! entry is gone, the request has expired.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::crypto::{CryptoError, Envelope};
use crate::html::{self, DeviceStep};
use crate::kv::{self, ExpiringStore, KvError};
use crate::storage::Token;
use crate::AppState;

use super::clients::load_client;
use super::error::{ErrorKind, OAuthError};
use super::extract::{is_checked, required, OAuthForm};
use super::scope::parse_scopes;
use super::token::TokenResponse;
use super::GRANT_TYPE_DEVICE_CODE;

const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";
const USER_CODE_LEN: usize = 8;

/// Lifetime of a device authorization request, in seconds
pub const DEVICE_CODE_TTL: i64 = 300;

/// Minimum polling interval, in seconds
pub const DEVICE_CODE_INTERVAL: i64 = 5;

/// The code a person types on the verification page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserCode(String);

impl UserCode {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..USER_CODE_LEN)
            .map(|_| USER_CODE_ALPHABET[rng.random_range(0..USER_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parses user input. Lower case and dashes are accepted.
    pub fn parse(input: &str) -> Option<Self> {
        let code: String = input
            .trim()
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let valid = code.len() == USER_CODE_LEN
            && code.bytes().all(|b| USER_CODE_ALPHABET.contains(&b));
        valid.then_some(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The device code for this user code.
    pub fn to_device_code(&self, envelope: &Envelope) -> Result<String, CryptoError> {
        envelope.seal_to_string(self.0.as_bytes())
    }

    pub fn from_device_code(envelope: &Envelope, device_code: &str) -> Result<Self, CryptoError> {
        let code = envelope.open_text(device_code)?;
        Self::parse(&code).ok_or(CryptoError::InvalidData)
    }

    fn store_key(&self) -> String {
        format!("oauth:device-code:{}", self.0)
    }
}

impl fmt::Display for UserCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Granted,
    Denied,
}

/// State of a device authorization request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAuthorizationRequest {
    #[serde(rename = "c")]
    pub client_id: String,
    /// Set once granted
    #[serde(rename = "u")]
    pub user_id: Option<i64>,
    /// Set once a token was issued
    #[serde(rename = "t")]
    pub token_id: Option<String>,
    #[serde(rename = "e")]
    pub expires: DateTime<Utc>,
    #[serde(rename = "lc")]
    pub last_checked: DateTime<Utc>,
    #[serde(rename = "s")]
    pub status: Status,
    #[serde(rename = "sc")]
    pub scopes: Vec<String>,
}

impl DeviceAuthorizationRequest {
    pub fn new(client_id: &str, scopes: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            client_id: client_id.to_string(),
            user_id: None,
            token_id: None,
            expires: now + Duration::seconds(DEVICE_CODE_TTL),
            // The first poll is never early
            last_checked: now - Duration::seconds(DEVICE_CODE_INTERVAL),
            status: Status::Pending,
            scopes,
        }
    }

    /// Loads a live request. Expired requests are reported as missing.
    pub fn load(store: &dyn ExpiringStore, code: &UserCode) -> Result<Option<Self>, KvError> {
        let request: Option<Self> = kv::get_json(store, &code.store_key())?;
        Ok(request.filter(|r| r.expires > Utc::now()))
    }

    /// Saves the request for the rest of its lifetime.
    pub fn store(&self, store: &dyn ExpiringStore, code: &UserCode) -> Result<(), KvError> {
        let ttl = (self.expires - Utc::now()).to_std().unwrap_or_default();
        kv::set_json(store, &code.store_key(), self, ttl)
    }

    /// Whether a poll now would be faster than the allowed interval.
    pub fn is_polled_too_fast(&self, now: DateTime<Utc>) -> bool {
        now - self.last_checked < Duration::seconds(DEVICE_CODE_INTERVAL)
    }
}

/// Per user code locks around every update of a device authorization request.
///
/// They keep the decision of the resource owner from being overwritten by a
/// concurrent poll, and make a granted request yield at most one token however
/// many polls arrive together.
#[derive(Default)]
pub struct DeviceLocks {
    locks: Mutex<HashMap<UserCode, Weak<tokio::sync::Mutex<()>>>>,
}

impl DeviceLocks {
    pub fn get(&self, code: &UserCode) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(code).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(code.clone(), Arc::downgrade(&lock));
        lock
    }
}

/// Device authorization request (form-encoded)
#[derive(Debug, Default, Deserialize)]
pub struct DeviceForm {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Device authorization response (RFC 8628 Section 3.2)
#[derive(Debug, Serialize)]
pub struct DeviceAuthorizationResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub interval: i64,
}

/// Handler for `POST /oauth/device`
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    OAuthForm(form): OAuthForm<DeviceForm>,
) -> Result<Response, OAuthError> {
    let client_id = required("client_id", form.client_id.as_deref())?;
    let scopes = parse_scopes(form.scope.as_deref(), &state.config)
        .map_err(|err| err.into_oauth(ErrorKind::InvalidScope))?;

    let client = load_client(&state, &client_id, GRANT_TYPE_DEVICE_CODE)?;

    let code = UserCode::generate();
    let device_code = code
        .to_device_code(&state.keys.device_code)
        .map_err(OAuthError::internal)?;

    DeviceAuthorizationRequest::new(&client.id, scopes)
        .store(state.kv.as_ref(), &code)
        .map_err(OAuthError::internal)?;

    let verification_uri = format!("{}/device", state.public_url);
    let verification_uri_complete = complete_uri(&verification_uri, &code)
        .map_err(|err| OAuthError::internal(err).with_description("invalid public URL"))?;

    tracing::info!("Started device authorization {} for client {}", code, client.id);

    let mut response = Json(DeviceAuthorizationResponse {
        device_code,
        user_code: code.to_string(),
        verification_uri,
        verification_uri_complete: verification_uri_complete.to_string(),
        expires_in: DEVICE_CODE_TTL,
        interval: DEVICE_CODE_INTERVAL,
    })
    .into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// Polls a device authorization request from the token endpoint.
pub async fn poll(
    state: &AppState,
    device_code: &str,
    client_id: &str,
) -> Result<TokenResponse, OAuthError> {
    let client = load_client(state, client_id, GRANT_TYPE_DEVICE_CODE)?;

    let code = UserCode::from_device_code(&state.keys.device_code, device_code).map_err(|err| {
        OAuthError::invalid_grant()
            .with_description("device code is not valid")
            .with_source(err)
    })?;

    // Every read-modify-write of a request happens under its lock, so a poll
    // never writes back a stale copy over the resource owner's decision.
    let lock = state.device_locks.get(&code);
    let _guard = lock.lock().await;

    let Some(mut request) =
        DeviceAuthorizationRequest::load(state.kv.as_ref(), &code).map_err(OAuthError::internal)?
    else {
        return Err(OAuthError::expired_token());
    };

    if request.client_id != client.id {
        return Err(OAuthError::invalid_grant().with_description("device code is not valid"));
    }

    match request.status {
        Status::Pending => {
            let now = Utc::now();
            if request.is_polled_too_fast(now) {
                return Err(OAuthError::slow_down());
            }

            request.last_checked = now;
            request
                .store(state.kv.as_ref(), &code)
                .map_err(OAuthError::internal)?;
            Err(OAuthError::authorization_pending())
        }
        Status::Denied => Err(OAuthError::access_denied()),
        Status::Granted => {
            let token = match &request.token_id {
                Some(token_id) => state.storage.get_token(token_id).ok_or_else(|| {
                    OAuthError::invalid_grant().with_description("token was revoked")
                })?,
                None => {
                    let user_id = request.user_id.ok_or_else(|| {
                        OAuthError::internal(anyhow::anyhow!("granted request has no user"))
                    })?;
                    let user = state.config.find_user(user_id).ok_or_else(|| {
                        OAuthError::invalid_grant().with_description("user not found")
                    })?;

                    let token = state
                        .storage
                        .create_token(Token {
                            id: uuid::Uuid::new_v4().to_string(),
                            user_id: user.id,
                            client_id: Some(client.id.clone()),
                            application: client.name.clone(),
                            scopes: request.scopes.clone(),
                            created_at: Utc::now(),
                        })
                        .map_err(|err| {
                            OAuthError::internal(err).with_description("can't create token")
                        })?;

                    request.token_id = Some(token.id.clone());
                    request
                        .store(state.kv.as_ref(), &code)
                        .map_err(OAuthError::internal)?;

                    tracing::info!(
                        "Issued token {} to client {} for device authorization {}",
                        token.id,
                        client.id,
                        code
                    );
                    token
                }
            };

            TokenResponse::new(state, &token)
        }
    }
}

/// Verification page parameters, from the query string or the form
#[derive(Debug, Default, Deserialize)]
pub struct VerificationForm {
    #[serde(default)]
    pub user_code: Option<String>,
    #[serde(default)]
    pub granted: Option<String>,
}

/// Handler for `GET /device`
pub async fn page_get_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(form): Query<VerificationForm>,
) -> Response {
    verification_page(&state, &user, &form, false).await
}

/// Handler for `POST /device`
pub async fn page_post_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    OAuthForm(form): OAuthForm<VerificationForm>,
) -> Response {
    verification_page(&state, &user, &form, true).await
}

async fn verification_page(
    state: &AppState,
    user: &CurrentUser,
    form: &VerificationForm,
    is_post: bool,
) -> Response {
    let page_url = format!("{}/device", state.public_url);

    let input = form.user_code.as_deref().unwrap_or_default().trim();
    if input.is_empty() {
        return page(StatusCode::OK, DeviceStep::Code, &user.username, &page_url);
    }

    let Some(code) = UserCode::parse(input) else {
        return page(StatusCode::BAD_REQUEST, DeviceStep::Invalid, &user.username, &page_url);
    };

    // "granted" is ignored on GET, a link must never approve a request
    let decision = if is_post {
        form.granted.as_deref().map(|granted| is_checked(Some(granted)))
    } else {
        None
    };

    let lock = state.device_locks.get(&code);
    let _guard = match decision {
        Some(_) => Some(lock.lock().await),
        None => None,
    };

    let mut request = match DeviceAuthorizationRequest::load(state.kv.as_ref(), &code) {
        Ok(Some(request)) => request,
        Ok(None) => return page(StatusCode::BAD_REQUEST, DeviceStep::Invalid, &user.username, &page_url),
        Err(err) => return OAuthError::internal(err).into_response(),
    };

    match request.status {
        Status::Pending => {
            let client = match load_client(state, &request.client_id, GRANT_TYPE_DEVICE_CODE) {
                Ok(client) => client,
                Err(err) => return err.into_response(),
            };

            if let Some(granted) = decision {
                if granted {
                    request.status = Status::Granted;
                    request.user_id = Some(user.id);
                } else {
                    request.status = Status::Denied;
                }
                if let Err(err) = request.store(state.kv.as_ref(), &code) {
                    return OAuthError::internal(err).into_response();
                }

                tracing::info!(
                    "Device authorization {} {:?} by user {}",
                    code,
                    request.status,
                    user.username
                );

                return match complete_uri(&page_url, &code)
                    .ok()
                    .and_then(|location| HeaderValue::from_str(location.as_str()).ok())
                {
                    Some(location) => {
                        (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
                    }
                    None => OAuthError::internal(anyhow::anyhow!("invalid public URL"))
                        .into_response(),
                };
            }

            let scopes = state.config.scope_details(&request.scopes);
            page(
                StatusCode::OK,
                DeviceStep::Pending {
                    code: &code,
                    client: &client,
                    scopes: &scopes,
                },
                &user.username,
                &page_url,
            )
        }
        Status::Granted => {
            let mut response = page(StatusCode::OK, DeviceStep::Granted, &user.username, &page_url);
            if request.token_id.is_none() {
                // Refresh until the device picks up its token
                response
                    .headers_mut()
                    .insert("refresh", HeaderValue::from_static("6"));
            }
            response
        }
        Status::Denied => page(StatusCode::OK, DeviceStep::Denied, &user.username, &page_url),
    }
}

/// The verification page URL with the user code filled in.
fn complete_uri(page_url: &str, code: &UserCode) -> Result<url::Url, url::ParseError> {
    let mut url = url::Url::parse(page_url)?;
    url.query_pairs_mut().append_pair("user_code", code.as_str());
    Ok(url)
}

fn page(status: StatusCode, step: DeviceStep<'_>, username: &str, page_url: &str) -> Response {
    let mut response = (status, Html(html::device_page(step, username, page_url))).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keys;
    use crate::kv::MemoryStore;

    #[test]
    fn test_generate_user_code() {
        for _ in 0..100 {
            let code = UserCode::generate();
            assert_eq!(code.as_str().len(), USER_CODE_LEN);
            assert!(code.as_str().bytes().all(|b| USER_CODE_ALPHABET.contains(&b)));
            assert_eq!(UserCode::parse(code.as_str()), Some(code));
        }
    }

    #[test]
    fn test_parse_user_code() {
        let code = UserCode::parse("bcdf-ghjk").unwrap();
        assert_eq!(code.as_str(), "BCDFGHJK");
        assert_eq!(UserCode::parse(" BCDFGHJK "), Some(code));

        assert_eq!(UserCode::parse(""), None);
        assert_eq!(UserCode::parse("BCDFGHJ"), None);
        // Vowels are not in the alphabet
        assert_eq!(UserCode::parse("ABCDFGHJ"), None);
    }

    #[test]
    fn test_device_code_round_trip() {
        let keys = Keys::derive(&[3u8; 32]).unwrap();
        let code = UserCode::generate();

        let device_code = code.to_device_code(&keys.device_code).unwrap();
        assert_ne!(device_code, code.as_str());
        assert_eq!(
            UserCode::from_device_code(&keys.device_code, &device_code).unwrap(),
            code
        );
        assert!(UserCode::from_device_code(&keys.auth_code, &device_code).is_err());
        assert!(UserCode::from_device_code(&keys.device_code, "garbage").is_err());
    }

    #[test]
    fn test_store_and_load() {
        let store = MemoryStore::new();
        let code = UserCode::generate();
        let request = DeviceAuthorizationRequest::new("client", vec!["profile:read".to_string()]);

        assert_eq!(DeviceAuthorizationRequest::load(&store, &code).unwrap(), None);

        request.store(&store, &code).unwrap();
        let loaded = DeviceAuthorizationRequest::load(&store, &code).unwrap().unwrap();
        assert_eq!(loaded.status, Status::Pending);
        assert_eq!(loaded.client_id, "client");
        assert_eq!(loaded.user_id, None);
        assert_eq!(loaded.token_id, None);
    }

    #[test]
    fn test_expired_request_is_missing() {
        let store = MemoryStore::new();
        let code = UserCode::generate();
        let mut request = DeviceAuthorizationRequest::new("client", vec![]);
        request.expires = Utc::now() - Duration::seconds(1);

        request.store(&store, &code).unwrap();
        assert_eq!(DeviceAuthorizationRequest::load(&store, &code).unwrap(), None);
    }

    #[test]
    fn test_poll_interval() {
        let request = DeviceAuthorizationRequest::new("client", vec![]);
        let now = Utc::now();
        assert!(!request.is_polled_too_fast(now));

        let request = DeviceAuthorizationRequest {
            last_checked: now - Duration::seconds(2),
            ..request
        };
        assert!(request.is_polled_too_fast(now));
    }

    #[tokio::test]
    async fn test_device_locks_are_shared() {
        let locks = DeviceLocks::default();
        let code = UserCode::generate();

        let first = locks.get(&code);
        let second = locks.get(&code);
        assert!(Arc::ptr_eq(&first, &second));

        let _guard = first.lock().await;
        assert!(second.try_lock().is_err());
    }
}
