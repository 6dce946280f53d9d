//! Token endpoint and token revocation
//!
//! Handles:
//! - Authorization code exchange (with PKCE verification)
//! - Device code polling (RFC 8628)
//! - Token revocation (RFC 7009 style, bearer authenticated)

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::bearer_token;
use crate::storage::Token;
use crate::AppState;

use super::authorize::{self, CODE_TTL_MINUTES};
use super::device;
use super::error::{FieldError, OAuthError};
use super::extract::{authenticate_client, required, OAuthForm};
use super::{GRANT_TYPE_AUTH_CODE, GRANT_TYPE_DEVICE_CODE};

/// Token request (form-encoded)
#[derive(Debug, Default, Deserialize)]
pub struct TokenForm {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub device_code: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// A token request, resolved by grant type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode {
        code: String,
        code_verifier: String,
        client_id: Option<String>,
    },
    DeviceCode {
        device_code: String,
        client_id: String,
    },
}

impl TryFrom<TokenForm> for Grant {
    type Error = FieldError;

    fn try_from(form: TokenForm) -> Result<Self, Self::Error> {
        let grant_type = required("grant_type", form.grant_type.as_deref())?;
        let client_id = form
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        match grant_type.as_str() {
            GRANT_TYPE_AUTH_CODE => Ok(Self::AuthorizationCode {
                code: required("code", form.code.as_deref())?,
                code_verifier: required("code_verifier", form.code_verifier.as_deref())?,
                client_id,
            }),
            GRANT_TYPE_DEVICE_CODE => Ok(Self::DeviceCode {
                device_code: required("device_code", form.device_code.as_deref())?,
                client_id: client_id.ok_or_else(|| FieldError::required("client_id"))?,
            }),
            other => Err(FieldError::new(
                "grant_type",
                format!("\"{}\" is not one of the possible choices", other),
            )),
        }
    }
}

/// Successful token response
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub id: String,
    pub access_token: String,
    pub token_type: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

impl TokenResponse {
    pub fn new(state: &AppState, token: &Token) -> Result<Self, OAuthError> {
        let access_token = state
            .keys
            .access_token
            .seal_to_string(token.id.as_bytes())
            .map_err(|err| OAuthError::internal(err).with_description("can't encode token"))?;

        Ok(Self {
            id: token.id.clone(),
            access_token,
            token_type: "Bearer",
            scope: token.scopes.join(" "),
        })
    }
}

impl IntoResponse for TokenResponse {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::CREATED, Json(self)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        response
    }
}

/// Handler for `POST /oauth/token`
pub async fn handler(
    State(state): State<Arc<AppState>>,
    OAuthForm(form): OAuthForm<TokenForm>,
) -> Result<TokenResponse, OAuthError> {
    match Grant::try_from(form)? {
        Grant::AuthorizationCode {
            code,
            code_verifier,
            client_id,
        } => authorize::exchange(&state, &code, &code_verifier, client_id.as_deref()),
        Grant::DeviceCode {
            device_code,
            client_id,
        } => device::poll(&state, &device_code, &client_id).await,
    }
}

fn revoked_key(token_id: &str) -> String {
    format!("oauth:revoked-token:{}", token_id)
}

/// Whether `token_id` was revoked recently enough that an authorization code
/// for it could still be alive.
pub fn is_revoked(state: &AppState, token_id: &str) -> bool {
    state.kv.get(&revoked_key(token_id)).is_some()
}

/// Deletes a token and remembers the revocation for the lifetime of an
/// authorization code.
pub fn revoke_token(state: &AppState, token_id: &str) -> Result<bool, OAuthError> {
    let removed = state
        .storage
        .revoke_token(token_id)
        .map_err(OAuthError::internal)?;

    state.kv.set(
        &revoked_key(token_id),
        "1".to_string(),
        Duration::from_secs(CODE_TTL_MINUTES as u64 * 60),
    );

    if removed {
        tracing::info!("Revoked token {}", token_id);
    }
    Ok(removed)
}

/// Revocation request (form-encoded)
#[derive(Debug, Default, Deserialize)]
pub struct RevokeForm {
    #[serde(default)]
    pub token: Option<String>,
}

/// Handler for `POST /oauth/revoke`
///
/// The caller authenticates with either the access token being revoked, or
/// the registration access token of the client that owns it.
pub async fn revoke_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    OAuthForm(form): OAuthForm<RevokeForm>,
) -> Result<Json<serde_json::Value>, OAuthError> {
    let unauthorized = || OAuthError::access_denied().with_status(StatusCode::UNAUTHORIZED);

    let bearer = bearer_token(&headers).ok_or_else(unauthorized)?;
    let target = required("token", form.token.as_deref())?;
    let target_id = state.keys.access_token.open_text(&target).ok();

    if let Ok(caller_id) = state.keys.access_token.open_text(bearer) {
        // A dead token cannot authenticate, not even to revoke itself.
        if state.storage.get_token(&caller_id).is_none() {
            return Err(unauthorized());
        }
        if target_id.as_deref() != Some(caller_id.as_str()) {
            return Err(OAuthError::access_denied());
        }
        revoke_token(&state, &caller_id)?;
        return Ok(Json(serde_json::json!({})));
    }

    let client = authenticate_client(&state, bearer).ok_or_else(unauthorized)?;

    let Some(token) = target_id.and_then(|id| state.storage.get_token(&id)) else {
        return Ok(Json(serde_json::json!({})));
    };
    if token.client_id.as_deref() != Some(client.id.as_str()) {
        return Err(OAuthError::access_denied());
    }

    revoke_token(&state, &token.id)?;
    Ok(Json(serde_json::json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> TokenForm {
        let mut form = TokenForm::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "grant_type" => form.grant_type = value,
                "code" => form.code = value,
                "code_verifier" => form.code_verifier = value,
                "device_code" => form.device_code = value,
                "client_id" => form.client_id = value,
                _ => unreachable!(),
            }
        }
        form
    }

    #[test]
    fn test_auth_code_grant() {
        let grant = Grant::try_from(form(&[
            ("grant_type", "authorization_code"),
            ("code", "abc"),
            ("code_verifier", "xyz"),
        ]))
        .unwrap();
        assert_eq!(
            grant,
            Grant::AuthorizationCode {
                code: "abc".to_string(),
                code_verifier: "xyz".to_string(),
                client_id: None,
            }
        );
    }

    #[test]
    fn test_device_code_grant() {
        let grant = Grant::try_from(form(&[
            ("grant_type", GRANT_TYPE_DEVICE_CODE),
            ("device_code", "abc"),
            ("client_id", "c1"),
        ]))
        .unwrap();
        assert_eq!(
            grant,
            Grant::DeviceCode {
                device_code: "abc".to_string(),
                client_id: "c1".to_string(),
            }
        );
    }

    #[test]
    fn test_fields_required_by_grant_type() {
        // The device code fields are not needed for an authorization code
        let err = Grant::try_from(form(&[("grant_type", "authorization_code"), ("code", "abc")]))
            .unwrap_err();
        assert_eq!(err, FieldError::required("code_verifier"));

        let err = Grant::try_from(form(&[
            ("grant_type", GRANT_TYPE_DEVICE_CODE),
            ("device_code", "abc"),
        ]))
        .unwrap_err();
        assert_eq!(err, FieldError::required("client_id"));

        let err = Grant::try_from(form(&[])).unwrap_err();
        assert_eq!(err, FieldError::required("grant_type"));
    }

    #[test]
    fn test_unknown_grant_type() {
        let err = Grant::try_from(form(&[("grant_type", "refresh_token")])).unwrap_err();
        assert_eq!(err.field, "grant_type");

        let err: OAuthError = err.into();
        assert_eq!(err, OAuthError::invalid_request());
    }
}
