//! Request extractors that fail with OAuth errors instead of axum's plain
//! text rejections

use std::sync::Arc;

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    Form, Json,
};
use serde::de::DeserializeOwned;

use crate::auth::bearer_token;
use crate::storage::Client;
use crate::AppState;

use super::error::{FieldError, OAuthError};

/// Form body. Rejections become `invalid_request`.
pub struct OAuthForm<T>(pub T);

impl<T, S> FromRequest<S> for OAuthForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = OAuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Form::<T>::from_request(req, state).await {
            Ok(Form(value)) => Ok(Self(value)),
            Err(rejection) => {
                Err(OAuthError::invalid_request().with_description(rejection.body_text()))
            }
        }
    }
}

/// JSON client metadata. Rejections become `invalid_client_metadata`.
pub struct MetadataJson<T>(pub T);

impl<T, S> FromRequest<S> for MetadataJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = OAuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(OAuthError::invalid_client_metadata()
                .with_description(rejection.body_text())),
        }
    }
}

/// The client whose registration access token was presented as Bearer.
pub struct AuthenticatedClient(pub Client);

impl FromRequestParts<Arc<AppState>> for AuthenticatedClient {
    type Rejection = OAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(OAuthError::invalid_client)?;
        authenticate_client(state, token)
            .map(Self)
            .ok_or_else(OAuthError::invalid_client)
    }
}

/// Resolves a registration access token to its client.
pub fn authenticate_client(state: &AppState, token: &str) -> Option<Client> {
    let client_id = state.keys.client_token.open_text(token).ok()?;
    state.storage.get_client(&client_id)
}

/// Reads an HTML checkbox style boolean.
pub fn is_checked(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "on" | "yes" | "t")
    )
}

/// Returns a trimmed, non-empty form value.
pub fn required(field: &'static str, value: Option<&str>) -> Result<String, FieldError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FieldError::required(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_checked() {
        assert!(is_checked(Some("1")));
        assert!(is_checked(Some("true")));
        assert!(is_checked(Some(" On ")));
        assert!(!is_checked(Some("0")));
        assert!(!is_checked(Some("false")));
        assert!(!is_checked(Some("")));
        assert!(!is_checked(None));
    }

    #[test]
    fn test_required() {
        assert_eq!(required("code", Some("  abc ")).unwrap(), "abc");
        assert_eq!(
            required("code", Some("   ")).unwrap_err(),
            FieldError::required("code")
        );
        assert!(required("code", None).is_err());
    }
}
