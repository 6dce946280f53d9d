//! OAuth error responses
//!
//! Implements the error taxonomy of
//! - RFC 6749 Section 4.1.2.1 (authorization errors, sent by redirection)
//! - RFC 6749 Section 5.2 (token endpoint errors)
//! - RFC 7591 Section 3.2.2 (registration errors)
//! - RFC 8628 Section 3.5 (device polling errors)

use std::fmt;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use url::Url;

/// The closed set of error names this server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AccessDenied,
    InvalidClient,
    InvalidClientMetadata,
    InvalidGrant,
    InvalidRedirectUri,
    InvalidRequest,
    InvalidScope,
    ServerError,
    UnauthorizedClient,
    AuthorizationPending,
    SlowDown,
    ExpiredToken,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::InvalidClient => "invalid_client",
            Self::InvalidClientMetadata => "invalid_client_metadata",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidRedirectUri => "invalid_redirect_uri",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::ExpiredToken => "expired_token",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            Self::InvalidClient => StatusCode::UNAUTHORIZED,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// An OAuth error, rendered as JSON or appended to a redirect URI.
///
/// Two errors are equal when they share the same name.
#[derive(Debug)]
pub struct OAuthError {
    kind: ErrorKind,
    status: Option<StatusCode>,
    description: Option<String>,
    source: Option<anyhow::Error>,
}

impl OAuthError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            status: None,
            description: None,
            source: None,
        }
    }

    pub fn access_denied() -> Self {
        Self::new(ErrorKind::AccessDenied)
    }

    pub fn invalid_client() -> Self {
        Self::new(ErrorKind::InvalidClient)
    }

    pub fn invalid_client_metadata() -> Self {
        Self::new(ErrorKind::InvalidClientMetadata)
    }

    pub fn invalid_grant() -> Self {
        Self::new(ErrorKind::InvalidGrant)
    }

    pub fn invalid_redirect_uri() -> Self {
        Self::new(ErrorKind::InvalidRedirectUri)
    }

    pub fn invalid_request() -> Self {
        Self::new(ErrorKind::InvalidRequest)
    }

    pub fn invalid_scope() -> Self {
        Self::new(ErrorKind::InvalidScope)
    }

    pub fn server_error() -> Self {
        Self::new(ErrorKind::ServerError)
    }

    pub fn unauthorized_client() -> Self {
        Self::new(ErrorKind::UnauthorizedClient)
    }

    pub fn authorization_pending() -> Self {
        Self::new(ErrorKind::AuthorizationPending)
    }

    pub fn slow_down() -> Self {
        Self::new(ErrorKind::SlowDown)
    }

    pub fn expired_token() -> Self {
        Self::new(ErrorKind::ExpiredToken)
    }

    /// Internal failure. The cause is logged, never sent to the client.
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::server_error().with_source(err)
    }

    /// Sets the text rendered as "error_description".
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches a cause that is logged with the error.
    pub fn with_source(mut self, err: impl Into<anyhow::Error>) -> Self {
        self.source = Some(err.into());
        self
    }

    /// Overrides the HTTP status of this error.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or_else(|| self.kind.status())
    }

    fn log(&self) {
        let source = self.source.as_ref().map(|e| format!("{:#}", e));
        if self.status().is_server_error() {
            tracing::error!(name = self.name(), err = source.as_deref(), "oauth");
        } else {
            tracing::warn!(name = self.name(), err = source.as_deref(), "oauth");
        }
    }

    fn body(&self) -> ErrorBody<'_> {
        ErrorBody {
            error: self.name(),
            error_description: self.description(),
        }
    }

    /// Builds the 302 response that carries this error back to the client's
    /// (already verified) redirect URI.
    pub fn redirect(&self, redirect_uri: &Url, state: Option<&str>) -> Response {
        self.log();

        let mut target = redirect_uri.clone();
        {
            let mut query = target.query_pairs_mut();
            query.append_pair("error", self.name());
            if let Some(description) = self.description() {
                query.append_pair("error_description", description);
            }
            if let Some(state) = state.filter(|s| !s.is_empty()) {
                query.append_pair("state", state);
            }
        }

        found(&target)
    }
}

/// A 302 response to `target`.
pub fn found(target: &Url) -> Response {
    match HeaderValue::from_str(target.as_str()) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<&'a str>,
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        if let Some(description) = &self.description {
            write!(f, " ({})", description)?;
        }
        Ok(())
    }
}

impl std::error::Error for OAuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| {
            let err: &(dyn std::error::Error + 'static) = e.as_ref();
            err
        })
    }
}

impl PartialEq for OAuthError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for OAuthError {}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        self.log();

        let mut response = (self.status(), Json(self.body())).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        if self.status() == StatusCode::UNAUTHORIZED {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// A validation failure on a single request field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn required(field: &'static str) -> Self {
        Self::new(field, "field is required")
    }

    /// Converts the failure into an OAuth error of the given kind.
    pub fn into_oauth(self, kind: ErrorKind) -> OAuthError {
        OAuthError::new(kind).with_description(self.to_string())
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error on field \"{}\": {}", self.field, self.message)
    }
}

impl From<FieldError> for OAuthError {
    fn from(err: FieldError) -> Self {
        err.into_oauth(ErrorKind::InvalidRequest)
    }
}
