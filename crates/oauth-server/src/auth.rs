//! Resource owner authentication
//!
//! The server sits behind an authenticating reverse proxy which passes the
//! signed-in username in a trusted header (`session.user_header`). Clients
//! authenticate with bearer tokens.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::AppState;

/// Extracts the value of an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// The signed-in resource owner.
///
/// Visitors without a session are sent to the configured login URL, or get a
/// 401. Unsafe requests coming from another origin are refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if !is_same_origin(parts, &state.public_url) {
            tracing::warn!("Refused cross-origin {} {}", parts.method, parts.uri.path());
            return Err((StatusCode::FORBIDDEN, "cross-origin request refused").into_response());
        }

        let username = parts
            .headers
            .get(state.config.session.user_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();

        if let Some(user) = state.config.find_username(username) {
            return Ok(Self {
                id: user.id,
                username: user.username.clone(),
            });
        }

        if !username.is_empty() {
            tracing::warn!("Unknown user {:?} in session header", username);
        }
        Err(login_required(parts, state.config.session.login_url.as_deref()))
    }
}

fn is_same_origin(parts: &Parts, public_url: &str) -> bool {
    if matches!(parts.method, Method::GET | Method::HEAD) {
        return true;
    }
    let Some(origin) = parts.headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return true;
    };

    match (Url::parse(origin), Url::parse(public_url)) {
        (Ok(origin), Ok(public)) => origin.origin() == public.origin(),
        _ => false,
    }
}

fn login_required(parts: &Parts, login_url: Option<&str>) -> Response {
    let Some(login_url) = login_url else {
        return (StatusCode::UNAUTHORIZED, "authentication required").into_response();
    };

    let target = Url::parse(login_url).map(|mut url| {
        let return_to = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        url.query_pairs_mut().append_pair("return_to", return_to);
        url
    });

    match target
        .ok()
        .and_then(|url| HeaderValue::from_str(url.as_str()).ok())
    {
        Some(location) => (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response(),
        None => {
            tracing::error!("Invalid login URL: {:?}", login_url);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(method: Method, uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  abc "));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_same_origin() {
        let public = "https://auth.example.net";
        assert!(is_same_origin(&parts(Method::GET, "/device", &[("origin", "https://evil.test")]), public));
        assert!(is_same_origin(&parts(Method::POST, "/device", &[]), public));
        assert!(is_same_origin(
            &parts(Method::POST, "/device", &[("origin", "https://auth.example.net")]),
            public
        ));
        assert!(!is_same_origin(
            &parts(Method::POST, "/device", &[("origin", "https://evil.test")]),
            public
        ));
        assert!(!is_same_origin(&parts(Method::POST, "/device", &[("origin", "null")]), public));
    }

    #[test]
    fn test_login_required() {
        let response = login_required(&parts(Method::GET, "/device?user_code=BCDF", &[]), None);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = login_required(
            &parts(Method::GET, "/device?user_code=BCDF", &[]),
            Some("https://example.net/login"),
        );
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = Url::parse(response.headers()[header::LOCATION].to_str().unwrap()).unwrap();
        assert_eq!(location.path(), "/login");
        assert_eq!(
            location.query_pairs().next().unwrap().1,
            "/device?user_code=BCDF"
        );
    }
}
