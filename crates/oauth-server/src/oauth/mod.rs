//! OAuth 2 implementation
//!
//! Implements:
//! - RFC 8414: OAuth 2.0 Authorization Server Metadata
//! - RFC 7591/7592: Dynamic Client Registration and Management
//! - Authorization Code flow with mandatory PKCE (RFC 7636, S256 only)
//! - RFC 8628: Device Authorization Grant
//! - Token revocation

pub mod authorize;
pub mod clients;
pub mod device;
pub mod error;
pub mod extract;
pub mod metadata;
pub mod scope;
pub mod token;
pub mod validate;

pub use error::{ErrorKind, FieldError, OAuthError};

pub const GRANT_TYPE_AUTH_CODE: &str = "authorization_code";
pub const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
