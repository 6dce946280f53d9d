//! Client registration and management
//!
//! - RFC 7591: OAuth 2.0 Dynamic Client Registration
//! - RFC 7592: OAuth 2.0 Dynamic Client Registration Management
//!
//! Clients are public. The registration access token handed back on creation
//! is the client ID sealed with the client token key; it is never stored.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::resolver::HostResolver;
use crate::storage::Client;
use crate::AppState;

use super::error::{ErrorKind, FieldError, OAuthError};
use super::extract::{AuthenticatedClient, MetadataJson};
use super::validate::{is_valid_client_uri, is_valid_logo_uri, is_valid_redirect_uri};
use super::{GRANT_TYPE_AUTH_CODE, GRANT_TYPE_DEVICE_CODE};

const SUPPORTED_GRANTS: [&str; 2] = [GRANT_TYPE_AUTH_CODE, GRANT_TYPE_DEVICE_CODE];

/// Client metadata, as sent on registration and update.
///
/// On update, absent or null fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientMetadata {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_uri: Option<String>,
    #[serde(default)]
    pub logo_uri: Option<String>,
    #[serde(default)]
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    #[serde(default)]
    pub software_id: Option<String>,
    #[serde(default)]
    pub software_version: Option<String>,
    /// Accepted and ignored, every client is public and uses `none`.
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    /// Accepted and ignored, always `["code"]`.
    #[serde(default)]
    pub response_types: Option<Vec<String>>,
}

/// Validated client fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFields {
    pub name: String,
    pub website: String,
    pub logo: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub software_id: String,
    pub software_version: String,
}

impl From<&Client> for ClientMetadata {
    fn from(client: &Client) -> Self {
        Self {
            client_id: Some(client.id.clone()),
            client_name: Some(client.name.clone()),
            client_uri: Some(client.website.clone()),
            logo_uri: Some(client.logo.clone()),
            redirect_uris: Some(client.redirect_uris.clone()),
            grant_types: Some(client.grant_types.clone()),
            software_id: Some(client.software_id.clone()),
            software_version: Some(client.software_version.clone()),
            token_endpoint_auth_method: None,
            response_types: None,
        }
    }
}

impl ClientMetadata {
    /// Overlays the fields present in `update`.
    pub fn merge(mut self, update: ClientMetadata) -> Self {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if update.$field.is_some() {
                    self.$field = update.$field;
                })*
            };
        }
        overlay!(
            client_id,
            client_name,
            client_uri,
            logo_uri,
            redirect_uris,
            grant_types,
            software_id,
            software_version,
            token_endpoint_auth_method,
            response_types
        );
        self
    }

    /// Validates the metadata. Redirect URI errors come first and map to
    /// `invalid_redirect_uri`; any other field maps to `invalid_client_metadata`.
    pub async fn validate(&self, resolver: &dyn HostResolver) -> Result<ClientFields, OAuthError> {
        let grant_types = self
            .grant_types()
            .map_err(|err| err.into_oauth(ErrorKind::InvalidClientMetadata))?;

        let redirect_uris = self
            .redirect_uris(&grant_types)
            .map_err(|err| err.into_oauth(ErrorKind::InvalidRedirectUri))?;

        self.fields(resolver, grant_types, redirect_uris)
            .await
            .map_err(|err| err.into_oauth(ErrorKind::InvalidClientMetadata))
    }

    fn grant_types(&self) -> Result<Vec<String>, FieldError> {
        let mut grant_types = match &self.grant_types {
            Some(values) if !values.is_empty() => values.clone(),
            _ => SUPPORTED_GRANTS.iter().map(|g| g.to_string()).collect(),
        };

        if let Some(unknown) = grant_types
            .iter()
            .find(|g| !SUPPORTED_GRANTS.contains(&g.as_str()))
        {
            return Err(FieldError::new(
                "grant_types",
                format!("\"{}\" is not one of the possible choices", unknown),
            ));
        }

        grant_types.sort();
        grant_types.dedup();
        Ok(grant_types)
    }

    fn redirect_uris(&self, grant_types: &[String]) -> Result<Vec<String>, FieldError> {
        let redirect_uris: Vec<String> = self
            .redirect_uris
            .iter()
            .flatten()
            .map(|u| u.trim().to_string())
            .collect();

        if redirect_uris.is_empty() && grant_types.iter().any(|g| g == GRANT_TYPE_AUTH_CODE) {
            return Err(FieldError::required("redirect_uris"));
        }
        if let Some(invalid) = redirect_uris.iter().find(|u| !is_valid_redirect_uri(u)) {
            return Err(FieldError::new(
                "redirect_uris",
                format!("\"{}\" is not a valid redirect URI", invalid),
            ));
        }

        Ok(redirect_uris)
    }

    async fn fields(
        &self,
        resolver: &dyn HostResolver,
        grant_types: Vec<String>,
        redirect_uris: Vec<String>,
    ) -> Result<ClientFields, FieldError> {
        let name = required_text("client_name", self.client_name.as_deref(), 128)?;

        let website = required_text("client_uri", self.client_uri.as_deref(), 256)?;
        if !is_valid_client_uri(&website, resolver).await {
            return Err(FieldError::new("client_uri", "invalid client URI"));
        }

        let logo = optional_text("logo_uri", self.logo_uri.as_deref(), 8 << 10)?;
        if !is_valid_logo_uri(&logo) {
            return Err(FieldError::new("logo_uri", "invalid logo URI"));
        }

        let software_id = required_text("software_id", self.software_id.as_deref(), 128)?;
        let software_version =
            required_text("software_version", self.software_version.as_deref(), 64)?;

        Ok(ClientFields {
            name,
            website,
            logo,
            redirect_uris,
            grant_types,
            software_id,
            software_version,
        })
    }
}

fn optional_text(field: &'static str, value: Option<&str>, max: usize) -> Result<String, FieldError> {
    let value = value.unwrap_or_default().trim();
    if value.chars().count() > max {
        return Err(FieldError::new(
            field,
            format!("text must contain at most {} characters", max),
        ));
    }
    Ok(value.to_string())
}

fn required_text(field: &'static str, value: Option<&str>, max: usize) -> Result<String, FieldError> {
    let value = optional_text(field, value, max)?;
    if value.is_empty() {
        return Err(FieldError::required(field));
    }
    Ok(value)
}

/// Client information response (RFC 7591 Section 3.2.1)
#[derive(Debug, Serialize)]
pub struct ClientResponse {
    pub client_id: String,
    pub client_id_issued_at: i64,
    pub registration_client_uri: String,
    pub registration_access_token: String,
    pub client_name: String,
    pub client_uri: String,
    pub logo_uri: String,
    pub redirect_uris: Vec<String>,
    pub software_id: String,
    pub software_version: String,
    pub token_endpoint_auth_method: &'static str,
    pub grant_types: Vec<String>,
    pub response_types: Vec<&'static str>,
}

impl ClientResponse {
    pub fn new(state: &AppState, client: &Client) -> Result<Self, OAuthError> {
        let registration_access_token = state
            .keys
            .client_token
            .seal_to_string(client.id.as_bytes())
            .map_err(OAuthError::internal)?;

        Ok(Self {
            client_id: client.id.clone(),
            client_id_issued_at: client.created_at.timestamp(),
            registration_client_uri: format!("{}/oauth/client/{}", state.public_url, client.id),
            registration_access_token,
            client_name: client.name.clone(),
            client_uri: client.website.clone(),
            logo_uri: client.logo.clone(),
            redirect_uris: client.redirect_uris.clone(),
            software_id: client.software_id.clone(),
            software_version: client.software_version.clone(),
            token_endpoint_auth_method: "none",
            grant_types: client.grant_types.clone(),
            response_types: vec!["code"],
        })
    }
}

/// Loads a client and checks that it registered for `grant_type`.
pub fn load_client(state: &AppState, client_id: &str, grant_type: &str) -> Result<Client, OAuthError> {
    let client = state
        .storage
        .get_client(client_id)
        .ok_or_else(|| OAuthError::invalid_client().with_description("client not found"))?;

    if !client.supports_grant(grant_type) {
        return Err(OAuthError::unauthorized_client()
            .with_description(format!("client is not allowed to use {}", grant_type)));
    }
    Ok(client)
}

/// Handler for `POST /oauth/client`
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    MetadataJson(metadata): MetadataJson<ClientMetadata>,
) -> Result<Response, OAuthError> {
    tracing::info!(
        "Client registration request: name={:?}, redirect_uris={:?}",
        metadata.client_name,
        metadata.redirect_uris
    );

    let fields = metadata.validate(state.resolver.as_ref()).await?;

    let client = Client {
        id: uuid::Uuid::new_v4().to_string(),
        name: fields.name,
        website: fields.website,
        logo: fields.logo,
        redirect_uris: fields.redirect_uris,
        grant_types: fields.grant_types,
        software_id: fields.software_id,
        software_version: fields.software_version,
        created_at: Utc::now(),
    };
    state
        .storage
        .insert_client(client.clone())
        .map_err(OAuthError::internal)?;

    tracing::info!("Registered new client: {} ({})", client.id, client.name);

    let response = ClientResponse::new(&state, &client)?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// The authenticated client must be the one named in the path.
fn check_path(client: &Client, id: &str) -> Result<(), OAuthError> {
    if client.id != id {
        return Err(OAuthError::invalid_client());
    }
    Ok(())
}

/// Handler for `GET /oauth/client/{id}`
pub async fn info_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthenticatedClient(client): AuthenticatedClient,
) -> Result<Json<ClientResponse>, OAuthError> {
    check_path(&client, &id)?;
    Ok(Json(ClientResponse::new(&state, &client)?))
}

/// Handler for `PUT /oauth/client/{id}`
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthenticatedClient(client): AuthenticatedClient,
    MetadataJson(update): MetadataJson<ClientMetadata>,
) -> Result<Json<ClientResponse>, OAuthError> {
    check_path(&client, &id)?;

    if update.client_id.as_ref().is_some_and(|id| id != &client.id) {
        return Err(OAuthError::invalid_client_metadata().with_description("client ID doesn't match"));
    }

    let fields = ClientMetadata::from(&client)
        .merge(update)
        .validate(state.resolver.as_ref())
        .await?;

    let updated = Client {
        name: fields.name,
        website: fields.website,
        logo: fields.logo,
        redirect_uris: fields.redirect_uris,
        grant_types: fields.grant_types,
        software_id: fields.software_id,
        software_version: fields.software_version,
        ..client
    };
    state
        .storage
        .update_client(updated.clone())
        .map_err(OAuthError::internal)?;

    tracing::info!("Updated client {}", updated.id);
    Ok(Json(ClientResponse::new(&state, &updated)?))
}

/// Handler for `DELETE /oauth/client/{id}`
pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthenticatedClient(client): AuthenticatedClient,
) -> Result<StatusCode, OAuthError> {
    check_path(&client, &id)?;

    state
        .storage
        .delete_client(&client.id)
        .map_err(OAuthError::internal)?;

    tracing::info!("Deleted client {}", client.id);
    Ok(StatusCode::NO_CONTENT)
}
