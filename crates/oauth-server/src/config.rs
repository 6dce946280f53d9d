//! Configuration loading and management

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::Keys;

/// Main configuration for the authorization server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hex-encoded master secret. Every envelope key is derived from it, so
    /// changing it invalidates all issued codes and tokens.
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Scopes a client may request
    #[serde(default = "default_scopes")]
    pub scopes: Vec<ScopeConfig>,

    /// Resource owner session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Known resource owners
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Scope value, e.g. "bookmarks:read"
    pub name: String,
    /// Text shown on the approval pages
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Header set by the authenticating reverse proxy with the signed-in
    /// username. Never expose the server without such a proxy in front.
    #[serde(default = "default_user_header")]
    pub user_header: String,

    /// Where to send visitors that are not signed in. When unset they get a 401.
    pub login_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
            login_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: i64,
    pub username: String,
}

fn default_user_header() -> String {
    "X-Forwarded-User".to_string()
}

fn default_scopes() -> Vec<ScopeConfig> {
    [
        ("bookmarks:read", "Read only access to bookmarks"),
        ("bookmarks:write", "Write only access to bookmarks"),
        ("profile:read", "Extended profile information"),
    ]
    .into_iter()
    .map(|(name, description)| ScopeConfig {
        name: name.to_string(),
        description: description.to_string(),
    })
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret_key: None,
            scopes: default_scopes(),
            session: SessionConfig::default(),
            users: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the config directory.
    ///
    /// A missing file or a missing secret key is filled in and written back,
    /// so the secret survives restarts.
    pub fn load(config_path: &str) -> Result<Self> {
        let config_file = Path::new(config_path).join("config.json");

        let mut config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            config
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_file
            );
            std::fs::create_dir_all(config_path)
                .with_context(|| format!("Failed to create config directory: {}", config_path))?;
            Config::default()
        };

        if config.secret_key.is_none() {
            config.secret_key = Some(hex::encode(Keys::generate_secret()));
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write config: {:?}", config_file))?;
            tracing::warn!("Generated a new secret key in {:?}", config_file);
        }

        Ok(config)
    }

    /// Derive the envelope keys from the configured secret.
    pub fn keys(&self) -> Result<Keys> {
        let secret = self
            .secret_key
            .as_deref()
            .context("secret_key is not set")?;
        let secret = hex::decode(secret.trim()).context("secret_key is not valid hex")?;
        anyhow::ensure!(secret.len() >= 32, "secret_key must be at least 32 bytes");

        Ok(Keys::derive(&secret)?)
    }

    /// Check if a scope can be requested
    pub fn is_known_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s.name == scope)
    }

    /// Configured scopes restricted to `requested`, in configuration order
    pub fn scope_details(&self, requested: &[String]) -> Vec<&ScopeConfig> {
        self.scopes
            .iter()
            .filter(|s| requested.contains(&s.name))
            .collect()
    }

    pub fn find_user(&self, id: i64) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn find_username(&self, username: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.username == username)
    }
}
