//! Persistent storage for OAuth clients and access tokens

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage for OAuth data
pub struct Storage {
    data_path: PathBuf,
    /// Registered OAuth clients
    clients: RwLock<ClientStore>,
    /// Issued access tokens
    tokens: RwLock<TokenStore>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ClientStore {
    clients: HashMap<String, Client>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TokenStore {
    tokens: HashMap<String, Token>,
}

/// A registered OAuth client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub website: String,
    #[serde(default)]
    pub logo: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub software_id: String,
    pub software_version: String,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn supports_grant(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }
}

/// An issued access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub user_id: i64,
    /// Client the token was issued to
    pub client_id: Option<String>,
    /// Client name at issuance time
    pub application: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Storage {
    /// Create a new storage instance rooted at `data_path`
    pub fn new(data_path: &str) -> Result<Self> {
        let data_path = PathBuf::from(data_path);
        std::fs::create_dir_all(&data_path)?;

        let storage = Self {
            data_path,
            clients: RwLock::new(ClientStore::default()),
            tokens: RwLock::new(TokenStore::default()),
        };

        // Load persisted data
        storage.load_clients()?;
        storage.load_tokens()?;

        Ok(storage)
    }

    // --- Client Management ---

    /// Store a newly registered client
    pub fn insert_client(&self, client: Client) -> Result<()> {
        let mut store = write(&self.clients);
        if store.clients.contains_key(&client.id) {
            return Err(StorageError::AlreadyExists(client.id));
        }
        store.clients.insert(client.id.clone(), client);
        self.save_clients(&store)
    }

    /// Get a registered client by ID
    pub fn get_client(&self, client_id: &str) -> Option<Client> {
        read(&self.clients).clients.get(client_id).cloned()
    }

    /// Replace an existing client record
    pub fn update_client(&self, client: Client) -> Result<()> {
        let mut store = write(&self.clients);
        match store.clients.get_mut(&client.id) {
            Some(existing) => *existing = client,
            None => return Err(StorageError::NotFound(client.id)),
        }
        self.save_clients(&store)
    }

    /// Remove a client. Returns whether it existed.
    pub fn delete_client(&self, client_id: &str) -> Result<bool> {
        let mut store = write(&self.clients);
        let removed = store.clients.remove(client_id).is_some();
        if removed {
            self.save_clients(&store)?;
        }
        Ok(removed)
    }

    // --- Token Management ---

    /// Store a new token. Token IDs are never reused.
    pub fn create_token(&self, token: Token) -> Result<Token> {
        let mut store = write(&self.tokens);
        if store.tokens.contains_key(&token.id) {
            return Err(StorageError::AlreadyExists(token.id));
        }
        store.tokens.insert(token.id.clone(), token.clone());
        self.save_tokens(&store)?;
        Ok(token)
    }

    /// Get a token by ID
    pub fn get_token(&self, token_id: &str) -> Option<Token> {
        read(&self.tokens).tokens.get(token_id).cloned()
    }

    /// Revoke a token by ID. Returns whether it existed.
    pub fn revoke_token(&self, token_id: &str) -> Result<bool> {
        let mut store = write(&self.tokens);
        let removed = store.tokens.remove(token_id).is_some();
        if removed {
            self.save_tokens(&store)?;
        }
        Ok(removed)
    }

    // --- Persistence ---

    fn clients_path(&self) -> PathBuf {
        self.data_path.join("clients.json")
    }

    fn tokens_path(&self) -> PathBuf {
        self.data_path.join("tokens.json")
    }

    fn load_clients(&self) -> Result<()> {
        let path = self.clients_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let store: ClientStore = serde_json::from_str(&content)?;
            let count = store.clients.len();
            *write(&self.clients) = store;
            tracing::info!("Loaded {} registered clients", count);
        }
        Ok(())
    }

    /// Writes a snapshot. Callers hold the write guard, so snapshots reach
    /// the disk in the order they were taken.
    fn save_clients(&self, store: &ClientStore) -> Result<()> {
        let content = serde_json::to_string_pretty(store)?;
        std::fs::write(self.clients_path(), content)?;
        Ok(())
    }

    fn load_tokens(&self) -> Result<()> {
        let path = self.tokens_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let store: TokenStore = serde_json::from_str(&content)?;
            let count = store.tokens.len();
            *write(&self.tokens) = store;
            tracing::info!("Loaded {} access tokens", count);
        }
        Ok(())
    }

    fn save_tokens(&self, store: &TokenStore) -> Result<()> {
        let content = serde_json::to_string_pretty(store)?;
        std::fs::write(self.tokens_path(), content)?;
        Ok(())
    }
}
