//! Durable storage for the token triple.
//!
//! The only state that survives a restart is the (access token, refresh
//! token, expiry) triple, kept behind a key-value [`BlobStore`] abstraction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{storage_error, AuthResult};

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Storage key for the expiry timestamp (RFC 3339 text)
pub const TOKEN_EXPIRES_KEY: &str = "token_expires_at";

/// Key-value blob store. Values are opaque strings; no business rules live
/// at this layer.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> AuthResult<()>;
    async fn remove(&self, key: &str) -> AuthResult<()>;
}

/// In-memory blob store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Blob store persisted as a JSON map on disk
#[derive(Debug)]
pub struct FileBlobStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileBlobStore {
    /// Open a store at the given path, loading any existing contents
    pub fn open(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| storage_error(format!("failed to read {}: {}", path.display(), e)))?;
            serde_json::from_str(&raw)
                .map_err(|e| storage_error(format!("failed to parse {}: {}", path.display(), e)))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> AuthResult<()> {
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|e| storage_error(format!("failed to serialize store: {}", e)))?;
        std::fs::write(&self.path, raw).map_err(|e| {
            storage_error(format!("failed to write {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// The durable token triple
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Fixed-key view over a [`BlobStore`] holding the token triple.
///
/// Written on every successful authentication event, removed on logout.
/// Contents are treated as opaque except the expiry, which round-trips
/// through RFC 3339 text.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn BlobStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Load the stored triple. Returns `None` unless all three keys are
    /// present and the expiry parses.
    pub async fn load(&self) -> AuthResult<Option<StoredTokens>> {
        let access_token = self.store.get(ACCESS_TOKEN_KEY).await?;
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY).await?;
        let expires_raw = self.store.get(TOKEN_EXPIRES_KEY).await?;

        let (Some(access_token), Some(refresh_token), Some(expires_raw)) =
            (access_token, refresh_token, expires_raw)
        else {
            debug!("no complete token triple in storage");
            return Ok(None);
        };

        let expires_at = match DateTime::parse_from_rfc3339(&expires_raw) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(e) => {
                warn!(error = %e, "stored expiry is unparseable, ignoring stored tokens");
                return Ok(None);
            }
        };

        Ok(Some(StoredTokens {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    /// Persist the triple, overwriting any previous values
    pub async fn save(&self, tokens: &StoredTokens) -> AuthResult<()> {
        self.store
            .set(ACCESS_TOKEN_KEY, &tokens.access_token)
            .await?;
        self.store
            .set(REFRESH_TOKEN_KEY, &tokens.refresh_token)
            .await?;
        self.store
            .set(TOKEN_EXPIRES_KEY, &tokens.expires_at.to_rfc3339())
            .await?;
        debug!("token triple persisted");
        Ok(())
    }

    /// Remove all three keys
    pub async fn clear(&self) -> AuthResult<()> {
        self.store.remove(ACCESS_TOKEN_KEY).await?;
        self.store.remove(REFRESH_TOKEN_KEY).await?;
        self.store.remove(TOKEN_EXPIRES_KEY).await?;
        info!("stored tokens removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};

    fn sample_tokens() -> StoredTokens {
        StoredTokens {
            access_token: "T1".to_string(),
            refresh_token: "R1".to_string(),
            // Truncate to whole seconds so the RFC 3339 round trip compares equal
            expires_at: (Utc::now() + Duration::seconds(3600))
                .with_nanosecond(0)
                .unwrap_or_else(Utc::now),
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_the_triple() {
        let store = TokenStore::new(Arc::new(MemoryBlobStore::new()));
        let tokens = sample_tokens();

        store.save(&tokens).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, tokens);
    }

    #[tokio::test]
    async fn load_returns_none_when_a_key_is_missing() {
        let blob = Arc::new(MemoryBlobStore::new());
        blob.set(ACCESS_TOKEN_KEY, "T1").await.unwrap();
        blob.set(REFRESH_TOKEN_KEY, "R1").await.unwrap();

        let store = TokenStore::new(blob);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_returns_none_for_unparseable_expiry() {
        let blob = Arc::new(MemoryBlobStore::new());
        blob.set(ACCESS_TOKEN_KEY, "T1").await.unwrap();
        blob.set(REFRESH_TOKEN_KEY, "R1").await.unwrap();
        blob.set(TOKEN_EXPIRES_KEY, "not-a-timestamp").await.unwrap();

        let store = TokenStore::new(blob);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_all_three_keys() {
        let blob = Arc::new(MemoryBlobStore::new());
        let store = TokenStore::new(Arc::clone(&blob) as Arc<dyn BlobStore>);
        store.save(&sample_tokens()).await.unwrap();

        store.clear().await.unwrap();
        assert!(blob.get(ACCESS_TOKEN_KEY).await.unwrap().is_none());
        assert!(blob.get(REFRESH_TOKEN_KEY).await.unwrap().is_none());
        assert!(blob.get(TOKEN_EXPIRES_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let tokens = sample_tokens();

        {
            let store = TokenStore::new(Arc::new(FileBlobStore::open(&path).unwrap()));
            store.save(&tokens).await.unwrap();
        }

        let store = TokenStore::new(Arc::new(FileBlobStore::open(&path).unwrap()));
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, tokens);
    }
}
