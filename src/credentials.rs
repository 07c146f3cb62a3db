//! Credential storage abstraction.
//!
//! The engine never persists credentials itself; it asks a [`CredentialStore`]
//! for them per fetch. The file-backed store keeps a single JSON blob under
//! the user cache directory.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Portal login credentials. The secret never appears in Debug output or
/// logs.
#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub secret: SecretString,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: SecretString::from(secret.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Store for the portal credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve stored credentials, if any.
    async fn get(&self) -> Result<Option<Credentials>>;

    /// Store credentials, replacing any prior ones.
    async fn set(&self, credentials: &Credentials) -> Result<()>;

    /// Remove stored credentials.
    async fn clear(&self) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    identifier: String,
    secret: String,
}

/// File-backed credential store (`~/.cache/rakumon/credentials.json`).
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new() -> Result<Self> {
        let dir = dirs::cache_dir()
            .context("Could not find cache directory")?
            .join("rakumon");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache dir: {}", dir.display()))?;
        Ok(Self {
            path: dir.join("credentials.json"),
        })
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self) -> Result<Option<Credentials>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credentials: {}", self.path.display()))?;
        let stored: StoredCredentials = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse credentials: {}", self.path.display()))?;
        Ok(Some(Credentials::new(stored.identifier, stored.secret)))
    }

    async fn set(&self, credentials: &Credentials) -> Result<()> {
        let stored = StoredCredentials {
            identifier: credentials.identifier.clone(),
            secret: credentials.secret.expose_secret().to_string(),
        };
        let content = serde_json::to_string(&stored).context("Failed to serialize credentials")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write credentials: {}", self.path.display()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to delete credentials: {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// In-memory store for tests and one-shot invocations.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> Result<Option<Credentials>> {
        Ok(self.credentials.lock().expect("lock poisoned").clone())
    }

    async fn set(&self, credentials: &Credentials) -> Result<()> {
        *self.credentials.lock().expect("lock poisoned") = Some(credentials.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.credentials.lock().expect("lock poisoned") = None;
        Ok(())
    }
}
