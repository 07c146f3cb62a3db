//! Persistence for fetched readings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::UsageReading;

/// A reading with the time it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub gigabytes: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Store for fetched readings. The scheduler appends on every successful
/// fetch; display surfaces read the latest entry.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn append(&self, reading: UsageReading, at: DateTime<Utc>) -> Result<()>;

    async fn latest(&self) -> Result<Option<StoredReading>>;
}

/// JSON-file reading log (`~/.local/share/rakumon/readings.json`).
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new() -> Result<Self> {
        let dir = dirs::data_dir()
            .context("Could not find data directory")?
            .join("rakumon");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data dir: {}", dir.display()))?;
        Ok(Self {
            path: dir.join("readings.json"),
        })
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read_all(&self) -> Result<Vec<StoredReading>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read readings: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse readings: {}", self.path.display()))
    }
}

#[async_trait]
impl ReadingStore for JsonFileStore {
    async fn append(&self, reading: UsageReading, at: DateTime<Utc>) -> Result<()> {
        let mut readings = self.read_all()?;
        readings.push(StoredReading {
            gigabytes: reading.gigabytes,
            fetched_at: at,
        });
        let content =
            serde_json::to_string_pretty(&readings).context("Failed to serialize readings")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write readings: {}", self.path.display()))?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<StoredReading>> {
        Ok(self.read_all()?.into_iter().last())
    }
}
