//! Instance list persistence

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::domain::instance::ServerInstance;
use crate::error::{Error, Result};
use crate::infra::json_file::write_json_atomic;

/// Durable store for the ordered instance list.
///
/// The whole list is read on every `load` and replaced on every `save`;
/// callers sequence their own read-modify-write cycles.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Create a store backed by the given JSON file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all instances. A missing or unreadable store yields an empty list.
    pub async fn load(&self) -> Vec<ServerInstance> {
        match self.try_load().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!("{}; treating as empty", e);
                Vec::new()
            }
        }
    }

    async fn try_load(&self) -> Result<Vec<ServerInstance>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Instance store {:?} does not exist yet", self.path);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::ConfigUnavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut instances: Vec<ServerInstance> = serde_json::from_str(&raw).map_err(|e| {
            Error::ConfigUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        for instance in &mut instances {
            instance.normalize();
        }
        Ok(instances)
    }

    /// Replace the stored list with `instances`
    pub async fn save(&self, instances: &[ServerInstance]) -> Result<()> {
        write_json_atomic(&self.path, instances).await?;
        debug!("Saved {} instances to {:?}", instances.len(), self.path);
        Ok(())
    }
}
