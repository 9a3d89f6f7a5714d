use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use replica_sync::ReplicaConfig;

use crate::telemetry::{parse_level, LoggingConfig};

/// Everything the daemon needs, as read from a TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub replica: ReplicaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration {}", path.display()))?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if parse_level(&self.logging.level).is_none() {
            anyhow::bail!("Unknown log level: {}", self.logging.level);
        }
        self.replica.validate()?;
        Ok(())
    }

    /// Create the replica folder if it does not exist yet
    pub async fn prepare_destination(&self) -> Result<()> {
        let destination = &self.replica.destination;
        tokio::fs::create_dir_all(destination)
            .await
            .with_context(|| format!("Failed to create destination {}", destination.display()))
    }
}
