//! Versioned snapshot of the applied proxy configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::model::{ProxyConfig, ServiceConfig, ServiceKind};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the proxy is currently serving, per service. `None` means the
/// service has never been provisioned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedState {
    pub git: Option<ProxyConfig>,
    pub registry: Option<ProxyConfig>,
}

impl AppliedState {
    pub fn get(&self, kind: ServiceKind) -> Option<&ProxyConfig> {
        self.slot(kind).as_ref()
    }

    pub fn slot(&self, kind: ServiceKind) -> &Option<ProxyConfig> {
        match kind {
            ServiceKind::Git => &self.git,
            ServiceKind::Registry => &self.registry,
        }
    }

    pub fn slot_mut(&mut self, kind: ServiceKind) -> &mut Option<ProxyConfig> {
        match kind {
            ServiceKind::Git => &mut self.git,
            ServiceKind::Registry => &mut self.registry,
        }
    }

    /// Provisioned services, in reconciliation order.
    pub fn iter(&self) -> impl Iterator<Item = (ServiceKind, &ProxyConfig)> {
        ServiceKind::ALL
            .into_iter()
            .filter_map(move |kind| self.get(kind).map(|proxy| (kind, proxy)))
    }
}

impl From<&ServiceConfig> for AppliedState {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            git: Some(config.git.clone()),
            registry: Some(config.registry.clone()),
        }
    }
}

/// The applied state plus a version that increases on every committed
/// cycle that changed something.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedSnapshot {
    pub version: u64,
    pub state: AppliedState,
}

impl AppliedSnapshot {
    /// Nothing has ever been applied.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot for a proxy already serving `config`.
    pub fn from_config(version: u64, config: &ServiceConfig) -> Self {
        Self {
            version,
            state: AppliedState::from(config),
        }
    }

    /// Successor snapshot once `config` has been fully applied.
    pub fn advance(&self, config: &ServiceConfig) -> Self {
        Self::from_config(self.version + 1, config)
    }

    /// Load a persisted snapshot. A missing file means nothing was applied.
    pub async fn load(path: &Path) -> Result<Self, SnapshotError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::empty()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist atomically: write a sibling temp file, then rename over.
    pub async fn persist(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse;

    #[tokio::test]
    async fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("applied.json");

        assert_eq!(AppliedSnapshot::load(&path).await.unwrap(), AppliedSnapshot::empty());

        let config = parse(
            "external_url \"http://git.example.org\"\n\
             registry_external_url \"http://registry.example.org\"\n\
             nginx['proxy_set_headers'] = { \"Host\" => \"git.example.org\" }\n",
        )
        .unwrap()
        .services;
        let snapshot = AppliedSnapshot::empty().advance(&config);
        snapshot.persist(&path).await.unwrap();

        let loaded = AppliedSnapshot::load(&path).await.unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.state.iter().count(), 2);
    }
}
