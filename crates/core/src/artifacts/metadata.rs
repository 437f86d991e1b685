//! Metadata records for compiled artifacts and deployments
//!
//! Persistence here is secondary bookkeeping: callers log failures and keep
//! going rather than failing the primary operation.

use super::{ArtifactId, ArtifactKind};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    io::{BufRead, Write},
    path::PathBuf,
};

/// Description of one compiled artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactMetadata {
    pub artifact_id: ArtifactId,
    pub kind: ArtifactKind,
    pub contract_name: String,
    /// Network the build was requested for
    pub network: String,
    /// `sha256:<hex>` of the artifact bytes
    pub hash: String,
    pub size: usize,
    pub abi: Value,
    /// Toolchain component name to reported version
    pub toolchain: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
}

/// Result of a confirmed deployment; append-only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub artifact_id: ArtifactId,
    pub kind: ArtifactKind,
    pub network: String,
    pub deployer: String,
    /// Contract address (EVM) or contract/WASM id (Stellar)
    pub onchain_id: String,
    pub transaction_hash: String,
    pub deployed_at: DateTime<Utc>,
}

/// Backing store for artifact metadata and deployment history
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn save_artifact(&self, metadata: &ArtifactMetadata) -> Result<()>;

    async fn load_artifact(&self, id: &ArtifactId) -> Result<Option<ArtifactMetadata>>;

    async fn record_deployment(&self, record: &DeploymentRecord) -> Result<()>;

    async fn deployments(&self) -> Result<Vec<DeploymentRecord>>;
}

/// JSON files on local disk
#[derive(Debug, Clone)]
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn artifact_path(&self, id: &ArtifactId) -> PathBuf {
        self.root.join("artifacts").join(format!("{id}.json"))
    }

    fn deployments_path(&self) -> PathBuf {
        self.root.join("deployments.jsonl")
    }
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    async fn save_artifact(&self, metadata: &ArtifactMetadata) -> Result<()> {
        let path = self.artifact_path(&metadata.artifact_id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write metadata: {}", path.display()))?;
        tracing::debug!("Saved metadata to: {}", path.display());
        Ok(())
    }

    async fn load_artifact(&self, id: &ArtifactId) -> Result<Option<ArtifactMetadata>> {
        let path = self.artifact_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn record_deployment(&self, record: &DeploymentRecord) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create directory: {}", self.root.display()))?;

        let path = self.deployments_path();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    async fn deployments(&self) -> Result<Vec<DeploymentRecord>> {
        let path = self.deployments_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut records = Vec::new();
        for line in std::io::BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}
