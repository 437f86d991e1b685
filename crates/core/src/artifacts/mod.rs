//! Content-addressed storage for compiled contract artifacts
//!
//! Every blob lives at `artifacts/<kind>/<sha256-hex>.<ext>` below the store
//! root. The id is always the SHA-256 of exactly the stored bytes, so writing
//! identical content twice resolves to the same key and is a no-op.

use crate::{
    error::{Error, Result},
    utils::hash_bytes,
};
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use walkdir::WalkDir;

pub mod abi;
pub mod metadata;

/// Artifact namespace, one per chain family
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// EVM creation bytecode
    Evm,
    /// Soroban WASM module
    Soroban,
}

impl ArtifactKind {
    pub fn namespace(&self) -> &'static str {
        match self {
            ArtifactKind::Evm => "evm",
            ArtifactKind::Soroban => "soroban",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Evm => "bin",
            ArtifactKind::Soroban => "wasm",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for ArtifactKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "evm" => Ok(ArtifactKind::Evm),
            "soroban" | "stellar" => Ok(ArtifactKind::Soroban),
            other => Err(Error::validation(format!("unknown artifact kind '{other}'"))),
        }
    }
}

/// SHA-256 of an artifact's bytes as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Computes the id of the given bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(hash_bytes(bytes))
    }

    pub fn parse(value: &str) -> Result<Self> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(Error::validation(format!(
                "artifact id must be 64 lowercase hex characters, got '{value}'"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        ArtifactId::parse(&value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

/// Storage key for an artifact
pub fn artifact_key(id: &ArtifactId, kind: ArtifactKind) -> String {
    format!(
        "artifacts/{}/{}.{}",
        kind.namespace(),
        id,
        kind.extension()
    )
}

/// Information about a stored blob
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredArtifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub key: String,
    pub size: usize,
    /// False when identical content was already present
    pub newly_written: bool,
}

/// Filesystem-backed content-addressed blob store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Opens a store rooted at `root`; keys resolve below it
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create artifact root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: &ArtifactId, kind: ArtifactKind) -> PathBuf {
        self.root.join(artifact_key(id, kind))
    }

    /// Stores bytes under their content hash
    pub fn store(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<StoredArtifact> {
        let id = ArtifactId::of(bytes);
        let key = artifact_key(&id, kind);
        let path = self.path_of(&id, kind);

        if path.exists() {
            tracing::debug!("Artifact {} already stored", key);
            return Ok(StoredArtifact {
                id,
                kind,
                key,
                size: bytes.len(),
                newly_written: false,
            });
        }

        let dir = path
            .parent()
            .ok_or_else(|| eyre::eyre!("Artifact path has no parent: {}", path.display()))?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        // Stage next to the destination so the rename stays on one filesystem
        let mut staged = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to stage artifact in {}", dir.display()))?;
        std::io::Write::write_all(&mut staged, bytes)?;
        staged
            .persist(&path)
            .map_err(|e| eyre::eyre!("Failed to persist {}: {}", path.display(), e.error))?;

        tracing::info!("Stored artifact {} ({} bytes)", key, bytes.len());

        Ok(StoredArtifact {
            id,
            kind,
            key,
            size: bytes.len(),
            newly_written: true,
        })
    }

    /// Reads an artifact back, verifying that its content still matches its id
    pub fn load(&self, id: &ArtifactId, kind: ArtifactKind) -> Result<Vec<u8>> {
        let path = self.path_of(id, kind);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ArtifactNotFound(artifact_key(id, kind)));
            }
            Err(e) => return Err(e.into()),
        };

        let actual = ArtifactId::of(&bytes);
        if &actual != id {
            return Err(Error::Internal(eyre::eyre!(
                "Artifact {} is corrupted: content hashes to {}",
                id,
                actual
            )));
        }

        Ok(bytes)
    }

    pub fn exists(&self, id: &ArtifactId, kind: ArtifactKind) -> bool {
        self.path_of(id, kind).is_file()
    }

    /// Deletes an artifact; returns false when it was not present
    pub fn delete(&self, id: &ArtifactId, kind: ArtifactKind) -> Result<bool> {
        match std::fs::remove_file(self.path_of(id, kind)) {
            Ok(()) => {
                tracing::info!("Deleted artifact {}", artifact_key(id, kind));
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the ids stored for one kind
    pub fn list(&self, kind: ArtifactKind) -> Result<Vec<ArtifactId>> {
        let dir = self.root.join("artifacts").join(kind.namespace());
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids: Vec<ArtifactId> = WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry.path().extension().and_then(|e| e.to_str()) == Some(kind.extension())
            })
            .filter_map(|entry| {
                let stem = entry.path().file_stem()?.to_str()?.to_string();
                ArtifactId::parse(&stem).ok()
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_is_content_addressed() {
        let (_dir, store) = store();
        let bytes = b"\x00asm\x01\x00\x00\x00";

        let stored = store.store(ArtifactKind::Soroban, bytes).unwrap();
        assert!(stored.newly_written);
        assert_eq!(stored.id.as_str(), hash_bytes(bytes));
        assert_eq!(stored.id.as_str().len(), 64);
        assert_eq!(
            stored.key,
            format!("artifacts/soroban/{}.wasm", stored.id)
        );

        let loaded = store.load(&stored.id, ArtifactKind::Soroban).unwrap();
        assert_eq!(loaded, bytes);
        assert_eq!(ArtifactId::of(&loaded), stored.id);
    }

    #[test]
    fn test_store_twice_is_idempotent() {
        let (_dir, store) = store();
        let first = store.store(ArtifactKind::Evm, b"\x60\x80\x60\x40").unwrap();
        let second = store.store(ArtifactKind::Evm, b"\x60\x80\x60\x40").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.key, second.key);
        assert!(!second.newly_written);
        assert_eq!(store.list(ArtifactKind::Evm).unwrap(), vec![first.id]);
    }

    #[test]
    fn test_kinds_are_namespaced() {
        let (_dir, store) = store();
        let stored = store.store(ArtifactKind::Evm, b"same").unwrap();

        assert!(store.exists(&stored.id, ArtifactKind::Evm));
        assert!(!store.exists(&stored.id, ArtifactKind::Soroban));
        assert!(matches!(
            store.load(&stored.id, ArtifactKind::Soroban),
            Err(Error::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn test_delete_by_id_and_kind() {
        let (_dir, store) = store();
        let stored = store.store(ArtifactKind::Evm, b"delete me").unwrap();

        assert!(store.delete(&stored.id, ArtifactKind::Evm).unwrap());
        assert!(!store.exists(&stored.id, ArtifactKind::Evm));
        assert!(!store.delete(&stored.id, ArtifactKind::Evm).unwrap());
    }

    #[test]
    fn test_load_detects_corruption() {
        let (_dir, store) = store();
        let stored = store.store(ArtifactKind::Evm, b"original").unwrap();
        std::fs::write(store.root().join(&stored.key), b"tampered").unwrap();

        let err = store.load(&stored.id, ArtifactKind::Evm).unwrap_err();
        assert!(err.to_string().contains("corrupted"));
    }

    #[test]
    fn test_artifact_id_validation() {
        assert!(ArtifactId::parse(&"a".repeat(64)).is_ok());
        assert!(ArtifactId::parse(&"A".repeat(64)).is_err());
        assert!(ArtifactId::parse("abc").is_err());

        let id: std::result::Result<ArtifactId, _> =
            serde_json::from_value(serde_json::json!("not-hex"));
        assert!(id.is_err());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("evm".parse::<ArtifactKind>().unwrap(), ArtifactKind::Evm);
        assert_eq!(
            "stellar".parse::<ArtifactKind>().unwrap(),
            ArtifactKind::Soroban
        );
        assert!("solana".parse::<ArtifactKind>().is_err());
    }
}
