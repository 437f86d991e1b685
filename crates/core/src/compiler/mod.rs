//! Compilation service shared by both chain families.
//!
//! Every build runs in its own temporary sandbox directory which is removed on
//! every exit path, including early returns and panics, because it is owned by
//! a [`tempfile::TempDir`] for the whole pipeline.

pub mod evm;
pub mod soroban;
pub mod toolchain;

pub use evm::SolcToolchain;
pub use soroban::SorobanToolchain;
pub use toolchain::{SourceCheck, ToolVersion, Toolchain};

use crate::{
    artifacts::{
        abi,
        metadata::{ArtifactMetadata, MetadataStore},
        ArtifactId, ArtifactKind, ArtifactStore,
    },
    cache::{self, Cache},
    error::{Error, Outcome, Result},
};
use chrono::Utc;
use eyre::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_METADATA_TTL: u64 = 86_400;

/// One build request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub source: String,
    /// Derived from the source when absent
    #[serde(default)]
    pub contract_name: Option<String>,
    pub network: String,
}

/// Successful compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileReport {
    pub artifact_id: ArtifactId,
    pub kind: ArtifactKind,
    pub contract_name: String,
    pub network: String,
    /// Store key, `artifacts/<kind>/<id>.<ext>`
    pub key: String,
    pub size: usize,
    pub abi: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selectors: BTreeMap<String, String>,
    pub toolchain: Vec<ToolVersion>,
    pub duration_ms: u64,
}

/// Orchestrates toolchain, ABI validation, artifact storage and metadata
#[derive(Clone)]
pub struct CompilationService {
    toolchain: Arc<dyn Toolchain>,
    store: ArtifactStore,
    metadata: Arc<dyn MetadataStore>,
    cache: Cache,
    timeout: Duration,
    metadata_ttl: u64,
}

impl CompilationService {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        store: ArtifactStore,
        metadata: Arc<dyn MetadataStore>,
        cache: Cache,
    ) -> Self {
        Self {
            toolchain,
            store,
            metadata,
            cache,
            timeout: DEFAULT_TIMEOUT,
            metadata_ttl: DEFAULT_METADATA_TTL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metadata_ttl(mut self, ttl_secs: u64) -> Self {
        self.metadata_ttl = ttl_secs;
        self
    }

    pub fn kind(&self) -> ArtifactKind {
        self.toolchain.kind()
    }

    /// Compiles `request`; failures are reported in the outcome, never raised
    pub async fn compile(&self, request: &CompileRequest) -> Outcome<CompileReport> {
        let mut warnings = Vec::new();
        match self.run(request, &mut warnings).await {
            Ok(report) => Outcome::with_warnings(report, warnings),
            Err(e) => {
                tracing::warn!("{} compilation failed: {}", self.kind(), e);
                Outcome::failure(&e)
            }
        }
    }

    async fn run(&self, request: &CompileRequest, warnings: &mut Vec<String>) -> Result<CompileReport> {
        let start = Instant::now();
        let kind = self.kind();

        if request.source.trim().is_empty() {
            return Err(Error::validation("source is required"));
        }
        if request.network.trim().is_empty() {
            return Err(Error::validation("network is required"));
        }

        let check = self
            .toolchain
            .check_source(&request.source, request.contract_name.as_deref())?;
        warnings.extend(check.warnings);
        let name = check.contract_name;

        let versions = self.toolchain.check_available().await?;

        tracing::info!("Compiling {} contract {} for {}", kind, name, request.network);

        let sandbox = tempfile::Builder::new()
            .prefix("chainsmith-build-")
            .tempdir()
            .context("Failed to create build sandbox")?;
        tracing::debug!("Build sandbox: {}", sandbox.path().display());

        self.toolchain
            .materialize(sandbox.path(), &name, &request.source)?;
        let binary = self
            .toolchain
            .build(sandbox.path(), &name, self.timeout)
            .await?;
        let bytes = std::fs::read(&binary)
            .with_context(|| format!("Failed to read {}", binary.display()))?;

        let abi = match self.toolchain.inspect(sandbox.path(), &name, &binary).await {
            Ok(abi) => abi,
            Err(e) => {
                tracing::warn!("ABI extraction failed for {}: {}", name, e);
                warnings.push(format!("ABI extraction failed: {e}"));
                Value::Array(Vec::new())
            }
        };

        let abi_report = match kind {
            ArtifactKind::Evm => abi::validate_evm(&abi),
            ArtifactKind::Soroban => abi::validate_soroban(&abi),
        };
        if !abi_report.valid {
            warnings.extend(abi_report.errors.iter().map(|e| format!("ABI: {e}")));
        }

        let stored = self.store.store(kind, &bytes)?;

        if let Err(e) = sandbox.close() {
            tracing::warn!("Failed to remove build sandbox: {}", e);
        }

        let report = CompileReport {
            artifact_id: stored.id,
            kind,
            contract_name: name,
            network: request.network.clone(),
            key: stored.key,
            size: stored.size,
            abi,
            selectors: abi_report.selectors,
            toolchain: versions,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        self.persist_metadata(&report).await;

        tracing::info!(
            "Compiled {} into {} ({} bytes) in {:.2}s",
            report.contract_name,
            report.artifact_id,
            report.size,
            start.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    /// Secondary bookkeeping; failures are logged only
    async fn persist_metadata(&self, report: &CompileReport) {
        let metadata = ArtifactMetadata {
            artifact_id: report.artifact_id.clone(),
            kind: report.kind,
            contract_name: report.contract_name.clone(),
            network: report.network.clone(),
            hash: format!("sha256:{}", report.artifact_id),
            size: report.size,
            abi: report.abi.clone(),
            toolchain: report.toolchain.clone(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.metadata.save_artifact(&metadata).await {
            tracing::warn!("Failed to persist metadata for {}: {}", report.artifact_id, e);
        }
        self.cache
            .set(
                &cache::artifact_key(report.artifact_id.as_str()),
                &metadata,
                Some(self.metadata_ttl),
            )
            .await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifacts::metadata::{DeploymentRecord, FsMetadataStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Toolchain whose "bytecode" is the source text with a prefix
    #[derive(Default)]
    pub(crate) struct MockToolchain {
        pub unavailable: bool,
        pub fail_build: bool,
        pub fail_inspect: bool,
        pub sandboxes: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Toolchain for MockToolchain {
        fn kind(&self) -> ArtifactKind {
            ArtifactKind::Evm
        }

        fn check_source(&self, source: &str, contract_name: Option<&str>) -> Result<SourceCheck> {
            let names = evm::declared_contracts(source)?;
            let Some(first) = names.first() else {
                return Err(Error::InvalidSource("no contract".to_string()));
            };
            Ok(SourceCheck {
                contract_name: contract_name.unwrap_or(first).to_string(),
                warnings: Vec::new(),
            })
        }

        async fn check_available(&self) -> Result<Vec<ToolVersion>> {
            if self.unavailable {
                return Err(Error::ToolchainUnavailable {
                    component: "solc".to_string(),
                    reason: "not found".to_string(),
                });
            }
            Ok(vec![("solc".to_string(), "0.8.26".to_string())])
        }

        fn materialize(&self, dir: &Path, _contract_name: &str, source: &str) -> Result<()> {
            std::fs::write(dir.join("Contract.sol"), source)?;
            Ok(())
        }

        async fn build(&self, dir: &Path, contract_name: &str, _timeout: Duration) -> Result<PathBuf> {
            self.sandboxes.lock().push(dir.to_path_buf());
            if self.fail_build {
                return Err(Error::BuildFailure("exit code 1".to_string()));
            }
            let source = std::fs::read(dir.join("Contract.sol"))?;
            let binary = SolcToolchain::binary_path(dir, contract_name);
            std::fs::create_dir_all(binary.parent().unwrap())?;
            std::fs::write(&binary, [b"bytecode:".as_slice(), &source].concat())?;
            Ok(binary)
        }

        async fn inspect(&self, _dir: &Path, _contract_name: &str, _binary: &Path) -> Result<Value> {
            if self.fail_inspect {
                return Err(Error::BuildFailure("inspect crashed".to_string()));
            }
            Ok(json!([{
                "type": "function",
                "name": "value",
                "inputs": [],
                "outputs": [{"name": "", "type": "uint256"}],
                "stateMutability": "view"
            }]))
        }
    }

    struct BrokenMetadata;

    #[async_trait]
    impl MetadataStore for BrokenMetadata {
        async fn save_artifact(&self, _metadata: &ArtifactMetadata) -> Result<()> {
            Err(Error::Internal(eyre::eyre!("database offline")))
        }

        async fn load_artifact(&self, _id: &ArtifactId) -> Result<Option<ArtifactMetadata>> {
            Err(Error::Internal(eyre::eyre!("database offline")))
        }

        async fn record_deployment(&self, _record: &DeploymentRecord) -> Result<()> {
            Err(Error::Internal(eyre::eyre!("database offline")))
        }

        async fn deployments(&self) -> Result<Vec<DeploymentRecord>> {
            Err(Error::Internal(eyre::eyre!("database offline")))
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: ArtifactStore,
        cache: Cache,
        metadata: Arc<FsMetadataStore>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        Fixture {
            store: ArtifactStore::open(dir.path().join("store")).unwrap(),
            metadata: Arc::new(FsMetadataStore::new(dir.path().join("metadata"))),
            cache: Cache::in_memory(),
            _dir: dir,
        }
    }

    fn service(fx: &Fixture, toolchain: Arc<MockToolchain>) -> CompilationService {
        CompilationService::new(toolchain, fx.store.clone(), fx.metadata.clone(), fx.cache.clone())
    }

    fn request(source: &str) -> CompileRequest {
        CompileRequest {
            source: source.to_string(),
            contract_name: None,
            network: "localhost".to_string(),
        }
    }

    const TEST_ONE: &str = "contract Test { uint256 public value = 1; }";
    const TEST_TWO: &str = "contract Test { uint256 public value = 2; }";

    #[tokio::test]
    async fn test_same_source_yields_same_artifact() {
        let fx = fixture();
        let toolchain = Arc::new(MockToolchain::default());
        let service = service(&fx, toolchain);

        let first = service.compile(&request(TEST_ONE)).await.into_result().unwrap();
        let second = service.compile(&request(TEST_ONE)).await.into_result().unwrap();
        assert_eq!(first.artifact_id, second.artifact_id);
        assert_eq!(first.contract_name, "Test");

        let bytes = fx.store.load(&first.artifact_id, ArtifactKind::Evm).unwrap();
        assert_eq!(first.artifact_id, ArtifactId::of(&bytes));
        assert_eq!(first.artifact_id.as_str().len(), 64);
        assert!(first
            .artifact_id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[tokio::test]
    async fn test_different_literal_yields_different_artifact() {
        let fx = fixture();
        let service = service(&fx, Arc::new(MockToolchain::default()));

        let one = service.compile(&request(TEST_ONE)).await.into_result().unwrap();
        let two = service.compile(&request(TEST_TWO)).await.into_result().unwrap();
        assert_ne!(one.artifact_id, two.artifact_id);
        assert_ne!(
            fx.store.load(&one.artifact_id, ArtifactKind::Evm).unwrap(),
            fx.store.load(&two.artifact_id, ArtifactKind::Evm).unwrap()
        );
    }

    #[tokio::test]
    async fn test_sandbox_removed_on_every_path() {
        let fx = fixture();

        let ok = Arc::new(MockToolchain::default());
        assert!(service(&fx, ok.clone()).compile(&request(TEST_ONE)).await.is_success());

        let failing = Arc::new(MockToolchain {
            fail_build: true,
            ..Default::default()
        });
        let outcome = service(&fx, failing.clone()).compile(&request(TEST_ONE)).await;
        assert_eq!(outcome.error_kind(), Some(crate::error::ErrorKind::BuildFailure));

        for toolchain in [ok, failing] {
            let sandboxes = toolchain.sandboxes.lock();
            assert_eq!(sandboxes.len(), 1);
            assert!(!sandboxes[0].exists(), "{} left behind", sandboxes[0].display());
        }
    }

    #[tokio::test]
    async fn test_preconditions_fail_before_any_build() {
        let fx = fixture();

        let toolchain = Arc::new(MockToolchain::default());
        let outcome = service(&fx, toolchain.clone())
            .compile(&request("library Math {}"))
            .await;
        assert_eq!(outcome.error_kind(), Some(crate::error::ErrorKind::InvalidSource));

        let unavailable = Arc::new(MockToolchain {
            unavailable: true,
            ..Default::default()
        });
        let outcome = service(&fx, unavailable.clone())
            .compile(&request(TEST_ONE))
            .await;
        assert_eq!(
            outcome.error_kind(),
            Some(crate::error::ErrorKind::ToolchainUnavailable)
        );

        let outcome = service(&fx, toolchain.clone())
            .compile(&CompileRequest {
                network: String::new(),
                ..request(TEST_ONE)
            })
            .await;
        assert_eq!(outcome.error_kind(), Some(crate::error::ErrorKind::ValidationError));

        assert!(toolchain.sandboxes.lock().is_empty());
        assert!(unavailable.sandboxes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_abi_failure_degrades_to_warning() {
        let fx = fixture();
        let toolchain = Arc::new(MockToolchain {
            fail_inspect: true,
            ..Default::default()
        });

        let outcome = service(&fx, toolchain).compile(&request(TEST_ONE)).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.warnings().len(), 1);
        assert!(outcome.warnings()[0].contains("ABI extraction failed"));
        assert_eq!(outcome.data().unwrap().abi, json!([]));
    }

    #[tokio::test]
    async fn test_metadata_is_persisted_and_cached() {
        let fx = fixture();
        let service = service(&fx, Arc::new(MockToolchain::default()));

        let report = service.compile(&request(TEST_ONE)).await.into_result().unwrap();
        assert_eq!(
            report.selectors.get("value()").map(String::as_str),
            Some("0x3fa4f245")
        );

        let saved = fx.metadata.load_artifact(&report.artifact_id).await.unwrap().unwrap();
        assert_eq!(saved.hash, format!("sha256:{}", report.artifact_id));
        assert_eq!(saved.network, "localhost");

        let cached: ArtifactMetadata = fx
            .cache
            .get_as(&cache::artifact_key(report.artifact_id.as_str()))
            .await
            .unwrap();
        assert_eq!(cached.artifact_id, report.artifact_id);
    }

    #[tokio::test]
    async fn test_metadata_failure_does_not_fail_compile() {
        let fx = fixture();
        let service = CompilationService::new(
            Arc::new(MockToolchain::default()),
            fx.store.clone(),
            Arc::new(BrokenMetadata),
            fx.cache.clone(),
        );
        assert!(service.compile(&request(TEST_ONE)).await.is_success());
    }
}
