//! Long-lived service graph, built once at process start

use crate::{
    analysis::IntelligenceEngine,
    artifacts::{
        metadata::{FsMetadataStore, MetadataStore},
        ArtifactKind, ArtifactStore,
    },
    cache::Cache,
    compiler::{CompilationService, SolcToolchain, SorobanToolchain, Toolchain},
    config::ForgeConfig,
    deploy::DeploymentService,
    error::Result,
    queue::{JobDispatcher, JobPolicy, QueueName, Queues, Worker},
    simulate::SimulationService,
};
use std::sync::Arc;

/// Every service of the pipeline wired to one cache, store and set of queues
#[derive(Clone)]
pub struct Platform {
    pub config: ForgeConfig,
    pub cache: Cache,
    pub store: ArtifactStore,
    pub metadata: Arc<dyn MetadataStore>,
    pub engine: IntelligenceEngine,
    pub evm_compiler: CompilationService,
    pub soroban_compiler: CompilationService,
    pub simulator: SimulationService,
    pub deployer: DeploymentService,
    pub queues: Queues,
}

impl Platform {
    /// Builds the platform with the in-process cache and the default toolchains
    pub fn new(config: ForgeConfig) -> Result<Self> {
        Self::with_parts(
            config.clone(),
            Cache::in_memory(),
            Arc::new(SolcToolchain::new("solc", config.compile.solc_optimize)),
            Arc::new(SorobanToolchain::default()),
        )
    }

    pub fn with_parts(
        config: ForgeConfig,
        cache: Cache,
        evm_toolchain: Arc<dyn Toolchain>,
        soroban_toolchain: Arc<dyn Toolchain>,
    ) -> Result<Self> {
        config.validate()?;

        let store = ArtifactStore::open(config.artifacts_dir())?;
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(FsMetadataStore::new(config.metadata_dir()));

        let compiler = |toolchain: Arc<dyn Toolchain>| {
            CompilationService::new(toolchain, store.clone(), metadata.clone(), cache.clone())
                .with_timeout(config.compile_timeout())
                .with_metadata_ttl(config.cache.artifact_secs)
        };
        let evm_compiler = compiler(evm_toolchain);
        let soroban_compiler = compiler(soroban_toolchain);

        let engine = IntelligenceEngine::new(cache.clone(), config.cache.analysis_secs);
        let simulator = SimulationService::new(cache.clone(), config.networks.clone())
            .with_ttl(config.cache.simulation_secs);
        let deployer = DeploymentService::new(
            store.clone(),
            metadata.clone(),
            config.networks.clone(),
            config.polling.clone(),
        );
        let queues = Queues::new(JobPolicy::from(&config.jobs));

        tracing::debug!("Platform ready, data in {}", config.data_dir.display());
        Ok(Self {
            config,
            cache,
            store,
            metadata,
            engine,
            evm_compiler,
            soroban_compiler,
            simulator,
            deployer,
            queues,
        })
    }

    pub fn compiler(&self, kind: ArtifactKind) -> &CompilationService {
        match kind {
            ArtifactKind::Evm => &self.evm_compiler,
            ArtifactKind::Soroban => &self.soroban_compiler,
        }
    }

    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher::new(self.engine.clone(), self.deployer.clone())
            .with_compiler(self.evm_compiler.clone())
            .with_compiler(self.soroban_compiler.clone())
    }

    /// One worker per queue, configured from the job settings
    pub fn workers(&self) -> Vec<Worker> {
        let dispatcher = Arc::new(self.dispatcher());
        QueueName::ALL
            .iter()
            .map(|name| {
                Worker::new(self.queues.get(*name).clone(), dispatcher.clone(), self.cache.clone())
                    .with_concurrency(self.config.jobs.concurrency)
                    .with_rate_limit(self.config.jobs.rate_limit_per_sec)
            })
            .collect()
    }

    /// Runs workers until every queued job has settled, then stops them
    pub async fn run_until_drained(&self) {
        let handles: Vec<_> = self
            .workers()
            .into_iter()
            .map(|worker| tokio::spawn(async move { worker.run().await }))
            .collect();

        self.queues.drain().await;
        self.queues.close();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }
    }

    /// Stops the queues and releases the cache connection
    pub async fn shutdown(&self) {
        self.queues.close();
        self.cache.close().await;
        tracing::info!("Platform shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{tests::MockToolchain, CompileRequest},
        queue::{JobPayload, JobState},
    };
    use tempfile::TempDir;

    fn platform(dir: &TempDir) -> Platform {
        let config = ForgeConfig::builder()
            .data_dir(dir.path().to_path_buf())
            .build()
            .unwrap();
        Platform::with_parts(
            config,
            Cache::in_memory(),
            Arc::new(MockToolchain::default()),
            Arc::new(MockToolchain::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_queued_compile_produces_stored_artifact() {
        let dir = TempDir::new().unwrap();
        let platform = platform(&dir);

        let id = platform.queues.enqueue(JobPayload::Compile {
            chain: ArtifactKind::Evm,
            request: CompileRequest {
                source: "contract Test { uint256 public value = 1; }".to_string(),
                contract_name: None,
                network: "localhost".to_string(),
            },
        });
        let analyzed = platform.queues.enqueue(JobPayload::Analyze {
            source: "contract Test { uint256 public value = 1; }".to_string(),
        });
        platform.run_until_drained().await;

        let status = platform.queues.status(&id);
        assert_eq!(status.status, JobState::Completed);
        let artifact = status.result.unwrap()["artifactId"]
            .as_str()
            .unwrap()
            .to_string();
        let artifact = crate::artifacts::ArtifactId::parse(&artifact).unwrap();
        assert!(platform.store.exists(&artifact, ArtifactKind::Evm));
        assert_eq!(platform.queues.status(&analyzed).status, JobState::Completed);

        platform.shutdown().await;
        assert!(platform.queues.compile.is_closed());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = ForgeConfig::builder()
            .data_dir(dir.path().to_path_buf())
            .build()
            .unwrap();
        config.jobs.concurrency = 0;
        let result = Platform::with_parts(
            config,
            Cache::in_memory(),
            Arc::new(MockToolchain::default()),
            Arc::new(MockToolchain::default()),
        );
        assert!(result.is_err());
    }
}
