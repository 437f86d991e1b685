//! Configuration for the analysis, build and deployment pipeline

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

/// Main configuration, loaded once at process start
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Root directory for artifacts and metadata
    pub data_dir: PathBuf,

    /// External build settings
    pub compile: CompileSettings,

    /// Cache lifetimes
    pub cache: CacheTtls,

    /// Job queue defaults
    pub jobs: JobsConfig,

    /// Confirmation polling policies
    pub polling: PollingConfig,

    /// Known networks
    pub networks: NetworkRegistry,
}

/// Settings for external compiler invocations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompileSettings {
    /// Hard limit for one build command
    pub timeout_secs: u64,
    /// Optimizer flag passed to solc
    pub solc_optimize: bool,
}

/// Cache TTLs in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheTtls {
    pub analysis_secs: u64,
    pub simulation_secs: u64,
    pub artifact_secs: u64,
}

/// Default policy applied to every queued job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Total attempts including the first one
    pub attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub backoff_secs: u64,
    /// Completed jobs kept before pruning
    pub keep_completed: usize,
    /// Failed jobs kept before pruning
    pub keep_failed: usize,
    /// Jobs processed in parallel by one worker
    pub concurrency: usize,
    /// Jobs started per second by one worker
    pub rate_limit_per_sec: u32,
}

/// Exponential backoff with a ceiling and bounded attempt count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub evm: BackoffPolicy,
    pub stellar: BackoffPolicy,
}

/// EVM-style network endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvmNetwork {
    pub rpc_url: String,
    pub chain_id: u64,
}

/// Stellar network endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StellarNetwork {
    pub horizon_url: String,
    pub soroban_rpc_url: String,
    pub passphrase: String,
}

/// Networks addressable by key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkRegistry {
    pub evm: BTreeMap<String, EvmNetwork>,
    pub stellar: BTreeMap<String, StellarNetwork>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".chainsmith"),
            compile: CompileSettings::default(),
            cache: CacheTtls::default(),
            jobs: JobsConfig::default(),
            polling: PollingConfig::default(),
            networks: NetworkRegistry::default(),
        }
    }
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            solc_optimize: true,
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            analysis_secs: 3600,
            simulation_secs: 60,
            artifact_secs: 86_400,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_secs: 2,
            keep_completed: 100,
            keep_failed: 500,
            concurrency: 2,
            rate_limit_per_sec: 10,
        }
    }
}

impl BackoffPolicy {
    /// Confirmation polling: 2s start, x1.5 per attempt, 10s ceiling
    pub fn confirmation(max_attempts: u32) -> Self {
        Self {
            initial_ms: 2_000,
            factor: 1.5,
            max_delay_ms: 10_000,
            max_attempts,
        }
    }

    /// Delay to wait after the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_ms as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(scaled.min(self.max_delay_ms as f64) as u64)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            evm: BackoffPolicy::confirmation(60),
            stellar: BackoffPolicy::confirmation(30),
        }
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        let mut evm = BTreeMap::new();
        evm.insert(
            "localhost".to_string(),
            EvmNetwork {
                rpc_url: "http://localhost:8545".to_string(),
                chain_id: 31337,
            },
        );
        evm.insert(
            "sepolia".to_string(),
            EvmNetwork {
                rpc_url: "https://rpc.sepolia.org".to_string(),
                chain_id: 11_155_111,
            },
        );

        let mut stellar = BTreeMap::new();
        stellar.insert(
            "testnet".to_string(),
            StellarNetwork {
                horizon_url: "https://horizon-testnet.stellar.org".to_string(),
                soroban_rpc_url: "https://soroban-testnet.stellar.org".to_string(),
                passphrase: "Test SDF Network ; September 2015".to_string(),
            },
        );
        stellar.insert(
            "futurenet".to_string(),
            StellarNetwork {
                horizon_url: "https://horizon-futurenet.stellar.org".to_string(),
                soroban_rpc_url: "https://rpc-futurenet.stellar.org".to_string(),
                passphrase: "Test SDF Future Network ; October 2022".to_string(),
            },
        );

        Self { evm, stellar }
    }
}

impl NetworkRegistry {
    pub fn evm(&self, key: &str) -> Option<&EvmNetwork> {
        self.evm.get(key)
    }

    pub fn stellar(&self, key: &str) -> Option<&StellarNetwork> {
        self.stellar.get(key)
    }
}

impl ForgeConfig {
    /// Reads a TOML configuration file; missing sections use defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ForgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile.timeout_secs)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }

    /// Validates the entire configuration
    pub fn validate(&self) -> Result<()> {
        if self.compile.timeout_secs == 0 {
            return Err(eyre::eyre!("compile.timeout_secs must be greater than zero"));
        }
        if self.jobs.attempts == 0 {
            return Err(eyre::eyre!("jobs.attempts must be at least 1"));
        }
        if self.jobs.concurrency == 0 {
            return Err(eyre::eyre!("jobs.concurrency must be at least 1"));
        }
        for (name, policy) in [("evm", &self.polling.evm), ("stellar", &self.polling.stellar)] {
            if policy.max_attempts == 0 {
                return Err(eyre::eyre!("polling.{name}.max_attempts must be at least 1"));
            }
        }
        for (key, network) in &self.networks.evm {
            if network.rpc_url.is_empty() {
                return Err(eyre::eyre!("EVM network '{key}' has an empty rpc_url"));
            }
        }
        for (key, network) in &self.networks.stellar {
            if network.horizon_url.is_empty() || network.soroban_rpc_url.is_empty() {
                return Err(eyre::eyre!("Stellar network '{key}' has an empty endpoint"));
            }
        }
        Ok(())
    }

    /// Create a new builder for ForgeConfig
    pub fn builder() -> ForgeConfigBuilder {
        ForgeConfigBuilder::default()
    }
}

/// Builder for creating ForgeConfig with a fluent API
#[derive(Default)]
pub struct ForgeConfigBuilder {
    config: ForgeConfig,
}

impl ForgeConfigBuilder {
    pub fn data_dir(mut self, path: PathBuf) -> Self {
        self.config.data_dir = path;
        self
    }

    pub fn compile_timeout(mut self, timeout: Duration) -> Self {
        self.config.compile.timeout_secs = timeout.as_secs();
        self
    }

    pub fn jobs(mut self, configure: impl FnOnce(&mut JobsConfig)) -> Self {
        configure(&mut self.config.jobs);
        self
    }

    pub fn polling(mut self, configure: impl FnOnce(&mut PollingConfig)) -> Self {
        configure(&mut self.config.polling);
        self
    }

    pub fn evm_network(mut self, key: impl Into<String>, network: EvmNetwork) -> Self {
        self.config.networks.evm.insert(key.into(), network);
        self
    }

    pub fn stellar_network(mut self, key: impl Into<String>, network: StellarNetwork) -> Self {
        self.config.networks.stellar.insert(key.into(), network);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ForgeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
