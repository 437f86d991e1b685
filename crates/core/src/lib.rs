//! Analysis, compilation and deployment pipeline for EVM and Soroban contracts
pub mod analysis;
pub mod artifacts;
pub mod cache;
pub mod chain;
pub mod compiler;
pub mod config;
pub mod deploy;
pub mod error;
pub mod platform;
pub mod queue;
pub mod simulate;
pub mod utils;

pub use analysis::{analyze_contract, AnalysisResult, IntelligenceEngine};
pub use artifacts::{ArtifactId, ArtifactKind, ArtifactStore};
pub use cache::{Cache, CacheBackend, MemoryBackend};
pub use compiler::{CompilationService, CompileReport, CompileRequest};
pub use config::{ForgeConfig, ForgeConfigBuilder};
pub use deploy::{DeployOptions, DeploymentService, SubmitRequest, UnsignedTransaction};
pub use error::{Error, ErrorKind, Outcome, Result};
pub use platform::Platform;
pub use queue::{JobPayload, JobQueue, JobStatus, Queues, Worker};
pub use simulate::{SimulationRequest, SimulationResult, SimulationService};
