//! CLI for the chainsmith pipeline
//!
//! Analyzes, compiles, simulates and deploys EVM and Soroban contracts.

use chainsmith::{
    error::OutcomeError, queue::JobState, ArtifactId, ArtifactKind, DeployOptions, ErrorKind,
    ForgeConfig, JobPayload, Outcome, Platform, SimulationRequest, SubmitRequest,
};
use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Smart contract analysis, build and deployment pipeline
#[derive(Parser, Debug)]
#[command(name = "chainsmith")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory holding artifacts and metadata
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output JSON to stdout
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all logging except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score risk, estimate gas and suggest UI fields for Solidity source
    Analyze {
        /// Solidity source file
        file: PathBuf,
    },

    /// Compile a contract and store the artifact
    Compile {
        /// Contract source file
        file: PathBuf,

        /// Chain family: evm or soroban
        #[arg(long, default_value = "evm")]
        chain: ArtifactKind,

        /// Contract to build; derived from the source when omitted
        #[arg(long)]
        contract_name: Option<String>,

        /// Target network key
        #[arg(long, default_value = "localhost")]
        network: String,
    },

    /// Inspect the artifact store
    Artifact {
        #[command(subcommand)]
        command: ArtifactCommands,
    },

    /// Run a read-only call described by a JSON request file
    Simulate {
        /// SimulationRequest JSON file
        request: PathBuf,
    },

    /// Two-phase deployment
    Deploy {
        #[command(subcommand)]
        command: DeployCommands,
    },

    /// Background job processing
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ArtifactCommands {
    /// Check whether an artifact is stored
    Exists {
        id: String,
        #[arg(long, default_value = "evm")]
        chain: ArtifactKind,
    },

    /// Read an artifact, printing hex or writing the raw bytes to a file
    Get {
        id: String,
        #[arg(long, default_value = "evm")]
        chain: ArtifactKind,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete an artifact
    Delete {
        id: String,
        #[arg(long, default_value = "evm")]
        chain: ArtifactKind,
    },

    /// List stored artifact ids
    List {
        #[arg(long, default_value = "evm")]
        chain: ArtifactKind,
    },
}

#[derive(Subcommand, Debug)]
enum DeployCommands {
    /// Build an unsigned deployment transaction for an external signer
    Build {
        #[arg(long)]
        chain: ArtifactKind,
        #[arg(long)]
        artifact_id: String,
        #[arg(long)]
        network: String,
        /// Stellar account that signs and pays for the upload
        #[arg(long)]
        source_account: Option<String>,
        /// EVM constructor arguments as a JSON array
        #[arg(long)]
        args: Option<String>,
    },

    /// Broadcast a signed transaction and wait for confirmation
    Submit {
        #[arg(long)]
        chain: ArtifactKind,
        #[arg(long)]
        artifact_id: String,
        #[arg(long)]
        network: String,
        /// Signed transaction hex (EVM) or envelope XDR (Stellar)
        #[arg(long)]
        signed: String,
    },
}

#[derive(Subcommand, Debug)]
enum JobCommands {
    /// Enqueue jobs from a JSON array file and process them until drained
    Run {
        /// JSON file holding an array of job payloads
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct ErrorOutput {
    status: &'static str,
    error: ErrorKind,
    message: String,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = tokio::runtime::Runtime::new()
        .context("Failed to create async runtime")
        .and_then(|runtime| runtime.block_on(run(cli)));

    if let Err(e) = result {
        output_error(&e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<ForgeConfig> {
    let mut config = match &cli.config {
        Some(path) => ForgeConfig::load(path)?,
        None => ForgeConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let platform = Platform::new(load_config(&cli)?)?;
    let json = cli.json;

    let result = match cli.command {
        Commands::Analyze { file } => {
            let source = read_source(&file)?;
            let outcome = platform.engine.analyze(&source).await;
            report(outcome, json, |analysis| {
                println!("🔍 Analyzed {} contract(s)", analysis.contracts.len());
                for function in &analysis.functions {
                    println!(
                        "   {}.{}: risk {} ({:?}), ~{} gas",
                        function.contract,
                        function.name,
                        function.risk.score,
                        function.risk.level,
                        function.gas_estimate
                    );
                }
                for recommendation in &analysis.recommendations {
                    println!("💡 {}", recommendation.message);
                }
            })
        }
        Commands::Compile {
            file,
            chain,
            contract_name,
            network,
        } => {
            let request = chainsmith::CompileRequest {
                source: read_source(&file)?,
                contract_name,
                network,
            };
            let outcome = platform.compiler(chain).compile(&request).await;
            report(outcome, json, |compiled| {
                println!("✅ Successfully compiled {}", compiled.contract_name);
                println!("📄 Artifact: {}", compiled.artifact_id);
                println!("   - key: {}", compiled.key);
                println!("   - size: {} bytes", compiled.size);
                println!("   - build time: {} ms", compiled.duration_ms);
            })
        }
        Commands::Artifact { command } => run_artifact(&platform, command, json),
        Commands::Simulate { request } => {
            let request: SimulationRequest = read_json(&request)?;
            let outcome = platform.simulator.simulate(&request).await;
            report(outcome, json, |simulated| {
                println!("🧪 {} on {}", simulated.function_name, simulated.network);
                println!("   Result: {}", simulated.result);
                if let Some(estimate) = &simulated.estimate {
                    println!("   Estimate: {estimate}");
                }
                if simulated.offline {
                    println!("   (estimated offline from source)");
                }
            })
        }
        Commands::Deploy { command } => run_deploy(&platform, command, json).await,
        Commands::Jobs {
            command: JobCommands::Run { file },
        } => run_jobs(&platform, &file, json).await,
    };

    platform.shutdown().await;
    result
}

fn run_artifact(platform: &Platform, command: ArtifactCommands, json: bool) -> Result<()> {
    match command {
        ArtifactCommands::Exists { id, chain } => {
            let id = ArtifactId::parse(&id)?;
            let exists = platform.store.exists(&id, chain);
            report(Outcome::success(json!({ "id": id, "exists": exists })), json, |_| {
                println!("{}", if exists { "✅ present" } else { "❌ missing" });
            })
        }
        ArtifactCommands::Get { id, chain, output } => {
            let id = ArtifactId::parse(&id)?;
            let bytes = platform.store.load(&id, chain)?;
            if let Some(path) = &output {
                std::fs::write(path, &bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            let data = json!({
                "id": id,
                "size": bytes.len(),
                "bytes": output.is_none().then(|| format!("0x{}", hex::encode(&bytes))),
            });
            report(Outcome::success(data), json, |data| match &output {
                Some(path) => println!("📁 Wrote {} bytes to {}", bytes.len(), path.display()),
                None => println!("{}", data["bytes"].as_str().unwrap_or_default()),
            })
        }
        ArtifactCommands::Delete { id, chain } => {
            let id = ArtifactId::parse(&id)?;
            let deleted = platform.store.delete(&id, chain)?;
            report(Outcome::success(json!({ "id": id, "deleted": deleted })), json, |_| {
                println!("{}", if deleted { "🗑️  deleted" } else { "nothing to delete" });
            })
        }
        ArtifactCommands::List { chain } => {
            let ids = platform.store.list(chain)?;
            report(Outcome::success(ids), json, |ids| {
                for id in ids {
                    println!("{id}");
                }
            })
        }
    }
}

async fn run_deploy(platform: &Platform, command: DeployCommands, json: bool) -> Result<()> {
    match command {
        DeployCommands::Build {
            chain,
            artifact_id,
            network,
            source_account,
            args,
        } => {
            let constructor_args: Vec<Value> = match args {
                Some(args) => serde_json::from_str(&args).context("--args must be a JSON array")?,
                None => Vec::new(),
            };
            let options = DeployOptions {
                chain,
                artifact_id,
                network,
                source_account,
                constructor_args,
            };
            let outcome = platform.deployer.build_transaction(&options).await;
            report(outcome, json, |tx| {
                println!("📝 Unsigned transaction (sign externally, then run `deploy submit`):");
                println!("{}", serde_json::to_string_pretty(tx).unwrap_or_default());
            })
        }
        DeployCommands::Submit {
            chain,
            artifact_id,
            network,
            signed,
        } => {
            let request = SubmitRequest {
                chain,
                artifact_id,
                network,
                signed_transaction: signed,
            };
            let outcome = platform.deployer.submit(&request).await;
            report(outcome, json, |record| {
                println!("🚀 Deployed {} on {}", record.artifact_id, record.network);
                println!("   On-chain id: {}", record.onchain_id);
                println!("   Transaction: {}", record.transaction_hash);
            })
        }
    }
}

async fn run_jobs(platform: &Platform, file: &Path, json: bool) -> Result<()> {
    let payloads: Vec<JobPayload> = read_json(file)?;
    let ids: Vec<String> = payloads
        .into_iter()
        .map(|payload| platform.queues.enqueue(payload))
        .collect();
    tracing::info!("Queued {} job(s)", ids.len());

    platform.run_until_drained().await;

    let statuses: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "id": id, "job": platform.queues.status(id) }))
        .collect();
    let failed = ids
        .iter()
        .filter(|id| platform.queues.status(id).status == JobState::Failed)
        .count();

    report(Outcome::success(statuses), json, |statuses| {
        for entry in statuses {
            println!("{} {}", entry["id"].as_str().unwrap_or_default(), entry["job"]);
        }
    })?;
    if failed > 0 {
        return Err(eyre::eyre!("{failed} job(s) failed"));
    }
    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = read_source(path)?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Prints an outcome; a failure becomes the command's error
fn report<T: Serialize>(outcome: Outcome<T>, json: bool, describe: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&outcome)?);
    }
    match outcome {
        Outcome::Success { data, warnings } => {
            if !json {
                describe(&data);
                for warning in warnings {
                    println!("⚠️  {warning}");
                }
            }
            Ok(())
        }
        Outcome::Failure { error, details } => Err(OutcomeError {
            kind: error,
            details,
        }
        .into()),
    }
}

fn output_error(error: &eyre::Report) {
    let kind = if let Some(e) = error.downcast_ref::<OutcomeError>() {
        e.kind
    } else if let Some(e) = error.downcast_ref::<chainsmith::Error>() {
        e.kind()
    } else {
        ErrorKind::Internal
    };

    let output = ErrorOutput {
        status: "error",
        error: kind,
        message: format!("{error:#}"),
    };
    match serde_json::to_string(&output) {
        Ok(line) => eprintln!("{line}"),
        Err(_) => eprintln!("{error:#}"),
    }
}
