//! Two-phase contract deployment for both chain families.
//!
//! `build_transaction` resolves a stored artifact and returns an unsigned
//! transaction for an external wallet to sign; `submit` broadcasts the signed
//! result, polls until the chain confirms it and records the deployment.

mod evm;
mod stellar;

pub use evm::{encode_deployment, fallback_gas_limit, infer_constructor_token};
pub use stellar::created_identifier;

use crate::{
    artifacts::{
        metadata::{DeploymentRecord, MetadataStore},
        ArtifactId, ArtifactKind, ArtifactStore,
    },
    chain::{EvmConnector, HttpEvmConnector, HttpStellarConnector, StellarConnector},
    config::{NetworkRegistry, PollingConfig},
    error::{Error, Outcome, Result},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Parameters for building an unsigned deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOptions {
    pub chain: ArtifactKind,
    pub artifact_id: String,
    pub network: String,
    /// Stellar account paying for and sequencing the upload
    #[serde(default)]
    pub source_account: Option<String>,
    /// EVM constructor arguments, types inferred from the values
    #[serde(default)]
    pub constructor_args: Vec<Value>,
}

/// Signed transaction handed back for broadcasting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub chain: ArtifactKind,
    pub artifact_id: String,
    pub network: String,
    /// Raw signed transaction hex (EVM) or signed envelope XDR (Stellar)
    pub signed_transaction: String,
}

/// Result of [`DeploymentService::validate_deployment_options`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsCheck {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmDeployTransaction {
    /// `0x` creation bytecode followed by encoded constructor arguments
    pub data: String,
    pub chain_id: u64,
    pub gas_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StellarDeployTransaction {
    /// Unsigned `TransactionEnvelope` as base64 XDR
    pub envelope_xdr: String,
    pub network_passphrase: String,
    pub fee: u32,
    pub sequence: i64,
}

/// Unsigned transaction for an external signer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chain", rename_all = "lowercase")]
pub enum UnsignedTransaction {
    Evm(EvmDeployTransaction),
    Stellar(StellarDeployTransaction),
}

/// Builds, submits and confirms deployments
#[derive(Clone)]
pub struct DeploymentService {
    store: ArtifactStore,
    metadata: Arc<dyn MetadataStore>,
    networks: NetworkRegistry,
    polling: PollingConfig,
    evm: Arc<dyn EvmConnector>,
    stellar: Arc<dyn StellarConnector>,
}

impl DeploymentService {
    pub fn new(
        store: ArtifactStore,
        metadata: Arc<dyn MetadataStore>,
        networks: NetworkRegistry,
        polling: PollingConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            networks,
            polling,
            evm: Arc::new(HttpEvmConnector),
            stellar: Arc::new(HttpStellarConnector),
        }
    }

    pub fn with_connectors(
        mut self,
        evm: Arc<dyn EvmConnector>,
        stellar: Arc<dyn StellarConnector>,
    ) -> Self {
        self.evm = evm;
        self.stellar = stellar;
        self
    }

    /// Checks options without touching the network
    pub fn validate_deployment_options(&self, options: &DeployOptions) -> OptionsCheck {
        match self.check_options(options) {
            Ok(_) => OptionsCheck {
                valid: true,
                error: None,
            },
            Err(e) => OptionsCheck {
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }

    fn check_options(&self, options: &DeployOptions) -> Result<ArtifactId> {
        if options.artifact_id.trim().is_empty() {
            return Err(Error::validation("artifactId is required"));
        }
        if options.network.trim().is_empty() {
            return Err(Error::validation("network is required"));
        }
        let id = ArtifactId::parse(&options.artifact_id)?;
        self.check_network(options.chain, &options.network)?;

        if options.chain == ArtifactKind::Soroban
            && options
                .source_account
                .as_deref()
                .map_or(true, |account| account.trim().is_empty())
        {
            return Err(Error::validation(
                "sourceAccount is required for Stellar deployments",
            ));
        }
        Ok(id)
    }

    fn check_network(&self, chain: ArtifactKind, network: &str) -> Result<()> {
        let known = match chain {
            ArtifactKind::Evm => self.networks.evm(network).is_some(),
            ArtifactKind::Soroban => self.networks.stellar(network).is_some(),
        };
        if !known {
            return Err(Error::validation(format!(
                "Unknown {chain} network '{network}'"
            )));
        }
        Ok(())
    }

    /// Resolves the artifact and builds an unsigned deployment transaction
    pub async fn build_transaction(&self, options: &DeployOptions) -> Outcome<UnsignedTransaction> {
        let mut warnings = Vec::new();
        let result = match self.check_options(options) {
            Ok(id) => match options.chain {
                ArtifactKind::Evm => self
                    .build_evm(options, &id, &mut warnings)
                    .await
                    .map(UnsignedTransaction::Evm),
                ArtifactKind::Soroban => self
                    .build_stellar(options, &id, &mut warnings)
                    .await
                    .map(UnsignedTransaction::Stellar),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(tx) => Outcome::with_warnings(tx, warnings),
            Err(e) => {
                tracing::warn!("Building {} deployment failed: {}", options.chain, e);
                Outcome::failure(&e)
            }
        }
    }

    /// Broadcasts a signed deployment and waits for confirmation
    pub async fn submit(&self, request: &SubmitRequest) -> Outcome<DeploymentRecord> {
        let mut warnings = Vec::new();
        match self.submit_inner(request, &mut warnings).await {
            Ok(record) => {
                self.record(&record).await;
                Outcome::with_warnings(record, warnings)
            }
            Err(e) => {
                tracing::warn!("{} deployment submission failed: {}", request.chain, e);
                Outcome::failure(&e)
            }
        }
    }

    async fn submit_inner(
        &self,
        request: &SubmitRequest,
        warnings: &mut Vec<String>,
    ) -> Result<DeploymentRecord> {
        if request.signed_transaction.trim().is_empty() {
            return Err(Error::validation("signedTransaction is required"));
        }
        let id = ArtifactId::parse(&request.artifact_id)?;
        self.check_network(request.chain, &request.network)?;

        match request.chain {
            ArtifactKind::Evm => self.submit_evm(request, id).await,
            ArtifactKind::Soroban => self.submit_stellar(request, id, warnings).await,
        }
    }

    /// Secondary bookkeeping; failures are logged only
    async fn record(&self, record: &DeploymentRecord) {
        if let Err(e) = self.metadata.record_deployment(record).await {
            tracing::warn!(
                "Failed to record deployment of {} at {}: {}",
                record.artifact_id,
                record.onchain_id,
                e
            );
        }
    }
}
