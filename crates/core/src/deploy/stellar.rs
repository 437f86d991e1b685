use super::{DeployOptions, DeploymentService, StellarDeployTransaction, SubmitRequest};
use crate::{
    artifacts::{metadata::DeploymentRecord, ArtifactId, ArtifactKind},
    chain::{
        poll_until,
        stellar::{
            account_id, address_to_strkey, host_function_transaction, unsigned_envelope_xdr,
            SimulateResponse,
        },
    },
    config::StellarNetwork,
    error::{Error, Result},
};
use chrono::Utc;
use stellar_xdr::curr::{
    AccountId, HostFunction, Limits, MuxedAccount, ReadXdr, ScVal, SorobanTransactionData,
    Transaction, TransactionEnvelope, TransactionExt, TransactionMeta, Uint256,
};

fn upload_transaction(source: &AccountId, sequence: i64, wasm: Vec<u8>) -> Result<Transaction> {
    let code = wasm
        .try_into()
        .map_err(|e| Error::validation(format!("WASM too large for one upload: {e}")))?;
    host_function_transaction(source, sequence, HostFunction::UploadContractWasm(code))
}

/// Attaches simulated resource data and raises the fee by the resource fee
fn apply_simulation(tx: &mut Transaction, simulation: &SimulateResponse) -> Result<()> {
    if let Some(error) = &simulation.error {
        return Err(Error::network(format!("Simulation failed: {error}")));
    }
    let Some(data) = &simulation.transaction_data else {
        return Err(Error::network("Simulation returned no resource data"));
    };

    let data = SorobanTransactionData::from_xdr_base64(data, Limits::none())
        .map_err(|e| Error::network(format!("Invalid resource data: {e}")))?;
    let resource_fee: u32 = simulation
        .min_resource_fee
        .as_deref()
        .unwrap_or("0")
        .parse()
        .map_err(|e| Error::network(format!("Invalid minResourceFee: {e}")))?;

    tx.ext = TransactionExt::V1(data);
    tx.fee = tx.fee.saturating_add(resource_fee);
    Ok(())
}

fn source_strkey(envelope: &TransactionEnvelope) -> Option<String> {
    let key = match envelope {
        TransactionEnvelope::Tx(env) => match &env.tx.source_account {
            MuxedAccount::Ed25519(Uint256(key)) => *key,
            MuxedAccount::MuxedEd25519(muxed) => muxed.ed25519.0,
        },
        TransactionEnvelope::TxV0(env) => env.tx.source_account_ed25519.0,
        TransactionEnvelope::TxFeeBump(_) => return None,
    };
    Some(stellar_strkey::ed25519::PublicKey(key).to_string())
}

/// On-chain identifier carried by a host function's return value: the
/// uploaded WASM hash (hex) or a created contract's `C...` address
pub fn created_identifier(value: &ScVal) -> Option<String> {
    match value {
        ScVal::Bytes(bytes) => Some(hex::encode(bytes.0.as_slice())),
        ScVal::Address(address) => Some(address_to_strkey(address)),
        _ => None,
    }
}

fn identifier_from_meta(meta_xdr: &str) -> Result<Option<String>> {
    let meta = TransactionMeta::from_xdr_base64(meta_xdr, Limits::none())
        .map_err(|e| Error::network(format!("Invalid transaction meta: {e}")))?;
    let identifier = match meta {
        TransactionMeta::V3(v3) => v3
            .soroban_meta
            .and_then(|soroban| created_identifier(&soroban.return_value)),
        _ => None,
    };
    Ok(identifier)
}

impl DeploymentService {
    fn stellar_network(&self, key: &str) -> Result<&StellarNetwork> {
        self.networks
            .stellar(key)
            .ok_or_else(|| Error::validation(format!("Unknown soroban network '{key}'")))
    }

    pub(super) async fn build_stellar(
        &self,
        options: &DeployOptions,
        id: &ArtifactId,
        warnings: &mut Vec<String>,
    ) -> Result<StellarDeployTransaction> {
        let network = self.stellar_network(&options.network)?;
        let source = options
            .source_account
            .as_deref()
            .ok_or_else(|| Error::validation("sourceAccount is required for Stellar deployments"))?;
        let source_id = account_id(source.trim())?;
        let wasm = self.store.load(id, ArtifactKind::Soroban)?;

        let rpc = self.stellar.connect(network)?;
        let sequence = rpc.load_account_sequence(source.trim()).await? + 1;
        let mut tx = upload_transaction(&source_id, sequence, wasm)?;

        let simulated = match rpc.simulate_transaction(&unsigned_envelope_xdr(tx.clone())?).await {
            Ok(simulation) => apply_simulation(&mut tx, &simulation),
            Err(e) => Err(e),
        };
        if let Err(e) = simulated {
            tracing::warn!("Upload simulation for {} failed: {}", id, e);
            warnings.push(format!(
                "Resource simulation unavailable ({e}); the transaction may need preparing before signing"
            ));
        }

        tracing::info!(
            "Prepared WASM upload of {} for {} (sequence {}, fee {})",
            id,
            options.network,
            sequence,
            tx.fee
        );
        Ok(StellarDeployTransaction {
            fee: tx.fee,
            envelope_xdr: unsigned_envelope_xdr(tx)?,
            network_passphrase: network.passphrase.clone(),
            sequence,
        })
    }

    pub(super) async fn submit_stellar(
        &self,
        request: &SubmitRequest,
        id: ArtifactId,
        warnings: &mut Vec<String>,
    ) -> Result<DeploymentRecord> {
        let network = self.stellar_network(&request.network)?;
        let signed = request.signed_transaction.trim();
        let envelope = TransactionEnvelope::from_xdr_base64(signed, Limits::none())
            .map_err(|e| Error::validation(format!("Invalid signed envelope: {e}")))?;
        let deployer = source_strkey(&envelope).unwrap_or_default();

        let rpc = self.stellar.connect(network)?;
        let sent = rpc.send_transaction(signed).await?;
        if !sent.accepted() {
            return Err(Error::TransactionFailed {
                hash: sent.hash,
                reason: format!(
                    "submission status {} {}",
                    sent.status,
                    sent.error_result_xdr.unwrap_or_default()
                )
                .trim()
                .to_string(),
            });
        }
        tracing::info!("Submitted {} on {}", sent.hash, request.network);

        let status = poll_until(&self.polling.stellar, &sent.hash, || {
            let rpc = rpc.clone();
            let hash = sent.hash.clone();
            async move {
                let status = rpc.get_transaction(&hash).await?;
                let state = status.status.clone();
                match state.as_str() {
                    "SUCCESS" => Ok(Some(status)),
                    "FAILED" => Err(Error::TransactionFailed {
                        hash,
                        reason: status
                            .result_xdr
                            .unwrap_or_else(|| "transaction failed".to_string()),
                    }),
                    _ => Ok(None),
                }
            }
        })
        .await?;

        let identifier = match status.result_meta_xdr.as_deref().map(identifier_from_meta) {
            Some(Ok(Some(identifier))) => Some(identifier),
            Some(Err(e)) => {
                tracing::warn!("Could not read result meta of {}: {}", sent.hash, e);
                None
            }
            _ => None,
        };
        // The network keys uploaded code by its SHA-256, which is the artifact id
        let onchain_id = identifier.unwrap_or_else(|| {
            warnings.push("No return value in transaction meta; using the WASM hash".to_string());
            id.to_string()
        });

        tracing::info!("Upload {} confirmed as {}", sent.hash, onchain_id);
        Ok(DeploymentRecord {
            artifact_id: id,
            kind: ArtifactKind::Soroban,
            network: request.network.clone(),
            deployer,
            onchain_id,
            transaction_hash: sent.hash,
            deployed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::stellar::{sc_address, BASE_FEE};
    use stellar_xdr::curr::ScBytes;

    #[test]
    fn test_created_identifier() {
        let hash = ScVal::Bytes(ScBytes(vec![0xab; 32].try_into().unwrap()));
        assert_eq!(created_identifier(&hash), Some("ab".repeat(32)));

        let contract = stellar_strkey::Contract([9; 32]).to_string();
        let address = ScVal::Address(sc_address(&contract).unwrap());
        assert_eq!(created_identifier(&address), Some(contract));

        assert_eq!(created_identifier(&ScVal::Void), None);
    }

    #[test]
    fn test_simulation_errors_leave_transaction_untouched() {
        let source = account_id(&stellar_strkey::ed25519::PublicKey([5; 32]).to_string()).unwrap();
        let mut tx = upload_transaction(&source, 10, b"\0asm".to_vec()).unwrap();

        let failed = SimulateResponse {
            error: Some("HostError: Budget exceeded".to_string()),
            ..Default::default()
        };
        assert!(apply_simulation(&mut tx, &failed).is_err());

        let empty = SimulateResponse::default();
        assert!(apply_simulation(&mut tx, &empty).is_err());

        assert_eq!(tx.fee, BASE_FEE);
        assert_eq!(tx.ext, TransactionExt::V0);
    }

    #[test]
    fn test_source_strkey_roundtrip() {
        let strkey = stellar_strkey::ed25519::PublicKey([5; 32]).to_string();
        let tx = upload_transaction(&account_id(&strkey).unwrap(), 1, vec![0]).unwrap();
        let envelope =
            TransactionEnvelope::from_xdr_base64(unsigned_envelope_xdr(tx).unwrap(), Limits::none())
                .unwrap();
        assert_eq!(source_strkey(&envelope), Some(strkey));
    }
}
