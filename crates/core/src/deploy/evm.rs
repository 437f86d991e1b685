use super::{DeployOptions, DeploymentService, EvmDeployTransaction, SubmitRequest};
use crate::{
    artifacts::{metadata::DeploymentRecord, ArtifactId, ArtifactKind},
    chain::poll_until,
    config::EvmNetwork,
    error::{Error, Result},
};
use chrono::Utc;
use ethers::{
    abi::Token,
    types::{
        transaction::eip2718::TypedTransaction, Address, TransactionRequest, U256, U64,
    },
};
use serde_json::Value;

const BASE_TX_GAS: u64 = 21_000;
const GAS_PER_BYTE: u64 = 200;

/// Maps a JSON constructor argument to an ABI token.
///
/// `0x` + 40 hex digits is an address, a non-negative integer or all-digit
/// string is a uint256, other `0x` hex is bytes, remaining strings are
/// strings and booleans are bools.
pub fn infer_constructor_token(arg: &Value) -> Result<Token> {
    match arg {
        Value::Bool(b) => Ok(Token::Bool(*b)),
        Value::Number(n) => n
            .as_u64()
            .map(|v| Token::Uint(U256::from(v)))
            .ok_or_else(|| Error::validation(format!("Numeric argument {n} is not a uint256"))),
        Value::String(s) => {
            if let Some(digits) = s.strip_prefix("0x") {
                let is_hex = digits.bytes().all(|b| b.is_ascii_hexdigit());
                if is_hex && digits.len() == 40 {
                    let address: Address = s
                        .parse()
                        .map_err(|e| Error::validation(format!("Invalid address {s}: {e}")))?;
                    return Ok(Token::Address(address));
                }
                if is_hex && digits.len() % 2 == 0 {
                    let bytes = hex::decode(digits)
                        .map_err(|e| Error::validation(format!("Invalid hex {s}: {e}")))?;
                    return Ok(Token::Bytes(bytes));
                }
            }
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                let value = U256::from_dec_str(s)
                    .map_err(|e| Error::validation(format!("Invalid uint256 {s}: {e}")))?;
                return Ok(Token::Uint(value));
            }
            Ok(Token::String(s.clone()))
        }
        other => Err(Error::validation(format!(
            "Unsupported constructor argument: {other}"
        ))),
    }
}

/// Creation bytecode followed by the ABI-encoded constructor arguments
pub fn encode_deployment(bytecode: &[u8], args: &[Value]) -> Result<Vec<u8>> {
    let tokens = args
        .iter()
        .map(infer_constructor_token)
        .collect::<Result<Vec<_>>>()?;

    let mut data = bytecode.to_vec();
    data.extend(ethers::abi::encode(&tokens));
    Ok(data)
}

/// Gas limit used when the node cannot estimate the deployment
pub fn fallback_gas_limit(bytecode_len: usize) -> u64 {
    BASE_TX_GAS + bytecode_len as u64 * GAS_PER_BYTE
}

/// Node estimate plus a 20% safety margin
fn with_margin(estimate: U256) -> u64 {
    let padded = estimate.saturating_mul(U256::from(12)) / U256::from(10);
    if padded > U256::from(u64::MAX) {
        u64::MAX
    } else {
        padded.as_u64()
    }
}

impl DeploymentService {
    fn evm_network(&self, key: &str) -> Result<&EvmNetwork> {
        self.networks
            .evm(key)
            .ok_or_else(|| Error::validation(format!("Unknown evm network '{key}'")))
    }

    pub(super) async fn build_evm(
        &self,
        options: &DeployOptions,
        id: &ArtifactId,
        warnings: &mut Vec<String>,
    ) -> Result<EvmDeployTransaction> {
        let network = self.evm_network(&options.network)?;
        let bytecode = self.store.load(id, ArtifactKind::Evm)?;
        let data = encode_deployment(&bytecode, &options.constructor_args)?;

        let rpc = self.evm.connect(network)?;
        let tx: TypedTransaction = TransactionRequest::new()
            .data(data.clone())
            .chain_id(network.chain_id)
            .into();

        let gas_limit = match rpc.estimate_gas(&tx).await {
            Ok(estimate) => with_margin(estimate),
            Err(e) => {
                let fallback = fallback_gas_limit(bytecode.len());
                tracing::warn!("Gas estimation failed, using {}: {}", fallback, e);
                warnings.push(format!(
                    "Gas estimation failed ({e}); using heuristic limit {fallback}"
                ));
                fallback
            }
        };

        tracing::info!(
            "Prepared deployment of {} for {} ({} bytes, gas limit {})",
            id,
            options.network,
            data.len(),
            gas_limit
        );
        Ok(EvmDeployTransaction {
            data: format!("0x{}", hex::encode(&data)),
            chain_id: network.chain_id,
            gas_limit,
        })
    }

    pub(super) async fn submit_evm(
        &self,
        request: &SubmitRequest,
        id: ArtifactId,
    ) -> Result<DeploymentRecord> {
        let network = self.evm_network(&request.network)?;
        let raw = hex::decode(request.signed_transaction.trim().trim_start_matches("0x"))
            .map_err(|e| Error::validation(format!("Signed transaction is not hex: {e}")))?;

        let rpc = self.evm.connect(network)?;
        let hash = rpc.send_raw_transaction(raw.into()).await?;
        let hash_hex = format!("{hash:?}");
        tracing::info!("Broadcast deployment {} on {}", hash_hex, request.network);

        let receipt = poll_until(&self.polling.evm, &hash_hex, || {
            let rpc = rpc.clone();
            async move { rpc.transaction_receipt(hash).await }
        })
        .await?;

        if receipt.status == Some(U64::zero()) {
            return Err(Error::TransactionFailed {
                hash: hash_hex,
                reason: "deployment reverted".to_string(),
            });
        }
        let address = receipt.contract_address.ok_or_else(|| Error::TransactionFailed {
            hash: hash_hex.clone(),
            reason: "receipt has no contract address".to_string(),
        })?;

        tracing::info!("Contract {:?} deployed in {}", address, hash_hex);
        Ok(DeploymentRecord {
            artifact_id: id,
            kind: ArtifactKind::Evm,
            network: request.network.clone(),
            deployer: format!("{:?}", receipt.from),
            onchain_id: format!("{address:?}"),
            transaction_hash: hash_hex,
            deployed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructor_type_inference() {
        let address = format!("0x{}", "ab".repeat(20));
        assert!(matches!(
            infer_constructor_token(&json!(address)).unwrap(),
            Token::Address(_)
        ));
        assert_eq!(
            infer_constructor_token(&json!(1000)).unwrap(),
            Token::Uint(U256::from(1000))
        );
        assert_eq!(
            infer_constructor_token(&json!("1000000000000000000000")).unwrap(),
            Token::Uint(U256::from_dec_str("1000000000000000000000").unwrap())
        );
        assert_eq!(
            infer_constructor_token(&json!("My Token")).unwrap(),
            Token::String("My Token".to_string())
        );
        assert_eq!(
            infer_constructor_token(&json!(true)).unwrap(),
            Token::Bool(true)
        );
        assert_eq!(
            infer_constructor_token(&json!("0xdeadbeef")).unwrap(),
            Token::Bytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert!(infer_constructor_token(&json!(-1)).is_err());
        assert!(infer_constructor_token(&json!({"nested": 1})).is_err());
    }

    #[test]
    fn test_gas_helpers() {
        assert_eq!(fallback_gas_limit(0), 21_000);
        assert_eq!(fallback_gas_limit(100), 41_000);
        assert_eq!(with_margin(U256::from(50_000)), 60_000);
        assert_eq!(with_margin(U256::MAX), u64::MAX);
    }
}
