//! EVM JSON-RPC access through ethers

use crate::{
    config::EvmNetwork,
    error::{Error, Result},
};
use async_trait::async_trait;
use ethers::{
    abi::{ParamType, Token},
    providers::{Http, Middleware, Provider},
    types::{transaction::eip2718::TypedTransaction, Bytes, TransactionReceipt, H256, I256, U256},
};
use serde_json::Value;
use std::sync::Arc;

/// The subset of EVM JSON-RPC the pipeline consumes
#[async_trait]
pub trait EvmRpc: Send + Sync {
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256>;

    /// `eth_call` against the latest block
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256>;

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>>;
}

/// Opens RPC clients for configured networks
pub trait EvmConnector: Send + Sync {
    fn connect(&self, network: &EvmNetwork) -> Result<Arc<dyn EvmRpc>>;
}

/// HTTP provider backed client
#[derive(Debug, Clone)]
pub struct EthersRpc {
    provider: Provider<Http>,
}

impl EthersRpc {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| Error::network(format!("Invalid RPC url {rpc_url}: {e}")))?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl EvmRpc for EthersRpc {
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256> {
        self.provider
            .estimate_gas(tx, None)
            .await
            .map_err(Error::network)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
        self.provider.call(tx, None).await.map_err(Error::network)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(Error::network)?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .map_err(Error::network)
    }
}

/// Connects over HTTP using the network's configured URL
#[derive(Debug, Default, Clone)]
pub struct HttpEvmConnector;

impl EvmConnector for HttpEvmConnector {
    fn connect(&self, network: &EvmNetwork) -> Result<Arc<dyn EvmRpc>> {
        Ok(Arc::new(EthersRpc::new(&network.rpc_url)?))
    }
}

/// Extracts a human-readable reason from revert data or an RPC error message.
///
/// Decodes the standard `Error(string)` payload (selector `0x08c379a0`) when
/// present, otherwise falls back to the text after "reverted".
pub fn revert_reason(message: &str) -> Option<String> {
    if let Some(start) = message.find("0x08c379a0") {
        let hex_data: String = message[start + 2..]
            .chars()
            .take_while(|c| c.is_ascii_hexdigit())
            .collect();
        if let Ok(bytes) = hex::decode(&hex_data) {
            if let Ok(tokens) = ethers::abi::decode(&[ethers::abi::ParamType::String], &bytes[4..]) {
                if let Some(ethers::abi::Token::String(reason)) = tokens.into_iter().next() {
                    return Some(reason);
                }
            }
        }
    }

    let lower = message.to_ascii_lowercase();
    let index = lower.find("reverted")?;
    let reason = message[index + "reverted".len()..]
        .trim_start_matches([':', ' ', ','])
        .trim_start_matches("with reason string")
        .trim()
        .trim_matches(['\'', '"']);
    (!reason.is_empty()).then(|| reason.to_string())
}

/// ABI type of an already encoded-ready token
pub fn param_type(token: &Token) -> ParamType {
    let element = |items: &[Token]| Box::new(items.first().map_or(ParamType::Uint(256), param_type));
    match token {
        Token::Address(_) => ParamType::Address,
        Token::Uint(_) => ParamType::Uint(256),
        Token::Int(_) => ParamType::Int(256),
        Token::Bool(_) => ParamType::Bool,
        Token::String(_) => ParamType::String,
        Token::Bytes(_) => ParamType::Bytes,
        Token::FixedBytes(bytes) => ParamType::FixedBytes(bytes.len()),
        Token::Array(items) => ParamType::Array(element(items)),
        Token::FixedArray(items) => ParamType::FixedArray(element(items), items.len()),
        Token::Tuple(items) => ParamType::Tuple(items.iter().map(param_type).collect()),
    }
}

/// Normalizes a decoded value to JSON; integers become decimal strings
pub fn token_to_json(token: &Token) -> Value {
    match token {
        Token::Address(address) => Value::String(format!("{address:?}")),
        Token::Uint(value) => Value::String(value.to_string()),
        Token::Int(value) => Value::String(I256::from_raw(*value).to_string()),
        Token::Bool(b) => Value::Bool(*b),
        Token::String(s) => Value::String(s.clone()),
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => {
            Value::String(format!("0x{}", hex::encode(bytes)))
        }
        Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => {
            Value::Array(items.iter().map(token_to_json).collect())
        }
    }
}
