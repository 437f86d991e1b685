//! Horizon and Soroban RPC access plus ScVal <-> JSON conversion

use crate::{
    config::StellarNetwork,
    error::{Error, Result},
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use stellar_xdr::curr::{
    AccountId, Hash, HostFunction, Int128Parts, InvokeHostFunctionOp, Limits, Memo, MuxedAccount,
    Operation, OperationBody, Preconditions, PublicKey, ScAddress, ScBytes, ScMap, ScMapEntry,
    ScString, ScSymbol, ScVal, ScVec, SequenceNumber, Transaction, TransactionEnvelope,
    TransactionExt, TransactionV1Envelope, UInt128Parts, Uint256, VecM, WriteXdr,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Base fee in stroops per operation
pub const BASE_FEE: u32 = 100;

/// `simulateTransaction` result
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    #[serde(default)]
    pub error: Option<String>,
    /// Base64 `SorobanTransactionData`
    #[serde(default)]
    pub transaction_data: Option<String>,
    #[serde(default)]
    pub min_resource_fee: Option<String>,
    #[serde(default)]
    pub results: Vec<SimulateHostFunctionResult>,
    #[serde(default)]
    pub latest_ledger: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimulateHostFunctionResult {
    /// Base64 `ScVal` return value
    pub xdr: String,
    #[serde(default)]
    pub auth: Vec<String>,
}

/// `sendTransaction` result
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    /// PENDING, DUPLICATE, TRY_AGAIN_LATER or ERROR
    pub status: String,
    pub hash: String,
    #[serde(default)]
    pub error_result_xdr: Option<String>,
}

impl SendResponse {
    pub fn accepted(&self) -> bool {
        matches!(self.status.as_str(), "PENDING" | "DUPLICATE")
    }
}

/// `getTransaction` result
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    /// SUCCESS, NOT_FOUND or FAILED
    pub status: String,
    #[serde(default)]
    pub result_xdr: Option<String>,
    /// Base64 `TransactionMeta`
    #[serde(default)]
    pub result_meta_xdr: Option<String>,
    #[serde(default)]
    pub ledger: Option<u64>,
}

/// The subset of Horizon and Soroban RPC the pipeline consumes
#[async_trait]
pub trait StellarRpc: Send + Sync {
    /// Current sequence number of `account_id`
    async fn load_account_sequence(&self, account_id: &str) -> Result<i64>;

    async fn simulate_transaction(&self, envelope_xdr: &str) -> Result<SimulateResponse>;

    async fn send_transaction(&self, envelope_xdr: &str) -> Result<SendResponse>;

    async fn get_transaction(&self, hash: &str) -> Result<TransactionStatus>;
}

/// Opens clients for configured Stellar networks
pub trait StellarConnector: Send + Sync {
    fn connect(&self, network: &StellarNetwork) -> Result<Arc<dyn StellarRpc>>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, T: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: T,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct HorizonAccount {
    sequence: String,
}

/// HTTP client for one network's Horizon and Soroban RPC endpoints
pub struct SorobanClient {
    http: reqwest::Client,
    horizon_url: String,
    rpc_url: String,
    request_id: AtomicU64,
}

impl SorobanClient {
    pub fn new(network: &StellarNetwork) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(Error::network)?;
        Ok(Self {
            http,
            horizon_url: network.horizon_url.trim_end_matches('/').to_string(),
            rpc_url: network.soroban_rpc_url.clone(),
            request_id: AtomicU64::new(1),
        })
    }

    async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };
        tracing::debug!("Soroban RPC {} (id {})", method, id);

        let response: JsonRpcResponse<R> = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::network(format!("Failed to send {method}: {e}")))?
            .json()
            .await
            .map_err(|e| Error::network(format!("Failed to parse {method} response: {e}")))?;

        if let Some(error) = response.error {
            return Err(Error::network(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| Error::network(format!("{method} response missing result")))
    }
}

#[async_trait]
impl StellarRpc for SorobanClient {
    async fn load_account_sequence(&self, account_id: &str) -> Result<i64> {
        let url = format!("{}/accounts/{}", self.horizon_url, account_id);
        let response = self.http.get(&url).send().await.map_err(Error::network)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::validation(format!(
                "Source account {account_id} does not exist on this network"
            )));
        }
        let account: HorizonAccount = response
            .error_for_status()
            .map_err(Error::network)?
            .json()
            .await
            .map_err(Error::network)?;

        account
            .sequence
            .parse()
            .map_err(|e| Error::network(format!("Invalid account sequence {}: {e}", account.sequence)))
    }

    async fn simulate_transaction(&self, envelope_xdr: &str) -> Result<SimulateResponse> {
        self.call("simulateTransaction", json!({ "transaction": envelope_xdr }))
            .await
    }

    async fn send_transaction(&self, envelope_xdr: &str) -> Result<SendResponse> {
        self.call("sendTransaction", json!({ "transaction": envelope_xdr }))
            .await
    }

    async fn get_transaction(&self, hash: &str) -> Result<TransactionStatus> {
        self.call("getTransaction", json!({ "hash": hash })).await
    }
}

#[derive(Debug, Default, Clone)]
pub struct HttpStellarConnector;

impl StellarConnector for HttpStellarConnector {
    fn connect(&self, network: &StellarNetwork) -> Result<Arc<dyn StellarRpc>> {
        Ok(Arc::new(SorobanClient::new(network)?))
    }
}

/// Parses a `G...` account strkey
pub fn account_id(strkey: &str) -> Result<AccountId> {
    let key = stellar_strkey::ed25519::PublicKey::from_string(strkey)
        .map_err(|_| Error::validation(format!("Invalid Stellar account: {strkey}")))?;
    Ok(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(key.0))))
}

/// Parses a `G...` account or `C...` contract strkey
pub fn sc_address(strkey: &str) -> Result<ScAddress> {
    if strkey.starts_with('C') {
        let contract = stellar_strkey::Contract::from_string(strkey)
            .map_err(|_| Error::validation(format!("Invalid contract address: {strkey}")))?;
        return Ok(ScAddress::Contract(Hash(contract.0)));
    }
    Ok(ScAddress::Account(account_id(strkey)?))
}

pub fn address_to_strkey(address: &ScAddress) -> String {
    match address {
        ScAddress::Account(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(key)))) => {
            stellar_strkey::ed25519::PublicKey(*key).to_string()
        }
        ScAddress::Contract(Hash(hash)) => stellar_strkey::Contract(*hash).to_string(),
    }
}

fn encode_error(e: stellar_xdr::curr::Error) -> Error {
    Error::Internal(eyre::eyre!("XDR encoding failed: {}", e))
}

/// Transaction with one host function operation, the base fee and no time bounds
pub fn host_function_transaction(
    source: &AccountId,
    sequence: i64,
    host_function: HostFunction,
) -> Result<Transaction> {
    let AccountId(PublicKey::PublicKeyTypeEd25519(key)) = source;
    let operation = Operation {
        source_account: None,
        body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
            host_function,
            auth: VecM::default(),
        }),
    };

    Ok(Transaction {
        source_account: MuxedAccount::Ed25519(key.clone()),
        fee: BASE_FEE,
        seq_num: SequenceNumber(sequence),
        cond: Preconditions::None,
        memo: Memo::None,
        operations: vec![operation].try_into().map_err(encode_error)?,
        ext: TransactionExt::V0,
    })
}

/// Base64 XDR of `tx` wrapped in an envelope without signatures
pub fn unsigned_envelope_xdr(tx: Transaction) -> Result<String> {
    TransactionEnvelope::Tx(TransactionV1Envelope {
        tx,
        signatures: VecM::default(),
    })
    .to_xdr_base64(Limits::none())
    .map_err(encode_error)
}

/// Function name as a contract symbol
pub fn symbol(name: &str) -> Result<ScSymbol> {
    Ok(ScSymbol(name.try_into().map_err(xdr_error)?))
}

fn xdr_error(e: stellar_xdr::curr::Error) -> Error {
    Error::validation(format!("Invalid XDR value: {e}"))
}

fn integer<T: FromStr>(value: &Value, ty: &str) -> Result<T> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(Error::validation(format!("Expected {ty}, got {other}"))),
    };
    text.parse()
        .map_err(|_| Error::validation(format!("Invalid {ty}: {text}")))
}

fn text<'a>(value: &'a Value, ty: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::validation(format!("Expected {ty} string, got {value}")))
}

fn sc_vec(items: &[Value]) -> Result<ScVal> {
    let values = items.iter().map(scval_from_json).collect::<Result<Vec<_>>>()?;
    Ok(ScVal::Vec(Some(ScVec(values.try_into().map_err(xdr_error)?))))
}

fn sc_map(object: &Map<String, Value>) -> Result<ScVal> {
    let entries = object
        .iter()
        .map(|(key, val)| {
            Ok(ScMapEntry {
                key: ScVal::Symbol(symbol(key)?),
                val: scval_from_json(val)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ScVal::Map(Some(ScMap(entries.try_into().map_err(xdr_error)?))))
}

fn i128_parts(v: i128) -> Int128Parts {
    Int128Parts {
        hi: (v >> 64) as i64,
        lo: v as u64,
    }
}

fn u128_parts(v: u128) -> UInt128Parts {
    UInt128Parts {
        hi: (v >> 64) as u64,
        lo: v as u64,
    }
}

/// Encodes one contract argument.
///
/// Arguments are either type-tagged objects (`{"type": "u32", "value": 7}`)
/// or bare JSON: booleans, integers (as i128), `G`/`C` strkeys (as
/// addresses), other strings, arrays and objects (as symbol-keyed maps).
pub fn scval_from_json(arg: &Value) -> Result<ScVal> {
    match arg {
        Value::Object(object) => match (object.get("type"), object.get("value")) {
            (Some(Value::String(ty)), Some(value)) => tagged_scval(ty, value),
            _ => sc_map(object),
        },
        Value::Null => Ok(ScVal::Void),
        Value::Bool(b) => Ok(ScVal::Bool(*b)),
        Value::Number(_) => Ok(ScVal::I128(i128_parts(integer(arg, "i128")?))),
        Value::String(s) => match looks_like_strkey(s).then(|| sc_address(s)) {
            Some(Ok(address)) => Ok(ScVal::Address(address)),
            _ => Ok(ScVal::String(ScString(s.as_str().try_into().map_err(xdr_error)?))),
        },
        Value::Array(items) => sc_vec(items),
    }
}

fn looks_like_strkey(s: &str) -> bool {
    s.len() == 56 && (s.starts_with('G') || s.starts_with('C'))
}

fn tagged_scval(ty: &str, value: &Value) -> Result<ScVal> {
    let scval = match ty {
        "bool" => ScVal::Bool(
            value
                .as_bool()
                .ok_or_else(|| Error::validation(format!("Expected bool, got {value}")))?,
        ),
        "void" => ScVal::Void,
        "u32" => ScVal::U32(integer(value, ty)?),
        "i32" => ScVal::I32(integer(value, ty)?),
        "u64" => ScVal::U64(integer(value, ty)?),
        "i64" => ScVal::I64(integer(value, ty)?),
        "u128" => ScVal::U128(u128_parts(integer(value, ty)?)),
        "i128" => ScVal::I128(i128_parts(integer(value, ty)?)),
        "string" => ScVal::String(ScString(text(value, ty)?.try_into().map_err(xdr_error)?)),
        "symbol" => ScVal::Symbol(symbol(text(value, ty)?)?),
        "bytes" => {
            let raw = text(value, ty)?;
            let bytes = hex::decode(raw.trim_start_matches("0x"))
                .map_err(|e| Error::validation(format!("Invalid hex bytes: {e}")))?;
            ScVal::Bytes(ScBytes(bytes.try_into().map_err(xdr_error)?))
        }
        "address" => ScVal::Address(sc_address(text(value, ty)?)?),
        "vec" => match value {
            Value::Array(items) => sc_vec(items)?,
            other => return Err(Error::validation(format!("Expected array, got {other}"))),
        },
        "map" => match value {
            Value::Object(object) => sc_map(object)?,
            other => return Err(Error::validation(format!("Expected object, got {other}"))),
        },
        other => return Err(Error::validation(format!("Unsupported argument type: {other}"))),
    };
    Ok(scval)
}

/// Normalizes a contract value to JSON; 64- and 128-bit integers become strings
pub fn scval_to_json(value: &ScVal) -> Value {
    match value {
        ScVal::Bool(b) => Value::Bool(*b),
        ScVal::Void => Value::Null,
        ScVal::U32(n) => json!(n),
        ScVal::I32(n) => json!(n),
        ScVal::U64(n) => Value::String(n.to_string()),
        ScVal::I64(n) => Value::String(n.to_string()),
        ScVal::U128(parts) => {
            Value::String((((parts.hi as u128) << 64) | parts.lo as u128).to_string())
        }
        ScVal::I128(parts) => {
            Value::String((((parts.hi as i128) << 64) | parts.lo as i128).to_string())
        }
        ScVal::Bytes(bytes) => Value::String(hex::encode(bytes.0.as_slice())),
        ScVal::String(s) => Value::String(s.0.to_utf8_string_lossy()),
        ScVal::Symbol(s) => Value::String(s.0.to_utf8_string_lossy()),
        ScVal::Address(address) => Value::String(address_to_strkey(address)),
        ScVal::Vec(Some(items)) => Value::Array(items.0.iter().map(scval_to_json).collect()),
        ScVal::Vec(None) => Value::Array(Vec::new()),
        ScVal::Map(Some(entries)) => {
            let mut object = Map::new();
            for entry in entries.0.iter() {
                let key = match scval_to_json(&entry.key) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                object.insert(key, scval_to_json(&entry.val));
            }
            Value::Object(object)
        }
        ScVal::Map(None) => Value::Object(Map::new()),
        other => Value::String(format!("{other:?}")),
    }
}
