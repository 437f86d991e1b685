//! Read-only "what-if" execution against either chain family.
//!
//! Successful results are cached under a hash of the normalized request for a
//! short time; failures are never cached.

use crate::{
    analysis::analyze_contract,
    artifacts::ArtifactKind,
    cache::{self, Cache},
    chain::{
        evm::{param_type, revert_reason, token_to_json},
        stellar::{
            account_id, host_function_transaction, sc_address, scval_from_json, scval_to_json,
            symbol, unsigned_envelope_xdr,
        },
        EvmConnector, HttpEvmConnector, HttpStellarConnector, StellarConnector,
    },
    config::NetworkRegistry,
    deploy::infer_constructor_token,
    error::{Error, Outcome, Result},
    utils::hash_bytes,
};
use ethers::{
    abi::{param_type::Reader, short_signature, ParamType},
    types::{transaction::eip2718::TypedTransaction, Address, TransactionRequest},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use stellar_xdr::curr::{
    AccountId, HostFunction, InvokeContractArgs, Limits, PublicKey, ReadXdr, ScAddress, ScVal,
    Uint256,
};

const DEFAULT_TTL_SECS: u64 = 60;

/// One simulated call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    pub chain: ArtifactKind,
    pub network: String,
    pub function_name: String,
    /// Deployed contract to call
    #[serde(default)]
    pub contract_address: Option<String>,
    /// Inline Solidity, estimated offline when no address is given
    #[serde(default)]
    pub source: Option<String>,
    pub args: Vec<Value>,
    /// Solidity return types used to decode EVM output
    #[serde(default)]
    pub returns: Vec<String>,
    /// Caller address (EVM) or simulation source account (Stellar)
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub chain: ArtifactKind,
    pub network: String,
    pub function_name: String,
    /// Normalized return value
    pub result: Value,
    /// Gas (EVM) or minimum resource fee in stroops (Stellar)
    #[serde(default)]
    pub estimate: Option<String>,
    /// Return data as hex (EVM) or base64 `ScVal` (Stellar)
    #[serde(default)]
    pub raw: Option<String>,
    /// Estimated from inline source without any RPC call
    #[serde(default)]
    pub offline: bool,
}

#[derive(Clone)]
pub struct SimulationService {
    cache: Cache,
    ttl_secs: u64,
    networks: NetworkRegistry,
    evm: Arc<dyn EvmConnector>,
    stellar: Arc<dyn StellarConnector>,
}

impl SimulationService {
    pub fn new(cache: Cache, networks: NetworkRegistry) -> Self {
        Self {
            cache,
            ttl_secs: DEFAULT_TTL_SECS,
            networks,
            evm: Arc::new(HttpEvmConnector),
            stellar: Arc::new(HttpStellarConnector),
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
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

    /// Runs a simulation; failures are reported in the outcome, never raised
    pub async fn simulate(&self, request: &SimulationRequest) -> Outcome<SimulationResult> {
        let key = match self.validate(request).and_then(|()| request_hash(request)) {
            Ok(hash) => cache::simulation_key(&hash),
            Err(e) => return Outcome::failure(&e),
        };

        if let Some(hit) = self.cache.get_as::<SimulationResult>(&key).await {
            tracing::debug!("Simulation cache hit for {}", key);
            return Outcome::success(hit);
        }

        match self.dispatch(request).await {
            Ok(result) => {
                self.cache.set(&key, &result, Some(self.ttl_secs)).await;
                Outcome::success(result)
            }
            Err(e) => {
                tracing::warn!(
                    "Simulation of {} on {} failed: {}",
                    request.function_name,
                    request.network,
                    e
                );
                Outcome::failure(&e)
            }
        }
    }

    fn validate(&self, request: &SimulationRequest) -> Result<()> {
        if request.function_name.trim().is_empty() {
            return Err(Error::validation("functionName is required"));
        }
        if request.network.trim().is_empty() {
            return Err(Error::validation("network is required"));
        }
        let has_address = request
            .contract_address
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty());
        let has_source = request
            .source
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        if !has_address && !has_source {
            return Err(Error::validation(
                "either contractAddress or source is required",
            ));
        }

        let known = match request.chain {
            ArtifactKind::Evm => self.networks.evm(&request.network).is_some(),
            ArtifactKind::Soroban => {
                if !has_address {
                    return Err(Error::validation(
                        "Soroban simulation requires a deployed contractAddress",
                    ));
                }
                self.networks.stellar(&request.network).is_some()
            }
        };
        if !known {
            return Err(Error::validation(format!(
                "Unknown {} network '{}'",
                request.chain, request.network
            )));
        }
        Ok(())
    }

    async fn dispatch(&self, request: &SimulationRequest) -> Result<SimulationResult> {
        let address = request
            .contract_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());

        match (request.chain, address) {
            (ArtifactKind::Evm, Some(address)) => self.simulate_evm(request, address).await,
            (ArtifactKind::Evm, None) => offline_estimate(request),
            (ArtifactKind::Soroban, Some(address)) => self.simulate_stellar(request, address).await,
            (ArtifactKind::Soroban, None) => Err(Error::validation(
                "Soroban simulation requires a deployed contractAddress",
            )),
        }
    }

    async fn simulate_evm(&self, request: &SimulationRequest, address: &str) -> Result<SimulationResult> {
        let network = self.networks.evm(&request.network).ok_or_else(|| {
            Error::validation(format!("Unknown evm network '{}'", request.network))
        })?;
        let to: Address = address
            .parse()
            .map_err(|e| Error::validation(format!("Invalid contract address {address}: {e}")))?;

        let tokens = request
            .args
            .iter()
            .map(infer_constructor_token)
            .collect::<Result<Vec<_>>>()?;
        let inputs: Vec<ParamType> = tokens.iter().map(param_type).collect();
        let outputs = request
            .returns
            .iter()
            .map(|ty| {
                Reader::read(ty).map_err(|e| Error::validation(format!("Invalid return type {ty}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut calldata = short_signature(&request.function_name, &inputs).to_vec();
        calldata.extend(ethers::abi::encode(&tokens));

        let mut call = TransactionRequest::new()
            .to(to)
            .data(calldata)
            .chain_id(network.chain_id);
        if let Some(from) = request.from.as_deref() {
            let from: Address = from
                .parse()
                .map_err(|e| Error::validation(format!("Invalid caller address {from}: {e}")))?;
            call = call.from(from);
        }
        let tx: TypedTransaction = call.into();

        let rpc = self.evm.connect(network)?;
        let output = rpc.call(&tx).await.map_err(with_revert_reason)?;
        let estimate = match rpc.estimate_gas(&tx).await {
            Ok(gas) => Some(gas.to_string()),
            Err(e) => {
                tracing::warn!("Gas estimate for {} failed: {}", request.function_name, e);
                None
            }
        };

        let result = if outputs.is_empty() {
            Value::String(format!("0x{}", hex::encode(&output)))
        } else {
            let decoded = ethers::abi::decode(&outputs, &output)
                .map_err(|e| Error::validation(format!("Failed to decode return data: {e}")))?;
            match decoded.as_slice() {
                [single] => token_to_json(single),
                many => Value::Array(many.iter().map(token_to_json).collect()),
            }
        };

        Ok(SimulationResult {
            chain: ArtifactKind::Evm,
            network: request.network.clone(),
            function_name: request.function_name.clone(),
            result,
            estimate,
            raw: Some(format!("0x{}", hex::encode(&output))),
            offline: false,
        })
    }

    async fn simulate_stellar(
        &self,
        request: &SimulationRequest,
        address: &str,
    ) -> Result<SimulationResult> {
        let network = self.networks.stellar(&request.network).ok_or_else(|| {
            Error::validation(format!("Unknown soroban network '{}'", request.network))
        })?;
        let contract_address = sc_address(address)?;
        if !matches!(contract_address, ScAddress::Contract(_)) {
            return Err(Error::validation(format!(
                "{address} is an account, not a contract"
            )));
        }

        let args = request
            .args
            .iter()
            .map(scval_from_json)
            .collect::<Result<Vec<ScVal>>>()?;
        let source = match request.from.as_deref() {
            Some(account) => account_id(account)?,
            // Simulation does not check signatures, any well-formed key will do
            None => AccountId(PublicKey::PublicKeyTypeEd25519(Uint256([0; 32]))),
        };

        let host_function = HostFunction::InvokeContract(InvokeContractArgs {
            contract_address,
            function_name: symbol(&request.function_name)?,
            args: args
                .try_into()
                .map_err(|e| Error::validation(format!("Too many arguments: {e}")))?,
        });
        let envelope = unsigned_envelope_xdr(host_function_transaction(&source, 1, host_function)?)?;

        let rpc = self.stellar.connect(network)?;
        let response = rpc.simulate_transaction(&envelope).await?;
        if let Some(error) = response.error {
            let reason = error.lines().next().unwrap_or(&error).to_string();
            return Err(Error::Reverted(reason));
        }

        let raw = response.results.into_iter().next().map(|r| r.xdr);
        let result = match raw.as_deref() {
            Some(xdr) => {
                let value = ScVal::from_xdr_base64(xdr, Limits::none())
                    .map_err(|e| Error::network(format!("Invalid simulation result: {e}")))?;
                scval_to_json(&value)
            }
            None => Value::Null,
        };

        Ok(SimulationResult {
            chain: ArtifactKind::Soroban,
            network: request.network.clone(),
            function_name: request.function_name.clone(),
            result,
            estimate: response.min_resource_fee,
            raw,
            offline: false,
        })
    }
}

/// Cache identity of a request: whitespace-trimmed fields, stable JSON
fn request_hash(request: &SimulationRequest) -> Result<String> {
    let trim = |value: &Option<String>| value.as_deref().map(|s| s.trim().to_string());
    let normalized = SimulationRequest {
        chain: request.chain,
        network: request.network.trim().to_string(),
        function_name: request.function_name.trim().to_string(),
        contract_address: trim(&request.contract_address),
        source: trim(&request.source),
        args: request.args.clone(),
        returns: request.returns.iter().map(|r| r.trim().to_string()).collect(),
        from: trim(&request.from),
    };
    Ok(hash_bytes(&serde_json::to_vec(&normalized)?))
}

fn with_revert_reason(error: Error) -> Error {
    if let Error::Network(message) = &error {
        if let Some(reason) = revert_reason(message) {
            return Error::Reverted(reason);
        }
    }
    error
}

/// Static estimate of one function of inline Solidity source
fn offline_estimate(request: &SimulationRequest) -> Result<SimulationResult> {
    let source = request.source.as_deref().unwrap_or_default();
    let analysis = analyze_contract(source);
    let function = analysis.function(&request.function_name).ok_or_else(|| {
        Error::validation(format!(
            "Function {} not found in the given source",
            request.function_name
        ))
    })?;

    Ok(SimulationResult {
        chain: ArtifactKind::Evm,
        network: request.network.clone(),
        function_name: request.function_name.clone(),
        result: json!({
            "contract": function.contract,
            "mutability": function.mutability,
            "risk": function.risk,
            "uiFields": function.ui_fields,
        }),
        estimate: Some(function.gas_estimate.to_string()),
        raw: None,
        offline: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::tests::RecordingBackend,
        chain::{
            stellar::{SendResponse, SimulateHostFunctionResult, SimulateResponse, TransactionStatus},
            EvmRpc, StellarRpc,
        },
        config::{EvmNetwork, StellarNetwork},
        error::ErrorKind,
    };
    use async_trait::async_trait;
    use ethers::{
        abi::Token,
        types::{Bytes, TransactionReceipt, H256, U256},
    };
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stellar_xdr::curr::WriteXdr;

    #[derive(Default)]
    struct MockEvm {
        revert: bool,
        calls: AtomicU32,
        last_call: Mutex<Option<TypedTransaction>>,
    }

    #[async_trait]
    impl EvmRpc for MockEvm {
        async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256> {
            Ok(U256::from(30_000))
        }

        async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_call.lock() = Some(tx.clone());
            if self.revert {
                return Err(Error::network("execution reverted: not owner"));
            }
            Ok(ethers::abi::encode(&[Token::Uint(U256::from(42))]).into())
        }

        async fn send_raw_transaction(&self, _raw: Bytes) -> Result<H256> {
            Err(Error::network("read-only"))
        }

        async fn transaction_receipt(&self, _hash: H256) -> Result<Option<TransactionReceipt>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct MockStellar {
        error: Option<String>,
        simulated: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StellarRpc for MockStellar {
        async fn load_account_sequence(&self, _account_id: &str) -> Result<i64> {
            Ok(0)
        }

        async fn simulate_transaction(&self, envelope_xdr: &str) -> Result<SimulateResponse> {
            self.simulated.lock().push(envelope_xdr.to_string());
            Ok(SimulateResponse {
                error: self.error.clone(),
                min_resource_fee: Some("91234".to_string()),
                results: vec![SimulateHostFunctionResult {
                    xdr: ScVal::U64(5).to_xdr_base64(Limits::none()).unwrap(),
                    auth: Vec::new(),
                }],
                ..Default::default()
            })
        }

        async fn send_transaction(&self, _envelope_xdr: &str) -> Result<SendResponse> {
            Err(Error::network("read-only"))
        }

        async fn get_transaction(&self, _hash: &str) -> Result<TransactionStatus> {
            Err(Error::network("read-only"))
        }
    }

    struct Connectors {
        evm: Arc<MockEvm>,
        stellar: Arc<MockStellar>,
    }

    impl EvmConnector for Connectors {
        fn connect(&self, _network: &EvmNetwork) -> Result<Arc<dyn EvmRpc>> {
            Ok(self.evm.clone())
        }
    }

    impl StellarConnector for Connectors {
        fn connect(&self, _network: &StellarNetwork) -> Result<Arc<dyn StellarRpc>> {
            Ok(self.stellar.clone())
        }
    }

    fn service(cache: Cache, evm: MockEvm, stellar: MockStellar) -> (SimulationService, Arc<Connectors>) {
        let connectors = Arc::new(Connectors {
            evm: Arc::new(evm),
            stellar: Arc::new(stellar),
        });
        let service = SimulationService::new(cache, NetworkRegistry::default())
            .with_connectors(connectors.clone(), connectors.clone());
        (service, connectors)
    }

    fn evm_request() -> SimulationRequest {
        SimulationRequest {
            chain: ArtifactKind::Evm,
            network: "localhost".to_string(),
            function_name: "balanceOf".to_string(),
            contract_address: Some(format!("0x{}", "12".repeat(20))),
            source: None,
            args: vec![json!(format!("0x{}", "34".repeat(20)))],
            returns: vec!["uint256".to_string()],
            from: None,
        }
    }

    fn stellar_request() -> SimulationRequest {
        SimulationRequest {
            chain: ArtifactKind::Soroban,
            network: "testnet".to_string(),
            function_name: "balance".to_string(),
            contract_address: Some(stellar_strkey::Contract([4; 32]).to_string()),
            source: None,
            args: vec![json!({"type": "symbol", "value": "XLM"})],
            returns: Vec::new(),
            from: None,
        }
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_call() {
        let (service, connectors) = service(Cache::in_memory(), MockEvm::default(), MockStellar::default());

        let mut no_function = evm_request();
        no_function.function_name = " ".to_string();
        let mut no_target = evm_request();
        no_target.contract_address = None;
        let mut unknown_network = evm_request();
        unknown_network.network = "mainnet".to_string();
        let mut stellar_source = stellar_request();
        stellar_source.contract_address = None;
        stellar_source.source = Some("#[contract] pub struct C;".to_string());

        for request in [no_function, no_target, unknown_network, stellar_source] {
            let outcome = service.simulate(&request).await;
            assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
        }
        assert_eq!(connectors.evm.calls.load(Ordering::SeqCst), 0);
        assert!(connectors.stellar.simulated.lock().is_empty());
    }

    #[tokio::test]
    async fn test_evm_call_is_decoded_and_cached() {
        let (service, connectors) = service(Cache::in_memory(), MockEvm::default(), MockStellar::default());
        let request = evm_request();

        let outcome = service.simulate(&request).await;
        let result = outcome.data().expect("simulation should succeed");
        assert_eq!(result.result, json!("42"));
        assert_eq!(result.estimate.as_deref(), Some("30000"));
        assert!(!result.offline);

        let call = connectors.evm.last_call.lock().clone().unwrap();
        let data = call.data().unwrap();
        let selector = short_signature("balanceOf", &[ParamType::Address]);
        assert_eq!(&data[..4], selector.as_slice());

        // Whitespace differences normalize to the same cache entry
        let mut padded = request.clone();
        padded.function_name = " balanceOf ".to_string();
        let outcome = service.simulate(&padded).await;
        assert_eq!(outcome.data().unwrap().result, json!("42"));
        assert_eq!(connectors.evm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_revert_reason_is_reported_and_not_cached() {
        let (service, connectors) = service(
            Cache::in_memory(),
            MockEvm {
                revert: true,
                ..Default::default()
            },
            MockStellar::default(),
        );

        for _ in 0..2 {
            let outcome = service.simulate(&evm_request()).await;
            assert_eq!(outcome.error_kind(), Some(ErrorKind::ExecutionReverted));
            let json = serde_json::to_value(&outcome).unwrap();
            assert!(json["details"].as_str().unwrap().contains("not owner"));
        }
        assert_eq!(connectors.evm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stellar_simulation_normalizes_result() {
        let (service, connectors) = service(Cache::in_memory(), MockEvm::default(), MockStellar::default());

        let outcome = service.simulate(&stellar_request()).await;
        let result = outcome.data().expect("simulation should succeed");
        assert_eq!(result.result, json!("5"));
        assert_eq!(result.estimate.as_deref(), Some("91234"));
        assert_eq!(connectors.stellar.simulated.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_stellar_host_error_is_a_revert() {
        let (service, _connectors) = service(
            Cache::in_memory(),
            MockEvm::default(),
            MockStellar {
                error: Some("HostError: Error(Contract, #3)\nEvent log:\n...".to_string()),
                ..Default::default()
            },
        );

        let outcome = service.simulate(&stellar_request()).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ExecutionReverted));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json["details"],
            "Execution reverted: HostError: Error(Contract, #3)"
        );
    }

    #[tokio::test]
    async fn test_inline_source_is_estimated_offline() {
        let (service, connectors) = service(Cache::in_memory(), MockEvm::default(), MockStellar::default());
        let mut request = evm_request();
        request.contract_address = None;
        request.function_name = "setValue".to_string();
        request.source = Some(
            "contract Store { uint256 public value; function setValue(uint256 v) public { value = v; } }"
                .to_string(),
        );

        let outcome = service.simulate(&request).await;
        let result = outcome.data().expect("offline estimate should succeed");
        assert!(result.offline);
        assert!(result.estimate.as_deref().unwrap().parse::<u64>().unwrap() >= 21_000);
        assert_eq!(result.result["contract"], "Store");
        assert_eq!(connectors.evm.calls.load(Ordering::SeqCst), 0);

        request.function_name = "missing".to_string();
        let outcome = service.simulate(&request).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationError));
    }

    #[tokio::test]
    async fn test_cache_outage_does_not_block_simulation() {
        let cache = Cache::new(Arc::new(RecordingBackend::failing()));
        let (service, connectors) = service(cache, MockEvm::default(), MockStellar::default());

        for _ in 0..2 {
            assert!(service.simulate(&evm_request()).await.is_success());
        }
        assert_eq!(connectors.evm.calls.load(Ordering::SeqCst), 2);
    }
}
