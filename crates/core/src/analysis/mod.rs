//! Static analysis of contract source: risk, gas and UI hints
//!
//! Analysis is a pure function of the source text, so results are cached by
//! content hash and shared freely between callers.

pub mod ast;
pub mod gas;
pub mod lexer;
pub mod parser;
pub mod risk;
pub mod ui;

use crate::{
    cache::{self, Cache},
    error::Outcome,
    utils,
};
use ast::{ContractDefinition, ContractKind, FunctionDefinition, Mutability, Visibility};
use risk::{RiskLevel, RiskScore};
use serde::{Deserialize, Serialize};
use ui::UiField;

/// Gas estimate above which a function is flagged as expensive
const GAS_HEAVY_THRESHOLD: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

impl Recommendation {
    fn new(severity: Severity, message: impl Into<String>, function: Option<&str>) -> Self {
        Self {
            severity,
            message: message.into(),
            function: function.map(str::to_string),
        }
    }
}

/// Members extracted from one contract definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSummary {
    pub name: String,
    pub kind: ContractKind,
    pub bases: Vec<String>,
    pub functions: Vec<String>,
    pub state_variables: Vec<String>,
    pub events: Vec<String>,
}

impl From<&ContractDefinition> for ContractSummary {
    fn from(contract: &ContractDefinition) -> Self {
        Self {
            name: contract.name.clone(),
            kind: contract.kind,
            bases: contract.bases.clone(),
            functions: contract.functions.iter().map(|f| f.name.clone()).collect(),
            state_variables: contract
                .state_variables
                .iter()
                .map(|v| format!("{} {}", v.type_name, v.name))
                .collect(),
            events: contract.events.iter().map(|e| e.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionAnalysis {
    pub contract: String,
    pub name: String,
    pub visibility: Visibility,
    pub mutability: Mutability,
    pub parameters: Vec<String>,
    pub modifiers: Vec<String>,
    pub risk: RiskScore,
    pub gas_estimate: u64,
    pub ui_fields: Vec<UiField>,
}

impl FunctionAnalysis {
    pub fn of(contract: &str, function: &FunctionDefinition) -> Self {
        Self {
            contract: contract.to_string(),
            name: function.name.clone(),
            visibility: function.visibility,
            mutability: function.mutability,
            parameters: function
                .parameters
                .iter()
                .map(|p| p.type_name.clone())
                .collect(),
            modifiers: function.modifiers.clone(),
            risk: risk::score_function(function),
            gas_estimate: gas::estimate_gas(function),
            ui_fields: ui::infer_ui_fields(function),
        }
    }
}

/// Complete analysis of one source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub source_hash: String,
    pub contracts: Vec<ContractSummary>,
    pub functions: Vec<FunctionAnalysis>,
    pub recommendations: Vec<Recommendation>,
}

impl AnalysisResult {
    /// Highest risk level across all functions
    pub fn max_risk(&self) -> Option<RiskLevel> {
        self.functions.iter().map(|f| f.risk.level).max()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionAnalysis> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Runs the full analysis.
///
/// Never fails: unrecoverable parse errors become a single error recommendation.
pub fn analyze_contract(source: &str) -> AnalysisResult {
    let source_hash = utils::hash_bytes(source.as_bytes());

    let unit = match parser::parse(source) {
        Ok(unit) => unit,
        Err(e) => {
            tracing::warn!("Analysis could not parse source: {}", e);
            return AnalysisResult {
                source_hash,
                contracts: Vec::new(),
                functions: Vec::new(),
                recommendations: vec![Recommendation::new(
                    Severity::Error,
                    e.to_string(),
                    None,
                )],
            };
        }
    };

    let mut recommendations: Vec<Recommendation> = unit
        .diagnostics
        .iter()
        .map(|d| {
            Recommendation::new(
                Severity::Warning,
                format!("Skipped unparseable code on line {}: {}", d.line, d.message),
                None,
            )
        })
        .collect();

    if unit.contracts.is_empty() {
        recommendations.push(Recommendation::new(
            Severity::Warning,
            "No contract definitions found",
            None,
        ));
    }

    let mut functions = Vec::new();
    for contract in &unit.contracts {
        for function in &contract.functions {
            let analysis = FunctionAnalysis::of(&contract.name, function);
            recommendations.extend(recommend(&analysis));
            functions.push(analysis);
        }
    }

    tracing::debug!(
        "Analyzed {} contract(s), {} function(s)",
        unit.contracts.len(),
        functions.len()
    );

    AnalysisResult {
        source_hash,
        contracts: unit.contracts.iter().map(ContractSummary::from).collect(),
        functions,
        recommendations,
    }
}

fn recommend(analysis: &FunctionAnalysis) -> Vec<Recommendation> {
    let name = Some(analysis.name.as_str());
    let mut out = Vec::new();
    let has_reason = |prefix: &str| analysis.risk.reasons.iter().any(|r| r.starts_with(prefix));

    if analysis.risk.level >= RiskLevel::High {
        out.push(Recommendation::new(
            Severity::Warning,
            format!(
                "`{}` is {} risk ({}): {}",
                analysis.name,
                analysis.risk.level,
                analysis.risk.score,
                analysis.risk.reasons.join(", ")
            ),
            name,
        ));
    }
    if has_reason("Potential reentrancy") {
        out.push(Recommendation::new(
            Severity::Warning,
            "Update state before external calls or add a reentrancy guard",
            name,
        ));
    }
    if has_reason("Uses delegatecall") {
        out.push(Recommendation::new(
            Severity::Warning,
            "Restrict delegatecall targets to trusted, immutable implementations",
            name,
        ));
    }
    if has_reason("No access control") {
        out.push(Recommendation::new(
            Severity::Info,
            "Consider an access-control modifier such as onlyOwner",
            name,
        ));
    }
    if analysis.gas_estimate > GAS_HEAVY_THRESHOLD {
        out.push(Recommendation::new(
            Severity::Info,
            format!(
                "`{}` is gas-heavy (about {} gas)",
                analysis.name, analysis.gas_estimate
            ),
            name,
        ));
    }
    out
}

/// Analysis front end with content-hash caching
#[derive(Clone)]
pub struct IntelligenceEngine {
    cache: Cache,
    ttl_secs: u64,
}

impl IntelligenceEngine {
    pub fn new(cache: Cache, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    /// Returns the cached analysis for `source`, computing and storing it on a miss
    pub async fn analyze_with_cache(&self, source: &str) -> AnalysisResult {
        let key = cache::analysis_key(&utils::hash_bytes(source.as_bytes()));

        if let Some(hit) = self.cache.get_as::<AnalysisResult>(&key).await {
            tracing::debug!("Analysis cache hit: {}", key);
            return hit;
        }

        let result = analyze_contract(source);
        self.cache.set(&key, &result, Some(self.ttl_secs)).await;
        result
    }

    /// Service entry point; always a success value
    pub async fn analyze(&self, source: &str) -> Outcome<AnalysisResult> {
        Outcome::success(self.analyze_with_cache(source).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::RecordingBackend;
    use std::sync::Arc;

    const VAULT: &str = r#"
        pragma solidity ^0.8.20;

        contract Vault {
            mapping(address => uint256) public balances;
            event Deposited(address indexed who, uint256 amount);

            function deposit() external payable {
                balances[msg.sender] += msg.value;
                emit Deposited(msg.sender, msg.value);
            }

            function withdraw(uint256 amount) external {
                (bool ok, ) = msg.sender.call{value: amount}("");
                require(ok);
                balances[msg.sender] -= amount;
            }

            function balanceOf(address who) external view returns (uint256) {
                return balances[who];
            }
        }
    "#;

    #[test]
    fn test_full_analysis() {
        let result = analyze_contract(VAULT);
        assert_eq!(result.source_hash, utils::hash_bytes(VAULT.as_bytes()));
        assert_eq!(result.contracts.len(), 1);
        assert_eq!(result.contracts[0].events, vec!["Deposited"]);
        assert_eq!(
            result.contracts[0].state_variables,
            vec!["mapping(address => uint256) balances"]
        );
        assert_eq!(result.functions.len(), 3);

        let withdraw = result.function("withdraw").unwrap();
        assert_eq!(withdraw.risk.level, RiskLevel::Critical);
        assert!(withdraw.gas_estimate >= gas::BASE_GAS);
        assert_eq!(withdraw.ui_fields[0].name, "amount");

        assert_eq!(result.function("balanceOf").unwrap().risk.score, 0);
        assert_eq!(result.max_risk(), Some(RiskLevel::Critical));
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.function.as_deref() == Some("withdraw") && r.message.contains("reentrancy")));
    }

    #[test]
    fn test_parse_failure_becomes_recommendation() {
        let result = analyze_contract("contract Broken { function f() public {");
        assert!(result.functions.is_empty());
        assert_eq!(result.recommendations.len(), 1);
        assert_eq!(result.recommendations[0].severity, Severity::Error);
    }

    #[test]
    fn test_deeply_nested_source_still_analyzes() {
        let source = format!(
            "contract C {{ function f() public {{ x = {}1{}; }} }}",
            "(".repeat(10_000),
            ")".repeat(10_000)
        );
        let result = analyze_contract(&source);

        assert_eq!(result.functions.len(), 1);
        assert!(result.functions[0].gas_estimate >= 21_000);
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.severity == Severity::Warning && r.message.contains("nesting")));
    }

    #[test]
    fn test_no_contracts() {
        let result = analyze_contract("pragma solidity ^0.8.0;");
        assert_eq!(result.recommendations[0].message, "No contract definitions found");
    }

    #[tokio::test]
    async fn test_analysis_is_cached_by_source_hash() {
        let backend = Arc::new(RecordingBackend::default());
        let engine = IntelligenceEngine::new(Cache::new(backend.clone()), 3600);

        let first = engine.analyze_with_cache(VAULT).await;
        let second = engine.analyze_with_cache(VAULT).await;
        assert_eq!(first, second);

        let key = cache::analysis_key(&utils::hash_bytes(VAULT.as_bytes()));
        let writes: Vec<String> = backend
            .calls
            .lock()
            .iter()
            .filter(|c| c.starts_with("setex"))
            .cloned()
            .collect();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].starts_with(&format!("setex {key} 3600 ")));
    }

    #[tokio::test]
    async fn test_analysis_survives_cache_failure() {
        let engine = IntelligenceEngine::new(
            Cache::new(Arc::new(RecordingBackend::failing())),
            3600,
        );
        let outcome = engine.analyze(VAULT).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.data().unwrap().functions.len(), 3);
    }
}
