//! Structural checks for EVM and Soroban ABI documents

use serde::Serialize;
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;

/// Contract ABI represented as JSON values
pub type Abi = Vec<Value>;

const EVM_ENTRY_TYPES: &[&str] = &[
    "function",
    "constructor",
    "event",
    "error",
    "fallback",
    "receive",
];
const EVM_MUTABILITIES: &[&str] = &["pure", "view", "nonpayable", "payable"];
const SOROBAN_ENTRY_TYPES: &[&str] = &["function", "struct", "union", "enum", "error", "event"];

/// Outcome of validating one ABI document
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AbiReport {
    pub valid: bool,
    pub errors: Vec<String>,
    /// Canonical signature to 4-byte selector, EVM only
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub selectors: BTreeMap<String, String>,
}

impl AbiReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            selectors: BTreeMap::new(),
        }
    }
}

/// Validates an EVM (Solidity JSON) ABI
pub fn validate_evm(abi: &Value) -> AbiReport {
    let Some(entries) = abi.as_array() else {
        return AbiReport::from_errors(vec!["ABI must be a JSON array".to_string()]);
    };

    let mut errors = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let Some(kind) = entry.get("type").and_then(Value::as_str) else {
            // Solidity treats a missing type as "function"
            if entry.get("name").and_then(Value::as_str).is_none() {
                errors.push(format!("entry {index}: missing type"));
            }
            continue;
        };

        if !EVM_ENTRY_TYPES.contains(&kind) {
            errors.push(format!("entry {index}: unknown type '{kind}'"));
            continue;
        }

        if matches!(kind, "function" | "event" | "error")
            && entry.get("name").and_then(Value::as_str).is_none()
        {
            errors.push(format!("entry {index}: {kind} without a name"));
        }

        if let Some(mutability) = entry.get("stateMutability").and_then(Value::as_str) {
            if !EVM_MUTABILITIES.contains(&mutability) {
                errors.push(format!(
                    "entry {index}: invalid stateMutability '{mutability}'"
                ));
            }
        }

        for field in ["inputs", "outputs"] {
            match entry.get(field) {
                None if field == "outputs" || matches!(kind, "fallback" | "receive") => {}
                None => errors.push(format!("entry {index}: missing {field}")),
                Some(Value::Array(params)) => {
                    for (p, param) in params.iter().enumerate() {
                        if param.get("type").and_then(Value::as_str).is_none() {
                            errors.push(format!("entry {index}: {field}[{p}] without a type"));
                        }
                    }
                }
                Some(_) => errors.push(format!("entry {index}: {field} must be an array")),
            }
        }
    }

    let mut report = AbiReport::from_errors(errors);
    report.selectors = function_selectors(entries);
    report
}

/// Validates a Soroban contract spec rendered as JSON
pub fn validate_soroban(abi: &Value) -> AbiReport {
    let Some(entries) = abi.as_array() else {
        return AbiReport::from_errors(vec!["Soroban spec must be a JSON array".to_string()]);
    };

    let mut errors = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let kind = entry.get("type").and_then(Value::as_str).unwrap_or_default();
        if !SOROBAN_ENTRY_TYPES.contains(&kind) {
            errors.push(format!("entry {index}: unknown type '{kind}'"));
            continue;
        }

        if entry.get("name").and_then(Value::as_str).is_none() {
            errors.push(format!("entry {index}: {kind} without a name"));
        }

        if kind == "function" {
            match entry.get("inputs") {
                Some(Value::Array(inputs)) => {
                    for (i, input) in inputs.iter().enumerate() {
                        let typed = input
                            .get("value")
                            .and_then(|v| v.get("type"))
                            .and_then(Value::as_str)
                            .is_some();
                        if input.get("name").and_then(Value::as_str).is_none() || !typed {
                            errors.push(format!(
                                "entry {index}: input {i} needs a name and value.type"
                            ));
                        }
                    }
                }
                _ => errors.push(format!("entry {index}: function inputs must be an array")),
            }
            if !matches!(entry.get("outputs"), None | Some(Value::Array(_))) {
                errors.push(format!("entry {index}: outputs must be an array"));
            }
        }
    }

    AbiReport::from_errors(errors)
}

/// Maps each function's canonical signature to its 4-byte selector
pub fn function_selectors(abi: &[Value]) -> BTreeMap<String, String> {
    let mut selectors = BTreeMap::new();

    for func in abi.iter().filter(|e| e["type"] == "function") {
        if let Some(name) = func["name"].as_str() {
            let types: Vec<&str> = func["inputs"]
                .as_array()
                .map(|inputs| inputs.iter().filter_map(|i| i["type"].as_str()).collect())
                .unwrap_or_default();

            let signature = format!("{}({})", name, types.join(","));
            let hash = Keccak256::digest(signature.as_bytes());
            selectors.insert(signature, format!("0x{}", hex::encode(&hash[..4])));
        }
    }

    selectors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_evm_abi_with_selectors() {
        let abi = json!([
            {"type": "constructor", "inputs": [{"name": "owner", "type": "address"}], "stateMutability": "nonpayable"},
            {"type": "function", "name": "transfer", "inputs": [
                {"name": "to", "type": "address"},
                {"name": "amount", "type": "uint256"}
            ], "outputs": [{"name": "", "type": "bool"}], "stateMutability": "nonpayable"},
            {"type": "event", "name": "Transfer", "inputs": [], "anonymous": false},
            {"type": "receive", "stateMutability": "payable"}
        ]);

        let report = validate_evm(&abi);
        assert!(report.valid, "{:?}", report.errors);
        assert_eq!(
            report.selectors.get("transfer(address,uint256)").map(String::as_str),
            Some("0xa9059cbb")
        );
    }

    #[test]
    fn test_invalid_evm_abi() {
        assert!(!validate_evm(&json!({"functions": []})).valid);

        let report = validate_evm(&json!([
            {"type": "method", "name": "x"},
            {"type": "function", "inputs": []},
            {"type": "function", "name": "f", "inputs": [{"name": "a"}], "stateMutability": "mutable"}
        ]));
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 4);
    }

    #[test]
    fn test_empty_abis_are_valid() {
        assert!(validate_evm(&json!([])).valid);
        assert!(validate_soroban(&json!([])).valid);
    }

    #[test]
    fn test_soroban_spec() {
        let spec = json!([
            {"type": "function", "name": "hello", "inputs": [
                {"name": "to", "value": {"type": "symbol"}}
            ], "outputs": [{"type": "vec", "element": {"type": "symbol"}}]},
            {"type": "struct", "name": "State", "fields": []}
        ]);
        assert!(validate_soroban(&spec).valid);

        let broken = json!([
            {"type": "function", "name": "hello", "inputs": [{"name": "to"}]},
            {"type": "contract"}
        ]);
        let report = validate_soroban(&broken);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
    }
}
