//! Pattern-based risk scoring for contract functions

use super::ast::{
    walk_expression, walk_statement, Expression, FunctionDefinition, Mutability, Statement, Visit,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Modifier names treated as access control
const ACCESS_CONTROL_MODIFIERS: &[&str] = &[
    "onlyOwner",
    "onlyAdmin",
    "onlyRole",
    "onlyAuthorized",
    "onlyGovernance",
    "onlyMinter",
    "onlyOperator",
    "requiresAuth",
    "auth",
];

const PAYABLE_BASE: u32 = 40;
const STATE_MUTATING_BASE: u32 = 20;
const DELEGATECALL: u32 = 50;
const EXTERNAL_CALL: u32 = 30;
const INLINE_ASSEMBLY: u32 = 15;
const UNCHECKED_BLOCK: u32 = 20;
const REENTRANCY: u32 = 40;
const MISSING_ACCESS_CONTROL: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=25 => RiskLevel::Low,
            26..=50 => RiskLevel::Medium,
            51..=75 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Heuristic danger rating of one function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    /// Always within 0..=100
    pub score: u8,
    pub level: RiskLevel,
    pub reasons: Vec<String>,
}

/// Risky constructs found in a function body, each recorded once
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RiskPatterns {
    pub delegatecall: bool,
    pub external_call: bool,
    pub assembly: bool,
    pub unchecked: bool,
}

impl RiskPatterns {
    pub fn scan(function: &FunctionDefinition) -> Self {
        let mut patterns = Self::default();
        if let Some(body) = &function.body {
            patterns.visit_block(body);
        }
        patterns
    }

    /// Any call leaving the contract, including delegatecall
    pub fn calls_out(&self) -> bool {
        self.delegatecall || self.external_call
    }
}

impl Visit for RiskPatterns {
    fn visit_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Assembly { .. } => self.assembly = true,
            Statement::Unchecked(_) => self.unchecked = true,
            _ => {}
        }
        walk_statement(self, statement);
    }

    fn visit_expression(&mut self, expression: &Expression) {
        if let Expression::Call { callee, .. } = expression {
            match callee.called_member() {
                Some("delegatecall") => self.delegatecall = true,
                Some("call" | "staticcall" | "send" | "transfer") => self.external_call = true,
                _ => {}
            }
        }
        walk_expression(self, expression);
    }
}

/// True when any invoked modifier follows an access-control naming convention
pub fn has_access_control(modifiers: &[String]) -> bool {
    modifiers.iter().any(|modifier| {
        let name = modifier.rsplit('.').next().unwrap_or(modifier);
        ACCESS_CONTROL_MODIFIERS.contains(&name)
    })
}

/// Scores one function; reasons are listed in a fixed order
pub fn score_function(function: &FunctionDefinition) -> RiskScore {
    let mut score = 0u32;
    let mut reasons = Vec::new();

    match function.mutability {
        Mutability::Pure | Mutability::View => {}
        Mutability::Payable => {
            score += PAYABLE_BASE;
            reasons.push("Accepts native value (payable)".to_string());
        }
        Mutability::NonPayable => {
            score += STATE_MUTATING_BASE;
            reasons.push("Modifies contract state".to_string());
        }
    }

    let patterns = RiskPatterns::scan(function);
    if patterns.delegatecall {
        score += DELEGATECALL;
        reasons.push("Uses delegatecall".to_string());
    }
    if patterns.external_call {
        score += EXTERNAL_CALL;
        reasons.push("Makes external calls".to_string());
    }
    if patterns.assembly {
        score += INLINE_ASSEMBLY;
        reasons.push("Contains inline assembly".to_string());
    }
    if patterns.unchecked {
        score += UNCHECKED_BLOCK;
        reasons.push("Uses unchecked arithmetic".to_string());
    }
    if patterns.calls_out() {
        score += REENTRANCY;
        reasons.push("Potential reentrancy through external call".to_string());
    }

    if score > 0 && !has_access_control(&function.modifiers) {
        score += MISSING_ACCESS_CONTROL;
        reasons.push("No access control modifier".to_string());
    }

    let score = score.min(100) as u8;
    RiskScore {
        score,
        level: RiskLevel::from_score(score),
        reasons,
    }
}
