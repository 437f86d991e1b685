//! Approximate gas estimation by syntax tree traversal.
//!
//! Costs are rough per-operation weights, not EVM accounting: every identifier
//! is priced as a storage read and every assignment statement as a write.

use super::ast::{walk_expression, walk_statement, Expression, FunctionDefinition, Statement, Visit};

/// Intrinsic transaction cost
pub const BASE_GAS: u64 = 21_000;

const STORAGE_READ: u64 = 2_100;
const STORAGE_WRITE: u64 = 5_000;
const EXTERNAL_CALL: u64 = 2_600;
const EVENT_EMISSION: u64 = 375;
const LOOP_SURCHARGE: u64 = 1_000;
const OPERATION: u64 = 3;

#[derive(Debug, Default)]
struct GasEstimator {
    total: u64,
}

impl GasEstimator {
    fn charge(&mut self, amount: u64) {
        self.total = self.total.saturating_add(amount);
    }
}

impl Visit for GasEstimator {
    fn visit_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Expression(Expression::Assignment { .. }) => self.charge(STORAGE_WRITE),
            Statement::Emit(_) => self.charge(EVENT_EMISSION),
            Statement::For { .. } | Statement::While { .. } | Statement::DoWhile { .. } => {
                self.charge(LOOP_SURCHARGE)
            }
            _ => {}
        }
        walk_statement(self, statement);
    }

    fn visit_expression(&mut self, expression: &Expression) {
        match expression {
            Expression::Identifier(_) => self.charge(STORAGE_READ),
            Expression::Binary { .. } | Expression::Unary { .. } => self.charge(OPERATION),
            Expression::Call { callee, .. } => {
                if matches!(
                    callee.called_member(),
                    Some("call" | "staticcall" | "send" | "transfer" | "delegatecall")
                ) {
                    self.charge(EXTERNAL_CALL);
                }
            }
            _ => {}
        }
        walk_expression(self, expression);
    }
}

/// Estimates gas for one call of `function`; never below [`BASE_GAS`]
pub fn estimate_gas(function: &FunctionDefinition) -> u64 {
    let mut estimator = GasEstimator::default();
    if let Some(body) = &function.body {
        estimator.visit_block(body);
    }
    BASE_GAS.saturating_add(estimator.total)
}
