//! Typed syntax tree for contract source and a visitor over it
//!
//! The node set is closed: traversal is total, and constructs the parser could
//! not make sense of are kept as `Unknown` nodes that visitors simply skip.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceUnit {
    pub contracts: Vec<ContractDefinition>,
    /// Recoverable problems skipped over while parsing
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Contract,
    Abstract,
    Interface,
    Library,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractDefinition {
    pub name: String,
    pub kind: ContractKind,
    pub bases: Vec<String>,
    pub functions: Vec<FunctionDefinition>,
    pub state_variables: Vec<StateVariable>,
    pub events: Vec<EventDefinition>,
    /// Names of modifiers declared in this contract
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    Function,
    Constructor,
    Fallback,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    Pure,
    View,
    Payable,
    NonPayable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub type_name: String,
    pub name: Option<String>,
    /// memory, storage or calldata
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub kind: FunctionKind,
    pub visibility: Visibility,
    pub mutability: Mutability,
    pub parameters: Vec<Parameter>,
    pub returns: Vec<Parameter>,
    /// Invoked modifier names, in declaration order
    pub modifiers: Vec<String>,
    pub body: Option<Block>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateVariable {
    pub type_name: String,
    pub name: String,
    pub visibility: Visibility,
    pub constant: bool,
    pub immutable: bool,
    #[serde(skip)]
    pub initial_value: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventDefinition {
    pub name: String,
    pub parameters: Vec<EventParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventParameter {
    pub type_name: String,
    pub name: Option<String>,
    pub indexed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Block {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Statement {
    Block(Block),
    Unchecked(Block),
    Expression(Expression),
    VariableDeclaration {
        declarations: Vec<Option<Parameter>>,
        initial_value: Option<Expression>,
    },
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        update: Option<Expression>,
        body: Box<Statement>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    DoWhile {
        body: Box<Statement>,
        condition: Expression,
    },
    Return(Option<Expression>),
    Emit(Expression),
    Revert(Expression),
    Try {
        call: Expression,
        clauses: Vec<Block>,
    },
    /// Inline assembly; the Yul body is not modelled
    Assembly { line: usize },
    Break,
    Continue,
    /// The `_;` placeholder inside modifiers
    Placeholder,
    Unknown { line: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Number(String),
    String(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expression {
    Identifier(String),
    /// Elementary type used as a value, e.g. the callee in `address(x)`
    ElementaryType(String),
    Literal(Literal),
    Member {
        object: Box<Expression>,
        member: String,
    },
    Index {
        base: Box<Expression>,
        index: Option<Box<Expression>>,
    },
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
    /// `target{value: v, gas: g}`
    CallOptions {
        callee: Box<Expression>,
        options: Vec<(String, Expression)>,
    },
    Binary {
        operator: &'static str,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Assignment {
        operator: &'static str,
        target: Box<Expression>,
        value: Box<Expression>,
    },
    Unary {
        operator: &'static str,
        operand: Box<Expression>,
        prefix: bool,
    },
    Conditional {
        condition: Box<Expression>,
        then_value: Box<Expression>,
        else_value: Box<Expression>,
    },
    Tuple(Vec<Option<Expression>>),
    Array(Vec<Expression>),
    New(String),
    Unknown,
}

impl Expression {
    /// Member name called on, looking through call options
    pub fn called_member(&self) -> Option<&str> {
        match self {
            Expression::Member { member, .. } => Some(member),
            Expression::CallOptions { callee, .. } => callee.called_member(),
            _ => None,
        }
    }
}

/// Syntax tree traversal in the style of `syn::visit`.
///
/// Each method defaults to walking the node's children; implementors override
/// the nodes they care about and call the matching `walk_*` function to keep
/// descending.
pub trait Visit {
    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block);
    }

    fn visit_statement(&mut self, statement: &Statement) {
        walk_statement(self, statement);
    }

    fn visit_expression(&mut self, expression: &Expression) {
        walk_expression(self, expression);
    }
}

pub fn walk_block<V: Visit + ?Sized>(visitor: &mut V, block: &Block) {
    for statement in &block.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_statement<V: Visit + ?Sized>(visitor: &mut V, statement: &Statement) {
    match statement {
        Statement::Block(block) | Statement::Unchecked(block) => visitor.visit_block(block),
        Statement::Expression(expr) | Statement::Emit(expr) | Statement::Revert(expr) => {
            visitor.visit_expression(expr)
        }
        Statement::VariableDeclaration { initial_value, .. } => {
            if let Some(value) = initial_value {
                visitor.visit_expression(value);
            }
        }
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_statement(then_branch);
            if let Some(otherwise) = else_branch {
                visitor.visit_statement(otherwise);
            }
        }
        Statement::For {
            init,
            condition,
            update,
            body,
        } => {
            if let Some(init) = init {
                visitor.visit_statement(init);
            }
            if let Some(condition) = condition {
                visitor.visit_expression(condition);
            }
            if let Some(update) = update {
                visitor.visit_expression(update);
            }
            visitor.visit_statement(body);
        }
        Statement::While { condition, body } | Statement::DoWhile { body, condition } => {
            visitor.visit_expression(condition);
            visitor.visit_statement(body);
        }
        Statement::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expression(value);
            }
        }
        Statement::Try { call, clauses } => {
            visitor.visit_expression(call);
            for clause in clauses {
                visitor.visit_block(clause);
            }
        }
        Statement::Assembly { .. }
        | Statement::Break
        | Statement::Continue
        | Statement::Placeholder
        | Statement::Unknown { .. } => {}
    }
}

pub fn walk_expression<V: Visit + ?Sized>(visitor: &mut V, expression: &Expression) {
    match expression {
        Expression::Member { object, .. } => visitor.visit_expression(object),
        Expression::Index { base, index } => {
            visitor.visit_expression(base);
            if let Some(index) = index {
                visitor.visit_expression(index);
            }
        }
        Expression::Call { callee, arguments } => {
            visitor.visit_expression(callee);
            for argument in arguments {
                visitor.visit_expression(argument);
            }
        }
        Expression::CallOptions { callee, options } => {
            visitor.visit_expression(callee);
            for (_, value) in options {
                visitor.visit_expression(value);
            }
        }
        Expression::Binary { left, right, .. } => {
            visitor.visit_expression(left);
            visitor.visit_expression(right);
        }
        Expression::Assignment { target, value, .. } => {
            visitor.visit_expression(target);
            visitor.visit_expression(value);
        }
        Expression::Unary { operand, .. } => visitor.visit_expression(operand),
        Expression::Conditional {
            condition,
            then_value,
            else_value,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_expression(then_value);
            visitor.visit_expression(else_value);
        }
        Expression::Tuple(items) => {
            for item in items.iter().flatten() {
                visitor.visit_expression(item);
            }
        }
        Expression::Array(items) => {
            for item in items {
                visitor.visit_expression(item);
            }
        }
        Expression::Identifier(_)
        | Expression::ElementaryType(_)
        | Expression::Literal(_)
        | Expression::New(_)
        | Expression::Unknown => {}
    }
}
