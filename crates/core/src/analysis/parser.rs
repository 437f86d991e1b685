//! Tolerant recursive-descent parser producing the typed syntax tree
//!
//! Statement- and member-level problems are recorded as diagnostics and the
//! parser skips to the next `;` or balanced `}`. Only input that cannot be
//! resynchronised (unterminated literals, running out of tokens inside a
//! contract or block) fails with a parse error.
//!
//! Nesting is capped at [`MAX_NESTING`] levels so that the parser, the tree
//! walkers and the tree's own drop stay within a thread's stack.

use super::{
    ast::*,
    lexer::{tokenize, Token, TokenKind},
};
use crate::error::{Error, Result};

const ASSIGNMENT_OPERATORS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "|=", "&=", "^=", "<<=", ">>=", ">>>=",
];
/// Deepest statement, expression or type nesting accepted
pub const MAX_NESTING: usize = 64;
const DATA_LOCATIONS: &[&str] = &["memory", "storage", "calldata"];
const NUMBER_UNITS: &[&str] = &[
    "wei", "gwei", "szabo", "finney", "ether", "seconds", "minutes", "hours", "days", "weeks",
    "years",
];

/// Parses Solidity source into a [`SourceUnit`]
pub fn parse(source: &str) -> Result<SourceUnit> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_source_unit()
}

/// True for built-in value types such as `uint256`, `bytes32` or `address`
pub fn is_elementary_type(word: &str) -> bool {
    if matches!(
        word,
        "address" | "bool" | "string" | "bytes" | "byte" | "int" | "uint" | "fixed" | "ufixed"
    ) {
        return true;
    }
    ["uint", "int", "bytes"].iter().any(|prefix| {
        word.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
    })
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(word) => format!("'{word}'"),
        TokenKind::Number(n) => format!("number {n}"),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Punct(p) => format!("'{p}'"),
        TokenKind::Eof => "end of input".to_string(),
    }
}

fn binary_precedence(operator: &str) -> Option<u8> {
    Some(match operator {
        "||" => 1,
        "&&" => 2,
        "==" | "!=" => 3,
        "<" | ">" | "<=" | ">=" => 4,
        "|" => 5,
        "^" => 6,
        "&" => 7,
        "<<" | ">>" | ">>>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        "**" => 11,
        _ => return None,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            diagnostics: Vec::new(),
        }
    }

    // Token helpers

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        kind
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), TokenKind::Punct(p) if *p == punct)
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(w) if w == word)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.is_ident(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line(),
            message: message.into(),
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected '{punct}', found {}",
                describe(self.peek())
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().clone() {
            TokenKind::Ident(word) => {
                self.advance();
                Ok(word)
            }
            other => Err(self.error(format!(
                "expected identifier, found {}",
                describe(&other)
            ))),
        }
    }

    fn deepen(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!(
                "nesting deeper than {MAX_NESTING} levels"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Runs `parse` and restores the nesting depth, whatever it returns
    fn scoped<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let entry = self.depth;
        let result = parse(self);
        self.depth = entry;
        result
    }

    /// Runs `parse` one nesting level down
    fn descend<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.scoped(|p| {
            p.deepen()?;
            parse(p)
        })
    }

    fn note(&mut self, error: Error) {
        let (line, message) = match error {
            Error::Parse { line, message } => (line, message),
            other => (self.line(), other.to_string()),
        };
        tracing::debug!("Recovered from parse error on line {}: {}", line, message);
        self.diagnostics.push(Diagnostic { line, message });
    }

    /// Skips to just past the next `;` or balanced `}` at the current depth.
    ///
    /// A `}` closing the enclosing scope is left in place.
    fn skip_item(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                TokenKind::Eof => return Err(self.error("unexpected end of input")),
                TokenKind::Punct("}") if depth == 0 => return Ok(()),
                TokenKind::Punct(";") if depth == 0 => {
                    self.advance();
                    return Ok(());
                }
                TokenKind::Punct("{") | TokenKind::Punct("(") | TokenKind::Punct("[") => {
                    depth += 1;
                    self.advance();
                }
                TokenKind::Punct("}") => {
                    depth -= 1;
                    self.advance();
                    if depth == 0 {
                        return Ok(());
                    }
                }
                TokenKind::Punct(")") | TokenKind::Punct("]") => {
                    depth = depth.saturating_sub(1);
                    self.advance();
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Skips a balanced group starting at the current `open` token
    fn skip_balanced(&mut self, open: &str, close: &str) -> Result<()> {
        self.expect_punct(open)?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.advance() {
                TokenKind::Eof => return Err(self.error(format!("unclosed '{open}'"))),
                TokenKind::Punct(p) if p == open => depth += 1,
                TokenKind::Punct(p) if p == close => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    // Source unit and contracts

    fn parse_source_unit(mut self) -> Result<SourceUnit> {
        let mut contracts = Vec::new();

        while !self.at_eof() {
            match self.peek().clone() {
                TokenKind::Ident(word) => match word.as_str() {
                    "contract" | "interface" | "library" => {
                        self.advance();
                        let kind = match word.as_str() {
                            "interface" => ContractKind::Interface,
                            "library" => ContractKind::Library,
                            _ => ContractKind::Contract,
                        };
                        contracts.push(self.parse_contract(kind)?);
                    }
                    "abstract" if matches!(self.peek_at(1), TokenKind::Ident(w) if w == "contract") => {
                        self.advance();
                        self.advance();
                        contracts.push(self.parse_contract(ContractKind::Abstract)?);
                    }
                    // pragma, import and free-standing declarations carry nothing we analyse
                    _ => self.skip_item()?,
                },
                TokenKind::Punct("}") => {
                    self.note(self.error("unbalanced '}' at file level"));
                    self.advance();
                }
                _ => self.skip_item()?,
            }
        }

        Ok(SourceUnit {
            contracts,
            diagnostics: self.diagnostics,
        })
    }

    fn parse_path(&mut self) -> Result<String> {
        let mut path = self.expect_ident()?;
        while self.is_punct(".") && matches!(self.peek_at(1), TokenKind::Ident(_)) {
            self.advance();
            path.push('.');
            path.push_str(&self.expect_ident()?);
        }
        Ok(path)
    }

    fn parse_contract(&mut self, kind: ContractKind) -> Result<ContractDefinition> {
        let name = self.expect_ident()?;
        let mut bases = Vec::new();

        if self.eat_ident("is") {
            loop {
                bases.push(self.parse_path()?);
                if self.is_punct("(") {
                    self.skip_balanced("(", ")")?;
                }
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct("{")?;

        let mut contract = ContractDefinition {
            name,
            kind,
            bases,
            functions: Vec::new(),
            state_variables: Vec::new(),
            events: Vec::new(),
            modifiers: Vec::new(),
        };

        loop {
            if self.eat_punct("}") {
                break;
            }
            if self.at_eof() {
                return Err(self.error(format!(
                    "unexpected end of input inside contract {}",
                    contract.name
                )));
            }

            let start = self.pos;
            if let Err(e) = self.parse_contract_member(&mut contract) {
                self.note(e);
                self.skip_item()?;
                if self.pos == start {
                    self.advance();
                }
            }
        }

        Ok(contract)
    }

    fn parse_contract_member(&mut self, contract: &mut ContractDefinition) -> Result<()> {
        let line = self.line();
        let word = match self.peek().clone() {
            TokenKind::Ident(word) => word,
            TokenKind::Punct(";") => {
                self.advance();
                return Ok(());
            }
            other => {
                return Err(self.error(format!(
                    "unexpected {} in contract body",
                    describe(&other)
                )))
            }
        };

        match word.as_str() {
            "function" => {
                self.advance();
                let function = self.parse_function(FunctionKind::Function, line)?;
                contract.functions.push(function);
            }
            "constructor" => {
                self.advance();
                let function = self.parse_function(FunctionKind::Constructor, line)?;
                contract.functions.push(function);
            }
            "fallback" | "receive" if self.peek_at(1) == &TokenKind::Punct("(") => {
                self.advance();
                let kind = if word == "fallback" {
                    FunctionKind::Fallback
                } else {
                    FunctionKind::Receive
                };
                let function = self.parse_function(kind, line)?;
                contract.functions.push(function);
            }
            "modifier" => {
                self.advance();
                contract.modifiers.push(self.expect_ident()?);
                if self.is_punct("(") {
                    self.skip_balanced("(", ")")?;
                }
                while !self.is_punct("{") && !self.is_punct(";") {
                    if self.at_eof() {
                        return Err(self.error("unexpected end of input in modifier"));
                    }
                    self.advance();
                }
                if self.is_punct("{") {
                    self.skip_balanced("{", "}")?;
                } else {
                    self.advance();
                }
            }
            "event" => {
                self.advance();
                let event = self.parse_event()?;
                contract.events.push(event);
            }
            "struct" | "enum" | "error" | "using" | "type" => self.skip_item()?,
            _ => {
                let variable = self.parse_state_variable()?;
                contract.state_variables.push(variable);
            }
        }
        Ok(())
    }

    fn parse_function(&mut self, kind: FunctionKind, line: usize) -> Result<FunctionDefinition> {
        // Pre-0.6 unnamed fallback
        let kind = if kind == FunctionKind::Function && self.is_punct("(") {
            FunctionKind::Fallback
        } else {
            kind
        };
        let name = match kind {
            FunctionKind::Function => self.expect_ident()?,
            FunctionKind::Constructor => "constructor".to_string(),
            FunctionKind::Fallback => "fallback".to_string(),
            FunctionKind::Receive => "receive".to_string(),
        };

        let parameters = self.parse_parameter_list()?;
        let mut visibility = None;
        let mut mutability = Mutability::NonPayable;
        let mut modifiers = Vec::new();
        let mut returns = Vec::new();
        let mut body = None;

        loop {
            match self.peek().clone() {
                TokenKind::Ident(word) => match word.as_str() {
                    "public" | "external" | "internal" | "private" => {
                        self.advance();
                        visibility = Some(match word.as_str() {
                            "public" => Visibility::Public,
                            "external" => Visibility::External,
                            "internal" => Visibility::Internal,
                            _ => Visibility::Private,
                        });
                    }
                    "pure" | "view" | "constant" | "payable" | "nonpayable" => {
                        self.advance();
                        mutability = match word.as_str() {
                            "pure" => Mutability::Pure,
                            "view" | "constant" => Mutability::View,
                            "payable" => Mutability::Payable,
                            _ => Mutability::NonPayable,
                        };
                    }
                    "virtual" => {
                        self.advance();
                    }
                    "override" => {
                        self.advance();
                        if self.is_punct("(") {
                            self.skip_balanced("(", ")")?;
                        }
                    }
                    "returns" => {
                        self.advance();
                        returns = self.parse_parameter_list()?;
                    }
                    _ => {
                        modifiers.push(self.parse_path()?);
                        if self.is_punct("(") {
                            self.skip_balanced("(", ")")?;
                        }
                    }
                },
                TokenKind::Punct("{") => {
                    body = Some(self.parse_block()?);
                    break;
                }
                TokenKind::Punct(";") => {
                    self.advance();
                    break;
                }
                other => {
                    return Err(self.error(format!(
                        "unexpected {} in function header of {name}",
                        describe(&other)
                    )))
                }
            }
        }

        let visibility = visibility.unwrap_or(match kind {
            FunctionKind::Fallback | FunctionKind::Receive => Visibility::External,
            _ => Visibility::Public,
        });

        Ok(FunctionDefinition {
            name,
            kind,
            visibility,
            mutability,
            parameters,
            returns,
            modifiers,
            body,
            line,
        })
    }

    fn parse_parameter_list(&mut self) -> Result<Vec<Parameter>> {
        self.expect_punct("(")?;
        let mut parameters = Vec::new();
        if self.eat_punct(")") {
            return Ok(parameters);
        }
        loop {
            parameters.push(self.parse_parameter()?);
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct(")")?;
            return Ok(parameters);
        }
    }

    fn parse_location(&mut self) -> Option<String> {
        match self.peek() {
            TokenKind::Ident(word) if DATA_LOCATIONS.contains(&word.as_str()) => {
                let location = word.clone();
                self.advance();
                Some(location)
            }
            _ => None,
        }
    }

    fn parse_parameter(&mut self) -> Result<Parameter> {
        let type_name = self.parse_type_name()?;
        let location = self.parse_location();
        let name = match self.peek() {
            TokenKind::Ident(word) => {
                let name = word.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        };
        Ok(Parameter {
            type_name,
            name,
            location,
        })
    }

    fn parse_type_name(&mut self) -> Result<String> {
        let mut type_name = match self.peek().clone() {
            TokenKind::Ident(word) if word == "mapping" => {
                self.advance();
                self.expect_punct("(")?;
                let key = self.descend(Self::parse_type_name)?;
                if matches!(self.peek(), TokenKind::Ident(_)) {
                    self.advance();
                }
                self.expect_punct("=>")?;
                let value = self.descend(Self::parse_type_name)?;
                if matches!(self.peek(), TokenKind::Ident(_)) {
                    self.advance();
                }
                self.expect_punct(")")?;
                format!("mapping({key} => {value})")
            }
            TokenKind::Ident(word) if word == "function" => {
                return Err(self.error("function types are not supported"));
            }
            TokenKind::Ident(_) => {
                let path = self.parse_path()?;
                if path == "address" && self.eat_ident("payable") {
                    "address payable".to_string()
                } else {
                    path
                }
            }
            other => {
                return Err(self.error(format!(
                    "expected type name, found {}",
                    describe(&other)
                )))
            }
        };

        while self.eat_punct("[") {
            if self.eat_punct("]") {
                type_name.push_str("[]");
                continue;
            }
            let size = match self.advance() {
                TokenKind::Number(n) => n,
                TokenKind::Ident(constant) => constant,
                other => {
                    return Err(self.error(format!(
                        "unexpected {} in array length",
                        describe(&other)
                    )))
                }
            };
            self.expect_punct("]")?;
            type_name = format!("{type_name}[{size}]");
        }

        Ok(type_name)
    }

    fn parse_event(&mut self) -> Result<EventDefinition> {
        let name = self.expect_ident()?;
        self.expect_punct("(")?;
        let mut parameters = Vec::new();
        if !self.eat_punct(")") {
            loop {
                let type_name = self.parse_type_name()?;
                let indexed = self.eat_ident("indexed");
                let name = match self.peek() {
                    TokenKind::Ident(word) => {
                        let name = word.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                parameters.push(EventParameter {
                    type_name,
                    name,
                    indexed,
                });
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }
        self.eat_ident("anonymous");
        self.expect_punct(";")?;
        Ok(EventDefinition { name, parameters })
    }

    fn parse_state_variable(&mut self) -> Result<StateVariable> {
        let type_name = self.parse_type_name()?;
        let mut visibility = Visibility::Internal;
        let mut constant = false;
        let mut immutable = false;

        loop {
            match self.peek() {
                TokenKind::Ident(word) => match word.as_str() {
                    "public" => visibility = Visibility::Public,
                    "private" => visibility = Visibility::Private,
                    "internal" => visibility = Visibility::Internal,
                    "constant" => constant = true,
                    "immutable" => immutable = true,
                    "transient" => {}
                    "override" => {
                        self.advance();
                        if self.is_punct("(") {
                            self.skip_balanced("(", ")")?;
                        }
                        continue;
                    }
                    _ => break,
                },
                _ => break,
            }
            self.advance();
        }

        let name = self.expect_ident()?;
        let initial_value = if self.eat_punct("=") {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_punct(";")?;

        Ok(StateVariable {
            type_name,
            name,
            visibility,
            constant,
            immutable,
            initial_value,
        })
    }

    // Statements

    fn parse_block(&mut self) -> Result<Block> {
        self.expect_punct("{")?;
        let mut statements = Vec::new();

        loop {
            if self.eat_punct("}") {
                return Ok(Block { statements });
            }
            if self.at_eof() {
                return Err(self.error("unexpected end of input inside block"));
            }

            let line = self.line();
            match self.parse_statement() {
                Ok(statement) => statements.push(statement),
                Err(e) => {
                    self.note(e);
                    self.skip_item()?;
                    statements.push(Statement::Unknown { line });
                }
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        self.descend(Self::parse_statement_kind)
    }

    fn parse_statement_kind(&mut self) -> Result<Statement> {
        let line = self.line();
        let word = match self.peek().clone() {
            TokenKind::Punct("{") => return Ok(Statement::Block(self.parse_block()?)),
            TokenKind::Punct(";") => {
                self.advance();
                return Ok(Statement::Block(Block::default()));
            }
            TokenKind::Ident(word) => word,
            _ => return self.parse_simple_statement(),
        };

        match word.as_str() {
            "unchecked" if self.peek_at(1) == &TokenKind::Punct("{") => {
                self.advance();
                Ok(Statement::Unchecked(self.parse_block()?))
            }
            "if" => {
                self.advance();
                self.expect_punct("(")?;
                let condition = self.parse_expression()?;
                self.expect_punct(")")?;
                let then_branch = Box::new(self.parse_statement()?);
                let else_branch = if self.eat_ident("else") {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Statement::If {
                    condition,
                    then_branch,
                    else_branch,
                })
            }
            "for" => {
                self.advance();
                self.expect_punct("(")?;
                let init = if self.eat_punct(";") {
                    None
                } else {
                    Some(Box::new(self.parse_simple_statement()?))
                };
                let condition = if self.is_punct(";") {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect_punct(";")?;
                let update = if self.is_punct(")") {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect_punct(")")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Statement::For {
                    init,
                    condition,
                    update,
                    body,
                })
            }
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let condition = self.parse_expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Statement::While { condition, body })
            }
            "do" => {
                self.advance();
                let body = Box::new(self.parse_statement()?);
                if !self.eat_ident("while") {
                    return Err(self.error("expected 'while' after do-block"));
                }
                self.expect_punct("(")?;
                let condition = self.parse_expression()?;
                self.expect_punct(")")?;
                self.expect_punct(";")?;
                Ok(Statement::DoWhile { body, condition })
            }
            "return" => {
                self.advance();
                let value = if self.is_punct(";") {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect_punct(";")?;
                Ok(Statement::Return(value))
            }
            "emit" => {
                self.advance();
                let event = self.parse_expression()?;
                self.expect_punct(";")?;
                Ok(Statement::Emit(event))
            }
            "revert" if !matches!(self.peek_at(1), TokenKind::Punct(p) if ASSIGNMENT_OPERATORS.contains(p)) => {
                self.advance();
                let reason = if self.is_punct(";") {
                    Expression::Tuple(Vec::new())
                } else {
                    self.parse_expression()?
                };
                self.expect_punct(";")?;
                Ok(Statement::Revert(reason))
            }
            "assembly" => {
                self.advance();
                if matches!(self.peek(), TokenKind::Str(_)) {
                    self.advance();
                }
                if self.is_punct("(") {
                    self.skip_balanced("(", ")")?;
                }
                self.skip_balanced("{", "}")?;
                Ok(Statement::Assembly { line })
            }
            "try" => {
                self.advance();
                let call = self.parse_expression()?;
                if self.eat_ident("returns") {
                    self.parse_parameter_list()?;
                }
                let mut clauses = vec![self.parse_block()?];
                while self.eat_ident("catch") {
                    if matches!(self.peek(), TokenKind::Ident(_)) {
                        self.advance();
                    }
                    if self.is_punct("(") {
                        self.parse_parameter_list()?;
                    }
                    clauses.push(self.parse_block()?);
                }
                Ok(Statement::Try { call, clauses })
            }
            "break" | "continue" => {
                self.advance();
                self.expect_punct(";")?;
                Ok(if word == "break" {
                    Statement::Break
                } else {
                    Statement::Continue
                })
            }
            "_" if self.peek_at(1) == &TokenKind::Punct(";") => {
                self.advance();
                self.advance();
                Ok(Statement::Placeholder)
            }
            _ => self.parse_simple_statement(),
        }
    }

    /// Variable declaration or expression statement, including the `;`
    fn parse_simple_statement(&mut self) -> Result<Statement> {
        if let Some(declaration) = self.try_variable_declaration()? {
            return Ok(declaration);
        }
        let expression = self.parse_expression()?;
        self.expect_punct(";")?;
        Ok(Statement::Expression(expression))
    }

    fn try_variable_declaration(&mut self) -> Result<Option<Statement>> {
        let start = self.pos;

        let declarations = if self.is_punct("(") {
            match self.speculate_tuple_declaration() {
                Some(declarations) => declarations,
                None => {
                    self.pos = start;
                    return Ok(None);
                }
            }
        } else {
            if matches!(self.peek(), TokenKind::Ident(w) if matches!(w.as_str(), "delete" | "new" | "true" | "false"))
            {
                return Ok(None);
            }
            let Ok(type_name) = self.parse_type_name() else {
                self.pos = start;
                return Ok(None);
            };
            let location = self.parse_location();
            let name = match self.peek() {
                TokenKind::Ident(name) => name.clone(),
                _ => {
                    self.pos = start;
                    return Ok(None);
                }
            };
            self.advance();
            vec![Some(Parameter {
                type_name,
                name: Some(name),
                location,
            })]
        };

        let initial_value = if self.eat_punct("=") {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_punct(";")?;

        Ok(Some(Statement::VariableDeclaration {
            declarations,
            initial_value,
        }))
    }

    /// `(uint a, , bool c) = ...` – returns None when this is not a declaration
    fn speculate_tuple_declaration(&mut self) -> Option<Vec<Option<Parameter>>> {
        self.advance();
        let mut declarations = Vec::new();
        let mut slot_open = true;

        loop {
            if self.eat_punct(")") {
                if slot_open && !declarations.is_empty() {
                    declarations.push(None);
                }
                break;
            }
            if self.eat_punct(",") {
                if slot_open {
                    declarations.push(None);
                }
                slot_open = true;
                continue;
            }
            if !slot_open {
                return None;
            }

            let type_name = self.parse_type_name().ok()?;
            let location = self.parse_location();
            let TokenKind::Ident(name) = self.advance() else {
                return None;
            };
            declarations.push(Some(Parameter {
                type_name,
                name: Some(name),
                location,
            }));
            slot_open = false;
        }

        let declares = declarations.iter().any(Option::is_some);
        (declares && self.is_punct("=")).then_some(declarations)
    }

    // Expressions

    fn parse_expression(&mut self) -> Result<Expression> {
        self.descend(Self::parse_assignment)
    }

    fn parse_assignment(&mut self) -> Result<Expression> {
        let target = self.parse_conditional()?;
        if let TokenKind::Punct(op) = self.peek() {
            if ASSIGNMENT_OPERATORS.contains(op) {
                let operator = *op;
                self.advance();
                let value = self.parse_expression()?;
                return Ok(Expression::Assignment {
                    operator,
                    target: Box::new(target),
                    value: Box::new(value),
                });
            }
        }
        Ok(target)
    }

    fn parse_conditional(&mut self) -> Result<Expression> {
        let condition = self.parse_binary(1)?;
        if !self.eat_punct("?") {
            return Ok(condition);
        }
        let then_value = self.parse_expression()?;
        self.expect_punct(":")?;
        let else_value = self.parse_expression()?;
        Ok(Expression::Conditional {
            condition: Box::new(condition),
            then_value: Box::new(then_value),
            else_value: Box::new(else_value),
        })
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression> {
        self.scoped(|p| p.parse_binary_chain(min_precedence))
    }

    /// Each operator applied wraps the chain one level deeper
    fn parse_binary_chain(&mut self, min_precedence: u8) -> Result<Expression> {
        let mut left = self.parse_unary()?;
        loop {
            let operator = match self.peek() {
                TokenKind::Punct(op) => *op,
                _ => break,
            };
            let Some(precedence) = binary_precedence(operator) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.advance();
            self.deepen()?;
            // `**` is right-associative
            let next_min = if operator == "**" {
                precedence
            } else {
                precedence + 1
            };
            let right = self.descend(|p| p.parse_binary(next_min))?;
            left = Expression::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        let operator = match self.peek() {
            TokenKind::Punct(op @ ("!" | "~" | "-" | "+" | "++" | "--")) => Some(*op),
            TokenKind::Ident(word) if word == "delete" => Some("delete"),
            _ => None,
        };
        match operator {
            Some(operator) => {
                self.advance();
                let operand = self.descend(Self::parse_unary)?;
                Ok(Expression::Unary {
                    operator,
                    operand: Box::new(operand),
                    prefix: true,
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        self.scoped(Self::parse_postfix_chain)
    }

    fn parse_postfix_chain(&mut self) -> Result<Expression> {
        let mut expression = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let member = match self.advance() {
                    TokenKind::Ident(member) => member,
                    other => {
                        return Err(self.error(format!(
                            "expected member name, found {}",
                            describe(&other)
                        )))
                    }
                };
                expression = Expression::Member {
                    object: Box::new(expression),
                    member,
                };
            } else if self.is_punct("(") {
                let arguments = self.parse_call_arguments()?;
                expression = Expression::Call {
                    callee: Box::new(expression),
                    arguments,
                };
            } else if self.eat_punct("[") {
                let index = if self.is_punct("]") || self.is_punct(":") {
                    None
                } else {
                    Some(Box::new(self.parse_expression()?))
                };
                // Slices `a[start:end]` keep only the start
                if self.eat_punct(":") && !self.is_punct("]") {
                    self.parse_expression()?;
                }
                self.expect_punct("]")?;
                expression = Expression::Index {
                    base: Box::new(expression),
                    index,
                };
            } else if self.is_punct("{")
                && matches!(self.peek_at(1), TokenKind::Ident(_))
                && self.peek_at(2) == &TokenKind::Punct(":")
            {
                self.advance();
                let mut options = Vec::new();
                loop {
                    let name = self.expect_ident()?;
                    self.expect_punct(":")?;
                    options.push((name, self.parse_expression()?));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("}")?;
                expression = Expression::CallOptions {
                    callee: Box::new(expression),
                    options,
                };
            } else if let TokenKind::Punct(op @ ("++" | "--")) = self.peek() {
                let operator = *op;
                self.advance();
                expression = Expression::Unary {
                    operator,
                    operand: Box::new(expression),
                    prefix: false,
                };
            } else {
                return Ok(expression);
            }
            // Each link wraps the tree one level deeper
            self.deepen()?;
        }
    }

    fn parse_call_arguments(&mut self) -> Result<Vec<Expression>> {
        self.expect_punct("(")?;
        let mut arguments = Vec::new();
        if self.eat_punct(")") {
            return Ok(arguments);
        }

        // Named arguments `f({a: 1, b: 2})`
        if self.eat_punct("{") {
            if !self.eat_punct("}") {
                loop {
                    self.expect_ident()?;
                    self.expect_punct(":")?;
                    arguments.push(self.parse_expression()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("}")?;
            }
            self.expect_punct(")")?;
            return Ok(arguments);
        }

        loop {
            arguments.push(self.parse_expression()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(arguments)
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        // Leave stray punctuation in place so recovery can resynchronise on it
        let unusable = match self.peek() {
            TokenKind::Eof => true,
            TokenKind::Punct(p) => !matches!(*p, "(" | "["),
            _ => false,
        };
        if unusable {
            return Err(self.error(format!(
                "unexpected {} in expression",
                describe(self.peek())
            )));
        }

        match self.advance() {
            TokenKind::Number(value) => {
                if matches!(self.peek(), TokenKind::Ident(unit) if NUMBER_UNITS.contains(&unit.as_str()))
                {
                    self.advance();
                }
                Ok(Expression::Literal(Literal::Number(value)))
            }
            TokenKind::Str(mut value) => {
                while let TokenKind::Str(next) = self.peek().clone() {
                    self.advance();
                    value.push_str(&next);
                }
                Ok(Expression::Literal(Literal::String(value)))
            }
            TokenKind::Ident(word) => match word.as_str() {
                "true" => Ok(Expression::Literal(Literal::Bool(true))),
                "false" => Ok(Expression::Literal(Literal::Bool(false))),
                "new" => Ok(Expression::New(self.parse_type_name()?)),
                "hex" | "unicode" if matches!(self.peek(), TokenKind::Str(_)) => {
                    self.parse_primary()
                }
                "payable" => Ok(Expression::ElementaryType(word)),
                w if is_elementary_type(w) => {
                    if w == "address" && self.eat_ident("payable") {
                        return Ok(Expression::ElementaryType("address payable".to_string()));
                    }
                    Ok(Expression::ElementaryType(word))
                }
                _ => Ok(Expression::Identifier(word)),
            },
            TokenKind::Punct("(") => {
                if self.eat_punct(")") {
                    return Ok(Expression::Tuple(Vec::new()));
                }
                let mut items = Vec::new();
                loop {
                    let item = if self.is_punct(",") || self.is_punct(")") {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    items.push(item);
                    if self.eat_punct(",") {
                        continue;
                    }
                    self.expect_punct(")")?;
                    break;
                }
                if items.len() == 1 {
                    if let Some(Some(inner)) = items.pop() {
                        return Ok(inner);
                    }
                    return Ok(Expression::Tuple(vec![None]));
                }
                Ok(Expression::Tuple(items))
            }
            TokenKind::Punct("[") => {
                let mut items = Vec::new();
                if !self.eat_punct("]") {
                    loop {
                        items.push(self.parse_expression()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct("]")?;
                }
                Ok(Expression::Array(items))
            }
            other => Err(self.error(format!(
                "unexpected {} in expression",
                describe(&other)
            ))),
        }
    }
}
