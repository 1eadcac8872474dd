//! Recursive descent parser
//!
//! Produces a [`Stmt`] list from script source. The grammar is a small,
//! loop-free subset of JavaScript: declarations, `if`/`else`, blocks, `throw`,
//! `return`, function declarations and the usual expression forms.

use std::rc::Rc;

use super::ast::*;
use super::lexer::{tokenize, Spanned, TemplatePiece, Token};
use super::ScriptError;

/// Deepest nesting of expressions and blocks accepted
const MAX_NESTING: usize = 128;

const UNSUPPORTED: &[&str] = &["for", "while", "do", "switch", "try", "catch", "class", "async", "await", "yield", "import", "export"];

const RESERVED: &[&str] = &[
    "let", "const", "var", "if", "else", "throw", "return", "function", "true", "false", "null",
    "undefined", "typeof", "new", "in",
];

/// Parse a whole script
pub fn parse(source: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser::new(tokenize(source)?);
    let mut program = Vec::new();
    while !parser.at_eof() {
        program.push(parser.statement()?);
    }
    Ok(program)
}

/// Parse a single expression, e.g. the inside of a template hole
pub fn parse_expression(source: &str) -> Result<Expr, ScriptError> {
    Parser::new(tokenize(source)?).whole_expression()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self::with_depth(tokens, 0)
    }

    /// Parser for a template hole, starting at the enclosing nesting depth
    fn with_depth(tokens: Vec<Spanned>, depth: usize) -> Self {
        Self { tokens, pos: 0, depth }
    }

    fn whole_expression(mut self) -> Result<Expr, ScriptError> {
        let expr = self.expression()?;
        if !self.at_eof() {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn unexpected(&self) -> ScriptError {
        match self.peek() {
            Token::Eof => self.error("Unexpected end of input"),
            Token::Punct(p) => self.error(format!("Unexpected token '{}'", p)),
            Token::Ident(name) => self.error(format!("Unexpected identifier '{}'", name)),
            Token::Number(n) => self.error(format!("Unexpected number {}", n)),
            Token::Str(_) | Token::Template(_) => self.error("Unexpected string"),
        }
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == word)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(match self.peek() {
                Token::Eof => self.error(format!("Expected '{}' but reached end of input", p)),
                _ => self.error(format!("Expected '{}'", p)),
            })
        }
    }

    fn binding_name(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("Expected identifier")),
        }
    }

    /// Property names may be keywords: `pm.expect(x).to.be.null`
    fn property_name(&mut self) -> Result<String, ScriptError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            _ => Err(self.error("Expected property name")),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, ScriptError>) -> Result<T, ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("Script is nested too deeply"));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn end_statement(&mut self) {
        self.eat_punct(";");
    }

    // Statements

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> Result<Stmt, ScriptError> {
        if let Token::Ident(word) = self.peek().clone() {
            if UNSUPPORTED.contains(&word.as_str()) {
                return Err(match word.as_str() {
                    "for" | "while" | "do" => self.error("Loops are not supported"),
                    other => self.error(format!("'{}' is not supported", other)),
                });
            }
            match word.as_str() {
                "let" | "var" | "const" => return self.declaration(word == "const"),
                "if" => return self.if_statement(),
                "throw" => {
                    self.pos += 1;
                    let value = self.expression()?;
                    self.end_statement();
                    return Ok(Stmt::Throw(value));
                }
                "return" => {
                    self.pos += 1;
                    let value = if self.is_punct(";") || self.is_punct("}") || self.at_eof() {
                        None
                    } else {
                        Some(self.expression()?)
                    };
                    self.end_statement();
                    return Ok(Stmt::Return(value));
                }
                "function" if matches!(self.peek_at(1), Token::Ident(_)) => {
                    self.pos += 1;
                    let name = self.binding_name()?;
                    let def = self.function_rest()?;
                    return Ok(Stmt::Function { name, def });
                }
                _ => {}
            }
        }

        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }

        let expr = self.expression()?;
        self.end_statement();
        Ok(Stmt::Expr(expr))
    }

    fn declaration(&mut self, constant: bool) -> Result<Stmt, ScriptError> {
        self.pos += 1;
        let mut bindings = Vec::new();
        loop {
            let name = self.binding_name()?;
            let init = if self.eat_punct("=") {
                Some(self.nested(Self::assignment)?)
            } else {
                if constant {
                    return Err(self.error("Missing initializer in const declaration"));
                }
                None
            };
            bindings.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.end_statement();
        Ok(Stmt::Declare { bindings, constant })
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.pos += 1;
        self.expect_punct("(")?;
        let cond = self.expression()?;
        self.expect_punct(")")?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.is_keyword("else") {
            self.pos += 1;
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If { cond, then, otherwise })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.error("Expected '}' but reached end of input"));
            }
            body.push(self.statement()?);
        }
        self.pos += 1;
        Ok(body)
    }

    /// Parameter list and body after `function` [name]
    fn function_rest(&mut self) -> Result<Rc<FunctionDef>, ScriptError> {
        self.expect_punct("(")?;
        let params = self.params()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Rc::new(FunctionDef { params, body }))
    }

    /// Names up to and including the closing paren
    fn params(&mut self) -> Result<Vec<String>, ScriptError> {
        let mut params = Vec::new();
        if self.eat_punct(")") {
            return Ok(params);
        }
        loop {
            params.push(self.binding_name()?);
            if self.eat_punct(")") {
                return Ok(params);
            }
            self.expect_punct(",")?;
        }
    }

    // Expressions

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> Result<Expr, ScriptError> {
        if self.arrow_ahead() {
            return self.arrow_function();
        }

        let target = self.conditional()?;
        let op = match self.peek() {
            Token::Punct("=") => AssignOp::Set,
            Token::Punct("+=") => AssignOp::Add,
            Token::Punct("-=") => AssignOp::Sub,
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
            return Err(self.error("Invalid assignment target"));
        }
        self.pos += 1;
        let value = self.nested(Self::assignment)?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    /// `x =>`, `() =>` or `(a, b) =>` at the cursor
    fn arrow_ahead(&self) -> bool {
        match self.peek() {
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                matches!(self.peek_at(1), Token::Punct("=>"))
            }
            Token::Punct("(") => {
                let mut offset = 1;
                loop {
                    match self.peek_at(offset) {
                        Token::Punct(")") => return matches!(self.peek_at(offset + 1), Token::Punct("=>")),
                        Token::Ident(_) | Token::Punct(",") => offset += 1,
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn arrow_function(&mut self) -> Result<Expr, ScriptError> {
        let params = if self.eat_punct("(") {
            self.params()?
        } else {
            vec![self.binding_name()?]
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(self.nested(Self::assignment)?)
        };
        Ok(Expr::Function(Rc::new(FunctionDef { params, body })))
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let cond = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.nested(Self::assignment)?;
        self.expect_punct(":")?;
        let otherwise = self.nested(Self::assignment)?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_or(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.logical_and()?;
        loop {
            let op = match self.peek() {
                Token::Punct("||") => LogicalOp::Or,
                Token::Punct("??") => LogicalOp::Nullish,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.logical_and()?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn logical_and(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.equality()?;
        while self.eat_punct("&&") {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut left = next(self)?;
        loop {
            let op = match self.peek() {
                Token::Punct(p) => ops.iter().find(|(sym, _)| sym == p).map(|(_, op)| *op),
                Token::Ident(word) if word == "in" => ops.iter().find(|(sym, _)| *sym == "in").map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = op else { return Ok(left) };
            self.pos += 1;
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNotEq),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::NotEq),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
                ("<=", BinaryOp::LtEq),
                (">=", BinaryOp::GtEq),
                ("in", BinaryOp::In),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Token::Punct("!") => Some(UnaryOp::Not),
            Token::Punct("-") => Some(UnaryOp::Neg),
            Token::Punct("+") => Some(UnaryOp::Plus),
            Token::Ident(word) if word == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        if self.is_punct("++") || self.is_punct("--") {
            let op = if self.is_punct("++") { AssignOp::Add } else { AssignOp::Sub };
            self.pos += 1;
            let target = self.nested(Self::unary)?;
            return self.increment(target, op);
        }

        let expr = self.postfix()?;
        if self.is_punct("++") || self.is_punct("--") {
            let op = if self.is_punct("++") { AssignOp::Add } else { AssignOp::Sub };
            self.pos += 1;
            return self.increment(expr, op);
        }
        Ok(expr)
    }

    /// `x++` and `++x` both evaluate to the updated value
    fn increment(&self, target: Expr, op: AssignOp) -> Result<Expr, ScriptError> {
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
            return Err(self.error("Invalid increment target"));
        }
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(Expr::Number(1.0)),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.eat_punct("[") {
                    let index = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Conditional {
                        cond: Box::new(Expr::Binary {
                            op: BinaryOp::Eq,
                            left: Box::new(expr.clone()),
                            right: Box::new(Expr::Null),
                        }),
                        then: Box::new(Expr::Undefined),
                        otherwise: Box::new(Expr::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        }),
                    };
                } else {
                    let property = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.nested(Self::assignment)?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
            // Trailing comma
            if self.eat_punct(")") {
                return Ok(args);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Str(s))
            }
            Token::Template(pieces) => {
                self.pos += 1;
                let mut parts = Vec::with_capacity(pieces.len());
                for piece in pieces {
                    parts.push(match piece {
                        TemplatePiece::Text(text) => TemplatePart::Text(text),
                        TemplatePiece::Code(code) => TemplatePart::Expr(
                            self.nested(|p| Parser::with_depth(tokenize(&code)?, p.depth).whole_expression())?,
                        ),
                    });
                }
                Ok(Expr::Template(parts))
            }
            Token::Punct("(") => {
                self.pos += 1;
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                self.pos += 1;
                self.array_literal()
            }
            Token::Punct("{") => {
                self.pos += 1;
                self.object_literal()
            }
            Token::Ident(word) => {
                self.pos += 1;
                match word.as_str() {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    "null" => Ok(Expr::Null),
                    "undefined" => Ok(Expr::Undefined),
                    "function" => {
                        // Optional name on a function expression is not bound
                        if matches!(self.peek(), Token::Ident(_)) {
                            self.pos += 1;
                        }
                        Ok(Expr::Function(self.function_rest()?))
                    }
                    // `new Error(msg)` is a plain call
                    "new" => self.postfix(),
                    w if RESERVED.contains(&w) || UNSUPPORTED.contains(&w) => {
                        self.pos -= 1;
                        Err(self.unexpected())
                    }
                    _ => Ok(Expr::Ident(word)),
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    fn array_literal(&mut self) -> Result<Expr, ScriptError> {
        let mut items = Vec::new();
        loop {
            if self.eat_punct("]") {
                return Ok(Expr::Array(items));
            }
            if self.eat_punct("...") {
                items.push(Element::Spread(self.nested(Self::assignment)?));
            } else {
                items.push(Element::Item(self.nested(Self::assignment)?));
            }
            if !self.eat_punct(",") {
                self.expect_punct("]")?;
                return Ok(Expr::Array(items));
            }
        }
    }

    fn object_literal(&mut self) -> Result<Expr, ScriptError> {
        let mut props = Vec::new();
        loop {
            if self.eat_punct("}") {
                return Ok(Expr::Object(props));
            }
            if self.eat_punct("...") {
                props.push(Property::Spread(self.nested(Self::assignment)?));
            } else {
                let key = match self.advance() {
                    Token::Ident(name) => name,
                    Token::Str(s) => s,
                    Token::Number(n) => super::value::format_number(n),
                    _ => return Err(self.error("Expected property name")),
                };
                if self.eat_punct(":") {
                    props.push(Property::Pair(key, self.nested(Self::assignment)?));
                } else {
                    // Shorthand `{ id }`
                    props.push(Property::Pair(key.clone(), Expr::Ident(key)));
                }
            }
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                return Ok(Expr::Object(props));
            }
        }
    }
}
