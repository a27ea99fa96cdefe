//! Pratt parser for template expressions and event statements.

use std::rc::Rc;

use crate::types::Value;

use super::ast::{AssignOp, BinaryOp, Expr, LogicalOp, UnaryOp};
use super::lexer::{tokenize, Token, TokenKind};
use super::ParseError;

// Binding powers, loosest first.
const BP_ASSIGN: u8 = 2;
const BP_CONDITIONAL: u8 = 3;
const BP_NULLISH: u8 = 4;
const BP_OR: u8 = 5;
const BP_AND: u8 = 6;
const BP_EQUALITY: u8 = 10;
const BP_RELATIONAL: u8 = 11;
const BP_ADDITIVE: u8 = 12;
const BP_MULTIPLICATIVE: u8 = 13;
const BP_PREFIX: u8 = 14;

/// Parse a single expression; trailing input is an error.
pub fn parse_expression(src: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(src)?;
    if parser.at_end() {
        return Err(ParseError::Empty);
    }
    let expr = parser.expression(0)?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse `;`-separated statements. Empty statements are skipped.
pub fn parse_statements(src: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(src)?;
    let mut body = Vec::new();
    loop {
        while parser.eat(";") {}
        if parser.at_end() {
            break;
        }
        body.push(parser.expression(0)?);
        if !parser.eat(";") {
            parser.expect_end()?;
            break;
        }
    }
    Ok(match body.len() {
        1 => body.pop().unwrap_or(Expr::Literal(Value::Undefined)),
        _ => Expr::Sequence(body),
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::End
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Punct(p) if *p == punct)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &'static str) -> Result<(), ParseError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ParseError {
        let token = self.peek();
        match &token.kind {
            TokenKind::End => ParseError::UnexpectedEnd,
            kind => ParseError::UnexpectedToken {
                found: describe(kind),
                offset: token.offset,
            },
        }
    }

    fn expect_ident(&mut self) -> Result<Rc<str>, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = Rc::clone(name);
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    // =========================================================================
    // Pratt loop
    // =========================================================================

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut left = self.prefix()?;

        loop {
            let TokenKind::Punct(punct) = self.peek().kind else {
                break;
            };
            let offset = self.peek().offset;

            if let Some(op) = assign_op(punct) {
                if min_bp > BP_ASSIGN {
                    break;
                }
                if !left.is_assignable() {
                    return Err(ParseError::InvalidAssignmentTarget { offset });
                }
                self.advance();
                // Right associative.
                let value = self.expression(BP_ASSIGN)?;
                left = Expr::Assign {
                    op,
                    target: Box::new(left),
                    value: Box::new(value),
                };
                continue;
            }

            if punct == "?" {
                if min_bp > BP_CONDITIONAL {
                    break;
                }
                self.advance();
                let consequent = self.expression(BP_ASSIGN)?;
                self.expect(":")?;
                let alternate = self.expression(BP_ASSIGN)?;
                left = Expr::Conditional {
                    test: Box::new(left),
                    consequent: Box::new(consequent),
                    alternate: Box::new(alternate),
                };
                continue;
            }

            if let Some((op, bp)) = logical_op(punct) {
                if bp <= min_bp {
                    break;
                }
                self.advance();
                let right = self.expression(bp)?;
                left = Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                };
                continue;
            }

            if let Some((op, bp)) = binary_op(punct) {
                if bp <= min_bp {
                    break;
                }
                self.advance();
                let right = self.expression(bp)?;
                left = Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                };
                continue;
            }

            break;
        }

        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Punct(p @ ("!" | "-" | "+")) => {
                self.advance();
                let op = match *p {
                    "!" => UnaryOp::Not,
                    "-" => UnaryOp::Neg,
                    _ => UnaryOp::Plus,
                };
                let operand = self.expression(BP_PREFIX)?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Punct(p @ ("++" | "--")) => {
                self.advance();
                let increment = *p == "++";
                let target = self.expression(BP_PREFIX)?;
                if !target.is_assignable() {
                    return Err(ParseError::InvalidAssignmentTarget {
                        offset: token.offset,
                    });
                }
                Ok(Expr::Update {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                })
            }
            TokenKind::Ident(name) if &**name == "typeof" => {
                self.advance();
                let operand = self.expression(BP_PREFIX)?;
                Ok(Expr::Unary {
                    op: UnaryOp::TypeOf,
                    operand: Box::new(operand),
                })
            }
            _ => {
                let primary = self.primary()?;
                self.postfix(primary)
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(n)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            TokenKind::Ident(name) => {
                if matches!(self.peek_at(1), TokenKind::Punct("=>")) {
                    self.advance();
                    self.advance();
                    return self.arrow_body(vec![name]);
                }
                self.advance();
                Ok(match &*name {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" => Expr::Literal(Value::Null),
                    "undefined" => Expr::Literal(Value::Undefined),
                    "NaN" => Expr::Literal(Value::Number(f64::NAN)),
                    "Infinity" => Expr::Literal(Value::Number(f64::INFINITY)),
                    _ => Expr::Ident(name),
                })
            }
            TokenKind::Punct("(") => {
                if let Some(params) = self.arrow_params() {
                    return self.arrow_body(params);
                }
                self.advance();
                let inner = self.expression(0)?;
                self.expect(")")?;
                Ok(inner)
            }
            TokenKind::Punct("[") => {
                self.advance();
                let items = self.list_until("]")?;
                Ok(Expr::Array(items))
            }
            TokenKind::Punct("{") => {
                self.advance();
                self.object()
            }
            _ => Err(self.unexpected()),
        }
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, ParseError> {
        loop {
            if self.eat(".") {
                let property = self.expect_ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat("?.") {
                if self.eat("(") {
                    let args = self.list_until(")")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat("[") {
                    let index = self.expression(0)?;
                    self.expect("]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.eat("[") {
                let index = self.expression(0)?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.eat("(") {
                let args = self.list_until(")")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else if self.is_punct("++") || self.is_punct("--") {
                let token = self.advance();
                if !expr.is_assignable() {
                    return Err(ParseError::InvalidAssignmentTarget {
                        offset: token.offset,
                    });
                }
                expr = Expr::Update {
                    increment: token.kind == TokenKind::Punct("++"),
                    prefix: false,
                    target: Box::new(expr),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to `close` (trailing comma allowed).
    fn list_until(&mut self, close: &'static str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.expression(BP_ASSIGN)?);
            if !self.eat(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn object(&mut self) -> Result<Expr, ParseError> {
        let mut entries = Vec::new();
        while !self.eat("}") {
            let token = self.advance();
            let key: Rc<str> = match token.kind {
                TokenKind::Ident(name) | TokenKind::Str(name) => name,
                TokenKind::Number(n) => Value::Number(n).to_display().into(),
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        found: describe(&token.kind),
                        offset: token.offset,
                    });
                }
            };
            let value = if self.eat(":") {
                self.expression(BP_ASSIGN)?
            } else {
                // Shorthand `{ name }`.
                Expr::Ident(Rc::clone(&key))
            };
            entries.push((key, value));
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }

    /// If the parenthesised group at the cursor is an arrow parameter list,
    /// consume it through `=>` and return the names.
    fn arrow_params(&mut self) -> Option<Vec<Rc<str>>> {
        let mut params = Vec::new();
        let mut ahead = 1;
        loop {
            match self.peek_at(ahead) {
                TokenKind::Punct(")") if params.is_empty() => break,
                TokenKind::Ident(name) => {
                    params.push(Rc::clone(name));
                    ahead += 1;
                    match self.peek_at(ahead) {
                        TokenKind::Punct(",") => ahead += 1,
                        TokenKind::Punct(")") => break,
                        _ => return None,
                    }
                }
                _ => return None,
            }
        }
        if !matches!(self.peek_at(ahead + 1), TokenKind::Punct("=>")) {
            return None;
        }
        for _ in 0..ahead + 2 {
            self.advance();
        }
        Some(params)
    }

    fn arrow_body(&mut self, params: Vec<Rc<str>>) -> Result<Expr, ParseError> {
        let body = self.expression(BP_ASSIGN)?;
        Ok(Expr::Arrow {
            params: params.into(),
            body: Rc::new(body),
        })
    }
}

fn assign_op(punct: &str) -> Option<AssignOp> {
    Some(match punct {
        "=" => AssignOp::Assign,
        "+=" => AssignOp::Compound(BinaryOp::Add),
        "-=" => AssignOp::Compound(BinaryOp::Sub),
        "*=" => AssignOp::Compound(BinaryOp::Mul),
        "/=" => AssignOp::Compound(BinaryOp::Div),
        "%=" => AssignOp::Compound(BinaryOp::Rem),
        _ => return None,
    })
}

fn logical_op(punct: &str) -> Option<(LogicalOp, u8)> {
    Some(match punct {
        "??" => (LogicalOp::Nullish, BP_NULLISH),
        "||" => (LogicalOp::Or, BP_OR),
        "&&" => (LogicalOp::And, BP_AND),
        _ => return None,
    })
}

fn binary_op(punct: &str) -> Option<(BinaryOp, u8)> {
    Some(match punct {
        "==" => (BinaryOp::LooseEq, BP_EQUALITY),
        "!=" => (BinaryOp::LooseNe, BP_EQUALITY),
        "===" => (BinaryOp::StrictEq, BP_EQUALITY),
        "!==" => (BinaryOp::StrictNe, BP_EQUALITY),
        "<" => (BinaryOp::Lt, BP_RELATIONAL),
        ">" => (BinaryOp::Gt, BP_RELATIONAL),
        "<=" => (BinaryOp::Le, BP_RELATIONAL),
        ">=" => (BinaryOp::Ge, BP_RELATIONAL),
        "+" => (BinaryOp::Add, BP_ADDITIVE),
        "-" => (BinaryOp::Sub, BP_ADDITIVE),
        "*" => (BinaryOp::Mul, BP_MULTIPLICATIVE),
        "/" => (BinaryOp::Div, BP_MULTIPLICATIVE),
        "%" => (BinaryOp::Rem, BP_MULTIPLICATIVE),
        _ => return None,
    })
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(n) => Value::Number(*n).to_display(),
        TokenKind::Str(s) => format!("{s:?}"),
        TokenKind::Ident(name) => name.to_string(),
        TokenKind::Punct(p) => (*p).to_string(),
        TokenKind::End => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        let Expr::Binary { op: BinaryOp::Add, right, .. } = expr else {
            panic!("expected addition at the root, got {expr:?}");
        };
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_conditional_and_logical() {
        let expr = parse_expression("a ? b : c || d").unwrap();
        let Expr::Conditional { alternate, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*alternate, Expr::Logical { op: LogicalOp::Or, .. }));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let expr = parse_expression("a = b = 1").unwrap();
        let Expr::Assign { value, .. } = expr else {
            panic!("expected assignment");
        };
        assert!(matches!(*value, Expr::Assign { .. }));
    }

    #[test]
    fn test_arrow_functions() {
        assert!(matches!(
            parse_expression("x => x * 2").unwrap(),
            Expr::Arrow { ref params, .. } if params.len() == 1
        ));
        assert!(matches!(
            parse_expression("(a, b) => a - b").unwrap(),
            Expr::Arrow { ref params, .. } if params.len() == 2
        ));
        assert!(matches!(
            parse_expression("() => 1").unwrap(),
            Expr::Arrow { ref params, .. } if params.is_empty()
        ));
        assert!(matches!(
            parse_expression("(a)").unwrap(),
            Expr::Ident(_)
        ));
    }

    #[test]
    fn test_member_chain_and_calls() {
        let expr = parse_expression("user?.tags[0].toUpperCase()").unwrap();
        assert!(matches!(expr, Expr::Call { optional: false, .. }));
    }

    #[test]
    fn test_object_literal_shorthand() {
        let Expr::Object(entries) = parse_expression("{ a: 1, 'b c': 2, d }").unwrap() else {
            panic!("expected object");
        };
        let keys: Vec<&str> = entries.iter().map(|(k, _)| &**k).collect();
        assert_eq!(keys, vec!["a", "b c", "d"]);
    }

    #[test]
    fn test_statements() {
        assert!(matches!(
            parse_statements("count++; emit('done', count)").unwrap(),
            Expr::Sequence(ref body) if body.len() == 2
        ));
        assert!(matches!(
            parse_statements("count++;").unwrap(),
            Expr::Update { .. }
        ));
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_expression(""), Err(ParseError::Empty));
        assert_eq!(parse_expression("1 +"), Err(ParseError::UnexpectedEnd));
        assert!(matches!(
            parse_expression("1 = 2"),
            Err(ParseError::InvalidAssignmentTarget { offset: 2 })
        ));
        assert!(matches!(
            parse_expression("a b"),
            Err(ParseError::UnexpectedToken { offset: 2, .. })
        ));
    }
}
