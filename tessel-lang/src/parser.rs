//! Recursive descent parser
//!
//! Binary operators are parsed by precedence climbing, lowest to highest:
//!
//!     ||   &&   == !=   < <= > >=   + -   * / %
//!
//! followed by unary `-`/`!` and the postfix forms (call, index, member). `local`,
//! `function`, `if` and `error` are prefix forms that extend as far right as possible, so
//! they may also appear as the right operand of a binary operator.
//!
//! Trees deeper than [`MAX_NESTING`] are rejected with a [`ParseError`], so every later
//! recursive walk over an [`Ast`] runs in bounded stack.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ast::{Ast, BinaryOp, Bind, Expr, ExprKind, Field, Ident, UnaryOp};
use crate::error::ParseError;
use crate::lexer::{tokenize, Spanned, Token};
use crate::location::{LineIndex, LocationRange};

/// Parse a whole file.
pub fn parse(file: impl AsRef<Path>, source: &str) -> Result<Ast, ParseError> {
    let file = file.as_ref().to_path_buf();
    let tokens = tokenize(source)
        .map_err(|err| with_file(err, &file))?
        .into_iter()
        .filter(|spanned| !spanned.token.is_comment())
        .collect();
    let mut parser = Parser {
        tokens,
        pos: 0,
        index: LineIndex::new(source),
        end: source.len(),
        file: file.clone(),
        depth: 0,
    };
    let root = parser.parse_expr()?;
    if let Some(spanned) = parser.peek_spanned() {
        return Err(parser.error(
            format!("unexpected {}, expected end of file", spanned.token),
            spanned.span.clone(),
        ));
    }
    Ok(Ast { file, root })
}

fn with_file(mut err: ParseError, file: &Path) -> ParseError {
    if let Some(range) = err.range.take() {
        err.range = Some(range.with_file(file));
    }
    err
}

/// Deepest expression tree the parser builds. Operator and postfix chains count one level
/// per link, like bracketed nesting.
pub const MAX_NESTING: usize = 128;

fn precedence(token: &Token) -> Option<(u8, BinaryOp)> {
    let entry = match token {
        Token::OrOr => (1, BinaryOp::Or),
        Token::AndAnd => (2, BinaryOp::And),
        Token::EqEq => (3, BinaryOp::Eq),
        Token::NotEq => (3, BinaryOp::NotEq),
        Token::Lt => (4, BinaryOp::Lt),
        Token::LtEq => (4, BinaryOp::LtEq),
        Token::Gt => (4, BinaryOp::Gt),
        Token::GtEq => (4, BinaryOp::GtEq),
        Token::Plus => (5, BinaryOp::Add),
        Token::Minus => (5, BinaryOp::Sub),
        Token::Star => (6, BinaryOp::Mul),
        Token::Slash => (6, BinaryOp::Div),
        Token::Percent => (6, BinaryOp::Mod),
        _ => return None,
    };
    Some(entry)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    index: LineIndex,
    end: usize,
    file: PathBuf,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|spanned| &spanned.token)
    }

    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    /// Consume the current token. Callers check `peek` first.
    fn bump(&mut self) -> Spanned {
        let spanned = self.tokens[self.pos].clone();
        self.pos += 1;
        spanned
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn range(&self, span: std::ops::Range<usize>) -> LocationRange {
        self.index.range(span).with_file(&self.file)
    }

    fn error(&self, message: String, span: std::ops::Range<usize>) -> ParseError {
        ParseError::new(message, self.range(span))
    }

    /// Error pointing at the current token, or at the end of input.
    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek_spanned() {
            Some(spanned) => self.error(
                format!("expected {expected}, got {}", spanned.token),
                spanned.span.clone(),
            ),
            None => self.error(
                format!("expected {expected}, got end of file"),
                self.end..self.end,
            ),
        }
    }

    /// Go one level deeper, failing at the current token past [`MAX_NESTING`].
    fn descend(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            let span = self
                .peek_spanned()
                .map_or(self.end..self.end, |spanned| spanned.span.clone());
            return Err(self.error("maximum nesting depth exceeded".to_string(), span));
        }
        self.depth += 1;
        Ok(())
    }

    fn expect(&mut self, token: Token) -> Result<Spanned, ParseError> {
        if self.peek() == Some(&token) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&token.to_string()))
        }
    }

    fn ident(&mut self) -> Result<Ident, ParseError> {
        match self.peek_spanned() {
            Some(Spanned {
                token: Token::Ident(name),
                span,
            }) => {
                let ident = Ident {
                    name: name.clone(),
                    range: self.range(span.clone()),
                };
                self.pos += 1;
                Ok(ident)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn string(&mut self) -> Result<(String, LocationRange), ParseError> {
        match self.peek_spanned() {
            Some(Spanned {
                token: Token::Str(value),
                span,
            }) => {
                let out = (value.clone(), self.range(span.clone()));
                self.pos += 1;
                Ok(out)
            }
            _ => Err(self.unexpected("string")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let mut lhs = self.parse_unary()?;
        while let Some((prec, op)) = self.peek().and_then(precedence) {
            if prec < min_prec {
                break;
            }
            self.descend()?;
            self.pos += 1;
            let rhs = self.parse_binary(prec + 1)?;
            let range = lhs.range.to(&rhs.range);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                range,
            );
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.descend()?;
        let expr = self.parse_prefix();
        self.depth -= 1;
        expr
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Bang) => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let start = self.bump();
        let operand = self.parse_unary()?;
        let range = self.range(start.span).to(&operand.range);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            range,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            if matches!(
                self.peek(),
                Some(Token::Dot | Token::LBracket | Token::LParen)
            ) {
                self.descend()?;
            }
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let field = self.ident()?;
                    let range = expr.range.to(&field.range);
                    expr = Expr::new(
                        ExprKind::Member {
                            target: Box::new(expr),
                            field,
                        },
                        range,
                    );
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    let close = self.expect(Token::RBracket)?;
                    let range = expr.range.to(&self.range(close.span));
                    expr = Expr::new(
                        ExprKind::Index {
                            target: Box::new(expr),
                            index: Box::new(index),
                        },
                        range,
                    );
                }
                Some(Token::LParen) => {
                    self.pos += 1;
                    let args = self.parse_list(Token::RParen, Self::parse_expr)?;
                    let close = self.expect(Token::RParen)?;
                    let range = expr.range.to(&self.range(close.span));
                    expr = Expr::new(
                        ExprKind::Apply {
                            target: Box::new(expr),
                            args,
                        },
                        range,
                    );
                }
                _ => {
                    self.depth = depth;
                    return Ok(expr);
                }
            }
        }
    }

    /// Comma separated items up to (not including) `close`; a trailing comma is accepted.
    fn parse_list<T>(
        &mut self,
        close: Token,
        mut item: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        let mut items = Vec::new();
        while self.peek() != Some(&close) {
            items.push(item(self)?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(spanned) = self.peek_spanned().cloned() else {
            return Err(self.unexpected("expression"));
        };
        let start = self.range(spanned.span.clone());
        let simple = match &spanned.token {
            Token::Null => Some(ExprKind::Null),
            Token::True => Some(ExprKind::Bool(true)),
            Token::False => Some(ExprKind::Bool(false)),
            Token::Number(value) => Some(ExprKind::Number(*value)),
            Token::Str(value) => Some(ExprKind::Str(value.clone())),
            Token::Ident(name) => Some(ExprKind::Var(name.clone())),
            _ => None,
        };
        if let Some(kind) = simple {
            self.pos += 1;
            return Ok(Expr::new(kind, start));
        }

        match spanned.token {
            Token::LParen => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                let close = self.expect(Token::RParen)?;
                Ok(Expr::new(inner.kind, start.to(&self.range(close.span))))
            }
            Token::LBracket => {
                self.pos += 1;
                let items = self.parse_list(Token::RBracket, Self::parse_expr)?;
                let close = self.expect(Token::RBracket)?;
                Ok(Expr::new(
                    ExprKind::Array(items),
                    start.to(&self.range(close.span)),
                ))
            }
            Token::LBrace => {
                self.pos += 1;
                let fields = self.parse_list(Token::RBrace, Self::parse_field)?;
                let close = self.expect(Token::RBrace)?;
                Ok(Expr::new(
                    ExprKind::Object(fields),
                    start.to(&self.range(close.span)),
                ))
            }
            Token::Import | Token::ImportStr => {
                self.pos += 1;
                let (path, path_range) = self.string()?;
                let kind = if spanned.token == Token::Import {
                    ExprKind::Import(path)
                } else {
                    ExprKind::ImportStr(path)
                };
                Ok(Expr::new(kind, start.to(&path_range)))
            }
            Token::Local => {
                self.pos += 1;
                let mut binds = vec![self.parse_bind()?];
                while self.eat(&Token::Comma) {
                    binds.push(self.parse_bind()?);
                }
                self.expect(Token::Semicolon)?;
                let body = self.parse_expr()?;
                let range = start.to(&body.range);
                Ok(Expr::new(
                    ExprKind::Local {
                        binds,
                        body: Box::new(body),
                    },
                    range,
                ))
            }
            Token::Function => {
                self.pos += 1;
                self.expect(Token::LParen)?;
                let params = self.parse_list(Token::RParen, Self::ident)?;
                self.expect(Token::RParen)?;
                let body = self.parse_expr()?;
                let range = start.to(&body.range);
                Ok(Expr::new(
                    ExprKind::Function {
                        params,
                        body: Arc::new(body),
                    },
                    range,
                ))
            }
            Token::If => {
                self.pos += 1;
                let cond = self.parse_expr()?;
                self.expect(Token::Then)?;
                let then = self.parse_expr()?;
                let otherwise = if self.eat(&Token::Else) {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                let end = otherwise.as_ref().map_or(&then.range, |e| &e.range);
                let range = start.to(end);
                Ok(Expr::new(
                    ExprKind::If {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        otherwise,
                    },
                    range,
                ))
            }
            Token::Error => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                let range = start.to(&inner.range);
                Ok(Expr::new(ExprKind::Error(Box::new(inner)), range))
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_bind(&mut self) -> Result<Bind, ParseError> {
        let name = self.ident()?;
        let params = if self.eat(&Token::LParen) {
            let params = self.parse_list(Token::RParen, Self::ident)?;
            self.expect(Token::RParen)?;
            Some(params)
        } else {
            None
        };
        self.expect(Token::Assign)?;
        let value = self.parse_expr()?;
        let value = match params {
            Some(params) => {
                let range = name.range.to(&value.range);
                Expr::new(
                    ExprKind::Function {
                        params,
                        body: Arc::new(value),
                    },
                    range,
                )
            }
            None => value,
        };
        Ok(Bind { name, value })
    }

    fn parse_field(&mut self) -> Result<Field, ParseError> {
        let name = match self.peek_spanned() {
            Some(Spanned {
                token: Token::Str(_),
                ..
            }) => {
                let (name, range) = self.string()?;
                Ident { name, range }
            }
            Some(Spanned {
                token: Token::Ident(_),
                ..
            }) => self.ident()?,
            _ => return Err(self.unexpected("field name")),
        };
        self.expect(Token::Colon)?;
        let value = self.parse_expr()?;
        Ok(Field { name, value })
    }
}
