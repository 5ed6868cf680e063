//! Tokenizer for Tessel source text
//!
//! Built on `logos`. Comments are real tokens rather than skipped trivia: the parser drops
//! them, the formatter needs them to reproduce the source faithfully.

use std::fmt;
use std::ops::Range;

use logos::Logos;

use crate::error::ParseError;
use crate::location::LineIndex;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[token("local")]
    Local,
    #[token("function")]
    Function,
    #[token("if")]
    If,
    #[token("then")]
    Then,
    #[token("else")]
    Else,
    #[token("import")]
    Import,
    #[token("importstr")]
    ImportStr,
    #[token("error")]
    Error,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("=")]
    Assign,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"//[^\n]*")]
    #[regex(r"#[^\n]*")]
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/")]
    Comment,
}

impl Token {
    pub fn is_comment(&self) -> bool {
        matches!(self, Token::Comment)
    }

    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Token::Local
                | Token::Function
                | Token::If
                | Token::Then
                | Token::Else
                | Token::Import
                | Token::ImportStr
                | Token::Error
                | Token::True
                | Token::False
                | Token::Null
        )
    }

    pub fn is_binary_operator(&self) -> bool {
        matches!(
            self,
            Token::Plus
                | Token::Minus
                | Token::Star
                | Token::Slash
                | Token::Percent
                | Token::EqEq
                | Token::NotEq
                | Token::Lt
                | Token::LtEq
                | Token::Gt
                | Token::GtEq
                | Token::AndAnd
                | Token::OrOr
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Local => "local",
            Token::Function => "function",
            Token::If => "if",
            Token::Then => "then",
            Token::Else => "else",
            Token::Import => "import",
            Token::ImportStr => "importstr",
            Token::Error => "error",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Dot => ".",
            Token::Assign => "=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Ident(name) => return write!(f, "identifier `{name}`"),
            Token::Number(value) => return write!(f, "number {value}"),
            Token::Str(_) => "string",
            Token::Comment => "comment",
        };
        write!(f, "`{text}`")
    }
}

/// A token with its byte span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

/// Tokenize the whole source, comments included.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push(Spanned { token, span }),
            Err(()) => {
                let index = LineIndex::new(source);
                let message = describe_invalid(&source[span.clone()]);
                return Err(ParseError::new(message, index.range(span)));
            }
        }
    }
    Ok(tokens)
}

fn describe_invalid(slice: &str) -> String {
    match slice.chars().next() {
        Some('"') | Some('\'') => "unterminated string".to_string(),
        Some(ch) => format!("unexpected character {ch:?}"),
        None => "unexpected end of input".to_string(),
    }
}

fn unescape(raw: &str) -> Option<String> {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next()? {
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            '/' => out.push('/'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(code)?);
            }
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn keywords_win_over_identifiers() {
        assert_eq!(
            kinds("local locals"),
            vec![Token::Local, Token::Ident("locals".into())]
        );
    }

    #[test]
    fn comments_are_kept() {
        assert_eq!(
            kinds("1 // one\n# two\n/* three */ 2"),
            vec![
                Token::Number(1.0),
                Token::Comment,
                Token::Comment,
                Token::Comment,
                Token::Number(2.0)
            ]
        );
    }

    #[test]
    fn strings_are_unescaped() {
        assert_eq!(
            kinds(r#""a\n\"b\"" 'c\'d' "A""#),
            vec![
                Token::Str("a\n\"b\"".into()),
                Token::Str("c'd".into()),
                Token::Str("A".into())
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_location() {
        let err = tokenize("{\n  a: \"oops\n}").unwrap_err();
        assert_eq!(err.message, "unterminated string");
        let range = err.range.unwrap();
        assert_eq!(range.begin.line, 2);
        assert_eq!(range.begin.column, 6);
    }
}
