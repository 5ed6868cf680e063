//! Source formatter
//!
//! Works on the token stream rather than the AST so that comments survive and so that text
//! which does not parse yet can still be formatted. Only lexing errors are fatal.
//!
//! Layout rules:
//! - objects are always broken, one field per line, with a trailing comma
//! - arrays and argument lists stay on one line unless the source breaks the line right after
//!   the opening bracket; inline lists lose their trailing comma
//! - `;` ends the line, so a `local` body starts on a fresh line
//! - runs of blank lines are capped at [`FormatOptions::max_blank_lines`]

use std::str::FromStr;

use crate::error::FormatError;
use crate::lexer::{tokenize, Spanned, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringStyle {
    #[default]
    Double,
    Single,
    /// Keep the quotes the author wrote.
    Leave,
}

impl FromStr for StringStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "double" | "d" => Ok(StringStyle::Double),
            "single" | "s" => Ok(StringStyle::Single),
            "leave" | "l" => Ok(StringStyle::Leave),
            other => Err(format!("unknown string style: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Spaces per indentation level.
    pub indent: usize,
    pub max_blank_lines: usize,
    pub string_style: StringStyle,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            indent: 2,
            max_blank_lines: 1,
            string_style: StringStyle::Double,
        }
    }
}

/// Reformat a whole file.
pub fn format(source: &str, options: &FormatOptions) -> Result<String, FormatError> {
    let tokens = tokenize(source)?;
    let mut printer = Printer {
        source,
        options,
        tokens: &tokens,
        out: String::new(),
        frames: Vec::new(),
        pending: Break::None,
        last_end: 0,
        last_code: None,
        last_code_out: 0,
        unary: false,
    };
    let mut index = 0;
    while index < tokens.len() {
        index = printer.token(index);
    }
    Ok(printer.finish())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Brace,
    Bracket,
    Paren,
    /// Between `local` and its `;`; commas there separate binds, not items.
    Local,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    broken: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Break {
    None,
    Space,
    Newline,
}

struct Printer<'a> {
    source: &'a str,
    options: &'a FormatOptions,
    tokens: &'a [Spanned],
    out: String,
    frames: Vec<Frame>,
    pending: Break,
    /// Byte offset in `source` where the previous token ended.
    last_end: usize,
    last_code: Option<&'a Token>,
    /// Length of `out` right after the last code token was written.
    last_code_out: usize,
    /// The last code token was a prefix `-` or `!`.
    unary: bool,
}

fn closer_kind(token: &Token) -> Option<FrameKind> {
    match token {
        Token::RBrace => Some(FrameKind::Brace),
        Token::RBracket => Some(FrameKind::Bracket),
        Token::RParen => Some(FrameKind::Paren),
        _ => None,
    }
}

fn ends_operand(token: &Token) -> bool {
    matches!(
        token,
        Token::Ident(_)
            | Token::Number(_)
            | Token::Str(_)
            | Token::True
            | Token::False
            | Token::Null
            | Token::RParen
            | Token::RBracket
            | Token::RBrace
    )
}

fn space_between(prev: &Token, next: &Token) -> bool {
    match (prev, next) {
        (_, Token::Comma | Token::Semicolon | Token::Colon | Token::Dot) => false,
        (_, Token::RParen | Token::RBracket) => false,
        (Token::LParen | Token::LBracket | Token::Dot, _) => false,
        (Token::Function, Token::LParen) => false,
        (prev, Token::LParen | Token::LBracket) if ends_operand(prev) => false,
        _ => true,
    }
}

impl<'a> Printer<'a> {
    /// Print the token at `index`; returns the index of the next token to print.
    fn token(&mut self, index: usize) -> usize {
        let tokens = self.tokens;
        let spanned = &tokens[index];
        let token = &spanned.token;

        if token.is_comment() {
            self.comment(spanned);
            return index + 1;
        }

        if let Some(kind) = closer_kind(token) {
            self.close(kind);
        } else if *token == Token::Comma && self.skip_comma(index) {
            self.last_end = spanned.span.end;
            return index + 1;
        } else {
            self.separate(spanned);
        }

        self.write_code(spanned);

        match token {
            Token::LBrace | Token::LBracket | Token::LParen => return self.open(index),
            Token::Local => self.frames.push(Frame {
                kind: FrameKind::Local,
                broken: false,
            }),
            Token::Semicolon => {
                if self.frames.last().map(|f| f.kind) == Some(FrameKind::Local) {
                    self.frames.pop();
                }
                self.pending = Break::Newline;
            }
            Token::Comma => {
                if self.frames.last().is_some_and(|f| f.broken) {
                    self.pending = Break::Newline;
                }
            }
            _ => {}
        }
        index + 1
    }

    fn open(&mut self, index: usize) -> usize {
        let tokens = self.tokens;
        let kind = match tokens[index].token {
            Token::LBrace => FrameKind::Brace,
            Token::LBracket => FrameKind::Bracket,
            _ => FrameKind::Paren,
        };
        let next = self.next_code(index);

        // `{}`, `[]` and `()` with nothing in between, not even a comment
        if let Some(next) = next.filter(|&next| next == index + 1) {
            if closer_kind(&tokens[next].token) == Some(kind) {
                self.write_code(&tokens[next]);
                return next + 1;
            }
        }

        let broken = kind == FrameKind::Brace
            || next.is_some_and(|next| {
                let gap = &self.source[tokens[index].span.end..tokens[next].span.start];
                gap.contains('\n')
            });
        self.frames.push(Frame { kind, broken });
        if broken {
            self.pending = Break::Newline;
        }
        index + 1
    }

    fn close(&mut self, kind: FrameKind) {
        // unterminated `local`s inside the brackets end with them
        while let Some(frame) = self.frames.pop() {
            if frame.kind == kind {
                if frame.broken {
                    self.trailing_comma();
                    self.newline(0);
                } else {
                    self.end_inline();
                }
                return;
            }
            if frame.kind != FrameKind::Local {
                self.frames.push(frame);
                break;
            }
        }
        self.end_inline();
    }

    /// A closer inside an inline list still has to leave a line comment's line.
    fn end_inline(&mut self) {
        if self.pending == Break::Newline {
            self.newline(0);
        }
        self.pending = Break::None;
    }

    fn trailing_comma(&mut self) {
        let needs_comma = !matches!(
            self.last_code,
            None | Some(Token::Comma | Token::LBrace | Token::LBracket | Token::LParen)
        );
        if needs_comma {
            self.out.insert(self.last_code_out, ',');
            self.last_code_out += 1;
        }
    }

    /// Inline lists drop a comma that directly precedes their closing bracket.
    fn skip_comma(&self, index: usize) -> bool {
        let Some(frame) = self.frames.last() else {
            return false;
        };
        if frame.broken || frame.kind == FrameKind::Local {
            return false;
        }
        self.next_code(index)
            .and_then(|next| closer_kind(&self.tokens[next].token))
            == Some(frame.kind)
    }

    fn next_code(&self, index: usize) -> Option<usize> {
        (index + 1..self.tokens.len()).find(|&i| !self.tokens[i].token.is_comment())
    }

    /// Whitespace between the previous token and `spanned`.
    fn separate(&mut self, spanned: &Spanned) {
        match self.pending {
            Break::Newline => {
                let blanks = self.blank_lines_before(spanned);
                self.newline(blanks);
            }
            Break::Space => self.space(),
            Break::None => {
                let spaced = match self.last_code {
                    Some(prev) => !self.unary && space_between(prev, &spanned.token),
                    None => false,
                };
                if spaced && !self.out.is_empty() {
                    self.space();
                }
            }
        }
        self.pending = Break::None;
    }

    fn comment(&mut self, spanned: &'a Spanned) {
        let source = self.source;
        let text = source[spanned.span.clone()].trim_end();
        let own_line = source[self.last_end..spanned.span.start].contains('\n');
        if self.out.is_empty() {
            self.pending = Break::None;
        } else if own_line {
            let blanks = self.blank_lines_before(spanned);
            self.newline(blanks);
        } else {
            self.space();
        }
        self.out.push_str(text);
        self.last_end = spanned.span.end;

        let line_comment = !text.starts_with("/*");
        let followed_by_newline = source[spanned.span.end..]
            .chars()
            .take_while(|c| c.is_whitespace())
            .any(|c| c == '\n');
        self.pending = if line_comment || followed_by_newline {
            Break::Newline
        } else {
            Break::Space
        };
    }

    fn write_code(&mut self, spanned: &'a Spanned) {
        let token = &spanned.token;
        let text = &self.source[spanned.span.clone()];
        match token {
            Token::Str(value) => {
                let quoted = match self.options.string_style {
                    StringStyle::Double => quote(value, '"'),
                    StringStyle::Single => quote(value, '\''),
                    StringStyle::Leave => text.to_string(),
                };
                self.out.push_str(&quoted);
            }
            _ => self.out.push_str(text),
        }
        self.unary = matches!(token, Token::Bang)
            || (*token == Token::Minus && !self.last_code.is_some_and(ends_operand));
        self.last_code = Some(token);
        self.last_code_out = self.out.len();
        self.last_end = spanned.span.end;
    }

    fn blank_lines_before(&self, spanned: &Spanned) -> usize {
        let newlines = self.source[self.last_end..spanned.span.start]
            .matches('\n')
            .count();
        newlines.saturating_sub(1).min(self.options.max_blank_lines)
    }

    fn indent_level(&self) -> usize {
        self.frames.iter().filter(|frame| frame.broken).count()
    }

    fn newline(&mut self, blanks: usize) {
        if self.out.is_empty() {
            return;
        }
        self.trim_trailing_spaces();
        for _ in 0..=blanks {
            self.out.push('\n');
        }
        let width = self.indent_level() * self.options.indent;
        self.out.extend(std::iter::repeat(' ').take(width));
        self.pending = Break::None;
    }

    fn space(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with(|c| c == ' ' || c == '\n') {
            self.out.push(' ');
        }
    }

    fn trim_trailing_spaces(&mut self) {
        let trimmed = self.out.trim_end_matches(' ').len();
        self.out.truncate(trimmed);
        self.last_code_out = self.last_code_out.min(trimmed);
    }

    fn finish(mut self) -> String {
        let trimmed = self.out.trim_end().len();
        self.out.truncate(trimmed);
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        self.out
    }
}

fn quote(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            ch if ch == quote => {
                out.push('\\');
                out.push(ch);
            }
            ch if ch.is_control() => out.push_str(&format!("\\u{:04x}", ch as u32)),
            ch => out.push(ch),
        }
    }
    out.push(quote);
    out
}
