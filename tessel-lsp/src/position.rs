//! Conversion between Tessel source locations and LSP positions
//!
//! The Tessel parser reports 1-indexed lines and columns; LSP positions are 0-indexed. Both
//! sides count columns in UTF-16 code units, the protocol's default position encoding, so the
//! conversion is a shift by one.

use lsp_types::{Position, Range};
use tessel_lang::{Location, LocationRange};

/// Build a protocol range from coordinates that are already 0-indexed.
pub fn to_protocol_range(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Range {
    Range {
        start: Position::new(start_line, start_col),
        end: Position::new(end_line, end_col),
    }
}

/// Convert a 1-indexed source range to a protocol range.
pub fn from_source_range(range: &LocationRange) -> Range {
    to_protocol_range(
        range.begin.line.saturating_sub(1),
        range.begin.column.saturating_sub(1),
        range.end.line.saturating_sub(1),
        range.end.column.saturating_sub(1),
    )
}

pub fn from_source_location(location: Location) -> Position {
    Position::new(
        location.line.saturating_sub(1),
        location.column.saturating_sub(1),
    )
}

/// The 1-indexed location of a protocol position, for querying the AST.
pub fn to_source_location(position: Position) -> Location {
    Location::new(position.line + 1, position.character + 1)
}

/// Position just past the last character of `text`.
pub fn document_end(text: &str) -> Position {
    let line = text.matches('\n').count() as u32;
    let last_line = text.rsplit('\n').next().unwrap_or("");
    Position::new(line, last_line.encode_utf16().count() as u32)
}

/// Zero-width range at the start of a document, for problems without a usable location.
pub fn document_start() -> Range {
    to_protocol_range(0, 0, 0, 0)
}
