//! Source locations
//!
//! Every position handed out by this crate is **1-indexed**: the first character of a file is
//! at line 1, column 1. Columns count UTF-16 code units, the unit LSP clients use by default,
//! so a character outside the Basic Multilingual Plane is two columns wide. Ranges are
//! half-open: `end` points one column past the last character covered.
//!
//! ## Types
//!
//! - [`Location`] - A line:column position in source code
//! - [`LocationRange`] - A begin/end pair, optionally tagged with the file it belongs to
//! - [`LineIndex`] - Converts byte offsets produced by the lexer into [`Location`]s
//!
//! Tooling that speaks 0-indexed coordinates (editors, LSP) must convert at its boundary.

use std::fmt;
use std::ops::Range as ByteRange;
use std::path::{Path, PathBuf};

/// A 1-indexed line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A span of source text between two [`Location`]s.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocationRange {
    pub file: Option<PathBuf>,
    pub begin: Location,
    pub end: Location,
}

impl LocationRange {
    pub fn new(begin: Location, end: Location) -> Self {
        Self {
            file: None,
            begin,
            end,
        }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// True when this range was produced for `path` (ranges without a file match nothing).
    pub fn is_in(&self, path: &Path) -> bool {
        self.file.as_deref() == Some(path)
    }

    /// Check whether a location falls inside this range (end inclusive, so a cursor placed
    /// right after an identifier still hits it).
    pub fn contains(&self, location: Location) -> bool {
        self.begin <= location && location <= self.end
    }

    /// Smallest range covering both `self` and `other`.
    pub fn to(&self, other: &LocationRange) -> LocationRange {
        LocationRange {
            file: self.file.clone(),
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for LocationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}-{}", file.display(), self.begin, self.end),
            None => write!(f, "{}-{}", self.begin, self.end),
        }
    }
}

/// Fast conversion from byte offsets to 1-indexed locations.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offsets where each line starts
    line_starts: Vec<usize>,
    source: String,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, ch) in source.char_indices() {
            if ch == '\n' {
                line_starts.push(offset + 1);
            }
        }
        Self {
            line_starts,
            source: source.to_string(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn location(&self, offset: usize) -> Location {
        let offset = offset.min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line];
        let column = self
            .source
            .get(line_start..offset)
            .map(|prefix| prefix.encode_utf16().count())
            .unwrap_or(offset - line_start);
        Location::new(line as u32 + 1, column as u32 + 1)
    }

    pub fn range(&self, span: ByteRange<usize>) -> LocationRange {
        LocationRange::new(self.location(span.start), self.location(span.end))
    }

    /// Byte offset of a location, clamped to the source.
    pub fn offset(&self, location: Location) -> usize {
        let line = (location.line.max(1) - 1) as usize;
        let Some(&line_start) = self.line_starts.get(line) else {
            return self.source.len();
        };
        let line_end = self
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.source.len());
        let text = &self.source[line_start..line_end];
        let column = (location.column.max(1) - 1) as usize;
        line_start + utf16_offset(text, column)
    }
}

/// Byte offset in `line` of the 0-indexed UTF-16 `column`, clamped to the line. A column in
/// the middle of a surrogate pair rounds up to the next character.
pub fn utf16_offset(line: &str, column: usize) -> usize {
    let mut units = 0;
    for (idx, ch) in line.char_indices() {
        if units >= column {
            return idx;
        }
        units += ch.len_utf16();
    }
    line.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_are_one_indexed() {
        let index = LineIndex::new("ab\ncd\n");
        assert_eq!(index.location(0), Location::new(1, 1));
        assert_eq!(index.location(1), Location::new(1, 2));
        assert_eq!(index.location(3), Location::new(2, 1));
        assert_eq!(index.location(6), Location::new(3, 1));
    }

    #[test]
    fn columns_count_utf16_units_not_bytes() {
        let index = LineIndex::new("é = 1");
        assert_eq!(index.location("é".len()), Location::new(1, 2));

        let source = "'😀' + x";
        let index = LineIndex::new(source);
        let x = source.find('x').unwrap();
        assert_eq!(index.location(x), Location::new(1, 9));
        assert_eq!(index.offset(Location::new(1, 9)), x);
    }

    #[test]
    fn utf16_columns_inside_a_pair_round_up() {
        assert_eq!(utf16_offset("😀x", 0), 0);
        assert_eq!(utf16_offset("😀x", 1), 4);
        assert_eq!(utf16_offset("😀x", 2), 4);
        assert_eq!(utf16_offset("😀x", 3), 5);
        assert_eq!(utf16_offset("😀x", 9), 5);
    }

    #[test]
    fn offset_inverts_location() {
        let source = "local x = 1;\n  x + 2\n";
        let index = LineIndex::new(source);
        for offset in [0, 5, 13, 15, source.len()] {
            assert_eq!(index.offset(index.location(offset)), offset);
        }
    }

    #[test]
    fn range_contains_is_end_inclusive() {
        let range = LocationRange::new(Location::new(2, 3), Location::new(2, 6));
        assert!(range.contains(Location::new(2, 3)));
        assert!(range.contains(Location::new(2, 6)));
        assert!(!range.contains(Location::new(2, 7)));
        assert!(!range.contains(Location::new(1, 4)));
    }
}
