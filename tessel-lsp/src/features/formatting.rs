use similar::{Algorithm, ChangeTag, TextDiff};
use tessel_lang::{format, FormatError, FormatOptions, LineIndex};
use tower_lsp::lsp_types::{Range, TextEdit};

use crate::position::from_source_location;

/// Text edit expressed as byte offsets over the original document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEditSpan {
    pub start: usize,
    pub end: usize,
    pub new_text: String,
}

/// Produce formatting edits for the entire document.
pub fn format_document(
    source: &str,
    options: &FormatOptions,
) -> Result<Vec<TextEditSpan>, FormatError> {
    let formatted = format(source, options)?;
    Ok(compute_edits(source, &formatted))
}

/// Convert byte spans over `source` to protocol edits.
pub fn to_text_edits(source: &str, spans: &[TextEditSpan]) -> Vec<TextEdit> {
    let index = LineIndex::new(source);
    spans
        .iter()
        .map(|span| TextEdit {
            range: Range {
                start: from_source_location(index.location(span.start)),
                end: from_source_location(index.location(span.end)),
            },
            new_text: span.new_text.clone(),
        })
        .collect()
}

fn compute_edits(original: &str, formatted: &str) -> Vec<TextEditSpan> {
    if original == formatted {
        return Vec::new();
    }

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(original, formatted);

    let line_offsets = compute_line_offsets(original);
    let mut edits = Vec::new();
    let mut builder: Option<EditBuilder> = None;
    let mut cursor = 0usize;

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                cursor += 1;
                flush_builder(&mut builder, &mut edits);
            }
            ChangeTag::Delete => {
                let line = cursor;
                cursor += 1;
                let start = offset_for_line(line, &line_offsets, original.len());
                let end = offset_for_line(line + 1, &line_offsets, original.len());
                extend_delete(&mut builder, &mut edits, start, end);
            }
            ChangeTag::Insert => {
                let offset = offset_for_line(cursor, &line_offsets, original.len());
                let text = change.value();
                if !text.is_empty() {
                    extend_insert(&mut builder, &mut edits, offset, text);
                }
            }
        }
    }

    flush_builder(&mut builder, &mut edits);
    edits
}

fn extend_delete(
    builder: &mut Option<EditBuilder>,
    edits: &mut Vec<TextEditSpan>,
    start: usize,
    end: usize,
) {
    match builder {
        Some(current) if start <= current.end => current.end = current.end.max(end),
        Some(_) => {
            flush_builder(builder, edits);
            *builder = Some(EditBuilder::new(start, end));
        }
        None => *builder = Some(EditBuilder::new(start, end)),
    }
}

fn extend_insert(
    builder: &mut Option<EditBuilder>,
    edits: &mut Vec<TextEditSpan>,
    offset: usize,
    text: &str,
) {
    if let Some(current) = builder {
        if offset < current.start || offset > current.end {
            flush_builder(builder, edits);
        }
    }
    builder
        .get_or_insert_with(|| EditBuilder::at(offset))
        .new_text
        .push_str(text);
}

fn flush_builder(builder: &mut Option<EditBuilder>, edits: &mut Vec<TextEditSpan>) {
    if let Some(edit) = builder.take() {
        edits.push(edit.into_span());
    }
}

fn compute_line_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    offsets.extend(text.match_indices('\n').map(|(idx, _)| idx + 1));
    offsets
}

fn offset_for_line(line: usize, offsets: &[usize], text_len: usize) -> usize {
    offsets.get(line).copied().unwrap_or(text_len)
}

struct EditBuilder {
    start: usize,
    end: usize,
    new_text: String,
}

impl EditBuilder {
    fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            new_text: String::new(),
        }
    }

    fn at(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    fn into_span(self) -> TextEditSpan {
        TextEditSpan {
            start: self.start,
            end: self.end,
            new_text: self.new_text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tower_lsp::lsp_types::Position;

    fn apply_spans(source: &str, edits: &[TextEditSpan]) -> String {
        let mut result = source.to_string();
        let mut sorted = edits.to_vec();
        sorted.sort_by_key(|edit| edit.start);
        for edit in sorted.into_iter().rev() {
            result.replace_range(edit.start..edit.end, &edit.new_text);
        }
        result
    }

    #[rstest]
    #[case::locals("local port=8080, name='api';\n\n{name:name, ports:[port,port+1]}")]
    #[case::functions("local f(a,b)=a+b;\n[\nf(1,2),\n  function(x)\nx*2]")]
    #[case::comments("{ // head\n  a: 1, /* mid */ b: 2\n}")]
    #[case::conditionals("if x then -1 else { y: error 'no' }")]
    fn edits_reproduce_formatter_output(#[case] source: &str) {
        let options = FormatOptions::default();
        let formatted = format(source, &options).unwrap();
        let edits = format_document(source, &options).unwrap();
        assert_eq!(apply_spans(source, &edits), formatted);
        assert!(format_document(&formatted, &options).unwrap().is_empty());
    }

    #[test]
    fn formatted_documents_need_no_edits() {
        let source = "{\n  a: 1,\n}\n";
        assert!(format_document(source, &FormatOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unparsable_text_is_still_formatted() {
        let source = "{a:1,,}";
        let edits = format_document(source, &FormatOptions::default()).unwrap();
        assert_eq!(apply_spans(source, &edits), "{\n  a: 1,\n  ,\n}\n");
    }

    #[test]
    fn lex_errors_are_reported() {
        let err = format_document("{ a: \"unterminated", &FormatOptions::default()).unwrap_err();
        assert!(matches!(err, FormatError::Lex(_)));
    }

    #[test]
    fn spans_convert_to_protocol_ranges() {
        let source = "ab\ncdé\n";
        let spans = vec![TextEditSpan {
            start: 3,
            end: 8,
            new_text: "x\n".into(),
        }];
        let edits = to_text_edits(source, &spans);
        assert_eq!(edits[0].range.start, Position::new(1, 0));
        assert_eq!(edits[0].range.end, Position::new(2, 0));
        assert_eq!(edits[0].new_text, "x\n");
    }
}
