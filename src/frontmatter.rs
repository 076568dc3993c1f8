//! Front-matter extraction.
//!
//! Content files may open with a metadata block delimited by two lines that
//! consist solely of `---`:
//!
//! ```text
//! ---
//! title: "Hello"
//! tags: [rust, web]
//! category: [
//! "tech",
//! "life"
//! ]
//! ---
//! Body text…
//! ```
//!
//! This is deliberately not YAML. Only the shapes the content actually uses are
//! understood:
//!
//! | Line shape | Result |
//! |------------|--------|
//! | `key: value` | scalar, one layer of matching quotes stripped |
//! | `key: [a, "b"]` | array from a single line |
//! | `key: [` … `]` | array spread over lines, one item per line |
//!
//! Anything else (blank lines, lines without a colon) is skipped. Parsing never
//! fails: the worst case is a partial or empty record.
//!
//! ## Quote stripping
//!
//! Quotes are removed only when the first and last characters are the same
//! quote character and the value is at least two characters long. A lone `"`
//! or a value like `'abc"` is kept exactly as written.

use crate::types::{MetadataRecord, MetadataValue};
use std::ops::Range;

const DELIMITER: &str = "---";

/// Location of the front-matter block inside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatterBlock<'a> {
    /// Text strictly between the opening and closing delimiter lines.
    pub text: &'a str,
    /// Byte range of `text` within the document.
    pub span: Range<usize>,
    /// Byte offset where the body starts (just past the closing delimiter line).
    pub body_start: usize,
}

/// Iterate lines with their starting byte offset. Line terminators (`\n` and a
/// preceding `\r`) are not part of the yielded line.
pub(crate) fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str, usize)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let line = line.strip_suffix('\r').unwrap_or(line);
        (start, line, offset)
    })
}

/// Find the front-matter block anchored at offset 0.
///
/// The document must start with a `---` line followed by a line break. The
/// block ends at the next line that is exactly `---`. Without both delimiters
/// the document has no front matter.
pub fn locate(content: &str) -> Option<FrontMatterBlock<'_>> {
    let mut lines = lines_with_offsets(content);

    let (_, first, first_end) = lines.next()?;
    if first != DELIMITER || !content[..first_end].ends_with('\n') {
        return None;
    }

    for (start, line, end) in lines {
        if line == DELIMITER {
            return Some(FrontMatterBlock {
                text: &content[first_end..start],
                span: first_end..start,
                body_start: end,
            });
        }
    }
    None
}

/// Parse the front matter of `content` into a metadata record.
///
/// Returns an empty record when the document has no front matter.
pub fn parse(content: &str) -> MetadataRecord {
    match locate(content) {
        Some(block) => parse_block(block.text),
        None => MetadataRecord::new(),
    }
}

/// Scanner state between lines.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LineState {
    ScanningKey,
    InMultilineArray { key: String, items: Vec<String> },
}

type Emitted = Option<(String, MetadataValue)>;

/// Parse the text between the delimiters, line by line.
pub fn parse_block(block: &str) -> MetadataRecord {
    let mut record = MetadataRecord::new();
    let mut state = LineState::ScanningKey;

    for (_, line, _) in lines_with_offsets(block) {
        let (next, emitted) = step(state, line);
        state = next;
        if let Some((key, value)) = emitted {
            record.insert(key, value);
        }
    }

    // An unterminated multi-line array keeps what it collected.
    if let LineState::InMultilineArray { key, items } = state {
        record.insert(key, MetadataValue::Array(items));
    }

    record
}

fn step(state: LineState, line: &str) -> (LineState, Emitted) {
    let line = line.trim();
    match state {
        LineState::ScanningKey => scan_key(line),
        LineState::InMultilineArray { key, mut items } => {
            if line == "]" {
                return (LineState::ScanningKey, Some((key, MetadataValue::Array(items))));
            }
            if !line.is_empty() && line != "," {
                let item = multiline_item(line);
                if !item.is_empty() {
                    items.push(item.to_string());
                }
            }
            (LineState::InMultilineArray { key, items }, None)
        }
    }
}

fn scan_key(line: &str) -> (LineState, Emitted) {
    let Some((key, value)) = line.split_once(':') else {
        return (LineState::ScanningKey, None);
    };
    let key = key.trim().to_string();
    let value = value.trim();

    if value == "[" {
        return (
            LineState::InMultilineArray {
                key,
                items: Vec::new(),
            },
            None,
        );
    }

    let parsed = if value.starts_with('[') && value.ends_with(']') {
        MetadataValue::Array(inline_array(&value[1..value.len() - 1]))
    } else {
        MetadataValue::Scalar(strip_quotes(value).to_string())
    };
    (LineState::ScanningKey, Some((key, parsed)))
}

fn inline_array(inner: &str) -> Vec<String> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|piece| strip_quotes(piece.trim()))
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

fn multiline_item(line: &str) -> &str {
    let line = line.strip_suffix(',').unwrap_or(line).trim_end();
    strip_quotes(line)
}

/// Strip one layer of matching single or double quotes.
pub fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    match bytes {
        [first @ (b'"' | b'\''), .., last] if first == last => &value[1..value.len() - 1],
        _ => value,
    }
}
