//! Applying replacements to a document.
//!
//! [`rewrite`] substitutes by byte span in a single left-to-right pass. Each
//! replacement carries the span its text was found at during scanning, so two
//! identical `![alt](path)` tokens in one document are addressed
//! independently and nothing is replaced twice.
//!
//! Substituting by first occurrence of the original text instead would tie
//! duplicate tokens to document order rather than to where they were
//! scanned, and a replacement could be matched again by a later entry.

use std::borrow::Cow;
use std::ops::Range;
use tracing::warn;

/// One substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Byte range of `original` in the document being rewritten.
    pub span: Range<usize>,
    pub original: String,
    pub replacement: String,
}

/// Apply span-based replacements.
///
/// Entries may arrive in any order; they are applied in span order. An entry
/// whose span does not hold its `original` text, or that overlaps an earlier
/// entry, is skipped with a warning. With nothing applied the input is
/// returned borrowed, byte-identical.
pub fn rewrite<'a>(document: &'a str, replacements: &[Replacement]) -> Cow<'a, str> {
    if replacements.is_empty() {
        return Cow::Borrowed(document);
    }

    let mut ordered: Vec<&Replacement> = replacements.iter().collect();
    ordered.sort_by_key(|r| (r.span.start, r.span.end));

    let mut out = String::with_capacity(document.len());
    let mut cursor = 0;
    let mut applied = 0;
    for r in ordered {
        if r.span.start < cursor {
            warn!(original = %r.original, "overlapping replacement skipped");
            continue;
        }
        if document.get(r.span.clone()) != Some(r.original.as_str()) {
            warn!(original = %r.original, "replacement span does not match document, skipped");
            continue;
        }
        out.push_str(&document[cursor..r.span.start]);
        out.push_str(&r.replacement);
        cursor = r.span.end;
        applied += 1;
    }

    if applied == 0 {
        return Cow::Borrowed(document);
    }
    out.push_str(&document[cursor..]);
    Cow::Owned(out)
}
