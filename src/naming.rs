//! Deterministic, filesystem-safe names for fetched documents.
//!
//! The file name doubles as the resumption key: the progress store is keyed
//! by its stem. It must therefore be a pure function of what the source
//! reports about the document, so a later run against the same source
//! lands on the same cursor.

use crate::transport::DocumentRef;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Longest file name we produce, in characters.
pub const MAX_NAME_CHARS: usize = 150;

// Latin letters, digits, the Arabic block, dash, underscore, dot, whitespace.
static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\x{0600}-\x{06FF}\-_.\s]").unwrap());

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Replace unsafe characters with `_`, collapse whitespace and truncate.
pub fn safe_filename(name: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    let collapsed = WHITESPACE_RUN.replace_all(replaced.trim(), " ");
    collapsed.chars().take(MAX_NAME_CHARS).collect()
}

/// File name for a document: its own name, else its caption, else
/// `file_<id>.pdf`; always ending in `.pdf` before sanitisation.
pub fn document_filename(doc: &DocumentRef) -> String {
    let base = doc
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| doc.caption.as_deref().filter(|c| !c.trim().is_empty()))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| format!("file_{}.pdf", doc.id));

    let base = if base.to_lowercase().ends_with(".pdf") {
        base
    } else {
        format!("{base}.pdf")
    };
    safe_filename(&base)
}

/// Progress key and image directory name for a document file name.
pub fn document_id(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}
