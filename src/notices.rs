//! Status notices posted into the conversation.
//!
//! All user-facing wording lives here so it can change without touching the
//! pipeline or the retry logic.

/// Reply to `/start`.
pub const WELCOME: &str = "Hi! This bot sends every page of every PDF in a source \
into this chat as images.\n\
Use /setsource <directory or manifest URL>, then /download.";

pub const SET_SOURCE_USAGE: &str =
    "Usage: /setsource <directory or manifest URL>, e.g. /setsource https://example.org/pdfs.json";

pub const NO_SOURCE: &str = "No source selected. Use /setsource <directory or manifest URL> first.";

pub const NO_DOCUMENTS: &str = "No PDF files found in the source.";

pub const RUN_FINISHED: &str = "Finished sending all pages to this chat.";

pub const RUN_CANCELLED: &str = "Delivery stopped. Run /download again to resume.";

pub fn source_saved(source: &str) -> String {
    format!("Source saved: {source}")
}

pub fn run_triggered(source: &str) -> String {
    format!("Using source: {source}\nCollecting PDFs, converting and sending them as images…")
}

pub fn run_started(documents: usize) -> String {
    format!("Found {documents} PDF files. Converting and sending pages into this chat…")
}

pub fn run_failed(error: &str) -> String {
    format!("Something went wrong during delivery: {error}")
}

/// Caption on the first image of a document.
pub fn caption(file_name: &str, total_pages: usize) -> String {
    format!("{file_name} ({total_pages} pages)")
}

pub fn already_sent(file_name: &str, total_pages: usize) -> String {
    format!("{file_name} was already sent ({total_pages} pages). Skipping.")
}

pub fn document_started(file_name: &str, total_pages: usize, remaining: usize) -> String {
    format!("Sending {file_name}: {total_pages} pages ({remaining} remaining).")
}

pub fn document_progress(file_name: &str, confirmed: u64, total_pages: usize) -> String {
    format!("{file_name}: sent {confirmed}/{total_pages} pages.")
}

pub fn document_failed(id: u64, file_name: &str, error: &str) -> String {
    format!("[error] PDF {id} ({file_name}): {error}")
}
