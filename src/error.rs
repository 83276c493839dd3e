//! Error types for the pdf2album library.
//!
//! Failures fall into two groups:
//!
//! * [`DeliveryError`]: **Fatal for one document** (or, for configuration
//!   problems, for the whole run). Returned as `Err(DeliveryError)` from the
//!   document pipeline; the run orchestrator reports it and moves on to the
//!   next document.
//!
//! * The capability error classes [`FetchError`], [`SendError`] and
//!   [`RenderError`]: returned by the pluggable collaborators. Rate-limit
//!   and transient classes are absorbed by the retry loops in
//!   [`crate::pipeline::fetch`] and [`crate::pipeline::dispatch`] and only
//!   ever show up to the caller as delay.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal errors returned by the delivery pipeline.
#[derive(Debug, Error)]
pub enum DeliveryError {
    // ── Fetch ─────────────────────────────────────────────────────────────
    /// The document could not be fetched after the bounded retry policy.
    #[error("Failed to fetch '{document}': {detail}")]
    FetchFailed { document: String, detail: String },

    // ── Render ────────────────────────────────────────────────────────────
    /// The document could not be rasterised.
    #[error(transparent)]
    Render(#[from] RenderError),

    // ── Send ──────────────────────────────────────────────────────────────
    /// The transport rejected a group permanently, or the retry ceiling was hit.
    #[error("Sending album {group} failed: {detail}")]
    SendFailed { group: usize, detail: String },

    /// An operation did not finish inside the configured timeout.
    #[error("Operation timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    /// The run was cancelled while waiting.
    #[error("Delivery cancelled")]
    Cancelled,

    // ── Source ────────────────────────────────────────────────────────────
    /// The source could not be listed.
    #[error("Failed to list source '{source_id}': {detail}")]
    ListFailed { source_id: String, detail: String },

    // ── Progress store ────────────────────────────────────────────────────
    /// Could not persist the progress file.
    #[error("Failed to write progress file '{path}': {source}")]
    ProgressWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O ───────────────────────────────────────────────────────────────
    /// Could not prepare a directory or file in the work directory.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Rasterisation failures. Always fatal for the document being rendered.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The payload is not a PDF pdfium can open.
    #[error("PDF '{path}' is corrupt or unsupported: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// A single page failed to render or encode.
    #[error("Rasterisation failed for page {page}: {detail}")]
    PageFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium."
    )]
    PdfiumBindingFailed(String),

    /// Writing a page image failed.
    #[error("Failed to write page image '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking render task panicked.
    #[error("Render task panicked: {0}")]
    Panicked(String),
}

/// Failure classes reported by a [`crate::transport::DocumentFetcher`].
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Retryable a bounded number of times.
    #[error("fetch failed: {0}")]
    Failed(String),

    /// The source asked us to wait ("flood wait") before trying again.
    #[error("rate limited by source, retry after {}s", wait.as_secs())]
    RateLimited { wait: Duration },
}

/// Failure classes reported by a [`crate::transport::BatchSender`] or
/// [`crate::transport::Notifier`].
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// Mandatory wait imposed by the platform.
    #[error("rate limited, retry after {}s", wait.as_secs())]
    RateLimited { wait: Duration },

    /// Retryable failure with no specified wait.
    #[error("transient error: {0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("fatal error: {0}")]
    Fatal(String),
}
