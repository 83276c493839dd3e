//! Capabilities the delivery core depends on.
//!
//! Listing a source, fetching a document, sending an album and posting a
//! status notice are all behind traits, so the pipeline can be driven by
//! the Telegram adapter in [`crate::telegram`], the sources in
//! [`crate::source`], or in-memory fakes in tests.

use crate::error::{FetchError, SendError};
use crate::pipeline::render::PageImage;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

/// A document as reported by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Source-native ordering key (message id, manifest position, …).
    pub id: u64,
    /// File name reported by the source, if any.
    pub name: Option<String>,
    /// Free-text caption, used for naming when `name` is absent.
    pub caption: Option<String>,
    /// MIME type tag, e.g. `application/pdf`.
    pub content_type: String,
    /// Where the fetcher finds the bytes (path or URL).
    pub locator: String,
}

impl DocumentRef {
    pub fn is_pdf(&self) -> bool {
        self.content_type.eq_ignore_ascii_case(PDF_MIME)
    }
}

pub const PDF_MIME: &str = "application/pdf";

/// The conversation pages are delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatTarget(pub i64);

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lists the documents of a source.
#[async_trait]
pub trait DocumentLister: Send + Sync {
    /// Documents in `source`. Order is not significant; the orchestrator
    /// sorts by [`DocumentRef::id`].
    async fn list(&self, source: &str) -> Result<Vec<DocumentRef>, FetchError>;
}

/// Downloads one document to a local path.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, doc: &DocumentRef, destination: &Path) -> Result<(), FetchError>;
}

/// Sends one album atomically.
#[async_trait]
pub trait BatchSender: Send + Sync {
    /// `caption` applies to the first image only.
    async fn send_group(
        &self,
        target: ChatTarget,
        images: &[PageImage],
        caption: Option<&str>,
    ) -> Result<(), SendError>;
}

/// Posts a plain-text status notice into the conversation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: ChatTarget, text: &str) -> Result<(), SendError>;
}
