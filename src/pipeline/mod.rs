//! Pipeline stages for delivering one document as albums.
//!
//! Each submodule owns one step, so each can be tested with fakes of the
//! capabilities in [`crate::transport`].
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ render ──▶ store (cursor) ──▶ dispatch ──▶ store (cursor)
//! (bytes)   (pdfium)   (resume point)     (albums)     (after each album)
//! ```
//!
//! 1. [`fetch`]: bring the document to local disk, with bounded retry
//!    and a single flood-wait extension
//! 2. [`render`]: rasterise every page to JPEG; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`store`]: the persisted per-document cursor
//! 4. [`dispatch`]: albums of at most ten pages, retried until confirmed
//! 5. [`document`]: ties 2–4 together for one document

pub mod dispatch;
pub mod document;
pub mod fetch;
pub mod render;
pub mod store;
