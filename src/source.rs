//! Document sources: a local directory, or a JSON manifest of URLs.
//!
//! ## Manifest format
//!
//! ```json
//! [
//!   { "id": 1, "name": "intro.pdf", "url": "https://example.org/intro.pdf" },
//!   { "id": 2, "caption": "Chapter two", "url": "ch2.pdf" },
//!   { "id": 3, "url": "cover.png", "content_type": "image/png" }
//! ]
//! ```
//!
//! Relative `url`s are resolved against the manifest's own location, so a
//! manifest can sit next to the files it lists. `content_type` defaults to a
//! guess from the extension; only `application/pdf` entries are delivered.
//!
//! [`SourceRouter`] picks the right source from the string the user typed.

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, FetchError};
use crate::transport::{DocumentFetcher, DocumentLister, DocumentRef, PDF_MIME};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Check if the source string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// MIME type guessed from a file extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => PDF_MIME,
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Seconds from a `Retry-After` header. HTTP-date values are not supported.
pub fn parse_retry_after(value: Option<&HeaderValue>) -> Option<Duration> {
    value?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn copy_local(from: &str, destination: &Path) -> Result<(), FetchError> {
    tokio::fs::copy(from, destination)
        .await
        .map(|_| ())
        .map_err(|e| FetchError::Failed(format!("cannot copy '{}': {}", from, e)))
}

// ── Directory ────────────────────────────────────────────────────────────

/// Every regular file in a directory, ordered by file name.
///
/// The ordering key is the 1-based position in that order, so adding a file
/// that sorts first shifts the ids of the rest; progress is keyed by file
/// name, not id, and survives that.
#[derive(Debug, Clone, Default)]
pub struct DirectorySource;

#[async_trait]
impl DocumentLister for DirectorySource {
    async fn list(&self, source: &str) -> Result<Vec<DocumentRef>, FetchError> {
        let mut entries = tokio::fs::read_dir(source)
            .await
            .map_err(|e| FetchError::Failed(format!("cannot read directory '{}': {}", source, e)))?;

        let mut files: Vec<(String, PathBuf)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::Failed(e.to_string()))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push((name, entry.path()));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        debug!("Directory {} holds {} files", source, files.len());
        Ok(files
            .into_iter()
            .enumerate()
            .map(|(i, (name, path))| DocumentRef {
                id: i as u64 + 1,
                content_type: content_type_for(&name).to_string(),
                name: Some(name),
                caption: None,
                locator: path.to_string_lossy().into_owned(),
            })
            .collect())
    }
}

#[async_trait]
impl DocumentFetcher for DirectorySource {
    async fn fetch(&self, doc: &DocumentRef, destination: &Path) -> Result<(), FetchError> {
        copy_local(&doc.locator, destination).await
    }
}

// ── Manifest ─────────────────────────────────────────────────────────────

/// One manifest entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    pub url: String,
}

/// Documents listed in a JSON manifest, fetched over HTTP (or from disk for
/// entries that resolve to local paths).
///
/// HTTP 429 becomes [`FetchError::RateLimited`] with the `Retry-After`
/// delay, or `flood_wait_default` when the header is missing.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    client: reqwest::Client,
    flood_wait_default: Duration,
}

impl ManifestSource {
    pub fn new(timeout: Duration, flood_wait_default: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdf2album/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeliveryError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            flood_wait_default,
        })
    }

    pub fn from_config(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        Self::new(config.download_timeout, config.flood_wait_default)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Failed(format!("timed out fetching {url}"))
            } else {
                FetchError::Failed(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = parse_retry_after(response.headers().get(RETRY_AFTER))
                .unwrap_or(self.flood_wait_default);
            return Err(FetchError::RateLimited { wait });
        }
        if !status.is_success() {
            return Err(FetchError::Failed(format!("HTTP {} for {}", status, url)));
        }
        Ok(response)
    }

    async fn read_manifest(&self, source: &str) -> Result<Vec<ManifestEntry>, FetchError> {
        let body = if is_url(source) {
            self.get(source)
                .await?
                .text()
                .await
                .map_err(|e| FetchError::Failed(e.to_string()))?
        } else {
            tokio::fs::read_to_string(source)
                .await
                .map_err(|e| FetchError::Failed(format!("cannot read manifest '{}': {}", source, e)))?
        };
        serde_json::from_str(&body)
            .map_err(|e| FetchError::Failed(format!("invalid manifest '{}': {}", source, e)))
    }
}

/// Resolve an entry's `url` against the manifest location.
pub fn resolve_locator(manifest: &str, url: &str) -> Result<String, FetchError> {
    if is_url(url) || Path::new(url).is_absolute() {
        return Ok(url.to_string());
    }
    if is_url(manifest) {
        let base = Url::parse(manifest).map_err(|e| FetchError::Failed(e.to_string()))?;
        let joined = base
            .join(url)
            .map_err(|e| FetchError::Failed(format!("bad entry url '{}': {}", url, e)))?;
        return Ok(joined.to_string());
    }
    let dir = Path::new(manifest).parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(url).to_string_lossy().into_owned())
}

#[async_trait]
impl DocumentLister for ManifestSource {
    async fn list(&self, source: &str) -> Result<Vec<DocumentRef>, FetchError> {
        let entries = self.read_manifest(source).await?;
        info!("Manifest {} lists {} entries", source, entries.len());

        entries
            .into_iter()
            .map(|entry| {
                let locator = resolve_locator(source, &entry.url)?;
                let content_type = entry.content_type.unwrap_or_else(|| {
                    let hint = entry.name.as_deref().unwrap_or(&entry.url);
                    content_type_for(hint).to_string()
                });
                Ok(DocumentRef {
                    id: entry.id,
                    name: entry.name,
                    caption: entry.caption,
                    content_type,
                    locator,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DocumentFetcher for ManifestSource {
    async fn fetch(&self, doc: &DocumentRef, destination: &Path) -> Result<(), FetchError> {
        if !is_url(&doc.locator) {
            return copy_local(&doc.locator, destination).await;
        }

        let mut response = self.get(&doc.locator).await?;
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| FetchError::Failed(format!("cannot create '{}': {}", destination.display(), e)))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Failed(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Failed(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| FetchError::Failed(e.to_string()))?;

        debug!("Fetched {} bytes from {}", written, doc.locator);
        Ok(())
    }
}

// ── Routing ──────────────────────────────────────────────────────────────

/// Picks [`ManifestSource`] for URLs and `*.json` files, [`DirectorySource`]
/// for everything else.
#[derive(Debug, Clone)]
pub struct SourceRouter {
    directory: DirectorySource,
    manifest: ManifestSource,
}

impl SourceRouter {
    pub fn new(manifest: ManifestSource) -> Self {
        Self {
            directory: DirectorySource,
            manifest,
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        Ok(Self::new(ManifestSource::from_config(config)?))
    }

    pub fn is_manifest(source: &str) -> bool {
        is_url(source) || source.to_ascii_lowercase().ends_with(".json")
    }
}

#[async_trait]
impl DocumentLister for SourceRouter {
    async fn list(&self, source: &str) -> Result<Vec<DocumentRef>, FetchError> {
        if Self::is_manifest(source) {
            self.manifest.list(source).await
        } else {
            self.directory.list(source).await
        }
    }
}

#[async_trait]
impl DocumentFetcher for SourceRouter {
    async fn fetch(&self, doc: &DocumentRef, destination: &Path) -> Result<(), FetchError> {
        if is_url(&doc.locator) {
            self.manifest.fetch(doc, destination).await
        } else {
            self.directory.fetch(doc, destination).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest_source() -> ManifestSource {
        ManifestSource::new(Duration::from_secs(5), Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("a.PDF"), PDF_MIME);
        assert_eq!(content_type_for("scan.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn retry_after_seconds_parsed() {
        let v = HeaderValue::from_static("12");
        assert_eq!(parse_retry_after(Some(&v)), Some(Duration::from_secs(12)));
        let date = HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(Some(&date)), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn relative_urls_resolve_against_manifest() {
        assert_eq!(
            resolve_locator("https://example.org/docs/list.json", "a.pdf").unwrap(),
            "https://example.org/docs/a.pdf"
        );
        assert_eq!(
            resolve_locator("/srv/m/list.json", "b.pdf").unwrap(),
            "/srv/m/b.pdf"
        );
        assert_eq!(
            resolve_locator("/srv/m/list.json", "https://cdn.example.org/c.pdf").unwrap(),
            "https://cdn.example.org/c.pdf"
        );
    }

    #[test]
    fn router_classifies_sources() {
        assert!(SourceRouter::is_manifest("https://example.org/list"));
        assert!(SourceRouter::is_manifest("/srv/list.JSON"));
        assert!(!SourceRouter::is_manifest("/srv/pdfs"));
    }

    #[tokio::test]
    async fn directory_lists_files_by_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF-b").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF-a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let refs = DirectorySource
            .list(dir.path().to_str().unwrap())
            .await
            .unwrap();

        let names: Vec<_> = refs.iter().map(|r| r.name.clone().unwrap()).collect();
        assert_eq!(names, ["a.pdf", "b.pdf", "notes.txt"]);
        assert_eq!(refs.iter().map(|r| r.id).collect::<Vec<_>>(), [1, 2, 3]);
        assert!(refs[0].is_pdf());
        assert!(!refs[2].is_pdf());
    }

    #[tokio::test]
    async fn missing_directory_is_a_fetch_failure() {
        let err = DirectorySource.list("/definitely/not/here").await.unwrap_err();
        assert!(matches!(err, FetchError::Failed(_)));
    }

    #[tokio::test]
    async fn local_manifest_lists_and_fetches() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.pdf"), b"%PDF-1").unwrap();
        let manifest = dir.path().join("list.json");
        std::fs::write(
            &manifest,
            r#"[
                {"id": 7, "caption": "First", "url": "one.pdf"},
                {"id": 3, "name": "cover.png", "url": "cover.png"}
            ]"#,
        )
        .unwrap();

        let source = manifest_source();
        let refs = source.list(manifest.to_str().unwrap()).await.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].id, 7);
        assert!(refs[0].is_pdf());
        assert_eq!(refs[0].caption.as_deref(), Some("First"));
        assert_eq!(refs[1].content_type, "image/png");

        let dest = dir.path().join("copy.pdf");
        source.fetch(&refs[0], &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1");
    }

    #[tokio::test]
    async fn malformed_manifest_is_reported() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("bad.json");
        std::fs::write(&manifest, "{ not json").unwrap();
        let err = manifest_source()
            .list(manifest.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid manifest"));
    }
}
