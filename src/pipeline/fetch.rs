//! Document acquisition: make sure a document's bytes are on local disk.
//!
//! A target that already exists and is non-empty is never fetched again.
//! Otherwise the fetcher writes into `<target>.part`, which is renamed into
//! place only once the download completed, so a half-written file never
//! passes the existence check on the next run.
//!
//! ## Retry policy
//!
//! A *round* is up to `fetch_max_attempts` attempts with exponential backoff
//! (`2^(n-1)` seconds, clamped to `[fetch_backoff_min, fetch_backoff_max]`).
//! If the source answers with a flood wait, the round ends immediately, we
//! sleep for the requested time and run exactly one more round. A second
//! flood wait, or an exhausted round, is fatal for the document.

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, FetchError};
use crate::pipeline::render::is_present;
use crate::transport::{DocumentFetcher, DocumentRef};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry knobs for fetching, taken from [`DeliveryConfig`].
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub operation_timeout: Option<Duration>,
}

impl From<&DeliveryConfig> for FetchPolicy {
    fn from(c: &DeliveryConfig) -> Self {
        Self {
            max_attempts: c.fetch_max_attempts,
            backoff_min: c.fetch_backoff_min,
            backoff_max: c.fetch_backoff_max,
            operation_timeout: c.operation_timeout,
        }
    }
}

impl FetchPolicy {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = Duration::from_secs(1u64 << attempt.saturating_sub(1).min(32));
        exp.clamp(self.backoff_min, self.backoff_max)
    }
}

/// What [`fetch_document`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The target was already on disk; no network I/O.
    Cached,
    Downloaded,
}

enum Round {
    Done,
    FloodWait(Duration),
}

/// Fetch `doc` into `target` unless it is already there.
pub async fn fetch_document(
    fetcher: &dyn DocumentFetcher,
    doc: &DocumentRef,
    target: &Path,
    policy: &FetchPolicy,
    cancel: &CancellationToken,
) -> Result<FetchOutcome, DeliveryError> {
    if is_present(target) {
        debug!("Using cached {}", target.display());
        return Ok(FetchOutcome::Cached);
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DeliveryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let part = part_path(target);
    let name = display_name(target);
    info!("Fetching {} (id={})", name, doc.id);

    let download = fetch_with_flood_wait(fetcher, doc, &part, &name, policy, cancel);
    match policy.operation_timeout {
        Some(limit) => tokio::time::timeout(limit, download)
            .await
            .map_err(|_| DeliveryError::Timeout {
                operation: format!("fetching {name}"),
                secs: limit.as_secs(),
            })??,
        None => download.await?,
    }

    tokio::fs::rename(&part, target)
        .await
        .map_err(|source| DeliveryError::Io {
            path: target.to_path_buf(),
            source,
        })?;

    info!("Downloaded to: {}", target.display());
    Ok(FetchOutcome::Downloaded)
}

async fn fetch_with_flood_wait(
    fetcher: &dyn DocumentFetcher,
    doc: &DocumentRef,
    part: &Path,
    name: &str,
    policy: &FetchPolicy,
    cancel: &CancellationToken,
) -> Result<(), DeliveryError> {
    match fetch_round(fetcher, doc, part, name, policy, cancel).await? {
        Round::Done => Ok(()),
        Round::FloodWait(wait) => {
            warn!("{}: flood wait, sleeping {}s before one more round", name, wait.as_secs());
            pause(wait, cancel).await?;
            match fetch_round(fetcher, doc, part, name, policy, cancel).await? {
                Round::Done => Ok(()),
                Round::FloodWait(again) => Err(DeliveryError::FetchFailed {
                    document: name.to_string(),
                    detail: format!(
                        "still rate limited after waiting {}s (asked to wait {}s more)",
                        wait.as_secs(),
                        again.as_secs()
                    ),
                }),
            }
        }
    }
}

async fn fetch_round(
    fetcher: &dyn DocumentFetcher,
    doc: &DocumentRef,
    part: &Path,
    name: &str,
    policy: &FetchPolicy,
    cancel: &CancellationToken,
) -> Result<Round, DeliveryError> {
    let mut last_err = String::new();

    for attempt in 1..=policy.max_attempts {
        let result = match fetcher.fetch(doc, part).await {
            Ok(()) if !is_present(part) => {
                Err(FetchError::Failed("download produced no data".into()))
            }
            other => other,
        };
        match result {
            Ok(()) => return Ok(Round::Done),
            Err(FetchError::RateLimited { wait }) => return Ok(Round::FloodWait(wait)),
            Err(FetchError::Failed(detail)) => {
                warn!(
                    "{}: fetch attempt {}/{} failed: {}",
                    name, attempt, policy.max_attempts, detail
                );
                last_err = detail;
            }
        }
        if attempt < policy.max_attempts {
            pause(policy.backoff(attempt), cancel).await?;
        }
    }

    Err(DeliveryError::FetchFailed {
        document: name.to_string(),
        detail: format!("{} attempts failed; last error: {}", policy.max_attempts, last_err),
    })
}

async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), DeliveryError> {
    sleep(duration).await;
    if cancel.is_cancelled() {
        return Err(DeliveryError::Cancelled);
    }
    Ok(())
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

fn display_name(target: &Path) -> String {
    target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| target.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<(), FetchError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<(), FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentFetcher for ScriptedFetcher {
        async fn fetch(&self, _doc: &DocumentRef, destination: &Path) -> Result<(), FetchError> {
            self.calls.lock().unwrap().push(Instant::now());
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            if next.is_ok() {
                std::fs::write(destination, b"%PDF-1.7 fake").unwrap();
            }
            next
        }
    }

    fn doc() -> DocumentRef {
        DocumentRef {
            id: 42,
            name: Some("a.pdf".into()),
            caption: None,
            content_type: "application/pdf".into(),
            locator: "mem://a".into(),
        }
    }

    fn policy() -> FetchPolicy {
        FetchPolicy {
            max_attempts: 5,
            backoff_min: Duration::from_secs(3),
            backoff_max: Duration::from_secs(60),
            operation_timeout: None,
        }
    }

    #[test]
    fn backoff_is_exponential_and_clamped() {
        let p = policy();
        let waits: Vec<u64> = (1..=8).map(|n| p.backoff(n).as_secs()).collect();
        assert_eq!(waits, vec![3, 3, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn part_file_sits_next_to_target() {
        assert_eq!(
            part_path(Path::new("/w/pdfs/a b.pdf")),
            PathBuf::from("/w/pdfs/a b.pdf.part")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_fetch_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("pdfs/a.pdf");
        let fetcher = ScriptedFetcher::new(vec![]);
        let cancel = CancellationToken::new();

        let first = fetch_document(&fetcher, &doc(), &target, &policy(), &cancel)
            .await
            .unwrap();
        let bytes = std::fs::read(&target).unwrap();
        let second = fetch_document(&fetcher, &doc(), &target, &policy(), &cancel)
            .await
            .unwrap();

        assert_eq!(first, FetchOutcome::Downloaded);
        assert_eq!(second, FetchOutcome::Cached);
        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(std::fs::read(&target).unwrap(), bytes);
        assert!(!part_path(&target).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_existing_file_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.pdf");
        std::fs::write(&target, b"").unwrap();
        let fetcher = ScriptedFetcher::new(vec![]);

        let outcome = fetch_document(&fetcher, &doc(), &target, &policy(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Downloaded);
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.pdf");
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Failed("reset".into())),
            Err(FetchError::Failed("reset".into())),
        ]);

        fetch_document(&fetcher, &doc(), &target, &policy(), &CancellationToken::new())
            .await
            .unwrap();

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1] - calls[0] >= Duration::from_secs(3));
        assert!(calls[2] - calls[1] >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_round_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.pdf");
        let fetcher = ScriptedFetcher::new(
            (0..5).map(|_| Err(FetchError::Failed("404".into()))).collect(),
        );

        let err = fetch_document(&fetcher, &doc(), &target, &policy(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::FetchFailed { .. }));
        assert!(err.to_string().contains("5 attempts failed"));
        assert_eq!(fetcher.calls().len(), 5);
        assert!(!target.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_sleeps_then_retries_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.pdf");
        let fetcher = ScriptedFetcher::new(vec![Err(FetchError::RateLimited {
            wait: Duration::from_secs(30),
        })]);

        fetch_document(&fetcher, &doc(), &target, &policy(), &CancellationToken::new())
            .await
            .unwrap();

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_secs(30));
    }

    /// Reports success but writes nothing on the first call.
    struct HollowThenFull {
        calls: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl DocumentFetcher for HollowThenFull {
        async fn fetch(&self, _doc: &DocumentRef, destination: &Path) -> Result<(), FetchError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            let body: &[u8] = if calls.len() == 1 { b"" } else { b"%PDF-1.7 fake" };
            std::fs::write(destination, body).unwrap();
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_download_is_retried_with_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.pdf");
        let fetcher = HollowThenFull {
            calls: Mutex::default(),
        };

        let outcome = fetch_document(&fetcher, &doc(), &target, &policy(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Downloaded);
        let calls = fetcher.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_secs(3));
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.7 fake");
    }

    #[tokio::test(start_paused = true)]
    async fn download_that_never_produces_data_is_fatal() {
        struct Hollow;
        #[async_trait]
        impl DocumentFetcher for Hollow {
            async fn fetch(&self, _doc: &DocumentRef, _destination: &Path) -> Result<(), FetchError> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.pdf");
        let err = fetch_document(&Hollow, &doc(), &target, &policy(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("download produced no data"));
        assert!(!target.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn second_flood_wait_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.pdf");
        let flood = || -> Result<(), FetchError> {
            Err(FetchError::RateLimited {
                wait: Duration::from_secs(30),
            })
        };
        let fetcher = ScriptedFetcher::new(vec![flood(), flood()]);

        let err = fetch_document(&fetcher, &doc(), &target, &policy(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("still rate limited"));
        assert_eq!(fetcher.calls().len(), 2);
    }
}
