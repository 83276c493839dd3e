//! Album dispatch: split pages into bounded groups and send each one until
//! the platform confirms it.
//!
//! ## Retry Strategy
//!
//! Two failure classes are retried, both without limit by default:
//!
//! * **Rate-limited**: the platform names a wait; we sleep exactly that
//!   long and resend the same group.
//! * **Transient**: no wait is given; we sleep `transient_retry_delay`
//!   (3 s by default) and resend.
//!
//! Stopping halfway through a document is worse than a stalled loop, so the
//! only exits are confirmation, a fatal error, the optional
//! `max_send_retries` ceiling, the optional `operation_timeout`, or
//! cancellation. Cancellation is checked after every sleep; a group that is
//! already on the wire is never interrupted.
//!
//! After each confirmed group the observer hears about it before the next
//! group is sent, so the caller can persist its cursor in lockstep.

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, SendError};
use crate::pipeline::render::PageImage;
use crate::transport::{BatchSender, ChatTarget};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Confirmation of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupReceipt {
    /// 1-based group number within this dispatch.
    pub group: usize,
    /// Pages in the group.
    pub size: usize,
    /// Pages confirmed so far in this dispatch, this group included.
    pub confirmed: usize,
}

/// Told about every confirmed group, in order.
#[async_trait]
pub trait DispatchObserver: Send {
    /// An error here aborts the dispatch before the next group.
    async fn on_confirmed(&mut self, receipt: GroupReceipt) -> Result<(), DeliveryError>;
}

/// The subset of [`DeliveryConfig`] the dispatcher needs.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub max_batch_size: usize,
    pub pause_between_albums: Duration,
    pub pause_between_pages: Duration,
    pub transient_retry_delay: Duration,
    pub max_send_retries: Option<u32>,
    pub operation_timeout: Option<Duration>,
}

impl From<&DeliveryConfig> for DispatchPolicy {
    fn from(c: &DeliveryConfig) -> Self {
        Self {
            max_batch_size: c.album_batch_size,
            pause_between_albums: c.pause_between_albums,
            pause_between_pages: c.pause_between_pages,
            transient_retry_delay: c.transient_retry_delay,
            max_send_retries: c.max_send_retries,
            operation_timeout: c.operation_timeout,
        }
    }
}

/// Contiguous groups of at most `max` pages.
pub fn plan_batches(pages: &[PageImage], max: usize) -> std::slice::Chunks<'_, PageImage> {
    pages.chunks(max.max(1))
}

/// Sends page groups through a [`BatchSender`].
pub struct BatchDispatcher {
    sender: Arc<dyn BatchSender>,
    policy: DispatchPolicy,
    cancel: CancellationToken,
}

impl BatchDispatcher {
    pub fn new(sender: Arc<dyn BatchSender>, policy: DispatchPolicy, cancel: CancellationToken) -> Self {
        Self {
            sender,
            policy,
            cancel,
        }
    }

    /// Send `pages` in order, `caption` on the very first image.
    ///
    /// Returns the number of pages confirmed, which on success is `pages.len()`.
    pub async fn dispatch<O: DispatchObserver>(
        &self,
        target: ChatTarget,
        pages: &[PageImage],
        caption: Option<&str>,
        observer: &mut O,
    ) -> Result<usize, DeliveryError> {
        let mut confirmed = 0usize;
        let groups = plan_batches(pages, self.policy.max_batch_size);
        let last = groups.len();

        for (i, group) in groups.enumerate() {
            let number = i + 1;
            if self.cancel.is_cancelled() {
                return Err(DeliveryError::Cancelled);
            }

            if !self.policy.pause_between_pages.is_zero() {
                for _ in group {
                    self.pause(self.policy.pause_between_pages).await?;
                }
            }

            let group_caption = if i == 0 { caption } else { None };
            self.send_confirmed(target, group, group_caption, number).await?;
            confirmed += group.len();

            observer
                .on_confirmed(GroupReceipt {
                    group: number,
                    size: group.len(),
                    confirmed,
                })
                .await?;

            // Pacing between documents belongs to the orchestrator.
            if number < last {
                self.pause(self.policy.pause_between_albums).await?;
            }
        }

        Ok(confirmed)
    }

    /// Retry loop for one group, bounded by `operation_timeout` when set.
    async fn send_confirmed(
        &self,
        target: ChatTarget,
        group: &[PageImage],
        caption: Option<&str>,
        number: usize,
    ) -> Result<(), DeliveryError> {
        let attempts = self.retry_until_confirmed(target, group, caption, number);
        match self.policy.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, attempts)
                .await
                .map_err(|_| DeliveryError::Timeout {
                    operation: format!("album {number}"),
                    secs: limit.as_secs(),
                })?,
            None => attempts.await,
        }
    }

    async fn retry_until_confirmed(
        &self,
        target: ChatTarget,
        group: &[PageImage],
        caption: Option<&str>,
        number: usize,
    ) -> Result<(), DeliveryError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let wait = match self.sender.send_group(target, group, caption).await {
                Ok(()) => {
                    debug!(
                        "Album {} ({} pages) confirmed after {} attempt(s)",
                        number,
                        group.len(),
                        attempts
                    );
                    return Ok(());
                }
                Err(SendError::RateLimited { wait }) => {
                    warn!("Album {}: rate limited, waiting {}s", number, wait.as_secs());
                    wait
                }
                Err(SendError::Transient(detail)) => {
                    warn!(
                        "Album {}: attempt {} failed: {}; retrying in {:?}",
                        number, attempts, detail, self.policy.transient_retry_delay
                    );
                    self.policy.transient_retry_delay
                }
                Err(SendError::Fatal(detail)) => {
                    return Err(DeliveryError::SendFailed {
                        group: number,
                        detail,
                    });
                }
            };

            if let Some(max) = self.policy.max_send_retries {
                if attempts > max {
                    return Err(DeliveryError::SendFailed {
                        group: number,
                        detail: format!("gave up after {} retries", max),
                    });
                }
            }

            self.pause(wait).await?;
        }
    }

    /// The between-albums pause, taken by the orchestrator after each document.
    pub async fn settle(&self) -> Result<(), DeliveryError> {
        self.pause(self.policy.pause_between_albums).await
    }

    /// Sleep, then honour cancellation.
    async fn pause(&self, duration: Duration) -> Result<(), DeliveryError> {
        if !duration.is_zero() {
            sleep(duration).await;
        }
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct ScriptedSender {
        script: Mutex<VecDeque<Result<(), SendError>>>,
        attempts: Mutex<Vec<(Vec<usize>, Option<String>, Instant)>>,
    }

    impl ScriptedSender {
        fn with_script(script: Vec<Result<(), SendError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                attempts: Mutex::default(),
            })
        }

        fn attempts(&self) -> Vec<(Vec<usize>, Option<String>, Instant)> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSender for ScriptedSender {
        async fn send_group(
            &self,
            _target: ChatTarget,
            images: &[PageImage],
            caption: Option<&str>,
        ) -> Result<(), SendError> {
            self.attempts.lock().unwrap().push((
                images.iter().map(|p| p.ordinal).collect(),
                caption.map(String::from),
                Instant::now(),
            ));
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    #[derive(Default)]
    struct Receipts(Vec<GroupReceipt>);

    #[async_trait]
    impl DispatchObserver for Receipts {
        async fn on_confirmed(&mut self, receipt: GroupReceipt) -> Result<(), DeliveryError> {
            self.0.push(receipt);
            Ok(())
        }
    }

    fn pages(n: usize) -> Vec<PageImage> {
        (1..=n)
            .map(|ordinal| PageImage {
                ordinal,
                path: PathBuf::from(format!("page_{ordinal:05}.jpg")),
            })
            .collect()
    }

    fn policy() -> DispatchPolicy {
        DispatchPolicy {
            max_batch_size: 10,
            pause_between_albums: Duration::ZERO,
            pause_between_pages: Duration::ZERO,
            transient_retry_delay: Duration::from_secs(3),
            max_send_retries: None,
            operation_timeout: None,
        }
    }

    fn dispatcher(sender: Arc<ScriptedSender>, policy: DispatchPolicy) -> BatchDispatcher {
        BatchDispatcher::new(sender, policy, CancellationToken::new())
    }

    #[test]
    fn plan_is_contiguous_and_bounded() {
        let pages = pages(23);
        let sizes: Vec<usize> = plan_batches(&pages, 10).map(|g| g.len()).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        let flat: Vec<usize> = plan_batches(&pages, 10)
            .flat_map(|g| g.iter().map(|p| p.ordinal))
            .collect();
        assert_eq!(flat, (1..=23).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn twenty_three_pages_make_three_albums_with_one_caption() {
        let sender = ScriptedSender::with_script(vec![]);
        let d = dispatcher(sender.clone(), policy());
        let mut receipts = Receipts::default();

        let confirmed = d
            .dispatch(ChatTarget(1), &pages(23), Some("doc.pdf (23 pages)"), &mut receipts)
            .await
            .unwrap();

        assert_eq!(confirmed, 23);
        let attempts = sender.attempts();
        let sizes: Vec<usize> = attempts.iter().map(|a| a.0.len()).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        assert_eq!(attempts[0].0.first(), Some(&1));
        assert_eq!(attempts[2].0, vec![21, 22, 23]);
        let captions: Vec<Option<String>> = attempts.iter().map(|a| a.1.clone()).collect();
        assert_eq!(captions, vec![Some("doc.pdf (23 pages)".into()), None, None]);

        let cumulative: Vec<usize> = receipts.0.iter().map(|r| r.confirmed).collect();
        assert_eq!(cumulative, vec![10, 20, 23]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_then_confirms() {
        let sender = ScriptedSender::with_script(vec![Err(SendError::RateLimited {
            wait: Duration::from_secs(5),
        })]);
        let d = dispatcher(sender.clone(), policy());
        let mut receipts = Receipts::default();

        d.dispatch(ChatTarget(1), &pages(4), None, &mut receipts)
            .await
            .unwrap();

        let attempts = sender.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1].2 - attempts[0].2 >= Duration::from_secs(5));
        assert_eq!(receipts.0.len(), 1);
        assert_eq!(receipts.0[0].confirmed, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_with_fixed_delay() {
        let sender = ScriptedSender::with_script(vec![
            Err(SendError::Transient("502".into())),
            Err(SendError::Transient("timeout".into())),
        ]);
        let d = dispatcher(sender.clone(), policy());

        d.dispatch(ChatTarget(1), &pages(2), None, &mut Receipts::default())
            .await
            .unwrap();

        let attempts = sender.attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts[1].2 - attempts[0].2 >= Duration::from_secs(3));
        assert!(attempts[2].2 - attempts[1].2 >= Duration::from_secs(3));
        // Same group resent every time.
        assert!(attempts.iter().all(|a| a.0 == vec![1, 2]));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_without_confirming() {
        let sender = ScriptedSender::with_script(vec![
            Ok(()),
            Err(SendError::Fatal("chat not found".into())),
        ]);
        let d = dispatcher(sender.clone(), policy());
        let mut receipts = Receipts::default();

        let err = d
            .dispatch(ChatTarget(1), &pages(15), None, &mut receipts)
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::SendFailed { group: 2, .. }));
        assert_eq!(receipts.0.len(), 1);
        assert_eq!(receipts.0[0].confirmed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_ceiling_escalates() {
        let sender = ScriptedSender::with_script(vec![
            Err(SendError::Transient("a".into())),
            Err(SendError::Transient("b".into())),
            Err(SendError::Transient("c".into())),
        ]);
        let d = dispatcher(
            sender.clone(),
            DispatchPolicy {
                max_send_retries: Some(2),
                ..policy()
            },
        );

        let err = d
            .dispatch(ChatTarget(1), &pages(1), None, &mut Receipts::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("gave up after 2 retries"));
        assert_eq!(sender.attempts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_dispatch_sends_nothing() {
        let sender = ScriptedSender::with_script(vec![]);
        let cancel = CancellationToken::new();
        let d = BatchDispatcher::new(sender.clone(), policy(), cancel.clone());
        cancel.cancel();

        let err = d
            .dispatch(ChatTarget(1), &pages(3), None, &mut Receipts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Cancelled));
        assert!(sender.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_observed_once_backoff_ends() {
        let sender = ScriptedSender::with_script(vec![Err(SendError::RateLimited {
            wait: Duration::from_secs(60),
        })]);
        let cancel = CancellationToken::new();
        let d = BatchDispatcher::new(sender.clone(), policy(), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = d
            .dispatch(ChatTarget(1), &pages(3), None, &mut Receipts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Cancelled));
        assert_eq!(sender.attempts().len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn operation_timeout_bounds_retry_loop() {
        let sender = ScriptedSender::with_script(
            (0..100)
                .map(|_| Err(SendError::Transient("down".into())))
                .collect(),
        );
        let d = dispatcher(
            sender,
            DispatchPolicy {
                operation_timeout: Some(Duration::from_secs(10)),
                ..policy()
            },
        );

        let err = d
            .dispatch(ChatTarget(1), &pages(2), None, &mut Receipts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout { secs: 10, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_between_albums_and_pages() {
        let sender = ScriptedSender::with_script(vec![]);
        let d = dispatcher(
            sender.clone(),
            DispatchPolicy {
                max_batch_size: 2,
                pause_between_albums: Duration::from_secs(1),
                pause_between_pages: Duration::from_millis(500),
                ..policy()
            },
        );

        d.dispatch(ChatTarget(1), &pages(4), None, &mut Receipts::default())
            .await
            .unwrap();

        let attempts = sender.attempts();
        // 1 s after the first album, plus 2 × 0.5 s while preparing the second.
        assert!(attempts[1].2 - attempts[0].2 >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn no_pause_after_final_album() {
        let sender = ScriptedSender::with_script(vec![]);
        let cancel = CancellationToken::new();
        let d = BatchDispatcher::new(
            sender.clone(),
            DispatchPolicy {
                max_batch_size: 2,
                pause_between_albums: Duration::from_secs(10),
                ..policy()
            },
            cancel.clone(),
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let confirmed = d
            .dispatch(ChatTarget(1), &pages(4), None, &mut Receipts::default())
            .await
            .unwrap();

        // One pause between the two albums, none after the second, so a
        // cancel arriving later cannot undo a finished dispatch.
        assert_eq!(confirmed, 4);
        assert_eq!(sender.attempts().len(), 2);
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn observer_error_aborts_before_next_group() {
        struct Failing;
        #[async_trait]
        impl DispatchObserver for Failing {
            async fn on_confirmed(&mut self, _: GroupReceipt) -> Result<(), DeliveryError> {
                Err(DeliveryError::Internal("disk full".into()))
            }
        }

        let sender = ScriptedSender::with_script(vec![]);
        let d = dispatcher(sender.clone(), policy());
        let err = d
            .dispatch(ChatTarget(1), &pages(20), None, &mut Failing)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(sender.attempts().len(), 1);
    }
}
