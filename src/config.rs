//! Configuration types for album delivery.
//!
//! Every knob of a run lives in [`DeliveryConfig`], built via its
//! [`DeliveryConfigBuilder`]. One struct means a run's behaviour can be
//! logged in full and two runs can be compared field by field.

use crate::error::DeliveryError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Telegram refuses media groups with more than ten items.
pub const MAX_ALBUM_SIZE: usize = 10;

/// Separator message sent after each completed document.
pub const DEFAULT_SEPARATOR: &str = "────────  end of file  ────────";

/// Rendering parameters. Part of [`DeliveryConfig`] but passed on its own to
/// [`crate::pipeline::render::PageRenderer`] implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RenderSettings {
    /// Rendering DPI. The page is scaled by `dpi / 72`.
    pub dpi: u32,
    /// JPEG quality, 1–100.
    pub quality: u8,
}

impl RenderSettings {
    /// pdfium scale factor for this DPI (PDF user space is 72 units per inch).
    pub fn scale(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            dpi: 150,
            quality: 85,
        }
    }
}

/// Configuration for a delivery run.
///
/// # Example
/// ```rust
/// use pdf2album::DeliveryConfig;
///
/// let config = DeliveryConfig::builder()
///     .work_dir("/var/lib/pdf2album")
///     .dpi(200)
///     .album_batch_size(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.album_batch_size, 5);
/// ```
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Root of the local cache: `pdfs/`, `images/` and `.progress.json`. Default: `workdir`.
    pub work_dir: PathBuf,

    /// Page rendering parameters. Default: 150 DPI, quality 85.
    pub render: RenderSettings,

    /// Maximum pages per album (1–10). Default: 10.
    pub album_batch_size: usize,

    /// Pause after every album, and after every document. Default: 1 s.
    ///
    /// Keeps the bot under Telegram's informal per-chat thresholds before
    /// a hard 429 is ever returned.
    pub pause_between_albums: Duration,

    /// Pause per image while an album is being assembled. Default: 0.
    pub pause_between_pages: Duration,

    /// Message sent after each completed document. `None` disables it.
    pub separator_text: Option<String>,

    /// Fixed backoff after a transient send error. Default: 3 s.
    pub transient_retry_delay: Duration,

    /// Optional ceiling on send attempts per album. Default: `None` (retry forever).
    ///
    /// Rate-limit and transient errors are retried without limit by default;
    /// a stalled retry loop is preferred over a document delivered halfway.
    pub max_send_retries: Option<u32>,

    /// Optional bound on each album's (and each fetch's) whole retry loop.
    pub operation_timeout: Option<Duration>,

    /// Attempts per fetch round. Default: 5.
    pub fetch_max_attempts: u32,

    /// Lower bound of the exponential fetch backoff. Default: 3 s.
    pub fetch_backoff_min: Duration,

    /// Upper bound of the exponential fetch backoff. Default: 60 s.
    pub fetch_backoff_max: Duration,

    /// Flood wait used when the source does not say how long. Default: 30 s.
    pub flood_wait_default: Duration,

    /// Per-request timeout for HTTP sources. Default: 120 s.
    pub download_timeout: Duration,

    /// Directory holding the pdfium shared library. `None` uses the system library.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("workdir"),
            render: RenderSettings::default(),
            album_batch_size: MAX_ALBUM_SIZE,
            pause_between_albums: Duration::from_secs(1),
            pause_between_pages: Duration::ZERO,
            separator_text: Some(DEFAULT_SEPARATOR.to_string()),
            transient_retry_delay: Duration::from_secs(3),
            max_send_retries: None,
            operation_timeout: None,
            fetch_max_attempts: 5,
            fetch_backoff_min: Duration::from_secs(3),
            fetch_backoff_max: Duration::from_secs(60),
            flood_wait_default: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
            pdfium_lib_path: None,
        }
    }
}

impl DeliveryConfig {
    /// Create a new builder for `DeliveryConfig`.
    pub fn builder() -> DeliveryConfigBuilder {
        DeliveryConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory where fetched documents are cached.
    pub fn pdf_dir(&self) -> PathBuf {
        self.work_dir.join("pdfs")
    }

    /// Directory where the pages of `document_id` are rendered.
    pub fn image_dir(&self, document_id: &str) -> PathBuf {
        self.work_dir.join("images").join(document_id)
    }

    /// Location of the progress file.
    pub fn progress_file(&self) -> PathBuf {
        self.work_dir.join(".progress.json")
    }
}

/// Builder for [`DeliveryConfig`].
#[derive(Debug)]
pub struct DeliveryConfigBuilder {
    config: DeliveryConfig,
}

impl DeliveryConfigBuilder {
    pub fn work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.work_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.render.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.render.quality = quality.clamp(1, 100);
        self
    }

    pub fn album_batch_size(mut self, n: usize) -> Self {
        self.config.album_batch_size = n;
        self
    }

    pub fn pause_between_albums(mut self, pause: Duration) -> Self {
        self.config.pause_between_albums = pause;
        self
    }

    pub fn pause_between_pages(mut self, pause: Duration) -> Self {
        self.config.pause_between_pages = pause;
        self
    }

    /// An empty string disables the separator.
    pub fn separator_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.config.separator_text = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
        self
    }

    pub fn transient_retry_delay(mut self, delay: Duration) -> Self {
        self.config.transient_retry_delay = delay;
        self
    }

    pub fn max_send_retries(mut self, n: Option<u32>) -> Self {
        self.config.max_send_retries = n;
        self
    }

    pub fn operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    pub fn fetch_max_attempts(mut self, n: u32) -> Self {
        self.config.fetch_max_attempts = n;
        self
    }

    pub fn fetch_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.config.fetch_backoff_min = min;
        self.config.fetch_backoff_max = max;
        self
    }

    pub fn flood_wait_default(mut self, wait: Duration) -> Self {
        self.config.flood_wait_default = wait;
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout = timeout;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.pdfium_lib_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DeliveryConfig, DeliveryError> {
        let c = &self.config;
        if c.album_batch_size == 0 || c.album_batch_size > MAX_ALBUM_SIZE {
            return Err(DeliveryError::InvalidConfig(format!(
                "Album batch size must be 1–{}, got {}",
                MAX_ALBUM_SIZE, c.album_batch_size
            )));
        }
        if c.fetch_max_attempts == 0 {
            return Err(DeliveryError::InvalidConfig(
                "Fetch attempts must be ≥ 1".into(),
            ));
        }
        if c.fetch_backoff_min > c.fetch_backoff_max {
            return Err(DeliveryError::InvalidConfig(format!(
                "Fetch backoff minimum {:?} exceeds maximum {:?}",
                c.fetch_backoff_min, c.fetch_backoff_max
            )));
        }
        if c.max_send_retries == Some(0) {
            return Err(DeliveryError::InvalidConfig(
                "Send retry ceiling must be ≥ 1 when set".into(),
            ));
        }
        Ok(self.config)
    }
}
