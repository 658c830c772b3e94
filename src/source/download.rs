// src/source/download.rs

//! HTTP and `file://` downloads with retry support
//!
//! Transient failures (connect errors, timeouts, 5xx, 408 and 429) are
//! retried with exponential backoff; any other 4xx fails immediately.
//! Bodies are streamed to a temporary file next to the destination and
//! renamed into place once complete.

use crate::error::{Error, Result};
use crate::lifecycle::cancel::CancelToken;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Retry and timeout policy for downloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Attempts per URL, including the first one
    pub retries: u32,
    /// Delay before the second attempt; doubles for every further attempt
    #[serde(with = "secs")]
    pub backoff: Duration,
    /// Deadline of one attempt
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Show progress bars
    pub progress: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            progress: false,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Outcome of one attempt
enum Attempt {
    Done(u64),
    Retry(String),
    Fail(Error),
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Stream a reader to a file, updating an optional progress bar
fn stream_to_file<R: Read>(
    mut reader: R,
    file: &mut File,
    progress_bar: Option<&ProgressBar>,
) -> std::io::Result<u64> {
    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])?;
        downloaded += n as u64;
        if let Some(pb) = progress_bar {
            pb.set_position(downloaded);
        }
    }
    file.sync_all()?;
    Ok(downloaded)
}

/// Blocking downloader shared by every node of a run
pub struct Downloader {
    client: Client,
    settings: DownloadSettings,
    cancel: CancelToken,
}

impl Downloader {
    pub fn new(settings: DownloadSettings, cancel: CancelToken) -> Result<Self> {
        // Proxy variables are honored by reqwest
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("pantry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadError(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            settings,
            cancel,
        })
    }

    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    /// Download `url` to `dest`, retrying transient failures
    pub fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let parsed = Url::parse(url)
            .map_err(|e| Error::DownloadError(format!("invalid URL '{}': {}", url, e)))?;
        if parsed.scheme() == "file" {
            return self.copy_local(&parsed, dest);
        }

        let attempts = self.settings.retries.max(1);
        let mut delay = self.settings.backoff;
        for attempt in 1..=attempts {
            self.cancel.check()?;
            match self.attempt(url, dest) {
                Attempt::Done(bytes) => {
                    info!("Downloaded {} ({} bytes)", url, bytes);
                    return Ok(bytes);
                }
                Attempt::Fail(e) => return Err(e),
                Attempt::Retry(reason) if attempt < attempts => {
                    warn!(
                        "Download attempt {}/{} of {} failed: {}, retrying in {:?}",
                        attempt, attempts, url, reason, delay
                    );
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
                Attempt::Retry(reason) => {
                    return Err(Error::DownloadError(format!(
                        "failed to download {} after {} attempts: {}",
                        url, attempts, reason
                    )));
                }
            }
        }
        Err(Error::DownloadError(format!("no attempt made for {}", url)))
    }

    fn attempt(&self, url: &str, dest: &Path) -> Attempt {
        let response = match self.client.get(url).send() {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                return Attempt::Retry(e.to_string());
            }
            Err(e) => return Attempt::Fail(Error::DownloadError(format!("{}: {}", url, e))),
        };

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {} from {}", status, url);
            return if is_transient(status) {
                Attempt::Retry(message)
            } else {
                Attempt::Fail(Error::DownloadError(message))
            };
        }

        let progress = self.progress_bar(url, response.content_length());
        let temp_path = dest.with_extension("part");
        let result = File::create(&temp_path).and_then(|mut file| {
            stream_to_file(response, &mut file, progress.as_ref())
        });
        if let Some(pb) = &progress {
            pb.finish_and_clear();
        }
        match result {
            Ok(bytes) => match fs::rename(&temp_path, dest) {
                Ok(()) => Attempt::Done(bytes),
                Err(e) => Attempt::Fail(e.into()),
            },
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Attempt::Retry(format!("interrupted transfer: {}", e))
            }
        }
    }

    fn copy_local(&self, url: &Url, dest: &Path) -> Result<u64> {
        let path = url
            .to_file_path()
            .map_err(|_| Error::DownloadError(format!("invalid file URL '{}'", url)))?;
        debug!("Copying local source {}", path.display());
        let temp_path = dest.with_extension("part");
        let bytes = fs::copy(&path, &temp_path).map_err(|e| {
            Error::DownloadError(format!("cannot read {}: {}", path.display(), e))
        })?;
        fs::rename(&temp_path, dest)?;
        Ok(bytes)
    }

    fn progress_bar(&self, url: &str, length: Option<u64>) -> Option<ProgressBar> {
        if !self.settings.progress {
            return None;
        }
        let name = url.rsplit('/').next().unwrap_or(url).to_string();
        let pb = match length {
            Some(len) => {
                let pb = ProgressBar::new(len);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})")
                {
                    pb.set_style(style.progress_chars("=> "));
                }
                pb
            }
            None => ProgressBar::new_spinner(),
        };
        pb.set_message(name);
        Some(pb)
    }
}
