// src/source/mod.rs

//! Source acquisition
//!
//! Downloads are verified against their mandatory SHA-256 digest and kept in
//! a digest-addressed download cache shared by every recipe, so a second
//! request for the same bytes never touches the network. A cached file whose
//! bytes no longer match its digest is discarded and fetched again.
//!
//! [`SourceFetcher::get`] extracts archives into the destination, optionally
//! stripping a single top-level directory; plain files are copied as-is.

pub mod archive;
pub mod download;
pub mod patch;

pub use archive::ArchiveKind;
pub use download::{Downloader, DownloadSettings};
pub use patch::{apply_patch_text, apply_patches, replace_in_file};

use crate::error::{Error, Result};
use crate::hash;
use crate::lifecycle::cancel::CancelToken;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One downloadable source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Mirrors, tried in order
    pub urls: Vec<String>,
    pub sha256: String,
    /// Drop the single top-level directory of an archive
    pub strip_root: bool,
    /// File name to use instead of the last URL segment
    pub filename: Option<String>,
    /// Subdirectory of the source folder receiving this source
    pub destination: Option<String>,
}

impl SourceSpec {
    pub fn new(url: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            sha256: sha256.into(),
            strip_root: false,
            filename: None,
            destination: None,
        }
    }

    pub fn with_strip_root(mut self, strip_root: bool) -> Self {
        self.strip_root = strip_root;
        self
    }

    /// File name of the download
    pub fn file_name(&self) -> String {
        if let Some(name) = &self.filename {
            return name.clone();
        }
        self.urls
            .first()
            .map(|u| u.split(['?', '#']).next().unwrap_or(u))
            .and_then(|u| u.rsplit('/').next())
            .filter(|n| !n.is_empty())
            .unwrap_or("source")
            .to_string()
    }
}

/// Downloads, verifies and unpacks sources
pub struct SourceFetcher {
    downloader: Downloader,
    /// Digest-addressed cache of downloaded files
    download_cache: PathBuf,
    cancel: CancelToken,
}

impl SourceFetcher {
    pub fn new(download_cache: PathBuf, settings: DownloadSettings, cancel: CancelToken) -> Result<Self> {
        Ok(Self {
            downloader: Downloader::new(settings, cancel.clone())?,
            download_cache,
            cancel,
        })
    }

    pub fn download_cache(&self) -> &Path {
        &self.download_cache
    }

    fn cached_path(&self, sha256: &str) -> PathBuf {
        let digest = sha256.to_ascii_lowercase();
        self.download_cache.join(&digest[..2.min(digest.len())]).join(&digest)
    }

    /// Verified copy of the bytes with the given digest, fetching if needed
    fn fetch_verified(&self, urls: &[String], sha256: &str) -> Result<PathBuf> {
        if !hash::is_sha256(sha256) {
            return Err(Error::ParseError(format!("'{}' is not a SHA-256 digest", sha256)));
        }
        let cached = self.cached_path(sha256);
        if cached.is_file() {
            match hash::verify_file_sha256(&cached, sha256)? {
                Ok(()) => {
                    debug!("Download cache hit for {}", sha256);
                    return Ok(cached);
                }
                Err(actual) => {
                    warn!("Cached download {} is corrupt (sha256 {}), fetching again", sha256, actual);
                    fs::remove_file(&cached)?;
                }
            }
        }

        let parent = cached.parent().unwrap_or(&self.download_cache);
        fs::create_dir_all(parent)?;
        let mut last_error = Error::DownloadError("no URL given".to_string());
        for url in urls {
            self.cancel.check()?;
            let temp = parent.join(format!("{}.{}.tmp", sha256, uuid::Uuid::new_v4()));
            if let Err(e) = self.downloader.download(url, &temp) {
                warn!("Mirror {} failed: {}", url, e);
                last_error = e;
                continue;
            }
            match hash::verify_file_sha256(&temp, sha256)? {
                Ok(()) => {
                    fs::rename(&temp, &cached)?;
                    return Ok(cached);
                }
                Err(actual) => {
                    let _ = fs::remove_file(&temp);
                    last_error = Error::ChecksumMismatch {
                        url: url.clone(),
                        expected: sha256.to_string(),
                        actual,
                    };
                }
            }
        }
        Err(last_error)
    }

    /// Download to `dest` after verifying the digest
    pub fn download(&self, urls: &[String], sha256: &str, dest: &Path) -> Result<()> {
        let cached = self.fetch_verified(urls, sha256)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&cached, dest)?;
        Ok(())
    }

    /// Download a source and unpack it into `dest`
    pub fn get(&self, spec: &SourceSpec, dest: &Path) -> Result<()> {
        let file_name = spec.file_name();
        let cached = self.fetch_verified(&spec.urls, &spec.sha256)?;
        let kind = ArchiveKind::from_name(&file_name);
        fs::create_dir_all(dest)?;

        if !kind.is_archive() {
            info!("Fetched {}", file_name);
            fs::copy(&cached, dest.join(&file_name))?;
            return Ok(());
        }

        let scratch = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(dest)?;
        archive::extract(&cached, kind, scratch.path())?;
        let mut root = scratch.path().to_path_buf();
        if spec.strip_root {
            match archive::single_root(scratch.path())? {
                Some(single) => root = single,
                None => debug!("{} has no single root directory to strip", file_name),
            }
        }
        archive::move_contents(&root, dest)?;
        info!("Fetched and extracted {}", file_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;
    use url::Url;

    fn tarball(path: &Path) {
        let encoder = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let content = b"int main() { return 0; }\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "hello-1.0/main.c", &content[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn fetcher(dir: &Path) -> SourceFetcher {
        let settings = DownloadSettings {
            retries: 1,
            ..Default::default()
        };
        SourceFetcher::new(dir.join("downloads"), settings, CancelToken::new()).unwrap()
    }

    #[test]
    fn test_file_name() {
        let spec = SourceSpec::new("https://x.org/zlib-1.3.1.tar.gz?download=1", "00");
        assert_eq!(spec.file_name(), "zlib-1.3.1.tar.gz");
        let spec = SourceSpec {
            filename: Some("stb.h".into()),
            ..spec
        };
        assert_eq!(spec.file_name(), "stb.h");
    }

    #[test]
    fn test_get_strips_root_and_caches() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("hello-1.0.tar.gz");
        tarball(&archive);
        let digest = hash::hash_file(&archive).unwrap();
        let url = Url::from_file_path(&archive).unwrap().to_string();

        let fetcher = fetcher(dir.path());
        let spec = SourceSpec::new(url, digest.clone()).with_strip_root(true);
        let dest = dir.path().join("src");
        fetcher.get(&spec, &dest).unwrap();
        assert!(dest.join("main.c").is_file());

        // The cache now serves the bytes even when the origin is gone
        fs::remove_file(&archive).unwrap();
        let again = dir.path().join("src2");
        fetcher.get(&spec, &again).unwrap();
        assert_eq!(fs::read(dest.join("main.c")).unwrap(), fs::read(again.join("main.c")).unwrap());
    }

    #[test]
    fn test_integrity_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("hello-1.0.tar.gz");
        tarball(&archive);
        let url = Url::from_file_path(&archive).unwrap().to_string();

        let fetcher = fetcher(dir.path());
        let spec = SourceSpec::new(url, "0".repeat(64));
        let dest = dir.path().join("src");
        let err = fetcher.get(&spec, &dest).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityError);
        assert!(!dest.exists());
    }

    #[test]
    fn test_corrupt_cache_is_refetched() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.bin");
        fs::write(&file, b"original bytes").unwrap();
        let digest = hash::hash_file(&file).unwrap();
        let url = Url::from_file_path(&file).unwrap().to_string();

        let fetcher = fetcher(dir.path());
        let out = dir.path().join("out/data.bin");
        fetcher.download(&[url.clone()], &digest, &out).unwrap();

        let cached = fetcher.cached_path(&digest);
        fs::write(&cached, b"flipped bytes!").unwrap();
        fetcher.download(&[url], &digest, &out).unwrap();
        assert_eq!(fs::read(&cached).unwrap(), b"original bytes");
    }
}
