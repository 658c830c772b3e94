// src/source/archive.rs

//! Archive extraction
//!
//! Tarballs (plain, gzip, bzip2, xz, zstd) and zip files are unpacked
//! in-process. Windows installers (`.msi`) and macOS installer packages
//! (`.pkg`) are handed to the platform tools `msiextract` and `pkgutil`.
//! Anything else is not an archive and is copied as a plain file.

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Stream compression of a tarball
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl CompressionFormat {
    /// Detect compression format from magic bytes
    ///
    /// - Gzip: `1f 8b`
    /// - Bzip2: `42 5a 68` ("BZh")
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - Zstd: `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        match data {
            [0x1f, 0x8b, ..] => Self::Gzip,
            [0x42, 0x5a, 0x68, ..] => Self::Bzip2,
            [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00, ..] => Self::Xz,
            [0x28, 0xb5, 0x2f, 0xfd, ..] => Self::Zstd,
            _ => Self::None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }
}

/// What a downloaded file is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar(CompressionFormat),
    Zip,
    Msi,
    Pkg,
    /// Not an archive
    Plain,
}

impl ArchiveKind {
    /// Classify by file name
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let tar = |suffixes: &[&str]| suffixes.iter().any(|s| name.ends_with(s));
        if tar(&[".tar.gz", ".tgz"]) {
            Self::Tar(CompressionFormat::Gzip)
        } else if tar(&[".tar.bz2", ".tbz2", ".tbz"]) {
            Self::Tar(CompressionFormat::Bzip2)
        } else if tar(&[".tar.xz", ".txz"]) {
            Self::Tar(CompressionFormat::Xz)
        } else if tar(&[".tar.zst", ".tar.zstd", ".tzst"]) {
            Self::Tar(CompressionFormat::Zstd)
        } else if name.ends_with(".tar") {
            Self::Tar(CompressionFormat::None)
        } else if name.ends_with(".zip") {
            Self::Zip
        } else if name.ends_with(".msi") {
            Self::Msi
        } else if name.ends_with(".pkg") {
            Self::Pkg
        } else {
            Self::Plain
        }
    }

    pub fn is_archive(&self) -> bool {
        *self != Self::Plain
    }
}

/// Create a decompressing reader for the given format
fn create_decoder<'a, R: Read + 'a>(reader: R, format: CompressionFormat) -> Result<Box<dyn Read + 'a>> {
    Ok(match format {
        CompressionFormat::None => Box::new(reader),
        CompressionFormat::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        CompressionFormat::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
        CompressionFormat::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
        CompressionFormat::Zstd => Box::new(zstd::Decoder::new(reader).map_err(|e| {
            Error::IoError(format!("failed to create zstd decoder: {e}"))
        })?),
    })
}

/// Extract `archive` into `dest`
pub fn extract(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    debug!("Extracting {} into {}", archive.display(), dest.display());
    match kind {
        ArchiveKind::Tar(named) => {
            let mut magic = [0u8; 6];
            let read = File::open(archive)?.read(&mut magic)?;
            // Trust the content over the name when they disagree
            let detected = CompressionFormat::from_magic_bytes(&magic[..read]);
            let format = if detected == CompressionFormat::None { named } else { detected };
            let file = BufReader::new(File::open(archive)?);
            let mut tar = tar::Archive::new(create_decoder(file, format)?);
            tar.set_preserve_permissions(true);
            tar.set_overwrite(true);
            tar.unpack(dest).map_err(|e| {
                Error::IoError(format!(
                    "failed to extract {} ({}): {}",
                    archive.display(),
                    format.name(),
                    e
                ))
            })
        }
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(|e| {
                Error::IoError(format!("failed to open {}: {}", archive.display(), e))
            })?;
            zip.extract(dest).map_err(|e| {
                Error::IoError(format!("failed to extract {}: {}", archive.display(), e))
            })
        }
        ArchiveKind::Msi => run_tool(
            "msiextract",
            &[OsStr::new("-C"), dest.as_os_str(), archive.as_os_str()],
        ),
        ArchiveKind::Pkg => {
            // pkgutil refuses an existing destination
            let expanded = dest.join("pkg");
            run_tool(
                "pkgutil",
                &[OsStr::new("--expand-full"), archive.as_os_str(), expanded.as_os_str()],
            )
        }
        ArchiveKind::Plain => Err(Error::Internal(format!(
            "{} is not an archive",
            archive.display()
        ))),
    }
}

fn run_tool(tool: &str, args: &[&OsStr]) -> Result<()> {
    let path = which::which(tool)
        .map_err(|_| Error::IoError(format!("'{}' is required to extract this source", tool)))?;
    let output = Command::new(path).args(args).output()?;
    if !output.status.success() {
        return Err(Error::IoError(format!(
            "{} failed: {}",
            tool,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Move the contents of `from` into `to`, merging directories
pub fn move_contents(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() && target.is_dir() {
            move_contents(&entry.path(), &target)?;
            fs::remove_dir(entry.path())?;
        } else {
            if target.is_dir() {
                fs::remove_dir_all(&target)?;
            }
            fs::rename(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// The single top-level directory of an extracted tree, if there is exactly one entry
pub fn single_root(dir: &Path) -> Result<Option<std::path::PathBuf>> {
    let mut entries = fs::read_dir(dir)?;
    let (Some(first), None) = (entries.next(), entries.next()) else {
        return Ok(None);
    };
    let first = first?;
    Ok(first.file_type()?.is_dir().then(|| first.path()))
}
