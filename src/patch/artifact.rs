//! On-disk patch artifacts.
//!
//! An artifact lives next to the movie it belongs to and is named
//! `<movie file name>.<unix secs>[-<n>].v2.patch`. Layout:
//!
//! ```text
//! MOVIE-FIXER-PATCH\n
//! {"format_version":2,"backend":"xdelta3",...}\n
//! <raw delta bytes>
//! ```
//!
//! The delta always rebuilds the original from the optimized file. The
//! header carries the digests of both, which is what makes an artifact the
//! durable proof that a file was optimized.

use crate::error::FixError;
use crate::platform;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const PATCH_MAGIC: &str = "MOVIE-FIXER-PATCH";
pub const PATCH_FORMAT_VERSION: u32 = 2;
pub const PATCH_EXTENSION: &str = "patch";

const MAX_HEADER_LEN: u64 = 64 * 1024;

/// Self-describing metadata stored in front of the delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchHeader {
    pub format_version: u32,
    pub backend: String,
    pub source: PathBuf,
    pub created_at: u64,
    pub original_size: u64,
    pub original_sha256: String,
    pub optimized_size: u64,
    pub optimized_sha256: String,
}

#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

/// A patch artifact that exists on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchArtifact {
    pub path: PathBuf,
    pub header: PatchHeader,
    delta_offset: u64,
}

impl PatchArtifact {
    /// Sidecar path for `media`; `attempt > 0` disambiguates same-second runs
    pub fn sidecar_path(media: &Path, created_at: u64, attempt: u32) -> PathBuf {
        let file_name = media.file_name().unwrap_or_default().to_string_lossy();
        let stamp = if attempt == 0 {
            created_at.to_string()
        } else {
            format!("{}-{}", created_at, attempt)
        };
        platform::parent_dir(media).join(format!(
            "{}.{}.v{}.{}",
            file_name, stamp, PATCH_FORMAT_VERSION, PATCH_EXTENSION
        ))
    }

    /// Whether `candidate` is named like a sidecar of the movie `media_name`
    pub fn is_sidecar_name(media_name: &str, candidate: &str) -> bool {
        let Some(rest) = candidate.strip_prefix(media_name) else {
            return false;
        };
        let Some(rest) = rest.strip_prefix('.') else {
            return false;
        };
        let Some(rest) = rest.strip_suffix(&format!(".{}", PATCH_EXTENSION)) else {
            return false;
        };
        let Some((stamp, version)) = rest.rsplit_once(".v") else {
            return false;
        };
        let stamp_ok = match stamp.split_once('-') {
            Some((secs, attempt)) => is_digits(secs) && is_digits(attempt),
            None => is_digits(stamp),
        };
        stamp_ok && is_digits(version)
    }

    /// Read and validate an artifact's header
    pub fn read(path: &Path) -> Result<Self, FixError> {
        let file = File::open(path)
            .map_err(|e| FixError::patch(format!("cannot open {}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);

        let magic = read_line(&mut reader, path)?;
        if magic.trim_end() != PATCH_MAGIC {
            return Err(FixError::patch(format!(
                "{} is not a movie-fixer patch",
                path.display()
            )));
        }

        let header_line = read_line(&mut reader, path)?;
        let probe: VersionProbe = serde_json::from_str(&header_line).map_err(|e| {
            FixError::patch(format!("unreadable header in {}: {}", path.display(), e))
        })?;
        if probe.format_version != PATCH_FORMAT_VERSION {
            return Err(FixError::patch(format!(
                "{} uses patch format v{}, this version only applies v{}",
                path.display(),
                probe.format_version,
                PATCH_FORMAT_VERSION
            )));
        }
        let header: PatchHeader = serde_json::from_str(&header_line).map_err(|e| {
            FixError::patch(format!("invalid header in {}: {}", path.display(), e))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            delta_offset: (magic.len() + header_line.len()) as u64,
        })
    }

    /// Every readable sidecar of `media`, newest first
    pub fn sidecars(media: &Path) -> Vec<PatchArtifact> {
        let Some(media_name) = media.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return Vec::new();
        };
        let dir = platform::parent_dir(media);
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {} for patch artifacts: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut artifacts: Vec<PatchArtifact> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                Self::is_sidecar_name(&media_name, &entry.file_name().to_string_lossy())
            })
            .filter_map(|entry| match Self::read(&entry.path()) {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    debug!("Ignoring sidecar {}: {}", entry.path().display(), e);
                    None
                }
            })
            .collect();

        artifacts.sort_by(|a, b| {
            b.header
                .created_at
                .cmp(&a.header.created_at)
                .then_with(|| b.path.cmp(&a.path))
        });
        artifacts
    }

    /// Durably write a new artifact for `media` from a header and a delta file.
    ///
    /// Never overwrites: an existing name bumps the attempt counter. The
    /// artifact takes the movie's owner, group and read/write bits. A failed
    /// write removes the partial file.
    pub fn write(media: &Path, header: PatchHeader, delta: &Path) -> Result<Self, FixError> {
        let (mut file, path) = create_unique(media, header.created_at)?;

        let written = (|| -> io::Result<u64> {
            let mut header_line = serde_json::to_string(&header)?;
            header_line.push('\n');
            let prefix = format!("{}\n{}", PATCH_MAGIC, header_line);
            file.write_all(prefix.as_bytes())?;
            io::copy(&mut File::open(delta)?, &mut file)?;
            copy_ownership(media, &path)?;
            file.sync_all()?;
            platform::sync_dir(platform::parent_dir(&path))?;
            Ok(prefix.len() as u64)
        })();

        match written {
            Ok(delta_offset) => Ok(Self {
                path,
                header,
                delta_offset,
            }),
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(FixError::patch(format!(
                    "cannot write patch {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    /// Copy the raw delta bytes into `out`
    pub fn extract_delta(&self, out: &Path) -> Result<(), FixError> {
        let copy = || -> io::Result<()> {
            let mut file = File::open(&self.path)?;
            file.seek(SeekFrom::Start(self.delta_offset))?;
            let mut target = File::create(out)?;
            io::copy(&mut file, &mut target)?;
            target.sync_all()
        };
        copy().map_err(|e| {
            FixError::patch(format!(
                "cannot extract delta from {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Size of the delta payload in bytes
    pub fn delta_len(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len().saturating_sub(self.delta_offset))
    }

    pub fn remove(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

fn create_unique(media: &Path, created_at: u64) -> Result<(File, PathBuf), FixError> {
    let mut attempt = 0;
    loop {
        let path = PatchArtifact::sidecar_path(media, created_at, attempt);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(FixError::patch(format!(
                    "cannot create patch {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
}

fn read_line<R: BufRead>(reader: &mut R, path: &Path) -> Result<String, FixError> {
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(MAX_HEADER_LEN)
        .read_until(b'\n', &mut buf)
        .map_err(|e| FixError::patch(format!("cannot read {}: {}", path.display(), e)))?;
    if buf.last() != Some(&b'\n') {
        return Err(FixError::patch(format!(
            "{} has a truncated or oversized header",
            path.display()
        )));
    }
    String::from_utf8(buf)
        .map_err(|_| FixError::patch(format!("{} has a non UTF-8 header", path.display())))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Owner, group and rw bits of `media` onto `artifact`
fn copy_ownership(media: &Path, artifact: &Path) -> io::Result<()> {
    let metadata = fs::metadata(media)?;
    platform::chown(
        artifact,
        platform::user_id(&metadata),
        platform::group_id(&metadata),
    )?;
    if let Some(mode) = platform::mode(&metadata) {
        platform::set_mode(artifact, mode & 0o666)?;
    }
    Ok(())
}
