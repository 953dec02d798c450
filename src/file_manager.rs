//! # File Management Module
//!
//! Questo modulo gestisce la discovery dei file video e le utility sui file.
//!
//! ## Responsabilità:
//! - Discovery (ricorsiva o no) dei file video in una directory
//! - Lettura fresca dei metadata di ogni file (`MediaFile`)
//! - Fingerprint SHA-256 del contenuto
//! - Formattazione human-readable delle dimensioni
//!
//! ## Regole di discovery:
//! - Solo file regolari con estensione nella allow-list (case-insensitive)
//! - I link simbolici non vengono mai seguiti né restituiti
//! - I file temporanei del tool (prefisso `.movie-fixer-tmp-`) vengono ignorati
//! - Ordine deterministico: le entry sono ordinate per nome
//! - Root inesistente o illeggibile: `FixError::Discovery` (fatale)
//! - Sottodirectory illeggibile: warning e si prosegue
//!
//! ## Esempio:
//! ```rust,no_run
//! use movie_fixer::file_manager::FileManager;
//! use std::path::Path;
//!
//! let extensions = vec!["mp4".to_string(), "mkv".to_string()];
//! for path in FileManager::enumerate(Path::new("/movies"), true, &extensions)? {
//!     println!("{}", path.display());
//! }
//! # Ok::<(), movie_fixer::FixError>(())
//! ```

use crate::error::FixError;
use crate::platform;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Prefix of every temporary file this tool creates next to a movie
pub const TEMP_PREFIX: &str = ".movie-fixer-tmp-";

/// A candidate movie file, read fresh from disk
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified_time: u64,
    pub group_id: Option<u32>,
    pub mode: Option<u32>,
}

impl MediaFile {
    /// Canonicalize `path` and read its current metadata
    pub async fn stat(path: &Path) -> io::Result<Self> {
        let path = fs::canonicalize(path).await?;
        let metadata = fs::metadata(&path).await?;
        Ok(Self {
            size: metadata.len(),
            modified_time: unix_secs(metadata.modified()?),
            group_id: platform::group_id(&metadata),
            mode: platform::mode(&metadata),
            path,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

/// Manages file operations and discovery
pub struct FileManager;

impl FileManager {
    /// Get information about a file (size and modification time)
    pub async fn get_file_info(path: &Path) -> io::Result<(u64, u64)> {
        let metadata = fs::metadata(path).await?;
        Ok((metadata.len(), unix_secs(metadata.modified()?)))
    }

    /// Lazily walk `root` yielding movie files with an allowed extension
    pub fn enumerate(
        root: &Path,
        recursive: bool,
        extensions: &[String],
    ) -> Result<impl Iterator<Item = PathBuf>, FixError> {
        let metadata = std::fs::metadata(root)
            .map_err(|e| FixError::discovery(root, format!("cannot access root: {}", e)))?;
        if !metadata.is_dir() {
            return Err(FixError::discovery(root, "root is not a directory"));
        }
        std::fs::read_dir(root)
            .map_err(|e| FixError::discovery(root, format!("root is not readable: {}", e)))?;

        let extensions: Vec<String> = extensions.iter().map(|ext| ext.to_lowercase()).collect();

        let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
        if !recursive {
            walker = walker.max_depth(1);
        }

        Ok(walker
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    let location = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    warn!("Skipping unreadable entry {}: {}", location, e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let temp = Self::is_temp_file(entry.path());
                if temp {
                    debug!("Ignoring leftover temp file: {}", entry.path().display());
                }
                !temp
            })
            .filter(move |entry| Self::has_extension(entry.path(), &extensions))
            .map(|entry| entry.into_path()))
    }

    /// Temp files left behind by an interrupted run. `keep` (the ledger) is
    /// never returned, whatever its name.
    pub fn stale_temp_files(root: &Path, recursive: bool, keep: &Path) -> Vec<PathBuf> {
        let keep = std::fs::canonicalize(keep).unwrap_or_else(|_| keep.to_path_buf());
        let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
        if !recursive {
            walker = walker.max_depth(1);
        }
        walker
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && Self::is_temp_file(entry.path()))
            .map(|entry| entry.into_path())
            .filter(|path| {
                let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
                path != keep
            })
            .collect()
    }

    /// Case-insensitive extension match against a lowercase allow-list
    pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
        if let Some(ext) = path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|allowed| *allowed == ext_lower)
        } else {
            false
        }
    }

    /// Check if a path is one of our own temporary files
    pub fn is_temp_file(path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().starts_with(TEMP_PREFIX))
            .unwrap_or(false)
    }

    /// SHA-256 of the file content, hex encoded
    pub async fn sha256(path: &Path) -> io::Result<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::sha256_blocking(&path))
            .await
            .map_err(io::Error::other)?
    }

    pub fn sha256_blocking(path: &Path) -> io::Result<String> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}

/// Seconds since the unix epoch, 0 for times before it
pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current time in unix seconds
pub fn now_secs() -> u64 {
    unix_secs(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn default_extensions() -> Vec<String> {
        crate::Config::default().extensions
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"movie").unwrap();
    }

    fn names(paths: Vec<PathBuf>, root: &Path) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_enumerate_filters_by_extension_case_insensitive() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b.MKV"));
        touch(&dir.path().join("a.mp4"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("a.mp4.1700000000.v2.patch"));
        touch(&dir.path().join(".movie-fixer-tmp-Ab12Cd.mp4"));

        let found: Vec<PathBuf> =
            FileManager::enumerate(dir.path(), false, &default_extensions())
                .unwrap()
                .collect();

        assert_eq!(names(found, dir.path()), vec!["a.mp4", "b.MKV"]);
    }

    #[test]
    fn test_enumerate_recursion_flag() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("top.mov"));
        touch(&dir.path().join("season1").join("ep1.avi"));

        let flat: Vec<PathBuf> = FileManager::enumerate(dir.path(), false, &default_extensions())
            .unwrap()
            .collect();
        assert_eq!(names(flat, dir.path()), vec!["top.mov"]);

        let deep: Vec<PathBuf> = FileManager::enumerate(dir.path(), true, &default_extensions())
            .unwrap()
            .collect();
        assert_eq!(deep.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_enumerate_does_not_follow_symlinks() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        touch(&outside.path().join("escape.mp4"));
        touch(&dir.path().join("inside.mp4"));
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("inside.mp4"),
            dir.path().join("alias.mp4"),
        )
        .unwrap();

        let found: Vec<PathBuf> = FileManager::enumerate(dir.path(), true, &default_extensions())
            .unwrap()
            .collect();
        assert_eq!(names(found, dir.path()), vec!["inside.mp4"]);
    }

    #[test]
    fn test_enumerate_missing_root_is_discovery_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        match FileManager::enumerate(&missing, true, &default_extensions()) {
            Err(FixError::Discovery { path, .. }) => assert_eq!(path, missing),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("missing root must fail"),
        }
    }

    #[test]
    fn test_enumerate_file_root_is_discovery_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.mp4");
        touch(&file);
        assert!(FileManager::enumerate(&file, false, &default_extensions()).is_err());
    }

    #[test]
    fn test_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join(".movie-fixer-tmp-Ab12Cd.mp4"));
        touch(&dir.path().join("show").join(".movie-fixer-tmp-x.delta"));
        touch(&dir.path().join("a.mp4"));

        let ledger = dir.path().join(crate::config::DEFAULT_LEDGER_NAME);
        assert_eq!(FileManager::stale_temp_files(dir.path(), false, &ledger).len(), 1);
        assert_eq!(FileManager::stale_temp_files(dir.path(), true, &ledger).len(), 2);
    }

    #[test]
    fn test_stale_temp_files_never_include_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = dir.path().join(crate::config::DEFAULT_LEDGER_NAME);
        touch(&ledger);
        assert!(!FileManager::is_temp_file(&ledger));

        // A custom ledger that happens to look like a temp file
        let odd_ledger = dir.path().join(format!("{}ledger.json", TEMP_PREFIX));
        touch(&odd_ledger);
        touch(&dir.path().join(format!("{}Ab12Cd.mkv", TEMP_PREFIX)));

        let stale = FileManager::stale_temp_files(dir.path(), false, &odd_ledger);
        assert_eq!(stale.len(), 1);
        assert!(!stale.contains(&odd_ledger));
    }

    #[tokio::test]
    async fn test_media_file_stat() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.mp4");
        touch(&file);

        let media = MediaFile::stat(&file).await.unwrap();
        assert_eq!(media.size, 5);
        assert!(media.path.is_absolute());
        assert_eq!(media.file_name(), "a.mp4");
        #[cfg(unix)]
        assert!(media.group_id.is_some());
    }

    #[tokio::test]
    async fn test_sha256_known_digest() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("abc.bin");
        std::fs::write(&file, b"abc").unwrap();

        assert_eq!(
            FileManager::sha256(&file).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(1536), "1.50 KB");
        assert_eq!(FileManager::format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
