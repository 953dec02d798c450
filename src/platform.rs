//! # Platform-specific utilities
//!
//! Questo modulo centralizza tutta la logica cross-platform sui metadata dei
//! file: group id, proprietario, permessi e fsync delle directory. Su sistemi
//! non unix questi concetti non esistono e le funzioni degradano a `None` o
//! no-op.

use std::fs::Metadata;
use std::io;
use std::path::Path;

/// Owning group id of a file, if the platform has one
#[cfg(unix)]
pub fn group_id(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.gid())
}

#[cfg(not(unix))]
pub fn group_id(_metadata: &Metadata) -> Option<u32> {
    None
}

/// Owning user id of a file, if the platform has one
#[cfg(unix)]
pub fn user_id(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.uid())
}

#[cfg(not(unix))]
pub fn user_id(_metadata: &Metadata) -> Option<u32> {
    None
}

/// Permission bits (including setuid/setgid/sticky)
#[cfg(unix)]
pub fn mode(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
pub fn mode(_metadata: &Metadata) -> Option<u32> {
    None
}

/// Apply permission bits captured with [`mode`]
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Change owner and group, skipping the syscall when nothing would change.
///
/// Unprivileged users may only chown to ids they already hold, so an
/// unchanged owner must not turn into an EPERM.
#[cfg(unix)]
pub fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::MetadataExt;
    let current = std::fs::metadata(path)?;
    let uid = uid.filter(|uid| *uid != current.uid());
    let gid = gid.filter(|gid| *gid != current.gid());
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    std::os::unix::fs::chown(path, uid, gid)
}

#[cfg(not(unix))]
pub fn chown(_path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Flush a directory entry table so a rename inside it survives a crash
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Directory containing `path`, `.` for bare file names
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// System information for the tools report
pub fn system_info() -> SystemInfo {
    SystemInfo {
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        family: std::env::consts::FAMILY,
    }
}

/// System information structure
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
}

impl std::fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.os, self.arch, self.family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_system_info() {
        let info = system_info();
        assert!(!info.os.is_empty());
        assert!(!info.arch.is_empty());
        assert!(!info.family.is_empty());
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Path::new("movie.mp4")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/movies/a.mp4")), Path::new("/movies"));
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_roundtrip_and_noop_chown() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.mp4");
        std::fs::write(&file, b"data").unwrap();

        set_mode(&file, 0o640).unwrap();
        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(mode(&meta), Some(0o640));

        // Same owner and group: must succeed even without privileges
        chown(&file, user_id(&meta), group_id(&meta)).unwrap();
        sync_dir(dir.path()).unwrap();
    }
}
