//! Interchangeable binary diff backends.
//!
//! Every backend wraps an external tool pair able to write a delta from a
//! base file to a target file, and to rebuild the target from the base and
//! the delta. Ranking prefers smaller, more portable patch formats.

use crate::tool_resolver::ToolPathResolver;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Built-in backends, best first
pub const BACKEND_NAMES: &[&str] = &["xdelta3", "hdiffpatch", "bsdiff"];

/// Binaries each built-in backend needs
pub const BACKEND_TOOLS: &[(&str, &[&str])] = &[
    ("xdelta3", &["xdelta3"]),
    ("hdiffpatch", &["hdiffz", "hpatchz"]),
    ("bsdiff", &["bsdiff", "bspatch"]),
];

/// A binary delta tool
pub trait DiffBackend: Send + Sync + fmt::Debug {
    /// Name recorded in patch headers
    fn name(&self) -> &'static str;

    /// Command writing to `delta` a patch that turns `base` into `target`
    fn diff_command(&self, base: &Path, target: &Path, delta: &Path) -> Command;

    /// Command rebuilding the target into `output` from `base` and `delta`
    fn apply_command(&self, base: &Path, delta: &Path, output: &Path) -> Command;
}

/// VCDIFF via xdelta3
#[derive(Debug, Clone)]
pub struct Xdelta3Backend {
    xdelta3: PathBuf,
}

impl DiffBackend for Xdelta3Backend {
    fn name(&self) -> &'static str {
        "xdelta3"
    }

    fn diff_command(&self, base: &Path, target: &Path, delta: &Path) -> Command {
        let mut cmd = Command::new(&self.xdelta3);
        cmd.args(["-e", "-f", "-s"]).arg(base).arg(target).arg(delta);
        cmd
    }

    fn apply_command(&self, base: &Path, delta: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.xdelta3);
        cmd.args(["-d", "-f", "-s"]).arg(base).arg(delta).arg(output);
        cmd
    }
}

/// HDiffPatch (`hdiffz` / `hpatchz`)
#[derive(Debug, Clone)]
pub struct HDiffPatchBackend {
    hdiffz: PathBuf,
    hpatchz: PathBuf,
}

impl DiffBackend for HDiffPatchBackend {
    fn name(&self) -> &'static str {
        "hdiffpatch"
    }

    fn diff_command(&self, base: &Path, target: &Path, delta: &Path) -> Command {
        let mut cmd = Command::new(&self.hdiffz);
        cmd.arg("-f").arg(base).arg(target).arg(delta);
        cmd
    }

    fn apply_command(&self, base: &Path, delta: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.hpatchz);
        cmd.arg("-f").arg(base).arg(delta).arg(output);
        cmd
    }
}

/// Classic bsdiff / bspatch. Memory hungry on large files, ranked last.
#[derive(Debug, Clone)]
pub struct BsdiffBackend {
    bsdiff: PathBuf,
    bspatch: PathBuf,
}

impl DiffBackend for BsdiffBackend {
    fn name(&self) -> &'static str {
        "bsdiff"
    }

    fn diff_command(&self, base: &Path, target: &Path, delta: &Path) -> Command {
        let mut cmd = Command::new(&self.bsdiff);
        cmd.arg(base).arg(target).arg(delta);
        cmd
    }

    fn apply_command(&self, base: &Path, delta: &Path, output: &Path) -> Command {
        // bspatch takes the output before the patch
        let mut cmd = Command::new(&self.bspatch);
        cmd.arg(base).arg(output).arg(delta);
        cmd
    }
}

/// Binaries needed by a named backend
pub fn required_tools(name: &str) -> &'static [&'static str] {
    BACKEND_TOOLS
        .iter()
        .find(|(backend, _)| *backend == name)
        .map(|(_, tools)| *tools)
        .unwrap_or(&[])
}

/// Build a backend if every binary it needs resolves
pub fn build(name: &str, resolver: &ToolPathResolver) -> Option<Box<dyn DiffBackend>> {
    match name {
        "xdelta3" => Some(Box::new(Xdelta3Backend {
            xdelta3: resolver.resolve_tool("xdelta3")?,
        })),
        "hdiffpatch" => Some(Box::new(HDiffPatchBackend {
            hdiffz: resolver.resolve_tool("hdiffz")?,
            hpatchz: resolver.resolve_tool("hpatchz")?,
        })),
        "bsdiff" => Some(Box::new(BsdiffBackend {
            bsdiff: resolver.resolve_tool("bsdiff")?,
            bspatch: resolver.resolve_tool("bspatch")?,
        })),
        _ => None,
    }
}

/// Probe order: the preferred backend first, then the built-in ranking
pub fn ranked(preferred: Option<&str>) -> Vec<&'static str> {
    let first = preferred.and_then(|preferred| {
        BACKEND_NAMES
            .iter()
            .copied()
            .find(|name| *name == preferred)
    });
    first
        .into_iter()
        .chain(
            BACKEND_NAMES
                .iter()
                .copied()
                .filter(|name| Some(*name) != first),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_tools(dir: &Path, tools: &[&str]) {
        for tool in tools {
            std::fs::write(dir.join(tool), b"#!/bin/sh\n").unwrap();
        }
    }

    #[test]
    fn test_ranking() {
        assert_eq!(ranked(None), vec!["xdelta3", "hdiffpatch", "bsdiff"]);
        assert_eq!(ranked(Some("bsdiff")), vec!["bsdiff", "xdelta3", "hdiffpatch"]);
        assert_eq!(ranked(Some("unknown")), vec!["xdelta3", "hdiffpatch", "bsdiff"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_build_requires_every_binary() {
        let dir = TempDir::new().unwrap();
        let resolver = ToolPathResolver::isolated(dir.path());

        fake_tools(dir.path(), &["hdiffz"]);
        assert!(build("hdiffpatch", &resolver).is_none());

        fake_tools(dir.path(), &["hpatchz"]);
        let backend = build("hdiffpatch", &resolver).unwrap();
        assert_eq!(backend.name(), "hdiffpatch");
        assert!(build("xdelta3", &resolver).is_none());
    }

    #[test]
    fn test_required_tools() {
        assert_eq!(required_tools("bsdiff"), &["bsdiff", "bspatch"]);
        assert!(required_tools("nope").is_empty());
        for name in BACKEND_NAMES {
            assert!(!required_tools(name).is_empty());
        }
    }
}
