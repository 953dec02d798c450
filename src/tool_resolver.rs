//! # Tool Path Resolver
//!
//! This module handles finding the external tools the pipeline shells out to:
//! - A bundled tools directory (`TOOLS_DIR`, or `tools/` next to the executable)
//! - System-installed tools on `PATH`
//!
//! It also renders the availability report behind `movie-fixer tools`.

use crate::patch::backends;
use crate::platform;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tool path resolver for bundled and system tools
#[derive(Debug, Clone)]
pub struct ToolPathResolver {
    /// Directory searched before PATH
    tools_dir: Option<PathBuf>,
    /// Fall back to the system PATH
    search_system_path: bool,
}

impl ToolPathResolver {
    /// Create a new path resolver
    pub fn new() -> Self {
        Self {
            tools_dir: Self::detect_tools_dir(),
            search_system_path: true,
        }
    }

    /// Resolver with an explicit tools directory, still falling back to PATH
    pub fn with_tools_dir<P: Into<PathBuf>>(tools_dir: P) -> Self {
        Self {
            tools_dir: Some(tools_dir.into()),
            search_system_path: true,
        }
    }

    /// Resolver that only ever looks inside `tools_dir`
    pub fn isolated<P: Into<PathBuf>>(tools_dir: P) -> Self {
        Self {
            tools_dir: Some(tools_dir.into()),
            search_system_path: false,
        }
    }

    fn detect_tools_dir() -> Option<PathBuf> {
        // Strategy 1: TOOLS_DIR environment variable (direct override)
        if let Ok(tools_dir) = env::var("TOOLS_DIR") {
            let tools_path = PathBuf::from(tools_dir);
            debug!("Checking TOOLS_DIR environment variable: {:?}", tools_path);
            if tools_path.is_dir() {
                return Some(tools_path);
            }
        }

        // Strategy 2: tools/ next to the executable
        if let Ok(exe_path) = env::current_exe() {
            if let Some(app_dir) = exe_path.parent() {
                let tools_path = app_dir.join("tools");
                debug!("Checking bundled tools path: {:?}", tools_path);
                if tools_path.is_dir() {
                    return Some(tools_path);
                }
            }
        }

        None
    }

    /// Resolve the path to a specific tool
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        if let Some(ref tools_dir) = self.tools_dir {
            let bundled_path = Self::bundled_tool_path(tools_dir, tool_name);
            if bundled_path.is_file() {
                debug!("Using bundled tool: {} -> {:?}", tool_name, bundled_path);
                return Some(bundled_path);
            }
        }

        if !self.search_system_path {
            debug!("Tool not found in isolated tools dir: {}", tool_name);
            return None;
        }

        match which::which(tool_name) {
            Ok(path) => {
                debug!("Using system tool: {} -> {:?}", tool_name, path);
                Some(path)
            }
            Err(_) => {
                debug!("Tool not found: {}", tool_name);
                None
            }
        }
    }

    fn bundled_tool_path(tools_dir: &Path, tool_name: &str) -> PathBuf {
        let extension = if cfg!(target_os = "windows") { ".exe" } else { "" };
        tools_dir.join(format!("{}{}", tool_name, extension))
    }

    /// Check if a specific tool is available
    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        self.resolve_tool(tool_name).is_some()
    }

    /// Get installation instructions for a tool on Linux
    fn get_linux_install_instructions(&self, tool_name: &str) -> String {
        match tool_name {
            "ffmpeg" | "ffprobe" => "sudo apt-get install ffmpeg".to_string(),
            "xdelta3" => "sudo apt-get install xdelta3".to_string(),
            "hdiffz" | "hpatchz" => {
                "download from: https://github.com/sisong/HDiffPatch/releases".to_string()
            }
            "bsdiff" | "bspatch" => "sudo apt-get install bsdiff".to_string(),
            _ => format!("sudo apt-get install {}", tool_name),
        }
    }

    /// Check if a tool is available and provide installation instructions if not
    pub fn check_tool_with_instructions(&self, tool_name: &str) -> Result<PathBuf, String> {
        if let Some(path) = self.resolve_tool(tool_name) {
            Ok(path)
        } else if cfg!(target_os = "linux") {
            Err(format!(
                "Tool '{}' not found in system PATH.\n\
                To install on Linux, run:\n  {}",
                tool_name,
                self.get_linux_install_instructions(tool_name)
            ))
        } else {
            Err(format!(
                "Tool '{}' not found. Please ensure it's installed or placed in TOOLS_DIR.",
                tool_name
            ))
        }
    }

    /// Get a report of tool availability
    pub fn get_tools_report(&self) -> String {
        let mut report = String::new();
        report.push_str("Tool Path Resolver Report\n");
        report.push_str(&format!("Platform: {}\n", platform::system_info()));
        report.push_str(&format!("Bundled tools dir: {:?}\n", self.tools_dir));

        let mut sections: Vec<(String, Vec<&str>)> = vec![("Remux".to_string(), vec!["ffmpeg"])];
        for (name, tools) in backends::BACKEND_TOOLS {
            sections.push((format!("Diff backend '{}'", name), tools.to_vec()));
        }

        for (category, tool_list) in sections {
            report.push_str(&format!("\n{}:\n", category));
            for tool in tool_list {
                match self.resolve_tool(tool) {
                    Some(path) => report.push_str(&format!("  ✅ {} -> {:?}\n", tool, path)),
                    None => report.push_str(&format!(
                        "  ❌ {} (install with: {})\n",
                        tool,
                        self.get_linux_install_instructions(tool)
                    )),
                }
            }
        }

        report
    }
}

impl Default for ToolPathResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bundled_tool_wins() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join(if cfg!(windows) { "xdelta3.exe" } else { "xdelta3" });
        std::fs::write(&fake, b"#!/bin/sh\n").unwrap();

        let resolver = ToolPathResolver::with_tools_dir(dir.path());
        assert_eq!(resolver.resolve_tool("xdelta3"), Some(fake));
    }

    #[test]
    fn test_isolated_resolver_ignores_path() {
        let dir = TempDir::new().unwrap();
        let resolver = ToolPathResolver::isolated(dir.path());
        assert!(!resolver.is_tool_available("cp"));
        assert!(!resolver.is_tool_available("ffmpeg"));
    }

    #[test]
    fn test_missing_tool_has_instructions() {
        let dir = TempDir::new().unwrap();
        let resolver = ToolPathResolver::isolated(dir.path());
        let err = resolver
            .check_tool_with_instructions("definitely-not-a-real-tool-42")
            .unwrap_err();
        assert!(err.contains("definitely-not-a-real-tool-42"));
    }

    #[test]
    fn test_report_lists_every_backend() {
        let report = ToolPathResolver::new().get_tools_report();
        assert!(report.contains("ffmpeg"));
        for name in backends::BACKEND_NAMES {
            assert!(report.contains(name), "missing {name} in report");
        }
    }
}
