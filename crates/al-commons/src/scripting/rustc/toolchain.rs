//! Locating the Rust compiler.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// The `rustc` used to build script libraries.
#[derive(Debug, Clone)]
pub struct Toolchain {
    rustc_path: PathBuf,
    version: String,
}

impl Toolchain {
    /// Find `rustc` in `PATH`.
    pub fn detect() -> Result<Self> {
        let rustc_path = which::which("rustc")
            .map_err(|_| Error::Toolchain("rustc not found in PATH".to_string()))?;
        Self::at(rustc_path)
    }

    /// Use a specific `rustc` binary.
    pub fn at(rustc_path: PathBuf) -> Result<Self> {
        let version = Self::rustc_version(&rustc_path)?;
        tracing::debug!("Using {} ({})", rustc_path.display(), version);
        Ok(Self {
            rustc_path,
            version,
        })
    }

    pub fn rustc_path(&self) -> &Path {
        &self.rustc_path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn rustc_version(rustc: &Path) -> Result<String> {
        let output = Command::new(rustc)
            .arg("--version")
            .output()
            .map_err(|e| Error::Toolchain(format!("Failed to run rustc: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Toolchain("Failed to get rustc version".to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Platform-specific dynamic library file name.
pub fn dylib_file_name(stem: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        format!("{}.dll", stem)
    }
    #[cfg(target_os = "macos")]
    {
        format!("lib{}.dylib", stem)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        format!("lib{}.so", stem)
    }
}
