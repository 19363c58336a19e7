//! External tool detection.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name or configured path of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// First line of its version banner.
    pub version: Option<String>,
    /// Resolved executable path.
    pub path: Option<PathBuf>,
}

/// Check if a tool is available and get its information.
///
/// ffmpeg and ffprobe take `-version`, so that is the probe argument.
///
/// # Example
///
/// ```no_run
/// use jiptv_av::check_tool;
///
/// let info = check_tool("ffprobe");
/// if info.available {
///     println!("ffprobe version: {:?}", info.version);
/// }
/// ```
pub fn check_tool(name: impl AsRef<Path>) -> ToolInfo {
    let name = name.as_ref();
    let tool_name = name.to_string_lossy().to_string();

    match Command::new(name).arg("-version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string());

            ToolInfo {
                name: tool_name,
                available: true,
                version,
                path: which::which(name).ok(),
            }
        }
        Ok(output) => {
            tracing::debug!(tool = %tool_name, status = %output.status, "Tool version check failed");
            ToolInfo {
                name: tool_name,
                available: false,
                version: None,
                path: None,
            }
        }
        Err(e) => {
            tracing::debug!(tool = %tool_name, error = %e, "Tool not available");
            ToolInfo {
                name: tool_name,
                available: false,
                version: None,
                path: None,
            }
        }
    }
}

/// Check the encoder and analyzer executables.
pub fn check_tools(encoder: &Path, analyzer: &Path) -> Vec<ToolInfo> {
    vec![check_tool(encoder), check_tool(analyzer)]
}

/// Require that a tool is available, returning its path.
///
/// Accepts a bare name (looked up on `PATH`) or a path to an executable.
pub fn require_tool(name: impl AsRef<Path>) -> Result<PathBuf> {
    let name = name.as_ref();
    which::which(name).map_err(|_| Error::tool_not_found(name.to_string_lossy()))
}
