use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::error::SyncError;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

const DEFAULT_DECODER_BINARY: &str = "djxl";
const JXL_CONTENT_TYPES: [&str; 3] = ["image/jxl", "image/jxlp", "image/jxl-sequence"];

/// Posts eligible for reverse search: any `image/*` type that is not a
/// video type. Blank and unknown types are ineligible.
pub fn is_supported_content_type(content_type: &str) -> bool {
    let lowered = content_type.trim().to_ascii_lowercase();
    if lowered.starts_with("video/") {
        return false;
    }
    lowered.starts_with("image/")
}

pub fn is_jxl_content_type(content_type: &str) -> bool {
    let lowered = content_type.trim().to_ascii_lowercase();
    JXL_CONTENT_TYPES.contains(&lowered.as_str())
}

/// Swaps the extension for `.jpg`, keeping the stem.
pub fn jpeg_filename(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename);
    format!("{stem}.jpg")
}

pub trait Transcoder {
    fn needs_transcode(&self, content_type: &str) -> bool;
    fn transcode(&self, content: &[u8]) -> Result<Vec<u8>>;
}

/// Shells out to the JPEG XL reference decoder. The scratch directory is
/// removed when the `TempDir` guard drops, on success and failure alike.
#[derive(Debug, Clone)]
pub struct JxlDecoder {
    binary: String,
}

impl JxlDecoder {
    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }
}

impl Default for JxlDecoder {
    fn default() -> Self {
        Self::with_binary(DEFAULT_DECODER_BINARY)
    }
}

impl Transcoder for JxlDecoder {
    fn needs_transcode(&self, content_type: &str) -> bool {
        is_jxl_content_type(content_type)
    }

    fn transcode(&self, content: &[u8]) -> Result<Vec<u8>> {
        let workdir = TempDir::with_prefix("boorusync-decode-")
            .context("failed to create decoder scratch directory")?;
        let input_path = workdir.path().join("input.jxl");
        let output_path = workdir.path().join("output.jpg");
        fs::write(&input_path, content)
            .with_context(|| format!("failed to write {}", input_path.display()))?;

        let output = Command::new(&self.binary)
            .arg(&input_path)
            .arg(&output_path)
            .output()
            .with_context(|| format!("failed to run decoder '{}'", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(SyncError::Decode {
                message: format!("{} failed ({}): {detail}", self.binary, output.status),
            }
            .into());
        }
        if !output_path.exists() {
            return Err(SyncError::Decode {
                message: format!("{} exited cleanly but produced no output file", self.binary),
            }
            .into());
        }

        fs::read(&output_path).with_context(|| format!("failed to read {}", output_path.display()))
    }
}
