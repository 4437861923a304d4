//! Fetches a shared Google Drive folder into the media library through the
//! external `gdown` helper.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{error, info};

use crate::error::{StreamError, StreamResult};

/// Number of trailing helper output lines kept in a download error.
const ERROR_TAIL_LINES: usize = 5;

#[derive(Debug, Clone)]
pub struct FolderDownloader {
    program: PathBuf,
}

impl FolderDownloader {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn build_args(folder_url: &str, target: &Path) -> Vec<String> {
        vec![
            "--folder".to_string(),
            folder_url.to_string(),
            "-O".to_string(),
            target.to_string_lossy().to_string(),
            "--no-cookies".to_string(),
        ]
    }

    /// Downloads every file of `folder_url` into `target`. Runs to
    /// completion; there is no cancellation.
    pub async fn download(&self, folder_url: &str, target: &Path) -> StreamResult<()> {
        let folder_url = folder_url.trim();
        if folder_url.is_empty() {
            return Err(StreamError::invalid_input("folder url is empty"));
        }

        info!("Downloading folder {} into {}", folder_url, target.display());

        let output = Command::new(&self.program)
            .args(Self::build_args(folder_url, target))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| StreamError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Folder download failed: {}", stderr);
            return Err(StreamError::Download(format!(
                "{} ({})",
                tail(&stderr, ERROR_TAIL_LINES),
                output.status
            )));
        }

        info!("Folder download complete: {}", folder_url);
        Ok(())
    }
}

fn tail(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    kept[kept.len().saturating_sub(lines)..].join(" | ")
}
