use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

const BINARY_NAME: &str = if cfg!(target_os = "windows") {
    "ffmpeg.exe"
} else {
    "ffmpeg"
};

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    path: PathBuf,
}

impl Ffmpeg {
    /// Resolves the transcoder binary: the configured path if given, else
    /// the first `ffmpeg` on `PATH`, else the bare name (launches will then
    /// fail per job).
    pub fn locate(configured: Option<&Path>) -> Self {
        if let Some(path) = configured {
            info!("Using configured FFmpeg at {}", path.display());
            return Self {
                path: path.to_path_buf(),
            };
        }

        match which::which(BINARY_NAME) {
            Ok(path) => {
                info!("Found FFmpeg on PATH at {}", path.display());
                Self { path }
            }
            Err(err) => {
                tracing::warn!("FFmpeg not found on PATH ({err}); streams will fail to start");
                Self {
                    path: PathBuf::from(BINARY_NAME),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First line of `ffmpeg -version`.
    pub fn version(&self) -> std::io::Result<String> {
        let output = Command::new(&self.path).arg("-version").output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            info!("FFmpeg -version stderr: {}", stderr);
            return Ok(format!("error: {}", stderr.trim()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("unknown").to_string())
    }
}
