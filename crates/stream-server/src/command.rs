//! Argument builder for the looping RTMP restream.

use std::path::{Path, PathBuf};

/// YouTube Live ingest endpoint; the stream key is appended verbatim.
pub const RTMP_ENDPOINT: &str = "rtmp://a.rtmp.youtube.com/live2/";

/// Placeholder written wherever the stream key would appear in a log line.
pub const REDACTED: &str = "<redacted>";

const VERTICAL_SCALE: &str = "scale=720:1280";

#[derive(Debug, Clone)]
pub struct StreamCommand {
    program: PathBuf,
    source: String,
    stream_key: String,
    vertical: bool,
}

impl StreamCommand {
    pub fn new(
        program: impl AsRef<Path>,
        source: impl Into<String>,
        stream_key: impl Into<String>,
        vertical: bool,
    ) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            source: source.into(),
            stream_key: stream_key.into(),
            vertical,
        }
    }

    pub fn destination(&self) -> String {
        format!("{RTMP_ENDPOINT}{}", self.stream_key)
    }

    /// Full argument vector, program name excluded.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-re",
            "-stream_loop",
            "-1",
            "-i",
            self.source.as_str(),
            "-c:v",
            "h264",
            "-preset",
            "veryfast",
            "-b:v",
            "2500k",
            "-maxrate",
            "2500k",
            "-bufsize",
            "5000k",
            "-g",
            "60",
            "-keyint_min",
            "60",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-f",
            "flv",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        if self.vertical {
            args.push("-vf".to_string());
            args.push(VERTICAL_SCALE.to_string());
        }

        args.push(self.destination());
        args
    }

    /// Command line as it may appear in logs: the destination carries
    /// [`REDACTED`] instead of the stream key.
    pub fn redacted(&self) -> String {
        let mut args = self.build_args();
        if let Some(last) = args.last_mut() {
            *last = format!("{RTMP_ENDPOINT}{REDACTED}");
        }

        format!("{} {}", self.program.display(), args.join(" "))
    }
}
