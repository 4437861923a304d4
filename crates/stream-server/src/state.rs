use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::drive::FolderDownloader;
use crate::error::StreamResult;
use crate::ffmpeg::Ffmpeg;
use crate::library::MediaLibrary;
use crate::supervisor::Supervisor;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    /// Explicit transcoder binary; looked up on `PATH` when unset.
    pub ffmpeg: Option<PathBuf>,
    pub gdown: PathBuf,
    /// Folder fetched when a download request names none.
    pub drive_folder_url: Option<String>,
    /// Refuse to start a stream while another one is running.
    pub single_stream: bool,
}

impl ServerConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ffmpeg: None,
            gdown: PathBuf::from("gdown"),
            drive_folder_url: None,
            single_stream: true,
        }
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.data_dir.join("videos")
    }
}

#[derive(Clone, Debug)]
pub struct StreamServerState {
    pub supervisor: Supervisor,
    pub library: MediaLibrary,
    pub downloader: FolderDownloader,
    pub config: Arc<ServerConfig>,
    pub ffmpeg_version: Option<String>,
    // Held across the single-stream check and the start it guards.
    pub(crate) start_lock: Arc<Mutex<()>>,
}

impl StreamServerState {
    pub fn new(config: ServerConfig) -> StreamResult<Self> {
        let ffmpeg = Ffmpeg::locate(config.ffmpeg.as_deref());
        let ffmpeg_version = match ffmpeg.version() {
            Ok(version) => {
                tracing::info!("FFmpeg version: {}", version);
                Some(version)
            }
            Err(err) => {
                tracing::warn!("Could not query FFmpeg version: {err}");
                None
            }
        };

        let mut state = Self::with_supervisor(config, Supervisor::new(ffmpeg.path()))?;
        state.ffmpeg_version = ffmpeg_version;
        Ok(state)
    }

    pub fn with_supervisor(config: ServerConfig, supervisor: Supervisor) -> StreamResult<Self> {
        let library = MediaLibrary::open(config.videos_dir())?;
        let downloader = FolderDownloader::new(config.gdown.clone());

        Ok(Self {
            supervisor,
            library,
            downloader,
            config: Arc::new(config),
            ffmpeg_version: None,
            start_lock: Arc::new(Mutex::new(())),
        })
    }
}
