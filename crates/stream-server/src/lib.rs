use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeFile,
    trace::TraceLayer,
};

pub mod command;
pub mod drive;
pub mod error;
pub mod ffmpeg;
pub mod launcher;
pub mod library;
pub mod log_sink;
pub mod relay;
pub mod state;
pub mod supervisor;

pub use error::{StreamError, StreamResult};
pub use library::{MediaFile, MediaLibrary, PendingUpload};
pub use log_sink::{LOG_CAPACITY, LogSink};
pub use state::{ServerConfig, StreamServerState};
pub use supervisor::{JobHandle, JobSnapshot, JobState, StreamJob, StreamRequest, Supervisor};

pub fn create_router(state: StreamServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/videos", get(list_videos_handler).post(upload_handler))
        .route("/videos/download", post(download_handler))
        .route("/videos/{name}", get(video_file_handler))
        .route("/streams", get(list_streams_handler).post(start_stream_handler))
        .route("/streams/{id}", get(stream_status_handler))
        .route("/streams/{id}/logs", get(stream_logs_handler))
        .route("/streams/{id}/stop", post(stop_stream_handler))
        .layer(cors)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    /// File name inside the media library.
    pub video: String,
    pub stream_key: String,
    #[serde(default)]
    pub vertical: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamLogs {
    pub id: JobHandle,
    pub state: JobState,
    pub lines: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadRequest {
    pub folder_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub ffmpeg_path: String,
    pub ffmpeg_version: Option<String>,
    pub log_capacity: usize,
    pub single_stream: bool,
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
    }))
}

async fn info_handler(State(state): State<StreamServerState>) -> Json<ServerInfo> {
    Json(ServerInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        ffmpeg_path: state.supervisor.program().display().to_string(),
        ffmpeg_version: state.ffmpeg_version.clone(),
        log_capacity: LOG_CAPACITY,
        single_stream: state.config.single_stream,
    })
}

async fn list_videos_handler(
    State(state): State<StreamServerState>,
) -> StreamResult<Json<Vec<MediaFile>>> {
    Ok(Json(state.library.list()?))
}

async fn upload_handler(
    State(state): State<StreamServerState>,
    mut multipart: Multipart,
) -> StreamResult<Json<Vec<MediaFile>>> {
    let mut stored = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| StreamError::invalid_input(e.to_string()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };

        // Dropping the upload on any error below removes its `.part` file.
        let mut upload = state.library.begin_upload(&name).await?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| StreamError::invalid_input(e.to_string()))?
        {
            upload.write(&chunk).await?;
        }
        stored.push(upload.finish().await?);
    }

    if stored.is_empty() {
        return Err(StreamError::invalid_input("no file in upload"));
    }
    Ok(Json(stored))
}

/// Serves a library file for preview, with range request support.
async fn video_file_handler(
    State(state): State<StreamServerState>,
    Path(name): Path<String>,
    request: Request,
) -> StreamResult<Response> {
    let path = state.library.resolve(&name)?;
    let response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    Ok(response.into_response())
}

async fn download_handler(
    State(state): State<StreamServerState>,
    Json(req): Json<DownloadRequest>,
) -> StreamResult<Json<Vec<MediaFile>>> {
    let folder_url = req
        .folder_url
        .or_else(|| state.config.drive_folder_url.clone())
        .ok_or_else(|| StreamError::invalid_input("no folder url given or configured"))?;

    state
        .downloader
        .download(&folder_url, state.library.dir())
        .await?;

    Ok(Json(state.library.list()?))
}

async fn start_stream_handler(
    State(state): State<StreamServerState>,
    Json(req): Json<StartStreamRequest>,
) -> StreamResult<(StatusCode, Json<JobSnapshot>)> {
    let source = state.library.resolve(&req.video)?;
    let request = StreamRequest::new(
        source.to_string_lossy().to_string(),
        req.stream_key,
        req.vertical,
    );

    let handle = {
        let _guard = state.start_lock.lock();
        if state.config.single_stream
            && let Some(running) = state.supervisor.running().first()
        {
            return Err(StreamError::Conflict(format!(
                "stream {running} is still running"
            )));
        }
        state.supervisor.start(request)?
    };

    let snapshot = state
        .supervisor
        .snapshot(&handle)
        .ok_or_else(|| StreamError::not_found(format!("stream {handle}")))?;
    tracing::info!("Stream {} for {} is {}", handle, req.video, snapshot.state);

    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

async fn list_streams_handler(State(state): State<StreamServerState>) -> Json<Vec<JobSnapshot>> {
    Json(state.supervisor.list())
}

async fn stream_status_handler(
    State(state): State<StreamServerState>,
    Path(id): Path<String>,
) -> StreamResult<Json<JobSnapshot>> {
    let handle: JobHandle = id.parse()?;
    state
        .supervisor
        .snapshot(&handle)
        .map(Json)
        .ok_or_else(|| StreamError::not_found(format!("stream {handle}")))
}

async fn stream_logs_handler(
    State(state): State<StreamServerState>,
    Path(id): Path<String>,
) -> StreamResult<Json<StreamLogs>> {
    let handle: JobHandle = id.parse()?;
    let job = state
        .supervisor
        .job(&handle)
        .ok_or_else(|| StreamError::not_found(format!("stream {handle}")))?;

    Ok(Json(StreamLogs {
        id: handle,
        state: job.state(),
        lines: job.logs(),
    }))
}

async fn stop_stream_handler(
    State(state): State<StreamServerState>,
    Path(id): Path<String>,
) -> StreamResult<Json<JobSnapshot>> {
    let handle: JobHandle = id.parse()?;
    let job = state
        .supervisor
        .job(&handle)
        .ok_or_else(|| StreamError::not_found(format!("stream {handle}")))?;

    job.cancel().await;
    tracing::info!("Stream {} stopped ({})", handle, job.state());
    Ok(Json(job.snapshot()))
}
