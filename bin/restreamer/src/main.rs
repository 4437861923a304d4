use std::{env, net::Ipv4Addr, path::PathBuf};

use anyhow::{Context, anyhow};
use clap::Parser;
use directories::ProjectDirs;
use restreamer_stream_server::{ServerConfig, StreamServerState, create_router};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const APP_NAME: &str = "Restreamer";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Sets the IP address to bind the server to
    #[arg(long, default_value = "0.0.0.0", env = "RESTREAMER_HOST")]
    host: Ipv4Addr,

    /// Sets the Port to bind the server to
    #[arg(long, default_value_t = 4570, env = "RESTREAMER_PORT")]
    port: u16,

    /// Directory holding the media library (defaults to the platform data dir)
    #[arg(long, env = "RESTREAMER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Path to the ffmpeg binary (defaults to the first one on PATH)
    #[arg(long, env = "RESTREAMER_FFMPEG")]
    ffmpeg: Option<PathBuf>,

    /// Path to the gdown helper used for Google Drive folder downloads
    #[arg(long, default_value = "gdown", env = "RESTREAMER_GDOWN")]
    gdown: PathBuf,

    /// Google Drive folder fetched when a download request names none
    #[arg(long, env = "RESTREAMER_DRIVE_FOLDER")]
    drive_folder: Option<String>,

    /// Allows more than one stream to run at the same time
    #[arg(long, env = "RESTREAMER_ALLOW_CONCURRENT")]
    allow_concurrent: bool,
}

fn resolve_data_dir(configured: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = configured {
        return Ok(dir);
    }

    let proj_dirs = ProjectDirs::from("", "", APP_NAME)
        .ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(proj_dirs.data_dir().to_path_buf())
}

#[tokio::main]
async fn main() {
    let rust_log = env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let env_filter = match rust_log.is_empty() {
        true => EnvFilter::builder().parse_lossy("info"),
        false => EnvFilter::builder().parse_lossy(rust_log),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Cli::parse();

    if let Err(err) = run(args).await {
        error!("Server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let data_dir = resolve_data_dir(args.data_dir)?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
    info!("📂 Data Directory: {}", data_dir.display());

    let config = ServerConfig {
        ffmpeg: args.ffmpeg,
        gdown: args.gdown,
        drive_folder_url: args.drive_folder,
        single_stream: !args.allow_concurrent,
        ..ServerConfig::new(data_dir)
    };

    let state = StreamServerState::new(config).context("Failed to initialize stream server")?;
    let supervisor = state.supervisor.clone();
    let app = create_router(state);

    let listener_addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&listener_addr)
        .await
        .with_context(|| format!("Failed to bind {listener_addr}"))?;

    info!("🌍 Restreamer running at http://{}", listener_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("🛑 Received Ctrl+C, shutting down server..."),
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .context("Server failed")?;

    info!("🛑 terminating running streams...");
    supervisor.shutdown().await;
    info!("   All streams stopped.");

    Ok(())
}
