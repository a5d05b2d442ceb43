use std::path::{Path, PathBuf};
use tokio::{net::UnixListener, sync::broadcast};

mod commands;
mod downloader;
mod error;
mod job;
mod orchestrator;
mod platform;
mod settings;
mod store;
#[cfg(all(test, unix))]
mod testtool;
mod tracker;
mod unixsocket;
mod webapp;
mod ytdlp;

use orchestrator::Orchestrator;
use store::JsonFileStore;
use ytdlp::ToolPaths;

pub use tracing::{debug, error, info, trace, warn};

type Anything<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(clap::Parser, Debug)]
struct Config {
    #[clap(short = 'p', long = "port", env = "EXTRACTD_PORT", default_value = "3000")]
    port: u16,
    #[clap(short = 's', long = "socket", env = "EXTRACTD_SOCKET")]
    socket: Option<PathBuf>,
    /// Where history and settings are kept
    #[clap(long = "state", env = "EXTRACTD_STATE")]
    state: Option<PathBuf>,
    #[clap(long = "ytdlp", env = "EXTRACTD_YTDLP", default_value = "/usr/bin/yt-dlp")]
    ytdlp: PathBuf,
    #[clap(long = "ffmpeg", env = "EXTRACTD_FFMPEG", default_value = "/usr/bin/ffmpeg")]
    ffmpeg: PathBuf,
    #[clap(short = 'v', action = clap::ArgAction::Count)]
    verbosity: u8,
}

fn setup(config: &Config) -> Anything<()> {
    let loglevel = match config.verbosity {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(loglevel)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn get_socket_path(config: &Config) -> Result<PathBuf, String> {
    if let Some(p) = config.socket.clone() {
        return Ok(p);
    }
    if let Ok(d) = std::env::var("XDG_RUNTIME_DIR") {
        debug!("Using default socket path");
        Ok(PathBuf::from(d).join("extractd"))
    } else {
        error!("Socket path must be specified");
        Err("No socket path".into())
    }
}

fn get_state_path(config: &Config) -> Result<PathBuf, String> {
    if let Some(p) = config.state.clone() {
        return Ok(p);
    }
    match dirs::data_dir() {
        Some(d) => Ok(d.join("extractd").join("state.json")),
        None => {
            error!("State file path must be specified");
            Err("No state path".into())
        }
    }
}

async fn start_unix_socket(socket_path: impl AsRef<Path>) -> std::io::Result<UnixListener> {
    unixsocket::prep_socket_path(&socket_path).await?;
    UnixListener::bind(socket_path)
}

#[tokio::main]
async fn main() -> Anything<()> {
    let c: Config = clap::Parser::parse();
    setup(&c)?;
    let socket_path = get_socket_path(&c)?;
    info!("Socket path is: {:?}", socket_path);
    let socket = start_unix_socket(&socket_path).await?;
    let state_path = get_state_path(&c)?;
    let store = JsonFileStore::open(state_path)?;
    info!("State file is: {:?}", store.path());
    let tools = ToolPaths {
        ytdlp: c.ytdlp.clone(),
        ffmpeg: c.ffmpeg.clone(),
    };
    // set up app channels
    let (update_tx, _) = broadcast::channel(1024);
    let (handle, cmd_rx) = orchestrator::channel();
    let web_ui = webapp::server(handle.clone(), update_tx.subscribe(), c.port);
    let unix_socket = unixsocket::server(socket, handle, update_tx.clone());
    let main_thr = Orchestrator::new(store, tools, update_tx).run(cmd_rx);
    let (_, _, served) = tokio::join!(web_ui, main_thr, unix_socket);
    served?;
    Ok(())
}
