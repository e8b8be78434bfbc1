use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use lva_ipc::Metrics;
use lva_visiond::camera::{Camera, NullCamera};
use lva_visiond::detector::{FaceOrientationDetector, HeuristicDetector};
use lva_visiond::server::VisionServer;

#[derive(Parser, Debug)]
#[command(name = "lva-visiond")]
#[command(about = "Opens the camera on request, runs face-orientation inference, replies with a verdict")]
struct Args {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Override the UNIX-socket bus directory (defaults to `LVA_IPC_DIR` or
    /// `/tmp/lva-ipc`).
    #[arg(long)]
    socket_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let ipc_dir = lva_ipc::sockets::ipc_dir(args.socket_dir.as_deref());
    std::fs::create_dir_all(&ipc_dir)?;

    let metrics = Arc::new(Metrics::default());
    let cancel = CancellationToken::new();

    // No real camera driver is in scope: `NullCamera` keeps the
    // request/reply cycle wired end-to-end so a future driver only needs to
    // implement `Camera`.
    let camera: Arc<Mutex<Box<dyn Camera>>> = Arc::new(Mutex::new(Box::new(NullCamera::default())));
    let detector: Arc<Mutex<Box<dyn FaceOrientationDetector>>> =
        Arc::new(Mutex::new(Box::new(HeuristicDetector)));

    let server = VisionServer::bind(&ipc_dir, metrics.clone())?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        server.run(server_cancel, camera, detector).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received ctrl-c, shutting down");
        }
        _ = sigterm.recv() => {
            log::info!("received sigterm, shutting down");
        }
    }

    cancel.cancel();
    let _ = server_task.await;

    lva_ipc::sockets::remove_socket_file(&lva_ipc::sockets::visd_sock(&ipc_dir))?;
    log::info!("vision daemon stopped");
    Ok(())
}
