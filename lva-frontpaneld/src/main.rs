use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use lva_frontpaneld::client::{self, ControlSocketClient};
use lva_frontpaneld::panel_input::{NullPanelInput, PanelInput};
use lva_frontpaneld::translate::Translator;

/// How often the hardware is polled. Touch/encoder debounce (50ms) is
/// handled downstream in `Translator`; this just bounds how stale a press
/// can be before it's observed.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(name = "lva-frontpaneld")]
#[command(about = "Polls touch/encoder hardware and forwards debounced commands to the control socket")]
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

    // No real touch/encoder driver is in scope: `NullPanelInput` keeps
    // the poll/debounce/translate/send pipeline wired end-to-end so a future
    // driver only needs to implement `PanelInput`.
    let mut panel_input: Box<dyn PanelInput> = Box::new(NullPanelInput);
    log::info!("no panel hardware driver configured, running with a null input source");

    let mut translator = Translator::new();
    let mut control_client = ControlSocketClient::new(client::socket_path(&ipc_dir));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut poll = tokio::time::interval(POLL_INTERVAL);

    log::info!("front-panel daemon started");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("received ctrl-c, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                log::info!("received sigterm, shutting down");
                break;
            }
            _ = poll.tick() => {
                let raw = panel_input.poll();
                if raw.is_empty() {
                    continue;
                }
                let now = std::time::Instant::now();
                for command in translator.translate(&raw, now) {
                    control_client.send(command).await;
                }
            }
        }
    }

    Ok(())
}
