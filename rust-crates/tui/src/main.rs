use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use live_sync::{
    Address,
    manager::DEFAULT_POLL_INTERVAL,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

mod client;
mod leaderboard_client;
mod stream_client;
mod ui;

const LOG_FILE_PREFIX: &str = "arena-tui.log";

#[derive(Parser, Debug)]
#[command(version, about = "Live leaderboard and spectator view for Battle Arena", long_about = None)]
struct Args {
    /// WebSocket endpoint pushing score events. Without it the leaderboard polls.
    #[arg(long)]
    stream_url: Option<url::Url>,

    /// Base URL of the read gateway serving `GET /leaderboard`.
    #[arg(long)]
    leaderboard_url: Option<url::Url>,

    /// Arena contract whose score events are watched.
    #[arg(long)]
    contract: String,

    /// Local player; their best score on the board is kept as personal best.
    #[arg(long)]
    player: Option<String>,

    #[arg(long)]
    state_dir: Option<String>,

    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    poll_interval_ms: u64,

    #[arg(long, default_value_t = client::DEFAULT_SPECTATOR_TICK.as_millis() as u64)]
    spectator_tick_ms: u64,

    /// Fixed seed for the spectator simulation.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(short, long, default_value = "false")]
    tracing: bool,
}

impl Args {
    fn into_config(self, state_dir: PathBuf) -> Result<client::AppConfig> {
        if self.poll_interval_ms == 0 {
            return Err(eyre!("--poll-interval-ms must be greater than zero"));
        }
        if self.contract.trim().is_empty() {
            return Err(eyre!("--contract must not be empty"));
        }
        Ok(client::AppConfig {
            stream_url: self.stream_url.map(String::from),
            leaderboard_url: self.leaderboard_url.map(String::from),
            contract: Address::new(self.contract.trim()),
            player: self.player.map(Address::new),
            state_dir,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            spectator_tick: Duration::from_millis(self.spectator_tick_ms),
            seed: self.seed,
        })
    }
}

/// The terminal owns stdout, so logs go to a daily file in the state dir.
fn init_tracing(state_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(state_dir).wrap_err("creating state directory for logs failed")?;
    let appender = rolling::daily(state_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!(e))?;
    Ok(guard)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let state_dir = local_state::resolve_state_dir(args.state_dir.as_deref());
    let _guard = if args.tracing {
        Some(init_tracing(&state_dir)?)
    } else {
        None
    };
    tracing::info!("starting arena-tui");
    let config = args.into_config(state_dir)?;
    client::run_app(config).await
}
