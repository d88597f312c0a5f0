//! Bandada CLI: open N concurrent browser clients against a multiplayer game
//! and wait for every client to report `"Game over"`.
//!
//! ## Usage
//!
//! ```bash
//! bandada                                 # 2 clients against the local endpoint
//! bandada 16 http://game.test/pairs/      # 16 clients against a remote game
//! bandada 8 --capture-after 240           # screenshot stragglers after 240s
//! bandada --sweep 2,4,8 --metrics-csv runs.csv   # benchmark sweep
//! ```

use bandada::{
    sweep_csv, CdpLaunchOptions, CdpSessionProvider, Fleet, FleetConfig, HarnessResult, RunStats,
    SweepRow,
};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Drive a fleet of concurrent headless browser clients against a
/// real-time multiplayer game and wait for each one to signal completion.
#[derive(Debug, Parser)]
#[command(name = "bandada", version, about)]
struct Cli {
    /// Number of concurrent clients to open (0 exits immediately)
    #[arg(value_parser = clap::value_parser!(i64).range(0..), default_value_t = 2)]
    clients: i64,

    /// Target URL the clients connect to
    #[arg(default_value = bandada::DEFAULT_URL)]
    url: String,

    /// Capture a screenshot and state snapshot of each still-unfinished
    /// client this many seconds after the run starts
    #[arg(long, value_name = "SECS")]
    capture_after: Option<u64>,

    /// Directory screenshots are written into
    #[arg(long, value_name = "DIR", default_value = ".")]
    capture_dir: PathBuf,

    /// Disable cookie storage in the browser sessions
    #[arg(long)]
    no_cookies: bool,

    /// Close each client session as soon as it finishes
    #[arg(long)]
    close_on_finish: bool,

    /// Log the extracted player id with each completion line
    #[arg(long)]
    extract_id: bool,

    /// Run the fleet once per client count and print runtime statistics
    /// after each run
    #[arg(long, value_name = "N1,N2,...", value_delimiter = ',', num_args = 1..)]
    sweep: Option<Vec<usize>>,

    /// Write per-run sweep metrics to this CSV file
    #[arg(long, value_name = "FILE", requires = "sweep")]
    metrics_csv: Option<PathBuf>,

    /// Run the browser with a visible window
    #[arg(long)]
    headful: bool,

    /// Disable the browser sandbox (for containers/CI)
    #[arg(long)]
    no_sandbox: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Error lines go to stderr; everything else shares stdout with the
    // harness log.
    let writer = std::io::stderr
        .with_max_level(Level::ERROR)
        .or_else(std::io::stdout);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer)
        .init();
}

#[tokio::main]
async fn run(cli: Cli) -> HarnessResult<()> {
    let mut config = FleetConfig::new()
        .with_clients(cli.clients as usize)
        .with_url(cli.url)
        .with_cookies(!cli.no_cookies)
        .with_capture_dir(cli.capture_dir)
        .with_close_on_finish(cli.close_on_finish)
        .with_extract_player_id(cli.extract_id);
    if let Some(secs) = cli.capture_after {
        config = config.with_capture_after(Duration::from_secs(secs));
    }

    let options = CdpLaunchOptions::default()
        .with_headless(!cli.headful)
        .with_cookies(config.cookies_enabled);
    let options = if cli.no_sandbox {
        options.with_no_sandbox()
    } else {
        options
    };

    let mut provider = CdpSessionProvider::launch(options).await?;

    if let Some(counts) = cli.sweep {
        let mut rows = Vec::with_capacity(counts.len());
        for count in counts {
            let summary = Fleet::new(config.clone().with_clients(count))
                .run(&mut provider)
                .await?;
            if let Some(stats) = RunStats::from_runtimes(&summary.runtimes) {
                println!("{}", stats.render());
            }
            rows.push(SweepRow::new(&summary));
        }
        if let Some(path) = cli.metrics_csv {
            std::fs::write(&path, sweep_csv(&rows))?;
            info!("Wrote sweep metrics to {}.", path.display());
        }
    } else {
        let summary = Fleet::new(config).run(&mut provider).await?;
        info!(
            "{} of {} clients finished in {:?}.",
            summary.finished, summary.clients, summary.elapsed
        );
    }

    provider.close().await?;
    Ok(())
}
