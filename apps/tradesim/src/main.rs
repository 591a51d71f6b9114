mod commands;
mod obs;

use clap::{Parser, Subcommand};
use commands::Command;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tradesim")]
#[command(about = "Bar-by-bar trading strategy backtester", version, arg_required_else_help = true)]
#[command(
    after_help = "Examples:\n  tradesim backtest --config configs/btc_ema.toml --out runs/btc_ema.json\n  tradesim validate --config configs/btc_ema.toml\n  tradesim sweep --config configs/sweep_stops.toml\n  tradesim walk-forward --config configs/wf_ema.toml --out runs/wf.json\n\nLog filter: TRADESIM_LOG (default: info)\n"
)]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    /// Prometheus metrics listen addr (e.g. 127.0.0.1:9898). Optional.
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run one backtest and print its results as JSON.
    Backtest {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check a run config and its market data without simulating.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Run a parameter grid over a base config.
    Sweep {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Optimize in-sample and replay out-of-sample over rolling windows.
    WalkForward {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = obs::init_tracing(cli.log_json) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    if let Err(err) = obs::init_metrics(cli.metrics_addr.as_deref()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let command = match cli.command {
        CliCommand::Backtest { config, out } => Command::Backtest { config, out },
        CliCommand::Validate { config } => Command::Validate { config },
        CliCommand::Sweep { config, out } => Command::Sweep { config, out },
        CliCommand::WalkForward { config, out } => Command::WalkForward { config, out },
    };

    if let Err(err) = commands::run(command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
