use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tradesim_application::config::{
    build_engine_config, build_risk_policy, build_strategy, load_config, Config,
};
use tradesim_application::experiments::sweep::{MarketDataFactoryResult, SweepProgress};
use tradesim_domain::services::ohlcv::validate_series;
use tradesim_infrastructure::market_data::csv::CsvMarketDataRepository;

pub enum Command {
    Backtest { config: PathBuf, out: Option<PathBuf> },
    Validate { config: PathBuf },
    Sweep { config: PathBuf, out: Option<PathBuf> },
    WalkForward { config: PathBuf, out: Option<PathBuf> },
}

pub fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Backtest { config, out } => run_backtest(&config, out.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::Sweep { config, out } => run_sweep(&config, out.as_deref()),
        Command::WalkForward { config, out } => run_walk_forward(&config, out.as_deref()),
    }
}

fn csv_market_data(config: &Config) -> MarketDataFactoryResult {
    Ok(Box::new(CsvMarketDataRepository::new(
        &config.data.csv_dir,
        config.data.file_pattern.as_deref(),
    )))
}

fn run_backtest(config_path: &Path, out: Option<&Path>) -> Result<(), String> {
    let config = load_config(config_path)?;
    let repository = csv_market_data(&config)?;
    let outcome =
        tradesim_application::backtesting::run_backtest(&config, repository.as_ref())?;
    let report = &outcome.results.report;
    println_summary(
        &format!(
            "backtest {}: trades={} net_profit={:.2} return={:.2}% sharpe={:.3} max_dd={:.2}%",
            outcome.run_id,
            report.total_trades,
            report.net_profit,
            report.total_return_pct,
            report.sharpe,
            report.max_drawdown_pct
        ),
        out,
    );
    write_json(&outcome, out)
}

fn run_validate(config_path: &Path) -> Result<(), String> {
    let config = load_config(config_path)?;
    build_risk_policy(&config)?;
    build_engine_config(&config)?;
    let strategy = build_strategy(&config.strategy)?;

    let repository = csv_market_data(&config)?;
    let (data, reports) =
        tradesim_application::backtesting::load_market_data(&config, repository.as_ref())?;
    for (symbol, bars) in &data {
        validate_series(symbol, bars)?;
        if let Some(report) = reports.get(symbol) {
            println!(
                "{symbol}: rows={} duplicates={} gaps={} out_of_order={} invalid_close={}",
                report.rows,
                report.duplicates,
                report.gaps,
                report.out_of_order,
                report.invalid_close
            );
        }
    }
    println!(
        "config ok: run_id={} strategy={} symbols={}",
        config.run.run_id,
        strategy.name(),
        data.len()
    );
    Ok(())
}

fn run_sweep(sweep_path: &Path, out: Option<&Path>) -> Result<(), String> {
    let mut log_progress = |progress: SweepProgress| {
        if progress.completed_runs > 0 {
            info!(
                completed = progress.completed_runs,
                total = progress.total_runs,
                errors = progress.error_runs,
                run_id = progress.last_run_id.as_deref().unwrap_or(""),
                "sweep progress"
            );
        }
    };
    let on_progress: &mut dyn FnMut(SweepProgress) = &mut log_progress;
    let result = tradesim_application::experiments::sweep::run_sweep_with_hooks(
        sweep_path,
        &csv_market_data,
        Some(on_progress),
        None,
    )?;
    let best = result
        .leaderboard
        .first()
        .map(|row| format!("{} ({}={})", row.run_id, result.sort_by, row.value))
        .unwrap_or_else(|| "none".to_string());
    println_summary(
        &format!(
            "sweep {}: runs={} best={}",
            result.sweep_id,
            result.runs.len(),
            best
        ),
        out,
    );
    write_json(&result, out)
}

fn run_walk_forward(path: &Path, out: Option<&Path>) -> Result<(), String> {
    let result =
        tradesim_application::experiments::walk_forward::run_walk_forward(path, &csv_market_data)?;
    println_summary(
        &format!(
            "walk-forward {}: splits={} completed={} oos_net_profit={:.2}",
            result.id,
            result.splits.len(),
            result.summary.splits_completed,
            result.summary.out_of_sample_net_profit
        ),
        out,
    );
    write_json(&result, out)
}

/// Human summary goes to stdout only when the JSON goes to a file.
fn println_summary(line: &str, out: Option<&Path>) {
    if out.is_some() {
        println!("{line}");
    }
}

fn write_json<T: Serialize>(value: &T, out: Option<&Path>) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|err| format!("failed to serialize results: {err}"))?;
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|err| format!("failed to create {}: {err}", parent.display()))?;
            }
            std::fs::write(path, json)
                .map_err(|err| format!("failed to write {}: {err}", path.display()))?;
            println!("wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
