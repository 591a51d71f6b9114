use crate::config::{build_engine_config, build_risk_policy, build_strategy, Config};
use crate::shared::parse_timestamp_seconds;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, info_span, warn};
use tradesim_domain::repositories::market_data::{BarQuery, MarketDataRepository};
use tradesim_domain::services::engine::{BacktestEngine, BacktestResults, MarketData};
use tradesim_domain::services::ohlcv::DataQualityReport;

#[derive(Debug, Clone, Serialize)]
pub struct BacktestOutcome {
    pub run_id: String,
    pub strategy: String,
    pub data_quality: BTreeMap<String, DataQualityReport>,
    pub results: BacktestResults,
}

/// Loads every configured symbol inside the run window. Series are returned as stored;
/// ordering problems surface when the engine validates them.
pub fn load_market_data(
    config: &Config,
    market_data: &dyn MarketDataRepository,
) -> Result<(MarketData, BTreeMap<String, DataQualityReport>), String> {
    if config.run.symbols.is_empty() {
        return Err("run.symbols cannot be empty".to_string());
    }
    let start = config
        .run
        .start
        .as_deref()
        .map(parse_timestamp_seconds)
        .transpose()?;
    let end = config
        .run
        .end
        .as_deref()
        .map(parse_timestamp_seconds)
        .transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(format!("run.start ({start}) is after run.end ({end})"));
        }
    }

    let mut data = MarketData::new();
    let mut reports = BTreeMap::new();
    for symbol in &config.run.symbols {
        if data.contains_key(symbol) {
            return Err(format!("run.symbols lists {symbol} more than once"));
        }
        let stage_start = Instant::now();
        let (bars, report) = market_data.load_bars(&BarQuery {
            symbol: symbol.clone(),
            start,
            end,
            expected_step_seconds: config.data.expected_step_seconds,
        })?;
        metrics::histogram!("tradesim.backtest.load_bars_ms")
            .record(stage_start.elapsed().as_millis() as f64);
        if bars.is_empty() {
            return Err(format!("no bars loaded for {symbol}"));
        }
        if !report.is_clean() {
            warn!(
                symbol = %symbol,
                duplicates = report.duplicates,
                gaps = report.gaps,
                out_of_order = report.out_of_order,
                invalid_close = report.invalid_close,
                "market data quality issues"
            );
        }
        data.insert(symbol.clone(), bars);
        reports.insert(symbol.clone(), report);
    }
    Ok((data, reports))
}

pub fn run_backtest(
    config: &Config,
    market_data: &dyn MarketDataRepository,
) -> Result<BacktestOutcome, String> {
    let _span = info_span!(
        "run_backtest",
        run_id = %config.run.run_id,
        symbols = config.run.symbols.len()
    )
    .entered();

    let (data, data_quality) = load_market_data(config, market_data)?;
    let (strategy, results) = simulate(config, &data)?;
    Ok(BacktestOutcome {
        run_id: config.run.run_id.clone(),
        strategy,
        data_quality,
        results,
    })
}

/// Runs a config against bars already in memory; sweeps and walk-forward splits use this
/// so the data is loaded once.
pub fn run_backtest_on_data(config: &Config, data: &MarketData) -> Result<BacktestResults, String> {
    let _span = info_span!("run_backtest", run_id = %config.run.run_id).entered();
    simulate(config, data).map(|(_, results)| results)
}

fn simulate(config: &Config, data: &MarketData) -> Result<(String, BacktestResults), String> {
    let policy = build_risk_policy(config)?;
    let engine_config = build_engine_config(config)?;
    let strategy = build_strategy(&config.strategy)?;
    let engine = BacktestEngine::new(engine_config, policy, strategy)?;

    let stage_start = Instant::now();
    let results = engine.run(data)?;
    let engine_ms = stage_start.elapsed().as_millis() as f64;
    metrics::histogram!("tradesim.backtest.engine_ms").record(engine_ms);
    metrics::gauge!("tradesim.backtest.bars_processed").set(results.report.bars_processed as f64);
    metrics::gauge!("tradesim.backtest.trades").set(results.report.total_trades as f64);

    info!(
        strategy = engine.strategy().name(),
        trades = results.report.total_trades,
        net_profit = results.report.net_profit,
        sharpe = results.report.sharpe,
        max_drawdown_pct = results.report.max_drawdown_pct,
        signal_errors = results.signal_errors.len(),
        engine_ms,
        "backtest complete"
    );
    Ok((engine.strategy().name().to_string(), results))
}
