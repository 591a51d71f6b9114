use crate::config::Config;
use crate::shared::{parse_timestamp_seconds, resolve_relative_to};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Instant;
use tracing::{info, info_span, warn};
use tradesim_domain::entities::metrics::PerformanceReport;
use tradesim_domain::repositories::market_data::MarketDataRepository;
use tradesim_domain::services::engine::MarketData;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepFile {
    pub base: SweepBase,
    pub sweep: SweepMeta,
    #[serde(default)]
    pub params: Vec<SweepParam>,
    pub leaderboard: Option<LeaderboardConfig>,
    pub splits: Option<Vec<SweepSplit>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepBase {
    /// Base run config, relative to the sweep file unless absolute.
    pub config: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepMeta {
    pub id: String,
    pub parallelism: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepParam {
    /// Dotted path into the base config, e.g. `stop.value`.
    pub path: String,
    pub values: Vec<toml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LeaderboardConfig {
    pub sort_by: Option<String>,
    pub descending: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSplit {
    pub id: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepRunEntry {
    pub run_id: String,
    pub split_id: String,
    pub params: BTreeMap<String, toml::Value>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub report: Option<PerformanceReport>,
}

impl SweepRunEntry {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.report.as_ref().and_then(|report| report.metric(name))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub run_id: String,
    pub split_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub sweep_id: String,
    pub base_config: String,
    pub sort_by: String,
    pub descending: bool,
    pub runs: Vec<SweepRunEntry>,
    pub leaderboard: Vec<LeaderboardRow>,
}

#[derive(Debug, Clone)]
pub struct SweepProgress {
    pub total_runs: usize,
    pub completed_runs: usize,
    pub ok_runs: usize,
    pub error_runs: usize,
    pub last_run_id: Option<String>,
    pub last_error: Option<String>,
}

pub type CancelHook<'a> = Option<&'a (dyn Fn() -> bool + Sync)>;
pub type MarketDataFactoryResult = Result<Box<dyn MarketDataRepository>, String>;
/// Builds the bar source for a base config; called once per sweep.
pub type MarketDataFactory<'a> = dyn Fn(&Config) -> MarketDataFactoryResult + 'a;

pub fn run_sweep(
    sweep_path: &Path,
    market_data: &MarketDataFactory<'_>,
) -> Result<SweepResult, String> {
    run_sweep_with_hooks(sweep_path, market_data, None, None)
}

pub fn run_sweep_with_hooks(
    sweep_path: &Path,
    market_data: &MarketDataFactory<'_>,
    mut on_progress: Option<&mut dyn FnMut(SweepProgress)>,
    should_cancel: CancelHook<'_>,
) -> Result<SweepResult, String> {
    let raw = std::fs::read_to_string(sweep_path).map_err(|err| {
        format!(
            "failed to read sweep config {}: {err}",
            sweep_path.display()
        )
    })?;
    let sweep: SweepFile = toml::from_str(&raw)
        .map_err(|err| format!("failed to parse sweep TOML {}: {err}", sweep_path.display()))?;
    let _span = info_span!("run_sweep", sweep_id = %sweep.sweep.id).entered();

    validate_param_paths(&sweep.params)?;
    let sort_by = sweep
        .leaderboard
        .as_ref()
        .and_then(|c| c.sort_by.as_deref())
        .unwrap_or("sharpe")
        .trim()
        .to_lowercase();
    validate_metric_name(&sort_by)?;
    let descending = sweep
        .leaderboard
        .as_ref()
        .and_then(|c| c.descending)
        .unwrap_or(true);

    let base_config_path = resolve_relative_to(sweep_path, &sweep.base.config);
    let (base_config, base_toml_value) = load_base(&base_config_path)?;
    let repository = market_data(&base_config)?;
    let (source, _reports) =
        crate::backtesting::load_market_data(&base_config, repository.as_ref())?;

    let splits = sweep.splits.clone().unwrap_or_else(|| {
        vec![SweepSplit {
            id: "full".to_string(),
            start: None,
            end: None,
        }]
    });

    let grid = expand_grid(&sweep.params);
    let parallelism = normalize_parallelism(sweep.sweep.parallelism);
    let mut progress = SweepProgress {
        total_runs: grid.len().saturating_mul(splits.len()),
        completed_runs: 0,
        ok_runs: 0,
        error_runs: 0,
        last_run_id: None,
        last_error: None,
    };
    emit_progress(&mut on_progress, &progress);
    info!(
        runs = progress.total_runs,
        splits = splits.len(),
        parallelism,
        "starting sweep"
    );

    let mut runs: Vec<SweepRunEntry> = Vec::with_capacity(progress.total_runs);
    for split in &splits {
        if should_cancelled(should_cancel) {
            return Err("cancelled".to_string());
        }
        let data = filter_data_for_split(&source, split)?;
        let plans = plan_runs(&sweep.sweep.id, &base_toml_value, &grid, &split.id)?;

        let mut on_entry = |entry: &SweepRunEntry| {
            update_progress(&mut progress, entry);
            emit_progress(&mut on_progress, &progress);
        };
        runs.extend(execute_plans(
            &plans,
            parallelism,
            &data,
            should_cancel,
            &mut on_entry,
        )?);
    }

    let leaderboard = build_leaderboard(&runs, &sort_by, descending);
    info!(
        ok = progress.ok_runs,
        errors = progress.error_runs,
        best_run = leaderboard.first().map(|row| row.run_id.as_str()).unwrap_or(""),
        "sweep complete"
    );

    Ok(SweepResult {
        sweep_id: sweep.sweep.id.clone(),
        base_config: base_config_path.display().to_string(),
        sort_by,
        descending,
        runs,
        leaderboard,
    })
}

/// One fully materialized grid point, ready to run.
#[derive(Debug, Clone)]
pub(crate) struct SweepRunPlan {
    pub(crate) order_idx: usize,
    pub(crate) run_id: String,
    pub(crate) split_id: String,
    pub(crate) params: BTreeMap<String, toml::Value>,
    pub(crate) config: Config,
}

enum WorkerMessage {
    Entry {
        order_idx: usize,
        entry: SweepRunEntry,
    },
    Cancelled,
}

pub(crate) fn load_base(path: &Path) -> Result<(Config, toml::Value), String> {
    let (config, source) = crate::config::load_config_with_source(path)?;
    let value: toml::Value = toml::from_str(&source)
        .map_err(|err| format!("failed to parse base config TOML as value: {err}"))?;
    Ok((config, value))
}

pub(crate) fn plan_runs(
    sweep_id: &str,
    base: &toml::Value,
    grid: &[BTreeMap<String, toml::Value>],
    split_id: &str,
) -> Result<Vec<SweepRunPlan>, String> {
    grid.iter()
        .enumerate()
        .map(|(order_idx, assignment)| {
            let run_id = format!(
                "{}__{}__{}",
                sweep_id,
                assignment_hash(split_id, assignment),
                split_id
            );
            let config = materialize_config(base, assignment, &run_id)?;
            Ok(SweepRunPlan {
                order_idx,
                run_id,
                split_id: split_id.to_string(),
                params: assignment.clone(),
                config,
            })
        })
        .collect()
}

pub(crate) fn materialize_config(
    base: &toml::Value,
    assignment: &BTreeMap<String, toml::Value>,
    run_id: &str,
) -> Result<Config, String> {
    let mut toml_value = base.clone();
    apply_assignment(&mut toml_value, assignment)?;
    set_run_id(&mut toml_value, run_id)?;
    let config_toml = toml::to_string_pretty(&toml_value)
        .map_err(|err| format!("failed to serialize sweep config TOML: {err}"))?;
    toml::from_str(&config_toml)
        .map_err(|err| format!("failed to parse generated config TOML for {run_id}: {err}"))
}

pub(crate) fn normalize_parallelism(value: Option<usize>) -> usize {
    value.unwrap_or(1).max(1)
}

/// Runs every plan and returns the entries in plan order. A failing backtest becomes an
/// error entry; only cancellation aborts.
pub(crate) fn execute_plans(
    plans: &[SweepRunPlan],
    parallelism: usize,
    data: &MarketData,
    should_cancel: CancelHook<'_>,
    on_entry: &mut dyn FnMut(&SweepRunEntry),
) -> Result<Vec<SweepRunEntry>, String> {
    let mut executed = if parallelism <= 1 || plans.len() <= 1 {
        execute_plans_serial(plans, data, should_cancel, on_entry)?
    } else {
        execute_plans_parallel(plans, parallelism, data, should_cancel, on_entry)?
    };
    executed.sort_by_key(|(order_idx, _)| *order_idx);
    Ok(executed.into_iter().map(|(_, entry)| entry).collect())
}

fn execute_plans_serial(
    plans: &[SweepRunPlan],
    data: &MarketData,
    should_cancel: CancelHook<'_>,
    on_entry: &mut dyn FnMut(&SweepRunEntry),
) -> Result<Vec<(usize, SweepRunEntry)>, String> {
    let mut out = Vec::with_capacity(plans.len());
    for plan in plans {
        if should_cancelled(should_cancel) {
            return Err("cancelled".to_string());
        }
        let entry = execute_run_plan(plan, data);
        on_entry(&entry);
        out.push((plan.order_idx, entry));
    }
    Ok(out)
}

fn execute_plans_parallel(
    plans: &[SweepRunPlan],
    parallelism: usize,
    data: &MarketData,
    should_cancel: CancelHook<'_>,
    on_entry: &mut dyn FnMut(&SweepRunEntry),
) -> Result<Vec<(usize, SweepRunEntry)>, String> {
    let worker_count = parallelism.max(1).min(plans.len());
    let next_index = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<WorkerMessage>();

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let next_index_ref = &next_index;
            let cancelled_ref = &cancelled;
            scope.spawn(move || loop {
                if cancelled_ref.load(Ordering::Relaxed) || should_cancelled(should_cancel) {
                    cancelled_ref.store(true, Ordering::Relaxed);
                    let _ = tx.send(WorkerMessage::Cancelled);
                    break;
                }

                let plan_idx = next_index_ref.fetch_add(1, Ordering::Relaxed);
                if plan_idx >= plans.len() {
                    break;
                }

                let plan = &plans[plan_idx];
                let entry = execute_run_plan(plan, data);
                if tx
                    .send(WorkerMessage::Entry {
                        order_idx: plan.order_idx,
                        entry,
                    })
                    .is_err()
                {
                    break;
                }
            });
        }

        drop(tx);

        let mut entries: Vec<(usize, SweepRunEntry)> = Vec::with_capacity(plans.len());
        let mut was_cancelled = false;
        while let Ok(message) = rx.recv() {
            match message {
                WorkerMessage::Entry { order_idx, entry } => {
                    if !was_cancelled {
                        on_entry(&entry);
                        entries.push((order_idx, entry));
                    }
                }
                WorkerMessage::Cancelled => was_cancelled = true,
            }
        }

        if was_cancelled {
            return Err("cancelled".to_string());
        }
        if entries.len() != plans.len() {
            return Err(format!(
                "internal sweep error: expected {} results, got {}",
                plans.len(),
                entries.len()
            ));
        }
        Ok(entries)
    })
}

fn execute_run_plan(plan: &SweepRunPlan, data: &MarketData) -> SweepRunEntry {
    let started = Instant::now();
    let result = crate::backtesting::run_backtest_on_data(&plan.config, data);
    metrics::histogram!("tradesim.sweep.run_ms").record(started.elapsed().as_millis() as f64);

    match result {
        Ok(results) => {
            metrics::counter!("tradesim.sweep.runs_total", "status" => "ok").increment(1);
            SweepRunEntry {
                run_id: plan.run_id.clone(),
                split_id: plan.split_id.clone(),
                params: plan.params.clone(),
                status: RunStatus::Ok,
                error: None,
                report: Some(results.report),
            }
        }
        Err(err) => {
            metrics::counter!("tradesim.sweep.runs_total", "status" => "error").increment(1);
            warn!(run_id = %plan.run_id, error = %err, "sweep run failed");
            SweepRunEntry {
                run_id: plan.run_id.clone(),
                split_id: plan.split_id.clone(),
                params: plan.params.clone(),
                status: RunStatus::Error,
                error: Some(err),
                report: None,
            }
        }
    }
}

pub(crate) fn should_cancelled(should_cancel: CancelHook<'_>) -> bool {
    should_cancel.map(|f| f()).unwrap_or(false)
}

fn update_progress(progress: &mut SweepProgress, entry: &SweepRunEntry) {
    progress.completed_runs = progress.completed_runs.saturating_add(1);
    progress.last_run_id = Some(entry.run_id.clone());
    progress.last_error = entry.error.clone();
    match entry.status {
        RunStatus::Ok => progress.ok_runs = progress.ok_runs.saturating_add(1),
        RunStatus::Error => progress.error_runs = progress.error_runs.saturating_add(1),
    }
}

fn emit_progress(
    on_progress: &mut Option<&mut dyn FnMut(SweepProgress)>,
    progress: &SweepProgress,
) {
    if let Some(callback) = on_progress.as_mut() {
        (callback)(progress.clone());
    }
}

pub(crate) fn validate_param_paths(params: &[SweepParam]) -> Result<(), String> {
    for p in params {
        let path = p.path.trim();
        if path.is_empty() {
            return Err("sweep param path cannot be empty".to_string());
        }
        let forbidden_prefixes = ["run.run_id", "run.symbols", "run.start", "run.end", "data."];
        if forbidden_prefixes.iter().any(|pre| path.starts_with(pre)) {
            return Err(format!("sweep param path not allowed: {}", p.path));
        }
        if p.values.is_empty() {
            return Err(format!("sweep param has no values: {}", p.path));
        }
    }
    Ok(())
}

pub(crate) fn validate_metric_name(name: &str) -> Result<(), String> {
    if PerformanceReport::default().metric(name).is_none() {
        return Err(format!("unknown metric for ranking: {name}"));
    }
    Ok(())
}

pub(crate) fn expand_grid(params: &[SweepParam]) -> Vec<BTreeMap<String, toml::Value>> {
    let mut out: Vec<BTreeMap<String, toml::Value>> = vec![BTreeMap::new()];
    for p in params {
        let mut next: Vec<BTreeMap<String, toml::Value>> = Vec::new();
        for base in &out {
            for v in &p.values {
                let mut m = base.clone();
                m.insert(p.path.trim().to_string(), v.clone());
                next.push(m);
            }
        }
        out = next;
    }
    out
}

pub(crate) fn assignment_hash(split_id: &str, assignment: &BTreeMap<String, toml::Value>) -> String {
    let canonical = serde_json::to_string(assignment)
        .unwrap_or_else(|_| "{\"error\":\"assignment\"}".to_string());
    let mut hasher = Sha256::new();
    hasher.update(split_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    let bytes = hasher.finalize();
    to_hex_short(&bytes[..], 12)
}

fn to_hex_short(bytes: &[u8], chars: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(chars);
    for b in bytes {
        for nibble in [b >> 4, b & 0x0f] {
            if out.len() >= chars {
                return out;
            }
            out.push(HEX[nibble as usize] as char);
        }
    }
    out
}

fn set_run_id(root: &mut toml::Value, run_id: &str) -> Result<(), String> {
    set_path_value(root, "run.run_id", toml::Value::String(run_id.to_string()))
}

fn apply_assignment(
    root: &mut toml::Value,
    assignment: &BTreeMap<String, toml::Value>,
) -> Result<(), String> {
    for (path, value) in assignment {
        set_path_value(root, path, value.clone())?;
    }
    Ok(())
}

/// Replaces an existing key; unknown paths are rejected so a typo cannot silently run the
/// base config.
fn set_path_value(root: &mut toml::Value, path: &str, value: toml::Value) -> Result<(), String> {
    let parts: Vec<&str> = path
        .split('.')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    let Some((last, parents)) = parts.split_last() else {
        return Err("empty path".to_string());
    };
    let mut cur = root;
    for key in parents {
        cur = cur
            .get_mut(*key)
            .ok_or_else(|| format!("path not found: {}", path))?;
        if !cur.is_table() {
            return Err(format!("path is not a table: {}", path));
        }
    }
    let table = cur
        .as_table_mut()
        .ok_or_else(|| format!("path is not a table: {}", path))?;
    if !table.contains_key(*last) {
        return Err(format!("path not found: {}", path));
    }
    table.insert(last.to_string(), value);
    Ok(())
}

fn filter_data_for_split(source: &MarketData, split: &SweepSplit) -> Result<MarketData, String> {
    let start = split
        .start
        .as_deref()
        .map(parse_timestamp_seconds)
        .transpose()?;
    let end = split
        .end
        .as_deref()
        .map(parse_timestamp_seconds)
        .transpose()?;

    let mut out = MarketData::new();
    for (symbol, bars) in source {
        let window: Vec<_> = bars
            .iter()
            .filter(|b| start.map(|s| b.timestamp >= s).unwrap_or(true))
            .filter(|b| end.map(|e| b.timestamp <= e).unwrap_or(true))
            .copied()
            .collect();
        if window.is_empty() {
            return Err(format!("split '{}' has no bars for {symbol}", split.id));
        }
        out.insert(symbol.clone(), window);
    }
    Ok(out)
}

/// Ranks successful runs by `sort_by`; ties keep grid order.
pub(crate) fn build_leaderboard(
    runs: &[SweepRunEntry],
    sort_by: &str,
    descending: bool,
) -> Vec<LeaderboardRow> {
    let mut rows: Vec<(&SweepRunEntry, f64)> = runs
        .iter()
        .filter(|r| r.status == RunStatus::Ok)
        .filter_map(|r| r.metric(sort_by).map(|value| (r, value)))
        .filter(|(_, value)| !value.is_nan())
        .collect();
    rows.sort_by(|(_, a), (_, b)| {
        let ord = a.total_cmp(b);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    rows.into_iter()
        .enumerate()
        .map(|(idx, (r, value))| LeaderboardRow {
            rank: idx + 1,
            run_id: r.run_id.clone(),
            split_id: r.split_id.clone(),
            value,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use tradesim_infrastructure::market_data::csv::CsvMarketDataRepository;

    pub(crate) fn csv_market_data(config: &Config) -> MarketDataFactoryResult {
        Ok(Box::new(CsvMarketDataRepository::new(
            &config.data.csv_dir,
            config.data.file_pattern.as_deref(),
        )))
    }

    pub(crate) fn test_temp_dir(prefix: &str) -> PathBuf {
        let unique = format!(
            "{}_{}_{}",
            prefix,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock before UNIX_EPOCH")
                .as_nanos()
        );
        let dir = std::env::temp_dir().join(unique);
        std::fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    /// Writes a hourly CSV with a repeating ramp so crossovers and stops both occur.
    pub(crate) fn write_ramp_csv(dir: &Path, symbol: &str, count: usize) {
        let mut body = String::from("timestamp,open,high,low,close,volume\n");
        for i in 0..count {
            let phase = (i % 24) as f64;
            let close = if phase < 12.0 {
                100.0 + phase * 1.5
            } else {
                118.0 - (phase - 12.0) * 1.5
            };
            let ts = 1_700_000_000 + 3600 * i as i64;
            body.push_str(&format!(
                "{ts},{close},{},{},{close},10\n",
                close + 0.8,
                close - 0.8
            ));
        }
        std::fs::write(dir.join(format!("{symbol}.csv")), body).expect("write csv");
    }

    pub(crate) fn write_base_config(dir: &Path) -> PathBuf {
        let data_dir = dir.join("data");
        std::fs::create_dir_all(&data_dir).expect("data dir");
        write_ramp_csv(&data_dir, "AAA", 240);
        let base = format!(
            r#"
[run]
run_id = "base_run"
symbols = ["AAA"]
initial_capital = 10000.0
warmup_bars = 5

[data]
csv_dir = "{}"

[costs]
commission_rate = 0.001
slippage = 0.0

[stop]
type = "percentage"
value = 0.02

[strategy]
name = "sma_cross"
short_window = 3
long_window = 8
"#,
            data_dir.display()
        );
        let path = dir.join("base.toml");
        std::fs::write(&path, base).expect("write base config");
        path
    }

    #[test]
    fn expand_grid_is_deterministic() {
        let params = vec![
            SweepParam {
                path: "strategy.short_window".to_string(),
                values: vec![toml::Value::Integer(1), toml::Value::Integer(2)],
            },
            SweepParam {
                path: "strategy.long_window".to_string(),
                values: vec![toml::Value::Integer(10), toml::Value::Integer(20)],
            },
        ];
        let grid = expand_grid(&params);
        assert_eq!(grid.len(), 4);
        assert_eq!(
            grid[0].get("strategy.short_window").unwrap().as_integer(),
            Some(1)
        );
        assert_eq!(
            grid[0].get("strategy.long_window").unwrap().as_integer(),
            Some(10)
        );
        assert_eq!(
            grid[3].get("strategy.short_window").unwrap().as_integer(),
            Some(2)
        );
        assert_eq!(
            grid[3].get("strategy.long_window").unwrap().as_integer(),
            Some(20)
        );
    }

    #[test]
    fn empty_grid_is_a_single_base_run() {
        let grid = expand_grid(&[]);
        assert_eq!(grid.len(), 1);
        assert!(grid[0].is_empty());
    }

    #[test]
    fn set_path_value_rejects_unknown_path() {
        let mut v: toml::Value = toml::from_str("[a]\nb=1\n").unwrap();
        let err = set_path_value(&mut v, "a.c", toml::Value::Integer(2)).unwrap_err();
        assert!(err.contains("path not found"));
        let err = set_path_value(&mut v, "a.b.c", toml::Value::Integer(2)).unwrap_err();
        assert!(err.contains("not a table"));
        set_path_value(&mut v, "a.b", toml::Value::Integer(5)).unwrap();
        assert_eq!(v["a"]["b"].as_integer(), Some(5));
    }

    #[test]
    fn data_paths_cannot_be_swept() {
        for path in ["run.symbols", "data.csv_dir", "run.start"] {
            let err = validate_param_paths(&[SweepParam {
                path: path.to_string(),
                values: vec![toml::Value::Integer(1)],
            }])
            .unwrap_err();
            assert!(err.contains("not allowed"), "{path}: {err}");
        }
        let err = validate_param_paths(&[SweepParam {
            path: "stop.value".to_string(),
            values: vec![],
        }])
        .unwrap_err();
        assert!(err.contains("no values"));
    }

    #[test]
    fn assignment_hash_is_stable_and_split_scoped() {
        let grid = expand_grid(&[SweepParam {
            path: "stop.value".to_string(),
            values: vec![toml::Value::Float(0.01)],
        }]);
        let a = assignment_hash("full", &grid[0]);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, assignment_hash("full", &grid[0]));
        assert_ne!(a, assignment_hash("h2", &grid[0]));
        assert_eq!(to_hex_short(&[0xab, 0xcd], 3), "abc");
    }

    #[test]
    fn normalize_parallelism_guards_invalid_values() {
        assert_eq!(normalize_parallelism(None), 1);
        assert_eq!(normalize_parallelism(Some(0)), 1);
        assert_eq!(normalize_parallelism(Some(4)), 4);
    }

    #[test]
    fn leaderboard_sorts_by_metric_and_skips_errors() {
        let entry = |run_id: &str, sharpe: Option<f64>| SweepRunEntry {
            run_id: run_id.to_string(),
            split_id: "full".to_string(),
            params: BTreeMap::new(),
            status: if sharpe.is_some() {
                RunStatus::Ok
            } else {
                RunStatus::Error
            },
            error: sharpe.is_none().then(|| "boom".to_string()),
            report: sharpe.map(|sharpe| PerformanceReport {
                sharpe,
                ..PerformanceReport::default()
            }),
        };
        let runs = vec![
            entry("a", Some(0.5)),
            entry("b", None),
            entry("c", Some(1.5)),
            entry("d", Some(0.5)),
        ];
        let rows = build_leaderboard(&runs, "sharpe", true);
        let ids: Vec<&str> = rows.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "d"]);
        assert_eq!(rows[0].rank, 1);

        let rows = build_leaderboard(&runs, "sharpe", false);
        assert_eq!(rows[0].run_id, "a");
        assert_eq!(rows[2].run_id, "c");
    }

    #[test]
    fn unknown_ranking_metric_is_rejected() {
        assert!(validate_metric_name("sharpe").is_ok());
        assert!(validate_metric_name("vibes").unwrap_err().contains("vibes"));
    }

    #[test]
    fn run_sweep_parallel_matches_serial_and_keeps_order() {
        let temp_dir = test_temp_dir("tradesim_sweep_parallel");
        write_base_config(&temp_dir);

        let write_sweep = |name: &str, parallelism: usize| {
            let path = temp_dir.join(name);
            std::fs::write(
                &path,
                format!(
                    r#"
[base]
config = "base.toml"

[sweep]
id = "grid_demo"
parallelism = {parallelism}

[[params]]
path = "stop.value"
values = [0.01, 0.02, 0.03]

[[params]]
path = "strategy.short_window"
values = [2, 3]

[leaderboard]
sort_by = "net_profit"
"#
                ),
            )
            .expect("write sweep config");
            path
        };

        let serial =
            run_sweep(&write_sweep("serial.toml", 1), &csv_market_data).expect("serial sweep");
        let parallel =
            run_sweep(&write_sweep("parallel.toml", 4), &csv_market_data).expect("parallel sweep");

        assert_eq!(serial.runs.len(), 6);
        assert!(serial.runs.iter().all(|run| run.status == RunStatus::Ok));

        let expected_run_ids: Vec<String> = expand_grid(&[
            SweepParam {
                path: "stop.value".to_string(),
                values: vec![
                    toml::Value::Float(0.01),
                    toml::Value::Float(0.02),
                    toml::Value::Float(0.03),
                ],
            },
            SweepParam {
                path: "strategy.short_window".to_string(),
                values: vec![toml::Value::Integer(2), toml::Value::Integer(3)],
            },
        ])
        .iter()
        .map(|assignment| format!("grid_demo__{}__full", assignment_hash("full", assignment)))
        .collect();
        let serial_ids: Vec<String> = serial.runs.iter().map(|r| r.run_id.clone()).collect();
        let parallel_ids: Vec<String> = parallel.runs.iter().map(|r| r.run_id.clone()).collect();
        assert_eq!(serial_ids, expected_run_ids);
        assert_eq!(parallel_ids, expected_run_ids);

        for (a, b) in serial.runs.iter().zip(&parallel.runs) {
            assert_eq!(a.report, b.report);
        }
        assert_eq!(serial.sort_by, "net_profit");
        assert_eq!(serial.leaderboard.len(), 6);
        let values: Vec<f64> = serial.leaderboard.iter().map(|r| r.value).collect();
        assert!(values.windows(2).all(|w| w[0] >= w[1]));

        let _ = std::fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn failing_run_is_reported_without_aborting() {
        let temp_dir = test_temp_dir("tradesim_sweep_errors");
        write_base_config(&temp_dir);
        let sweep_path = temp_dir.join("sweep.toml");
        std::fs::write(
            &sweep_path,
            r#"
[base]
config = "base.toml"

[sweep]
id = "bad_values"
parallelism = 2

[[params]]
path = "stop.value"
values = [-0.5, 0.02]
"#,
        )
        .expect("write sweep config");

        let mut seen = Vec::new();
        let mut record = |p: SweepProgress| seen.push(p);
        let on_progress: &mut dyn FnMut(SweepProgress) = &mut record;
        let result = run_sweep_with_hooks(&sweep_path, &csv_market_data, Some(on_progress), None)
            .expect("sweep completes");

        assert_eq!(result.runs[0].status, RunStatus::Error);
        assert!(result.runs[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("stop.value"));
        assert_eq!(result.runs[1].status, RunStatus::Ok);
        assert_eq!(result.leaderboard.len(), 1);

        let last = seen.last().expect("progress emitted");
        assert_eq!(last.total_runs, 2);
        assert_eq!(last.completed_runs, 2);
        assert_eq!(last.error_runs, 1);
        assert_eq!(last.ok_runs, 1);

        let _ = std::fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn splits_filter_the_loaded_series() {
        let temp_dir = test_temp_dir("tradesim_sweep_splits");
        write_base_config(&temp_dir);
        let sweep_path = temp_dir.join("sweep.toml");
        std::fs::write(
            &sweep_path,
            r#"
[base]
config = "base.toml"

[sweep]
id = "halves"

[[splits]]
id = "h1"
end = "1700428400"

[[splits]]
id = "h2"
start = "1700432000"
"#,
        )
        .expect("write sweep config");

        let result = run_sweep(&sweep_path, &csv_market_data).expect("split sweep");
        assert_eq!(result.runs.len(), 2);
        assert_eq!(result.runs[0].split_id, "h1");
        assert_eq!(result.runs[1].split_id, "h2");
        let bars: Vec<usize> = result
            .runs
            .iter()
            .map(|r| r.report.as_ref().expect("report").bars_processed)
            .collect();
        assert_eq!(bars, vec![120, 120]);

        let _ = std::fs::remove_dir_all(&temp_dir);
    }

    #[test]
    fn cancellation_stops_before_the_next_run() {
        let temp_dir = test_temp_dir("tradesim_sweep_cancel");
        write_base_config(&temp_dir);
        let sweep_path = temp_dir.join("sweep.toml");
        std::fs::write(
            &sweep_path,
            r#"
[base]
config = "base.toml"

[sweep]
id = "cancel_me"
parallelism = 3

[[params]]
path = "stop.value"
values = [0.01, 0.02, 0.03, 0.04]
"#,
        )
        .expect("write sweep config");

        let checks = AtomicUsize::new(0);
        let cancel = || checks.fetch_add(1, Ordering::Relaxed) >= 1;
        let cancel: &(dyn Fn() -> bool + Sync) = &cancel;
        let err =
            run_sweep_with_hooks(&sweep_path, &csv_market_data, None, Some(cancel)).unwrap_err();
        assert_eq!(err, "cancelled");

        let _ = std::fs::remove_dir_all(&temp_dir);
    }
}
