use crate::experiments::sweep::{
    assignment_hash, execute_plans, expand_grid, load_base, materialize_config,
    normalize_parallelism, plan_runs, should_cancelled, validate_metric_name,
    validate_param_paths, CancelHook, MarketDataFactory, RunStatus, SweepBase, SweepParam,
    SweepRunEntry,
};
use crate::shared::resolve_relative_to;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, info_span, warn};
use tradesim_domain::entities::metrics::PerformanceReport;
use tradesim_domain::services::engine::MarketData;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WalkForwardFile {
    pub base: SweepBase,
    pub walk_forward: WalkForwardMeta,
    #[serde(default)]
    pub params: Vec<SweepParam>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WalkForwardMeta {
    pub id: String,
    pub n_splits: usize,
    /// Leading share of each window used for optimization; defaults to 0.6.
    pub in_sample_ratio: Option<f64>,
    pub parallelism: Option<usize>,
    /// Report field maximized in-sample; defaults to `sharpe`.
    pub optimize_metric: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowBounds {
    pub start_ts: i64,
    pub end_ts: i64,
    /// Distinct timestamps on the merged timeline.
    pub bars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardSplit {
    pub split: usize,
    pub in_sample: WindowBounds,
    pub out_of_sample: WindowBounds,
    pub in_sample_ok: usize,
    pub in_sample_errors: usize,
    pub best_run_id: Option<String>,
    pub best_params: Option<BTreeMap<String, toml::Value>>,
    pub in_sample_score: Option<f64>,
    pub in_sample_report: Option<PerformanceReport>,
    pub out_of_sample_run_id: Option<String>,
    pub out_of_sample_score: Option<f64>,
    pub out_of_sample_report: Option<PerformanceReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardSummary {
    pub splits_completed: usize,
    pub mean_in_sample_score: Option<f64>,
    pub mean_out_of_sample_score: Option<f64>,
    pub out_of_sample_net_profit: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardResult {
    pub id: String,
    pub base_config: String,
    pub optimize_metric: String,
    pub in_sample_ratio: f64,
    pub splits: Vec<WalkForwardSplit>,
    pub summary: WalkForwardSummary,
}

/// Index triple `(start, in_sample_end, end)` of one window, half-open on both parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SplitWindow {
    pub start: usize,
    pub in_sample_end: usize,
    pub end: usize,
}

pub fn run_walk_forward(
    path: &Path,
    market_data: &MarketDataFactory<'_>,
) -> Result<WalkForwardResult, String> {
    run_walk_forward_with_hooks(path, market_data, None)
}

pub fn run_walk_forward_with_hooks(
    path: &Path,
    market_data: &MarketDataFactory<'_>,
    should_cancel: CancelHook<'_>,
) -> Result<WalkForwardResult, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read walk-forward config {}: {err}", path.display()))?;
    let file: WalkForwardFile = toml::from_str(&raw).map_err(|err| {
        format!(
            "failed to parse walk-forward TOML {}: {err}",
            path.display()
        )
    })?;
    let meta = &file.walk_forward;
    let _span = info_span!("run_walk_forward", id = %meta.id).entered();

    validate_param_paths(&file.params)?;
    let metric = meta
        .optimize_metric
        .as_deref()
        .unwrap_or("sharpe")
        .trim()
        .to_lowercase();
    validate_metric_name(&metric)?;
    let ratio = meta.in_sample_ratio.unwrap_or(0.6);
    if !ratio.is_finite() || ratio <= 0.0 || ratio >= 1.0 {
        return Err(format!(
            "walk_forward.in_sample_ratio must be in (0, 1) (got {ratio})"
        ));
    }

    let base_config_path = resolve_relative_to(path, &file.base.config);
    let (base_config, base_toml_value) = load_base(&base_config_path)?;
    let repository = market_data(&base_config)?;
    let (source, _reports) =
        crate::backtesting::load_market_data(&base_config, repository.as_ref())?;

    let timeline = merged_timeline(&source);
    let windows = split_windows(timeline.len(), meta.n_splits, ratio)?;
    let grid = expand_grid(&file.params);
    let parallelism = normalize_parallelism(meta.parallelism);
    info!(
        splits = windows.len(),
        timeline = timeline.len(),
        grid = grid.len(),
        "starting walk-forward"
    );

    let mut splits = Vec::with_capacity(windows.len());
    for (idx, window) in windows.iter().enumerate() {
        if should_cancelled(should_cancel) {
            return Err("cancelled".to_string());
        }
        let split_number = idx + 1;
        let in_sample = bounds(&timeline, window.start, window.in_sample_end);
        let out_of_sample = bounds(&timeline, window.in_sample_end, window.end);
        debug!(
            split = split_number,
            in_sample_start = in_sample.start_ts,
            out_of_sample_start = out_of_sample.start_ts,
            "walk-forward window"
        );

        let in_sample_id = format!("wf{split_number}_is");
        let plans = plan_runs(&meta.id, &base_toml_value, &grid, &in_sample_id)?;
        let entries = execute_plans(
            &plans,
            parallelism,
            &slice_data(&source, in_sample),
            should_cancel,
            &mut |_: &SweepRunEntry| {},
        )?;

        let mut split = WalkForwardSplit {
            split: split_number,
            in_sample,
            out_of_sample,
            in_sample_ok: entries
                .iter()
                .filter(|e| e.status == RunStatus::Ok)
                .count(),
            in_sample_errors: entries
                .iter()
                .filter(|e| e.status == RunStatus::Error)
                .count(),
            best_run_id: None,
            best_params: None,
            in_sample_score: None,
            in_sample_report: None,
            out_of_sample_run_id: None,
            out_of_sample_score: None,
            out_of_sample_report: None,
            error: None,
        };

        let Some((best, score)) = select_best(&entries, &metric) else {
            warn!(split = split_number, "no successful in-sample run");
            split.error = Some("no successful in-sample run".to_string());
            splits.push(split);
            continue;
        };
        split.best_run_id = Some(best.run_id.clone());
        split.best_params = Some(best.params.clone());
        split.in_sample_score = Some(score);
        split.in_sample_report = best.report.clone();

        let out_id = format!("wf{split_number}_oos");
        let run_id = format!(
            "{}__{}__{}",
            meta.id,
            assignment_hash(&out_id, &best.params),
            out_id
        );
        let oos = materialize_config(&base_toml_value, &best.params, &run_id).and_then(|cfg| {
            crate::backtesting::run_backtest_on_data(&cfg, &slice_data(&source, out_of_sample))
        });
        split.out_of_sample_run_id = Some(run_id);
        match oos {
            Ok(results) => {
                split.out_of_sample_score = results.report.metric(&metric);
                split.out_of_sample_report = Some(results.report);
            }
            Err(err) => {
                warn!(split = split_number, error = %err, "out-of-sample run failed");
                split.error = Some(err);
            }
        }
        info!(
            split = split_number,
            in_sample_score = score,
            out_of_sample_score = split.out_of_sample_score.unwrap_or(f64::NAN),
            "walk-forward split complete"
        );
        splits.push(split);
    }

    let summary = summarize(&splits);
    Ok(WalkForwardResult {
        id: meta.id.clone(),
        base_config: base_config_path.display().to_string(),
        optimize_metric: metric,
        in_sample_ratio: ratio,
        splits,
        summary,
    })
}

/// `split_size = len / n_splits`; the in-sample part of each window is the first
/// `floor(split_size * ratio)` timestamps. Trailing timestamps that do not fill a whole
/// window are left out.
pub(crate) fn split_windows(
    len: usize,
    n_splits: usize,
    ratio: f64,
) -> Result<Vec<SplitWindow>, String> {
    if n_splits == 0 {
        return Err("walk_forward.n_splits must be >= 1".to_string());
    }
    let split_size = len / n_splits;
    let in_sample_len = (split_size as f64 * ratio).floor() as usize;
    if in_sample_len == 0 || in_sample_len >= split_size {
        return Err(format!(
            "not enough bars for walk-forward: timeline={len} n_splits={n_splits} in_sample_ratio={ratio}"
        ));
    }
    Ok((0..n_splits)
        .map(|i| {
            let start = i * split_size;
            SplitWindow {
                start,
                in_sample_end: start + in_sample_len,
                end: start + split_size,
            }
        })
        .collect())
}

fn merged_timeline(data: &MarketData) -> Vec<i64> {
    data.values()
        .flat_map(|bars| bars.iter().map(|bar| bar.timestamp))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn bounds(timeline: &[i64], from: usize, to: usize) -> WindowBounds {
    WindowBounds {
        start_ts: timeline[from],
        end_ts: timeline[to - 1],
        bars: to - from,
    }
}

/// Symbols with no bars inside the window are left out of it.
fn slice_data(source: &MarketData, window: WindowBounds) -> MarketData {
    source
        .iter()
        .filter_map(|(symbol, bars)| {
            let slice: Vec<_> = bars
                .iter()
                .filter(|b| b.timestamp >= window.start_ts && b.timestamp <= window.end_ts)
                .copied()
                .collect();
            (!slice.is_empty()).then(|| (symbol.clone(), slice))
        })
        .collect()
}

/// Highest finite score wins; the earliest grid point wins ties.
fn select_best<'a>(entries: &'a [SweepRunEntry], metric: &str) -> Option<(&'a SweepRunEntry, f64)> {
    let mut best: Option<(&SweepRunEntry, f64)> = None;
    for entry in entries.iter().filter(|e| e.status == RunStatus::Ok) {
        let Some(score) = entry.metric(metric).filter(|s| !s.is_nan()) else {
            continue;
        };
        if best.map_or(true, |(_, current)| score > current) {
            best = Some((entry, score));
        }
    }
    best
}

fn summarize(splits: &[WalkForwardSplit]) -> WalkForwardSummary {
    let mean = |scores: Vec<f64>| {
        let finite: Vec<f64> = scores.into_iter().filter(|s| s.is_finite()).collect();
        (!finite.is_empty()).then(|| finite.iter().sum::<f64>() / finite.len() as f64)
    };
    let completed: Vec<&WalkForwardSplit> = splits
        .iter()
        .filter(|s| s.out_of_sample_report.is_some())
        .collect();
    WalkForwardSummary {
        splits_completed: completed.len(),
        mean_in_sample_score: mean(completed.iter().filter_map(|s| s.in_sample_score).collect()),
        mean_out_of_sample_score: mean(
            completed
                .iter()
                .filter_map(|s| s.out_of_sample_score)
                .collect(),
        ),
        out_of_sample_net_profit: completed
            .iter()
            .filter_map(|s| s.out_of_sample_report.as_ref())
            .map(|r| r.net_profit)
            .sum(),
    }
}
