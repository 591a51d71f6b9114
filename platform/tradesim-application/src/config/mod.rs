use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tradesim_domain::entities::metrics::MetricsConfig as ReportMetricsConfig;
use tradesim_domain::entities::risk::{
    KellyParams, PercentTarget, RewardTarget, RiskPolicy, SizingLimits, SizingMethod,
    SizingPolicy, StopPolicy, TakeProfitKind, TakeProfitPolicy,
};
use tradesim_domain::services::engine::{EngineConfig, ExecutionCosts};
use tradesim_domain::services::strategy::{
    BollingerBands, EmaCross, HoldStrategy, Macd, RsiReversal, SmaCross, StrategyAdapter,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub run: RunConfig,
    pub data: DataConfig,
    pub costs: CostsConfig,
    pub sizing: Option<SizingConfig>,
    pub stop: Option<StopConfig>,
    pub take_profit: Option<TakeProfitConfig>,
    pub strategy: StrategyConfig,
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub run_id: String,
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    pub leverage: Option<f64>,
    pub warmup_bars: Option<usize>,
    /// Inclusive window bounds, epoch seconds or RFC 3339.
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub csv_dir: String,
    /// `{symbol}` is replaced by each symbol; defaults to `{symbol}.csv`.
    pub file_pattern: Option<String>,
    pub expected_step_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CostsConfig {
    pub commission_rate: f64,
    pub slippage: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethodKind {
    FixedRisk,
    Kelly,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SizingConfig {
    pub method: SizingMethodKind,
    pub risk_per_trade: Option<f64>,
    pub kelly_fraction: Option<f64>,
    pub kelly_min_fraction: Option<f64>,
    pub kelly_max_fraction: Option<f64>,
    pub kelly_min_trades: Option<usize>,
    pub min_order_size: Option<f64>,
    pub max_order_size: Option<f64>,
    pub max_open_trades: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Percentage,
    Atr,
    Trailing,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StopConfig {
    #[serde(rename = "type")]
    pub kind: StopKind,
    /// Percentage distance; also the ATR fallback distance.
    pub value: Option<f64>,
    pub atr_period: Option<usize>,
    pub multiplier: Option<f64>,
    pub initial_stop: Option<f64>,
    pub trailing_pct: Option<f64>,
    pub activation_pct: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TakeProfitType {
    RiskReward,
    MultiLevel,
    Dynamic,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PartialExitConfig {
    pub ratio: f64,
    pub exit_fraction: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LevelConfig {
    pub percentage: f64,
    pub exit_fraction: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TakeProfitConfig {
    #[serde(rename = "type")]
    pub kind: TakeProfitType,
    pub ratio: Option<f64>,
    pub partial_exits: Option<Vec<PartialExitConfig>>,
    pub levels: Option<Vec<LevelConfig>>,
    pub base_target: Option<f64>,
    pub max_target: Option<f64>,
    pub volatility_multiplier: Option<f64>,
    pub volatility_period: Option<usize>,
    pub close_remaining_on_last_level: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    EmaCross,
    SmaCross,
    Rsi,
    Macd,
    Bollinger,
    Hold,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    pub name: StrategyName,
    pub fast_ema: Option<usize>,
    pub slow_ema: Option<usize>,
    pub trend_ema: Option<usize>,
    pub use_trend_filter: Option<bool>,
    pub short_window: Option<usize>,
    pub long_window: Option<usize>,
    pub rsi_period: Option<usize>,
    pub oversold: Option<f64>,
    pub overbought: Option<f64>,
    pub fast_period: Option<usize>,
    pub slow_period: Option<usize>,
    pub signal_period: Option<usize>,
    pub bb_period: Option<usize>,
    pub std_dev: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    pub risk_free_rate: Option<f64>,
    pub periods_per_year: Option<f64>,
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let (config, _source) = load_config_with_source(path)?;
    Ok(config)
}

pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    Ok((config, contents))
}

pub fn to_toml_pretty(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}

pub fn build_risk_policy(config: &Config) -> Result<RiskPolicy, String> {
    let sizing = config
        .sizing
        .as_ref()
        .map(build_sizing_policy)
        .unwrap_or_default();
    let stop = config
        .stop
        .as_ref()
        .map(build_stop_policy)
        .unwrap_or_default();
    let take_profit = config
        .take_profit
        .as_ref()
        .map(build_take_profit_policy)
        .transpose()?
        .unwrap_or_default();

    let policy = RiskPolicy {
        sizing,
        stop,
        take_profit,
    };
    policy.validate()?;
    Ok(policy)
}

fn build_sizing_policy(sizing: &SizingConfig) -> SizingPolicy {
    let defaults = KellyParams::default();
    let risk_per_trade = sizing.risk_per_trade.unwrap_or(defaults.risk_per_trade);
    let method = match sizing.method {
        SizingMethodKind::FixedRisk => SizingMethod::FixedRisk { risk_per_trade },
        SizingMethodKind::Kelly => SizingMethod::Kelly(KellyParams {
            risk_per_trade,
            kelly_fraction: sizing.kelly_fraction.unwrap_or(defaults.kelly_fraction),
            min_fraction: sizing.kelly_min_fraction.unwrap_or(defaults.min_fraction),
            max_fraction: sizing.kelly_max_fraction.unwrap_or(defaults.max_fraction),
            min_trades: sizing.kelly_min_trades.unwrap_or(defaults.min_trades),
        }),
    };
    let limit_defaults = SizingLimits::default();
    SizingPolicy {
        method,
        limits: SizingLimits {
            min_order_size: sizing
                .min_order_size
                .unwrap_or(limit_defaults.min_order_size),
            max_order_size: sizing.max_order_size,
            max_open_trades: sizing.max_open_trades,
        },
    }
}

fn build_stop_policy(stop: &StopConfig) -> StopPolicy {
    let pct = stop.value.unwrap_or(0.02);
    match stop.kind {
        StopKind::Percentage => StopPolicy::Percentage { pct },
        StopKind::Atr => StopPolicy::Atr {
            period: stop.atr_period.unwrap_or(14),
            multiplier: stop.multiplier.unwrap_or(2.0),
            fallback_pct: pct,
        },
        StopKind::Trailing => StopPolicy::Trailing {
            initial_pct: stop.initial_stop.unwrap_or(0.015),
            trailing_pct: stop.trailing_pct.unwrap_or(0.01),
            activation_pct: stop.activation_pct.unwrap_or(0.01),
        },
    }
}

fn build_take_profit_policy(tp: &TakeProfitConfig) -> Result<TakeProfitPolicy, String> {
    let kind = match tp.kind {
        TakeProfitType::RiskReward => {
            match tp.partial_exits.as_deref() {
                None => TakeProfitKind::single_risk_reward(tp.ratio.unwrap_or(2.0)),
                Some(_) if tp.ratio.is_some() => {
                    return Err(
                        "take_profit.ratio and take_profit.partial_exits are mutually exclusive"
                            .to_string(),
                    );
                }
                Some([]) => {
                    return Err("take_profit.partial_exits cannot be empty".to_string());
                }
                Some(exits) => TakeProfitKind::RiskReward {
                    targets: exits
                        .iter()
                        .map(|exit| RewardTarget {
                            ratio: exit.ratio,
                            exit_fraction: exit.exit_fraction,
                        })
                        .collect(),
                },
            }
        }
        TakeProfitType::MultiLevel => TakeProfitKind::MultiLevel {
            levels: match tp.levels.as_deref() {
                None => TakeProfitKind::default_levels(),
                Some(levels) => levels
                    .iter()
                    .map(|level| PercentTarget {
                        pct: level.percentage,
                        exit_fraction: level.exit_fraction,
                    })
                    .collect(),
            },
        },
        TakeProfitType::Dynamic => TakeProfitKind::Dynamic {
            base_target: tp.base_target.unwrap_or(0.025),
            max_target: tp.max_target.unwrap_or(0.05),
            volatility_multiplier: tp.volatility_multiplier.unwrap_or(1.5),
            period: tp.volatility_period.unwrap_or(20),
        },
    };
    Ok(TakeProfitPolicy {
        kind,
        close_remaining_on_last_level: tp.close_remaining_on_last_level.unwrap_or(true),
    })
}

pub fn build_engine_config(config: &Config) -> Result<EngineConfig, String> {
    let defaults = EngineConfig::default();
    let metric_defaults = ReportMetricsConfig::default();
    let metrics = config.metrics.as_ref();
    let engine = EngineConfig {
        run_id: config.run.run_id.clone(),
        initial_capital: config.run.initial_capital,
        leverage: config.run.leverage.unwrap_or(defaults.leverage),
        warmup_bars: config.run.warmup_bars.unwrap_or(defaults.warmup_bars),
        costs: ExecutionCosts {
            commission_rate: config.costs.commission_rate,
            slippage: config.costs.slippage,
        },
        metrics: ReportMetricsConfig {
            risk_free_rate: metrics
                .and_then(|m| m.risk_free_rate)
                .unwrap_or(metric_defaults.risk_free_rate),
            periods_per_year: metrics
                .and_then(|m| m.periods_per_year)
                .unwrap_or(metric_defaults.periods_per_year),
        },
    };
    engine.validate()?;
    Ok(engine)
}

pub fn build_strategy(config: &StrategyConfig) -> Result<Box<dyn StrategyAdapter>, String> {
    let strategy: Box<dyn StrategyAdapter> = match config.name {
        StrategyName::Hold => Box::new(HoldStrategy),
        StrategyName::EmaCross => {
            let trend = if config.use_trend_filter.unwrap_or(true) {
                Some(config.trend_ema.unwrap_or(50))
            } else {
                None
            };
            Box::new(EmaCross::new(
                config.fast_ema.unwrap_or(9),
                config.slow_ema.unwrap_or(21),
                trend,
            )?)
        }
        StrategyName::SmaCross => Box::new(SmaCross::new(
            config.short_window.unwrap_or(20),
            config.long_window.unwrap_or(50),
        )?),
        StrategyName::Rsi => Box::new(RsiReversal::new(
            config.rsi_period.unwrap_or(14),
            config.oversold.unwrap_or(30.0),
            config.overbought.unwrap_or(70.0),
        )?),
        StrategyName::Macd => Box::new(Macd::new(
            config.fast_period.unwrap_or(12),
            config.slow_period.unwrap_or(26),
            config.signal_period.unwrap_or(9),
        )?),
        StrategyName::Bollinger => Box::new(BollingerBands::new(
            config.bb_period.unwrap_or(20),
            config.std_dev.unwrap_or(2.0),
        )?),
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[run]
run_id = "btc_ema"
symbols = ["BTCUSDT"]
initial_capital = 10000.0

[data]
csv_dir = "data/"

[costs]
commission_rate = 0.001
slippage = 0.0005

[strategy]
name = "hold"
"#;

    fn parse_config(toml_str: &str) -> Config {
        toml::from_str(toml_str).expect("config should parse")
    }

    #[test]
    fn parse_config_rejects_malformed_toml() {
        let err = toml::from_str::<Config>("[run\nrun_id = 1").expect_err("malformed");
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn parse_config_rejects_unknown_fields() {
        let toml_str = format!("{MINIMAL}\nunknown_field = 123\n");
        let err = toml::from_str::<Config>(&toml_str).expect_err("unknown field should fail");
        assert!(err.to_string().to_lowercase().contains("unknown field"));
    }

    #[test]
    fn unknown_stop_type_is_a_parse_error() {
        let toml_str = format!("{MINIMAL}\n[stop]\ntype = \"chandelier\"\nvalue = 0.02\n");
        let err = toml::from_str::<Config>(&toml_str).expect_err("unknown stop type");
        assert!(err.to_string().contains("chandelier"));
    }

    #[test]
    fn minimal_config_builds_default_policy_and_engine() {
        let config = parse_config(MINIMAL);
        let policy = build_risk_policy(&config).expect("policy");
        assert_eq!(policy, RiskPolicy::default());

        let engine = build_engine_config(&config).expect("engine config");
        assert_eq!(engine.run_id, "btc_ema");
        assert_eq!(engine.leverage, 1.0);
        assert_eq!(engine.warmup_bars, 100);
        assert_eq!(engine.costs.commission_rate, 0.001);
        assert_eq!(engine.metrics.periods_per_year, 365.0);
    }

    #[test]
    fn full_config_maps_every_section() {
        let toml_str = r#"
[run]
run_id = "multi"
symbols = ["BTCUSDT", "ETHUSDT"]
initial_capital = 5000.0
leverage = 3.0
warmup_bars = 50
start = "2024-01-01T00:00:00Z"

[data]
csv_dir = "data/"
file_pattern = "{symbol}_1h.csv"
expected_step_seconds = 3600

[costs]
commission_rate = 0.0
slippage = 0.0

[sizing]
method = "kelly"
risk_per_trade = 0.01
kelly_fraction = 0.5
kelly_min_trades = 20
max_open_trades = 4

[stop]
type = "atr"
value = 0.03
atr_period = 10
multiplier = 1.5

[take_profit]
type = "risk_reward"
close_remaining_on_last_level = false
partial_exits = [
  { ratio = 1.0, exit_fraction = 0.5 },
  { ratio = 3.0, exit_fraction = 0.5 },
]

[strategy]
name = "ema_cross"
fast_ema = 5
slow_ema = 13
use_trend_filter = false

[metrics]
risk_free_rate = 0.02
periods_per_year = 8760.0
"#;
        let config = parse_config(toml_str);
        let policy = build_risk_policy(&config).expect("policy");
        assert_eq!(
            policy.sizing.method,
            SizingMethod::Kelly(KellyParams {
                risk_per_trade: 0.01,
                kelly_fraction: 0.5,
                min_fraction: 0.01,
                max_fraction: 0.10,
                min_trades: 20,
            })
        );
        assert_eq!(policy.sizing.limits.max_open_trades, Some(4));
        assert_eq!(
            policy.stop,
            StopPolicy::Atr {
                period: 10,
                multiplier: 1.5,
                fallback_pct: 0.03,
            }
        );
        assert!(!policy.take_profit.close_remaining_on_last_level);
        match &policy.take_profit.kind {
            TakeProfitKind::RiskReward { targets } => {
                assert_eq!(targets.len(), 2);
                assert_eq!(targets[1].ratio, 3.0);
            }
            other => panic!("unexpected take-profit kind: {other:?}"),
        }

        let engine = build_engine_config(&config).expect("engine config");
        assert_eq!(engine.leverage, 3.0);
        assert_eq!(engine.warmup_bars, 50);
        assert_eq!(engine.metrics.risk_free_rate, 0.02);

        let strategy = build_strategy(&config.strategy).expect("strategy");
        assert_eq!(strategy.name(), "ema_cross");
    }

    #[test]
    fn multi_level_defaults_to_three_levels() {
        let toml_str = format!("{MINIMAL}\n[take_profit]\ntype = \"multi_level\"\n");
        let policy = build_risk_policy(&parse_config(&toml_str)).expect("policy");
        assert_eq!(
            policy.take_profit.kind,
            TakeProfitKind::MultiLevel {
                levels: TakeProfitKind::default_levels()
            }
        );
    }

    #[test]
    fn invalid_policy_values_are_rejected_before_running() {
        let toml_str = format!("{MINIMAL}\n[stop]\ntype = \"percentage\"\nvalue = -0.5\n");
        let err = build_risk_policy(&parse_config(&toml_str)).unwrap_err();
        assert!(err.contains("stop.value"), "{err}");

        let toml_str = format!(
            "{MINIMAL}\n[take_profit]\ntype = \"risk_reward\"\npartial_exits = []\n"
        );
        let err = build_risk_policy(&parse_config(&toml_str)).unwrap_err();
        assert!(err.contains("partial_exits"), "{err}");
    }

    #[test]
    fn engine_config_rejects_leverage_below_one() {
        let mut config = parse_config(MINIMAL);
        config.run.leverage = Some(0.5);
        let err = build_engine_config(&config).unwrap_err();
        assert!(err.contains("leverage"));
    }

    #[test]
    fn strategy_parameters_are_validated() {
        let mut config = parse_config(MINIMAL);
        config.strategy.name = StrategyName::SmaCross;
        config.strategy.short_window = Some(30);
        config.strategy.long_window = Some(10);
        assert!(build_strategy(&config.strategy).is_err());

        config.strategy.name = StrategyName::Rsi;
        let strategy = build_strategy(&config.strategy).expect("rsi defaults");
        assert_eq!(strategy.name(), "rsi");

        config.strategy.name = StrategyName::Macd;
        config.strategy.fast_period = Some(26);
        config.strategy.slow_period = Some(12);
        assert!(build_strategy(&config.strategy).is_err());
        config.strategy.fast_period = None;
        config.strategy.slow_period = None;
        let strategy = build_strategy(&config.strategy).expect("macd defaults");
        assert_eq!(strategy.name(), "macd");

        config.strategy.name = StrategyName::Bollinger;
        config.strategy.std_dev = Some(-1.0);
        assert!(build_strategy(&config.strategy).is_err());
        config.strategy.std_dev = None;
        let strategy = build_strategy(&config.strategy).expect("bollinger defaults");
        assert_eq!(strategy.name(), "bollinger");
    }

    #[test]
    fn macd_and_bollinger_keys_parse() {
        let toml_str = MINIMAL.replace(
            "name = \"hold\"",
            "name = \"macd\"\nfast_period = 8\nslow_period = 21\nsignal_period = 5",
        );
        let config = parse_config(&toml_str);
        assert_eq!(config.strategy.name, StrategyName::Macd);
        assert_eq!(config.strategy.signal_period, Some(5));

        let toml_str = MINIMAL.replace(
            "name = \"hold\"",
            "name = \"bollinger\"\nbb_period = 15\nstd_dev = 2.5",
        );
        let config = parse_config(&toml_str);
        assert_eq!(config.strategy.name, StrategyName::Bollinger);
        assert_eq!(build_strategy(&config.strategy).unwrap().name(), "bollinger");
    }

    #[test]
    fn risk_reward_ratio_conflicts_with_partial_exits() {
        let toml_str = format!(
            "{MINIMAL}\n[take_profit]\ntype = \"risk_reward\"\nratio = 3.0\npartial_exits = [{{ ratio = 1.0, exit_fraction = 1.0 }}]\n"
        );
        let err = build_risk_policy(&parse_config(&toml_str)).unwrap_err();
        assert!(err.contains("mutually exclusive"), "{err}");

        let toml_str =
            format!("{MINIMAL}\n[take_profit]\ntype = \"risk_reward\"\nratio = 3.0\n");
        let policy = build_risk_policy(&parse_config(&toml_str)).expect("ratio only");
        assert_eq!(policy.take_profit.kind, TakeProfitKind::single_risk_reward(3.0));
    }

    #[test]
    fn config_round_trips_through_pretty_toml() {
        let config = parse_config(MINIMAL);
        let rendered = to_toml_pretty(&config).expect("serialize");
        let reparsed = parse_config(&rendered);
        assert_eq!(reparsed.run.symbols, vec!["BTCUSDT".to_string()]);
        assert_eq!(reparsed.strategy.name, StrategyName::Hold);
    }
}
