use tradesim_domain::entities::risk::{
    KellyParams, RiskPolicy, SizingLimits, SizingMethod, SizingPolicy, StopPolicy, TakeProfitKind,
    TakeProfitPolicy,
};
use tradesim_domain::services::engine::{
    BacktestEngine, BacktestResults, EngineConfig, ExecutionCosts, MarketData,
};
use tradesim_domain::services::performance::{max_drawdown, profit_factor};
use tradesim_domain::services::sizing::{risk_amount, PositionSizer, TradeStats};
use tradesim_domain::services::strategy::StrategyAdapter;
use tradesim_domain::services::take_profit::TakeProfitEngine;
use tradesim_domain::value_objects::bar::Bar;
use tradesim_domain::value_objects::exit_reason::ExitReason;
use tradesim_domain::value_objects::side::Side;
use tradesim_domain::value_objects::signal::Signal;

struct Always(Signal);

impl StrategyAdapter for Always {
    fn name(&self) -> &str {
        "always"
    }

    fn generate_signal(&self, _symbol: &str, _history: &[Bar]) -> Result<Signal, String> {
        Ok(self.0)
    }
}

fn make_bar(ts: i64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: ts,
        open: close,
        high,
        low,
        close,
        volume: 1_000.0,
    }
}

fn policy(stop: StopPolicy, take_profit: TakeProfitKind) -> RiskPolicy {
    RiskPolicy {
        sizing: SizingPolicy {
            method: SizingMethod::FixedRisk {
                risk_per_trade: 0.02,
            },
            limits: SizingLimits::default(),
        },
        stop,
        take_profit: TakeProfitPolicy {
            kind: take_profit,
            close_remaining_on_last_level: true,
        },
    }
}

fn config(warmup_bars: usize) -> EngineConfig {
    EngineConfig {
        run_id: "scenario".to_string(),
        warmup_bars,
        costs: ExecutionCosts::default(),
        ..EngineConfig::default()
    }
}

fn run<S: StrategyAdapter>(risk: RiskPolicy, strategy: S, data: &MarketData) -> BacktestResults {
    BacktestEngine::new(config(1), risk, strategy)
        .expect("engine")
        .run(data)
        .expect("run")
}

fn one_symbol(bars: Vec<Bar>) -> MarketData {
    let mut data = MarketData::new();
    data.insert("BTCUSDT".to_string(), bars);
    data
}

#[test]
fn scenario_a_fixed_risk_sizing() {
    let sizer = PositionSizer::new(SizingPolicy {
        method: SizingMethod::FixedRisk {
            risk_per_trade: 0.02,
        },
        limits: SizingLimits::default(),
    });
    let sizing = sizer.size(10_000.0, 50_000.0, 49_000.0, 10.0, None);
    assert!((sizing.size - 2.0).abs() < 1e-12);
    assert!((sizing.risk_fraction * 10_000.0 - 200.0).abs() < 1e-9);
    // Leverage scales exposure, so the stop-out loss is ten times the budgeted risk.
    assert!((risk_amount(sizing.size, 50_000.0, 49_000.0) - 2_000.0).abs() < 1e-9);
    let validated = sizer.validate(sizing.size, 50_000.0, 10_000.0, 10.0);
    assert!((validated - 2.0).abs() < 1e-12);
}

#[test]
fn scenario_b_risk_reward_target() {
    let engine = TakeProfitEngine::new(TakeProfitPolicy::default());
    let plan = engine.targets(Side::Long, 50_000.0, 49_000.0, &[]);
    assert!((plan.levels[0].price - 52_000.0).abs() < 1e-9);
}

#[test]
fn scenario_c_max_drawdown() {
    let (dd, pct) = max_drawdown(&[10_000.0, 10_500.0, 9_800.0, 11_000.0]);
    assert!((dd - 700.0).abs() < 1e-9);
    assert!((pct - 700.0 / 10_500.0 * 100.0).abs() < 1e-9);
}

#[test]
fn scenario_d_profit_factor_sentinels() {
    assert_eq!(profit_factor(0.0, 0.0), 0.0);
    assert!(profit_factor(500.0, 0.0).is_infinite());
}

#[test]
fn short_stop_wins_tie_break() {
    let results = run(
        policy(
            StopPolicy::Percentage { pct: 0.05 },
            TakeProfitKind::single_risk_reward(2.0),
        ),
        Always(Signal::sell()),
        &one_symbol(vec![
            make_bar(0, 100.0, 100.0, 100.0),
            make_bar(60, 110.0, 80.0, 100.0),
        ]),
    );
    let first = &results.trades[0];
    assert_eq!(first.side(), Side::Short);
    assert_eq!(first.exit_reason(), Some(ExitReason::StopLoss));
    assert!((first.exit_price().unwrap_or_default() - 105.0).abs() < 1e-9);
}

#[test]
fn closed_symbol_is_reentered_on_the_same_bar() {
    let results = run(
        policy(
            StopPolicy::Percentage { pct: 0.05 },
            TakeProfitKind::single_risk_reward(2.0),
        ),
        Always(Signal::buy()),
        &one_symbol(vec![
            make_bar(0, 100.0, 100.0, 100.0),
            make_bar(60, 100.0, 90.0, 92.0),
            make_bar(120, 93.0, 91.0, 92.0),
        ]),
    );
    assert_eq!(results.trades.len(), 2);
    assert_eq!(results.trades[0].exit_time(), Some(60));
    assert_eq!(results.trades[1].entry_time(), 60);
    assert_eq!(results.trades[1].exit_reason(), Some(ExitReason::BacktestEnd));
    assert!((results.trades[1].entry_price() - 92.0).abs() < 1e-9);
}

#[test]
fn symbols_share_one_timeline_and_slot_limit() {
    let mut data = MarketData::new();
    data.insert(
        "AAA".to_string(),
        vec![
            make_bar(0, 10.0, 10.0, 10.0),
            make_bar(60, 10.0, 10.0, 10.0),
            make_bar(120, 10.0, 10.0, 10.0),
        ],
    );
    data.insert(
        "BBB".to_string(),
        vec![make_bar(30, 20.0, 20.0, 20.0), make_bar(90, 20.0, 20.0, 20.0)],
    );
    let mut risk = policy(
        StopPolicy::Percentage { pct: 0.05 },
        TakeProfitKind::single_risk_reward(2.0),
    );
    risk.sizing.limits.max_open_trades = Some(1);

    let results = run(risk, Always(Signal::buy()), &data);
    let stamps: Vec<i64> = results.equity.iter().map(|p| p.timestamp).collect();
    assert_eq!(stamps, vec![0, 30, 60, 90, 120]);
    assert_eq!(results.trades.len(), 1);
    assert_eq!(results.trades[0].symbol(), "AAA");
    assert!(results.audit_events.iter().any(|event| {
        event.action == "entry_skipped" && event.symbol.as_deref() == Some("BBB")
    }));
}

#[test]
fn volatility_policies_fall_back_on_short_history() {
    let results = run(
        policy(
            StopPolicy::Atr {
                period: 14,
                multiplier: 2.0,
                fallback_pct: 0.02,
            },
            TakeProfitKind::Dynamic {
                base_target: 0.025,
                max_target: 0.05,
                volatility_multiplier: 1.5,
                period: 20,
            },
        ),
        Always(Signal::buy()),
        &one_symbol(vec![
            make_bar(0, 100.0, 100.0, 100.0),
            make_bar(60, 101.0, 99.0, 100.0),
        ]),
    );
    let components: Vec<&str> = results
        .audit_events
        .iter()
        .filter(|event| event.action == "fallback")
        .filter_map(|event| event.details["component"].as_str())
        .collect();
    assert!(components.contains(&"stop_loss"));
    assert!(components.contains(&"take_profit"));
    let trade = &results.trades[0];
    assert!((trade.initial_stop() - 98.0).abs() < 1e-9);
    assert!((trade.take_profit()[0].price - 102.5).abs() < 1e-9);
}

#[test]
fn identical_inputs_give_identical_output() {
    let bars: Vec<Bar> = (0..50)
        .map(|i| {
            let close = 100.0 + ((i * 7) % 11) as f64 - 5.0;
            make_bar(i * 60, close + 1.0, close - 1.0, close)
        })
        .collect();
    let data = one_symbol(bars);
    let risk = policy(
        StopPolicy::Trailing {
            initial_pct: 0.015,
            trailing_pct: 0.01,
            activation_pct: 0.01,
        },
        TakeProfitKind::MultiLevel {
            levels: TakeProfitKind::default_levels(),
        },
    );
    let first = run(risk.clone(), Always(Signal::buy()), &data);
    let second = run(risk, Always(Signal::buy()), &data);
    assert_eq!(
        serde_json::to_string(&first).expect("json"),
        serde_json::to_string(&second).expect("json")
    );
    assert!(!first.trades.is_empty());
}

#[test]
fn kelly_sizing_switches_to_ledger_stats_after_min_trades() {
    let mut risk = policy(
        StopPolicy::Percentage { pct: 0.05 },
        TakeProfitKind::single_risk_reward(1.0),
    );
    let params = KellyParams {
        min_trades: 3,
        ..KellyParams::default()
    };
    risk.sizing.method = SizingMethod::Kelly(params);

    // Win at the 1R target, loss at the stop, win again; each exit is re-entered on its bar.
    let results = run(
        risk,
        Always(Signal::buy()),
        &one_symbol(vec![
            make_bar(0, 100.0, 100.0, 100.0),
            make_bar(60, 106.0, 100.0, 100.0),
            make_bar(120, 100.0, 94.0, 100.0),
            make_bar(180, 106.0, 100.0, 100.0),
            make_bar(240, 100.0, 100.0, 100.0),
        ]),
    );

    let fractions: Vec<f64> = results
        .audit_events
        .iter()
        .filter(|event| event.action == "entry")
        .filter_map(|event| event.details["risk_fraction"].as_f64())
        .collect();
    assert_eq!(fractions.len(), 4);
    assert_eq!(&fractions[..3], &[0.02, 0.02, 0.02]);

    let sizing_fallbacks = results
        .audit_events
        .iter()
        .filter(|event| event.action == "fallback" && event.details["component"] == "sizing")
        .count();
    assert_eq!(sizing_fallbacks, 3);

    let stats = TradeStats::from_trades(&results.trades[..3]).expect("three closed trades");
    assert_eq!(stats.closed_trades, 3);
    assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-12);
    let payoff = stats.avg_win / stats.avg_loss.abs();
    let kelly = stats.win_rate - (1.0 - stats.win_rate) / payoff;
    let expected = (kelly * params.kelly_fraction).clamp(params.min_fraction, params.max_fraction);
    assert!(expected > 0.02);
    assert!((fractions[3] - expected).abs() < 1e-12);
    assert_eq!(results.trades[3].exit_reason(), Some(ExitReason::BacktestEnd));
}

#[test]
fn end_of_run_close_costs_land_after_the_last_equity_sample() {
    let engine_config = EngineConfig {
        costs: ExecutionCosts {
            commission_rate: 0.001,
            slippage: 0.001,
        },
        ..config(1)
    };
    let risk = policy(
        StopPolicy::Percentage { pct: 0.05 },
        TakeProfitKind::single_risk_reward(2.0),
    );
    let results = BacktestEngine::new(engine_config, risk, Always(Signal::buy()))
        .expect("engine")
        .run(&one_symbol(vec![
            make_bar(0, 100.0, 100.0, 100.0),
            make_bar(60, 100.0, 100.0, 100.0),
        ]))
        .expect("run");

    assert_eq!(results.equity.len(), 2);
    let last = results.equity.last().expect("equity sample");
    assert_eq!(last.timestamp, 60);
    assert_eq!(last.open_trades, 1);
    assert_eq!(results.report.final_equity, results.final_cash);

    let trade = &results.trades[0];
    assert_eq!(trade.exit_reason(), Some(ExitReason::BacktestEnd));
    let size = trade.original_size();
    let exit_price = 100.0 * (1.0 - 0.001);
    let exit_costs = (100.0 - exit_price) * size + exit_price * size * 0.001;
    assert!((last.equity - results.final_cash - exit_costs).abs() < 1e-9);
}
