pub mod backtest;
pub mod execution;

pub use backtest::{
    BacktestEngine, BacktestResults, EngineConfig, MarketData, SignalError,
};
pub use execution::ExecutionCosts;
