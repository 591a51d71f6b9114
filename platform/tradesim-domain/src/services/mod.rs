pub mod audit;
pub mod engine;
pub mod indicators;
pub mod ohlcv;
pub mod performance;
pub mod sizing;
pub mod stop_loss;
pub mod strategy;
pub mod take_profit;
