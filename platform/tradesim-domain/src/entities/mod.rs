pub mod metrics;
pub mod risk;
pub mod trade;
