use crate::value_objects::side::Side;
use serde::Serialize;

/// Run-wide fill costs. Both are fractions: `0.001` is ten basis points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionCosts {
    pub commission_rate: f64,
    pub slippage: f64,
}

impl ExecutionCosts {
    pub fn validate(&self) -> Result<(), String> {
        if !self.commission_rate.is_finite() || !(0.0..1.0).contains(&self.commission_rate) {
            return Err(format!(
                "commission_rate must be in [0, 1) (got {})",
                self.commission_rate
            ));
        }
        if !self.slippage.is_finite() || !(0.0..1.0).contains(&self.slippage) {
            return Err(format!("slippage must be in [0, 1) (got {})", self.slippage));
        }
        Ok(())
    }

    pub fn entry_price(&self, side: Side, price: f64) -> f64 {
        side.adverse_price(price, self.slippage, true)
    }

    pub fn exit_price(&self, side: Side, price: f64) -> f64 {
        side.adverse_price(price, self.slippage, false)
    }

    pub fn commission(&self, price: f64, size: f64) -> f64 {
        (price * size).abs() * self.commission_rate
    }
}
