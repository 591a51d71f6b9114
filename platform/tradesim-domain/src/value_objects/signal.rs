use crate::value_objects::side::Side;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub strength: Option<f64>,
}

impl Signal {
    pub fn hold() -> Self {
        Self {
            signal_type: SignalType::Hold,
            strength: None,
        }
    }

    pub fn buy() -> Self {
        Self {
            signal_type: SignalType::Buy,
            strength: None,
        }
    }

    pub fn sell() -> Self {
        Self {
            signal_type: SignalType::Sell,
            strength: None,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = if strength.is_finite() {
            Some(strength.clamp(0.0, 1.0))
        } else {
            None
        };
        self
    }

    /// Side of the position this signal would open, if any.
    pub fn entry_side(&self) -> Option<Side> {
        match self.signal_type {
            SignalType::Buy => Some(Side::Long),
            SignalType::Sell => Some(Side::Short),
            SignalType::Hold => None,
        }
    }
}
