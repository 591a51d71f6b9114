use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// Price moved against the trader by `fraction` (fills are never in our favour).
    pub fn adverse_price(self, price: f64, fraction: f64, entering: bool) -> f64 {
        let up = matches!((self, entering), (Side::Long, true) | (Side::Short, false));
        if up {
            price * (1.0 + fraction)
        } else {
            price * (1.0 - fraction)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
