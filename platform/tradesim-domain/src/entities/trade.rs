use crate::value_objects::exit_reason::ExitReason;
use crate::value_objects::side::Side;
use crate::EPSILON;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TakeProfitLevel {
    pub price: f64,
    pub exit_fraction: f64,
    pub filled: bool,
}

impl TakeProfitLevel {
    pub fn new(price: f64, exit_fraction: f64) -> Self {
        Self {
            price,
            exit_fraction,
            filled: false,
        }
    }
}

/// One fill that reduced the position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeExit {
    pub timestamp: i64,
    pub price: f64,
    pub size: f64,
    pub pnl: f64,
    pub commission: f64,
    pub reason: ExitReason,
}

/// Lifecycle record for one simulated position.
///
/// Remaining size only ever shrinks. Once it reaches zero the trade is terminal:
/// every mutator returns an error and the exit fields are frozen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    symbol: String,
    side: Side,
    entry_time: i64,
    entry_price: f64,
    original_size: f64,
    remaining_size: f64,
    stop_price: f64,
    initial_stop: f64,
    take_profit: Vec<TakeProfitLevel>,
    realized_pnl: f64,
    commission_paid: f64,
    exits: Vec<TradeExit>,
    exit_time: Option<i64>,
    exit_price: Option<f64>,
    exit_reason: Option<ExitReason>,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: String,
        side: Side,
        entry_time: i64,
        entry_price: f64,
        size: f64,
        stop_price: f64,
        take_profit: Vec<TakeProfitLevel>,
        entry_commission: f64,
    ) -> Result<Self, String> {
        if !size.is_finite() || size <= 0.0 {
            return Err(format!("trade size must be finite and > 0 (got {size})"));
        }
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(format!(
                "entry price must be finite and > 0 (got {entry_price})"
            ));
        }
        Ok(Self {
            symbol,
            side,
            entry_time,
            entry_price,
            original_size: size,
            remaining_size: size,
            stop_price,
            initial_stop: stop_price,
            take_profit,
            realized_pnl: 0.0,
            commission_paid: entry_commission.max(0.0),
            exits: Vec::new(),
            exit_time: None,
            exit_price: None,
            exit_reason: None,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn entry_time(&self) -> i64 {
        self.entry_time
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn original_size(&self) -> f64 {
        self.original_size
    }

    pub fn remaining_size(&self) -> f64 {
        self.remaining_size
    }

    pub fn stop_price(&self) -> f64 {
        self.stop_price
    }

    pub fn initial_stop(&self) -> f64 {
        self.initial_stop
    }

    pub fn take_profit(&self) -> &[TakeProfitLevel] {
        &self.take_profit
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn commission_paid(&self) -> f64 {
        self.commission_paid
    }

    pub fn exits(&self) -> &[TradeExit] {
        &self.exits
    }

    pub fn exit_time(&self) -> Option<i64> {
        self.exit_time
    }

    pub fn exit_price(&self) -> Option<f64> {
        self.exit_price
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_reason
    }

    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some()
    }

    pub fn exited_size(&self) -> f64 {
        self.exits.iter().map(|exit| exit.size).sum()
    }

    /// Realized P&L after every commission charged on the trade.
    pub fn net_pnl(&self) -> f64 {
        self.realized_pnl - self.commission_paid
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.remaining_size * self.side.sign()
    }

    /// Net P&L as a percentage of entry notional.
    pub fn pnl_pct(&self) -> f64 {
        let notional = self.entry_price * self.original_size;
        if notional <= 0.0 {
            return 0.0;
        }
        self.net_pnl() / notional * 100.0
    }

    /// Net P&L expressed in multiples of the initial dollar risk.
    pub fn r_multiple(&self) -> f64 {
        let risk = (self.entry_price - self.initial_stop).abs() * self.original_size;
        if risk <= 0.0 {
            return 0.0;
        }
        self.net_pnl() / risk
    }

    pub fn holding_seconds(&self) -> Option<i64> {
        self.exit_time.map(|exit| exit - self.entry_time)
    }

    /// Size an exit request would actually fill: never more than what is left, and the
    /// whole remainder when the leftover would be dust.
    pub fn clamp_exit_size(&self, requested: f64) -> f64 {
        if !requested.is_finite() || requested <= 0.0 {
            return 0.0;
        }
        let size = requested.min(self.remaining_size);
        if self.remaining_size - size <= EPSILON * self.original_size.max(1.0) {
            self.remaining_size
        } else {
            size
        }
    }

    /// Moves the stop only when it reduces risk; returns whether it moved.
    pub fn tighten_stop(&mut self, candidate: f64) -> bool {
        if self.is_closed() || !candidate.is_finite() {
            return false;
        }
        let improves = match self.side {
            Side::Long => candidate > self.stop_price,
            Side::Short => candidate < self.stop_price,
        };
        if improves {
            self.stop_price = candidate;
        }
        improves
    }

    pub fn mark_level_filled(&mut self, index: usize) -> Result<(), String> {
        if self.is_closed() {
            return Err(format!("trade {} is already closed", self.symbol));
        }
        let level = self
            .take_profit
            .get_mut(index)
            .ok_or_else(|| format!("take-profit level {index} does not exist"))?;
        level.filled = true;
        Ok(())
    }

    pub fn close_partial(
        &mut self,
        timestamp: i64,
        price: f64,
        requested_size: f64,
        commission: f64,
        reason: ExitReason,
    ) -> Result<TradeExit, String> {
        if self.is_closed() {
            return Err(format!("trade {} is already closed", self.symbol));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(format!("exit price must be finite and > 0 (got {price})"));
        }
        let size = self.clamp_exit_size(requested_size);
        if size <= 0.0 {
            return Err(format!(
                "exit size must be finite and > 0 (got {requested_size})"
            ));
        }

        let pnl = (price - self.entry_price) * size * self.side.sign();
        let commission = commission.max(0.0);
        self.realized_pnl += pnl;
        self.commission_paid += commission;
        self.remaining_size -= size;

        let exit = TradeExit {
            timestamp,
            price,
            size,
            pnl,
            commission,
            reason,
        };
        self.exits.push(exit.clone());

        if self.remaining_size <= EPSILON * self.original_size.max(1.0) {
            self.remaining_size = 0.0;
            self.exit_time = Some(timestamp);
            self.exit_price = Some(price);
            self.exit_reason = Some(reason);
        }

        Ok(exit)
    }

    pub fn close_all(
        &mut self,
        timestamp: i64,
        price: f64,
        commission: f64,
        reason: ExitReason,
    ) -> Result<TradeExit, String> {
        let remaining = self.remaining_size;
        self.close_partial(timestamp, price, remaining, commission, reason)
    }
}
