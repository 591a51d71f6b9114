use crate::services::indicators::{bollinger_bands, closes, ema_series, macd_series, rsi, sma};
use crate::value_objects::bar::Bar;
use crate::value_objects::signal::Signal;

/// Decision port queried by the simulator once per bar for each flat symbol.
///
/// Implementations must be pure functions of `history`, whose last element is the bar
/// being decided on.
pub trait StrategyAdapter {
    fn name(&self) -> &str;

    fn generate_signal(&self, symbol: &str, history: &[Bar]) -> Result<Signal, String>;
}

impl<S: StrategyAdapter + ?Sized> StrategyAdapter for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn generate_signal(&self, symbol: &str, history: &[Bar]) -> Result<Signal, String> {
        (**self).generate_signal(symbol, history)
    }
}

pub struct HoldStrategy;

impl StrategyAdapter for HoldStrategy {
    fn name(&self) -> &str {
        "hold"
    }

    fn generate_signal(&self, _symbol: &str, _history: &[Bar]) -> Result<Signal, String> {
        Ok(Signal::hold())
    }
}

#[derive(Debug, Clone)]
pub struct EmaCross {
    fast: usize,
    slow: usize,
    trend: Option<usize>,
}

impl EmaCross {
    pub fn new(fast: usize, slow: usize, trend: Option<usize>) -> Result<Self, String> {
        if fast == 0 || fast >= slow {
            return Err(format!(
                "ema_cross requires 0 < fast < slow (got fast={fast}, slow={slow})"
            ));
        }
        if trend == Some(0) {
            return Err("ema_cross trend period must be >= 1".to_string());
        }
        Ok(Self { fast, slow, trend })
    }

    fn min_bars(&self) -> usize {
        self.slow.max(self.trend.unwrap_or(0)) + 1
    }
}

impl StrategyAdapter for EmaCross {
    fn name(&self) -> &str {
        "ema_cross"
    }

    fn generate_signal(&self, _symbol: &str, history: &[Bar]) -> Result<Signal, String> {
        if history.len() < self.min_bars() {
            return Ok(Signal::hold());
        }
        let prices = closes(history);
        let fast = ema_series(&prices, self.fast);
        let slow = ema_series(&prices, self.slow);
        let n = prices.len();
        let (prev_fast, curr_fast) = (fast[n - 2], fast[n - 1]);
        let (prev_slow, curr_slow) = (slow[n - 2], slow[n - 1]);
        let close = prices[n - 1];

        let (uptrend, downtrend) = match self.trend {
            Some(period) => {
                let trend = ema_series(&prices, period)[n - 1];
                (close > trend, close < trend)
            }
            None => (true, true),
        };

        let strength = if curr_slow > 0.0 {
            ((curr_fast - curr_slow).abs() / curr_slow * 100.0).min(1.0)
        } else {
            0.0
        };

        if prev_fast <= prev_slow && curr_fast > curr_slow && uptrend {
            return Ok(Signal::buy().with_strength(strength));
        }
        if prev_fast >= prev_slow && curr_fast < curr_slow && downtrend {
            return Ok(Signal::sell().with_strength(strength));
        }
        Ok(Signal::hold())
    }
}

#[derive(Debug, Clone)]
pub struct SmaCross {
    short_window: usize,
    long_window: usize,
}

impl SmaCross {
    pub fn new(short_window: usize, long_window: usize) -> Result<Self, String> {
        if short_window == 0 || short_window >= long_window {
            return Err(format!(
                "sma_cross requires 0 < short_window < long_window (got {short_window}, {long_window})"
            ));
        }
        Ok(Self {
            short_window,
            long_window,
        })
    }
}

impl StrategyAdapter for SmaCross {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn generate_signal(&self, _symbol: &str, history: &[Bar]) -> Result<Signal, String> {
        if history.len() <= self.long_window {
            return Ok(Signal::hold());
        }
        let prices = closes(history);
        let prev = &prices[..prices.len() - 1];
        let (Some(short), Some(long), Some(prev_short), Some(prev_long)) = (
            sma(&prices, self.short_window),
            sma(&prices, self.long_window),
            sma(prev, self.short_window),
            sma(prev, self.long_window),
        ) else {
            return Ok(Signal::hold());
        };

        if prev_short <= prev_long && short > long {
            return Ok(Signal::buy());
        }
        if prev_short >= prev_long && short < long {
            return Ok(Signal::sell());
        }
        Ok(Signal::hold())
    }
}

/// Mean reversion on RSI: buy when it climbs back out of oversold, sell when it falls back
/// out of overbought.
#[derive(Debug, Clone)]
pub struct RsiReversal {
    period: usize,
    oversold: f64,
    overbought: f64,
}

impl RsiReversal {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Result<Self, String> {
        if period == 0 {
            return Err("rsi period must be >= 1".to_string());
        }
        if !(0.0..=100.0).contains(&oversold)
            || !(0.0..=100.0).contains(&overbought)
            || oversold >= overbought
        {
            return Err(format!(
                "rsi thresholds must satisfy 0 <= oversold < overbought <= 100 (got {oversold}, {overbought})"
            ));
        }
        Ok(Self {
            period,
            oversold,
            overbought,
        })
    }
}

impl StrategyAdapter for RsiReversal {
    fn name(&self) -> &str {
        "rsi"
    }

    fn generate_signal(&self, _symbol: &str, history: &[Bar]) -> Result<Signal, String> {
        if history.len() < self.period + 2 {
            return Ok(Signal::hold());
        }
        let prices = closes(history);
        let (Some(current), Some(previous)) = (
            rsi(&prices, self.period),
            rsi(&prices[..prices.len() - 1], self.period),
        ) else {
            return Ok(Signal::hold());
        };

        if previous < self.oversold && current >= self.oversold {
            let strength = (self.oversold - previous) / self.oversold.max(1.0);
            return Ok(Signal::buy().with_strength(strength));
        }
        if previous > self.overbought && current <= self.overbought {
            let strength = (previous - self.overbought) / (100.0 - self.overbought).max(1.0);
            return Ok(Signal::sell().with_strength(strength));
        }
        Ok(Signal::hold())
    }
}

/// MACD/signal-line crossover confirmed by the histogram moving the same way.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, String> {
        if fast == 0 || fast >= slow {
            return Err(format!(
                "macd requires 0 < fast_period < slow_period (got {fast}, {slow})"
            ));
        }
        if signal == 0 {
            return Err("macd signal_period must be >= 1".to_string());
        }
        Ok(Self { fast, slow, signal })
    }

    fn min_bars(&self) -> usize {
        self.slow + self.signal + 10
    }
}

impl StrategyAdapter for Macd {
    fn name(&self) -> &str {
        "macd"
    }

    fn generate_signal(&self, _symbol: &str, history: &[Bar]) -> Result<Signal, String> {
        if history.len() < self.min_bars() {
            return Ok(Signal::hold());
        }
        let prices = closes(history);
        let (line, signal, histogram) = macd_series(&prices, self.fast, self.slow, self.signal);
        let n = line.len();
        let (prev_macd, curr_macd) = (line[n - 2], line[n - 1]);
        let (prev_signal, curr_signal) = (signal[n - 2], signal[n - 1]);
        let (prev_hist, curr_hist) = (histogram[n - 2], histogram[n - 1]);
        if ![curr_macd, curr_signal, prev_macd, prev_signal]
            .iter()
            .all(|v| v.is_finite())
        {
            return Ok(Signal::hold());
        }

        if prev_macd < prev_signal && curr_macd > curr_signal && curr_hist > prev_hist {
            return Ok(Signal::buy());
        }
        if prev_macd > prev_signal && curr_macd < curr_signal && curr_hist < prev_hist {
            return Ok(Signal::sell());
        }
        Ok(Signal::hold())
    }
}

/// Band reversion: buy a close under the lower band, sell a close over the upper band.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    std_dev: f64,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev: f64) -> Result<Self, String> {
        if period < 2 {
            return Err(format!("bollinger bb_period must be >= 2 (got {period})"));
        }
        if !std_dev.is_finite() || std_dev <= 0.0 {
            return Err(format!("bollinger std_dev must be > 0 (got {std_dev})"));
        }
        Ok(Self { period, std_dev })
    }
}

impl StrategyAdapter for BollingerBands {
    fn name(&self) -> &str {
        "bollinger"
    }

    fn generate_signal(&self, _symbol: &str, history: &[Bar]) -> Result<Signal, String> {
        if history.len() < self.period + 10 {
            return Ok(Signal::hold());
        }
        let prices = closes(history);
        let n = prices.len();
        let (Some(current), Some(previous)) = (
            bollinger_bands(&prices, self.period, self.std_dev),
            bollinger_bands(&prices[..n - 1], self.period, self.std_dev),
        ) else {
            return Ok(Signal::hold());
        };
        let (close, prev_close) = (prices[n - 1], prices[n - 2]);

        let crossed_below = prev_close >= previous.lower && close < current.lower;
        let bouncing = close < current.lower && close > prev_close;
        if crossed_below || bouncing {
            return Ok(Signal::buy());
        }
        let crossed_above = prev_close <= previous.upper && close > current.upper;
        let reversing = close > current.upper && close < prev_close;
        if crossed_above || reversing {
            return Ok(Signal::sell());
        }
        Ok(Signal::hold())
    }
}
