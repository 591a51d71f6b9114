use crate::value_objects::bar::Bar;

pub fn true_range(bar: &Bar, prev_close: Option<f64>) -> f64 {
    let range = bar.high - bar.low;
    match prev_close {
        Some(prev) => range
            .max((bar.high - prev).abs())
            .max((bar.low - prev).abs()),
        None => range,
    }
}

/// Mean true range over the last `period` bars. Each of those bars needs the close of the
/// bar before it, so `period + 1` bars are required.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let window = &bars[bars.len() - period - 1..];
    let sum: f64 = window
        .windows(2)
        .map(|pair| true_range(&pair[1], Some(pair[0].close)))
        .sum();
    let value = sum / period as f64;
    value.is_finite().then_some(value)
}

/// Sample standard deviation of the last `period` close-to-close returns, scaled to the
/// whole window by `sqrt(period)`.
pub fn return_volatility(bars: &[Bar], period: usize) -> Option<f64> {
    if period < 2 || bars.len() < period + 1 {
        return None;
    }
    let window = &bars[bars.len() - period - 1..];
    let mut returns = Vec::with_capacity(period);
    for pair in window.windows(2) {
        if pair[0].close <= 0.0 {
            return None;
        }
        returns.push(pair[1].close / pair[0].close - 1.0);
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns
        .iter()
        .map(|ret| {
            let diff = ret - mean;
            diff * diff
        })
        .sum::<f64>()
        / (n - 1.0);
    let value = var.sqrt() * (period as f64).sqrt();
    value.is_finite().then_some(value)
}

pub fn sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    let slice = &values[values.len() - window..];
    Some(slice.iter().sum::<f64>() / window as f64)
}

/// Exponential moving average seeded with the first value, `alpha = 2 / (span + 1)`.
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    if span == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current: Option<f64> = None;
    for value in values {
        let next = match current {
            Some(prev) => alpha * value + (1.0 - alpha) * prev,
            None => *value,
        };
        current = Some(next);
        out.push(next);
    }
    out
}

pub fn ema(values: &[f64], span: usize) -> Option<f64> {
    ema_series(values, span).last().copied()
}

/// RSI from simple averages of gains and losses over the last `window` changes.
pub fn rsi(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() <= window {
        return None;
    }
    let slice = &values[values.len() - window - 1..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in slice.windows(2) {
        let diff = pair[1] - pair[0];
        if diff > 0.0 {
            gains += diff;
        } else {
            losses -= diff;
        }
    }
    if gains + losses == 0.0 {
        return Some(50.0);
    }
    if losses == 0.0 {
        return Some(100.0);
    }
    let rs = gains / losses;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Sample standard deviation of the last `window` values.
pub fn rolling_std(values: &[f64], window: usize) -> Option<f64> {
    if window < 2 || values.len() < window {
        return None;
    }
    let slice = &values[values.len() - window..];
    let mean = slice.iter().sum::<f64>() / window as f64;
    let var = slice
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / (window as f64 - 1.0);
    let value = var.sqrt();
    value.is_finite().then_some(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands over the last `period` values: SMA plus/minus `width` sample deviations.
pub fn bollinger_bands(values: &[f64], period: usize, width: f64) -> Option<Bands> {
    let middle = sma(values, period)?;
    let std = rolling_std(values, period)?;
    Some(Bands {
        upper: middle + width * std,
        middle,
        lower: middle - width * std,
    })
}

/// MACD line, signal line and histogram for every value.
pub fn macd_series(
    values: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = ema_series(values, fast);
    let slow_ema = ema_series(values, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(fast, slow)| fast - slow)
        .collect();
    let signal_line = ema_series(&line, signal);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(macd, signal)| macd - signal)
        .collect();
    (line, signal_line, histogram)
}

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|bar| bar.close).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: ts,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn atr_needs_one_more_bar_than_period() {
        let bars = vec![bar(0, 11.0, 9.0, 10.0), bar(1, 12.0, 10.0, 11.0)];
        assert_eq!(atr(&bars, 2), None);
        assert_eq!(atr(&bars, 1), Some(2.0));
    }

    #[test]
    fn true_range_uses_previous_close_gap() {
        let b = bar(1, 15.0, 14.0, 14.5);
        assert_eq!(true_range(&b, Some(10.0)), 5.0);
        assert_eq!(true_range(&b, None), 1.0);
    }

    #[test]
    fn flat_series_has_zero_volatility() {
        let bars: Vec<Bar> = (0..30).map(|i| Bar::flat(i, 100.0)).collect();
        assert_eq!(return_volatility(&bars, 20), Some(0.0));
        assert_eq!(return_volatility(&bars[..10], 20), None);
    }

    #[test]
    fn ema_tracks_constant_series() {
        let values = vec![5.0; 10];
        assert_eq!(ema(&values, 3), Some(5.0));
        let series = ema_series(&[1.0, 3.0], 3);
        assert!((series[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn rsi_is_bounded() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));
        let flat = vec![1.0; 20];
        assert_eq!(rsi(&flat, 14), Some(50.0));
        let zigzag: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        let value = rsi(&zigzag, 14).unwrap();
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn sma_requires_full_window() {
        assert_eq!(sma(&[1.0, 2.0], 3), None);
        assert_eq!(sma(&[1.0, 2.0, 3.0], 3), Some(2.0));
    }

    #[test]
    fn bollinger_bands_use_sample_deviation() {
        let bands = bollinger_bands(&[1.0, 2.0, 3.0, 4.0, 5.0], 5, 2.0).unwrap();
        let std = 2.5f64.sqrt();
        assert_eq!(bands.middle, 3.0);
        assert!((bands.upper - (3.0 + 2.0 * std)).abs() < 1e-12);
        assert!((bands.lower - (3.0 - 2.0 * std)).abs() < 1e-12);
        assert_eq!(bollinger_bands(&[1.0, 2.0], 5, 2.0), None);
        assert_eq!(rolling_std(&[4.0; 6], 3), Some(0.0));
    }

    #[test]
    fn macd_is_flat_on_constant_series() {
        let (line, signal, histogram) = macd_series(&[10.0; 12], 3, 6, 3);
        assert_eq!(line.len(), 12);
        assert!(line.iter().chain(&signal).chain(&histogram).all(|v| *v == 0.0));
    }
}
