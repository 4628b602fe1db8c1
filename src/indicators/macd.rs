use rust_decimal::Decimal;

use super::{ema::Ema, Indicator};

/// MACD(12, 26, 9): fast EMA minus slow EMA, with a signal EMA over the MACD
/// line and a histogram of their difference.
#[derive(Debug, Clone)]
pub struct Macd {
    fast_ema: Ema,
    slow_ema: Ema,
    signal_ema: Ema,
    last: Option<MacdOutput>,
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_ema: Ema::new(fast_period),
            slow_ema: Ema::new(slow_period),
            signal_ema: Ema::new(signal_period),
            last: None,
        }
    }

    pub fn default_params() -> Self {
        Self::new(12, 26, 9)
    }

    pub fn update(&mut self, price: Decimal) -> Option<MacdOutput> {
        let fast = self.fast_ema.update(price);
        let slow = self.slow_ema.update(price);

        if let (Some(f), Some(s)) = (fast, slow) {
            let macd_line = f - s;

            if let Some(signal) = self.signal_ema.update(macd_line) {
                self.last = Some(MacdOutput {
                    macd_line,
                    signal_line: signal,
                    histogram: macd_line - signal,
                });
            }
        }

        self.last
    }
}

impl Indicator for Macd {
    fn name(&self) -> &'static str {
        "MACD"
    }

    fn is_ready(&self) -> bool {
        self.last.is_some()
    }

    fn reset(&mut self) {
        self.fast_ema.reset();
        self.slow_ema.reset();
        self.signal_ema.reset();
        self.last = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MacdOutput {
    pub macd_line: Decimal,
    pub signal_line: Decimal,
    pub histogram: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn flat_series_converges_to_zero() {
        let mut macd = Macd::default_params();
        let mut out = None;
        for _ in 0..60 {
            out = macd.update(dec!(100));
        }
        let out = out.expect("ready after warmup");
        assert_eq!(out.macd_line, Decimal::ZERO);
        assert_eq!(out.signal_line, Decimal::ZERO);
        assert_eq!(out.histogram, Decimal::ZERO);
    }

    #[test]
    fn not_ready_before_signal_warmup() {
        let mut macd = Macd::default_params();
        // Slow EMA needs 26 values, signal another 8 MACD points after that.
        for i in 0..33 {
            macd.update(dec!(100) + Decimal::from(i));
        }
        assert!(!macd.is_ready());
        macd.update(dec!(134));
        assert!(macd.is_ready());
    }

    #[test]
    fn uptrend_yields_positive_macd() {
        let mut macd = Macd::default_params();
        let mut out = None;
        for i in 0..60 {
            out = macd.update(dec!(100) + Decimal::from(i) * dec!(2));
        }
        assert!(out.unwrap().macd_line > Decimal::ZERO);
    }
}
