use rust_decimal::Decimal;

use super::{highest, lowest, Indicator};

/// Williams %R: `(HH − close) / (HH − LL) × −100` over the lookback window.
/// Ranges from 0 (close at the period high) to −100 (close at the period
/// low); a flat range reads the −50 midpoint.
#[derive(Debug, Clone)]
pub struct WilliamsR {
    period: usize,
    highs: Vec<Decimal>,
    lows: Vec<Decimal>,
    value: Option<Decimal>,
}

impl WilliamsR {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            highs: Vec::with_capacity(period),
            lows: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn default_params() -> Self {
        Self::new(14)
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<Decimal> {
        self.highs.push(high);
        self.lows.push(low);
        if self.highs.len() > self.period {
            self.highs.remove(0);
            self.lows.remove(0);
        }

        if self.highs.len() < self.period {
            return None;
        }

        let highest_high = highest(&self.highs, self.period)?;
        let lowest_low = lowest(&self.lows, self.period)?;
        let range = highest_high - lowest_low;

        let wr = if range.is_zero() {
            Decimal::from(-50)
        } else {
            (highest_high - close) / range * Decimal::from(-100)
        };

        self.value = Some(wr);
        self.value
    }
}

impl Indicator for WilliamsR {
    fn name(&self) -> &'static str {
        "WilliamsR"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn close_at_high_reads_zero() {
        let mut wr = WilliamsR::new(14);
        let mut value = None;
        for i in 0..20 {
            let base = dec!(100) + Decimal::from(i);
            value = wr.update(base, base - dec!(2), base);
        }
        assert_eq!(value, Some(Decimal::ZERO));
    }

    #[test]
    fn close_at_low_reads_minus_hundred() {
        let mut wr = WilliamsR::new(14);
        let mut value = None;
        for i in 0..20 {
            let base = dec!(100) - Decimal::from(i);
            value = wr.update(base + dec!(2), base, base);
        }
        assert_eq!(value, Some(dec!(-100)));
    }

    #[test]
    fn flat_range_reads_midpoint() {
        let mut wr = WilliamsR::new(14);
        let mut value = None;
        for _ in 0..14 {
            value = wr.update(dec!(10), dec!(10), dec!(10));
        }
        assert_eq!(value, Some(dec!(-50)));
    }
}
