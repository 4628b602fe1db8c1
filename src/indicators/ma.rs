use rust_decimal::Decimal;

use super::{sma, Indicator};

/// Rolling arithmetic mean over a fixed window. Used for the MA close
/// columns and the 20-day volume average.
#[derive(Debug, Clone)]
pub struct RollingMean {
    period: usize,
    values: Vec<Decimal>,
    mean: Option<Decimal>,
}

impl RollingMean {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            values: Vec::with_capacity(period),
            mean: None,
        }
    }

    pub fn update(&mut self, value: Decimal) -> Option<Decimal> {
        self.values.push(value);
        if self.values.len() > self.period {
            self.values.remove(0);
        }

        if self.values.len() >= self.period {
            self.mean = sma(&self.values, self.period);
        }

        self.mean
    }
}

impl Indicator for RollingMean {
    fn name(&self) -> &'static str {
        "RollingMean"
    }

    fn is_ready(&self) -> bool {
        self.mean.is_some()
    }

    fn reset(&mut self) {
        self.values.clear();
        self.mean = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn none_until_window_filled_then_rolls() {
        let mut ma = RollingMean::new(3);
        assert_eq!(ma.update(dec!(1)), None);
        assert_eq!(ma.update(dec!(2)), None);
        assert_eq!(ma.update(dec!(3)), Some(dec!(2)));
        assert_eq!(ma.update(dec!(6)), Some(dec!(11) / dec!(3)));
    }
}
