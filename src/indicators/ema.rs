use rust_decimal::Decimal;

use super::Indicator;

/// Exponential moving average seeded with the SMA of the first `period`
/// values, then updated recursively.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    multiplier: Decimal,
    value: Option<Decimal>,
    count: usize,
    sum: Decimal,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let multiplier = Decimal::from(2) / Decimal::from(period as u32 + 1);
        Self {
            period,
            multiplier,
            value: None,
            count: 0,
            sum: Decimal::ZERO,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        self.count += 1;

        if self.count < self.period {
            self.sum += price;
            return None;
        } else if self.count == self.period {
            self.sum += price;
            let sma = self.sum / Decimal::from(self.period as u32);
            self.value = Some(sma);
            return self.value;
        }

        if let Some(prev_ema) = self.value {
            let new_ema = (price - prev_ema) * self.multiplier + prev_ema;
            self.value = Some(new_ema);
        }

        self.value
    }
}

impl Indicator for Ema {
    fn name(&self) -> &'static str {
        "EMA"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.value = None;
        self.count = 0;
        self.sum = Decimal::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn warms_up_with_sma_seed() {
        let mut ema = Ema::new(3);
        assert_eq!(ema.update(dec!(1)), None);
        assert_eq!(ema.update(dec!(2)), None);
        assert_eq!(ema.update(dec!(3)), Some(dec!(2)));
        // alpha = 2/4 = 0.5; next = (4 - 2) * 0.5 + 2 = 3
        assert_eq!(ema.update(dec!(4)), Some(dec!(3)));
    }

    #[test]
    fn reset_clears_state() {
        let mut ema = Ema::new(2);
        ema.update(dec!(1));
        ema.update(dec!(2));
        assert!(ema.is_ready());
        ema.reset();
        assert!(!ema.is_ready());
        assert_eq!(ema.update(dec!(5)), None);
    }
}
