use rust_decimal::Decimal;

use super::{sma, stddev, Indicator};

/// Bollinger bands: rolling mean with upper/lower bands at a multiple of the
/// rolling standard deviation.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: Decimal,
    prices: Vec<Decimal>,
    last: Option<BollingerOutput>,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: Decimal) -> Self {
        Self {
            period,
            std_dev_multiplier,
            prices: Vec::with_capacity(period),
            last: None,
        }
    }

    pub fn default_params() -> Self {
        Self::new(20, Decimal::from(2))
    }

    pub fn update(&mut self, price: Decimal) -> Option<BollingerOutput> {
        self.prices.push(price);
        if self.prices.len() > self.period {
            self.prices.remove(0);
        }

        if self.prices.len() < self.period {
            return None;
        }

        let middle = sma(&self.prices, self.period)?;
        let std_dev = stddev(&self.prices, self.period)?;

        let deviation = std_dev * self.std_dev_multiplier;
        self.last = Some(BollingerOutput {
            upper: middle + deviation,
            middle,
            lower: middle - deviation,
        });

        self.last
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &'static str {
        "BollingerBands"
    }

    fn is_ready(&self) -> bool {
        self.last.is_some()
    }

    fn reset(&mut self) {
        self.prices.clear();
        self.last = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BollingerOutput {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn flat_series_collapses_bands_to_mean() {
        let mut bb = BollingerBands::default_params();
        let mut out = None;
        for _ in 0..20 {
            out = bb.update(dec!(50));
        }
        let out = out.unwrap();
        assert_eq!(out.upper, dec!(50));
        assert_eq!(out.middle, dec!(50));
        assert_eq!(out.lower, dec!(50));
    }

    #[test]
    fn bands_bracket_the_mean() {
        let mut bb = BollingerBands::default_params();
        let mut out = None;
        for i in 0..25 {
            let price = dec!(100) + Decimal::from(i % 5);
            out = bb.update(price);
        }
        let out = out.unwrap();
        assert!(out.upper > out.middle);
        assert!(out.lower < out.middle);
    }
}
