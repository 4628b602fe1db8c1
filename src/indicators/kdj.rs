use rust_decimal::Decimal;

use super::{highest, lowest, Indicator};

/// KDJ stochastic oscillator.
///
/// RSV is the raw stochastic over the `k_period` high/low range; K and D are
/// smoothed recursively (`K ← ⅔K + ⅓RSV`, `D ← ⅔D + ⅓K`, both seeded at 50)
/// and `J = 3K − 2D`. A flat high/low range yields RSV 50.
#[derive(Debug, Clone)]
pub struct Kdj {
    k_period: usize,
    smoothing: Decimal,
    highs: Vec<Decimal>,
    lows: Vec<Decimal>,
    k: Decimal,
    d: Decimal,
    ready: bool,
}

impl Kdj {
    pub fn new(k_period: usize, smoothing: usize) -> Self {
        Self {
            k_period,
            smoothing: Decimal::from(smoothing as u32),
            highs: Vec::with_capacity(k_period),
            lows: Vec::with_capacity(k_period),
            k: Decimal::from(50),
            d: Decimal::from(50),
            ready: false,
        }
    }

    pub fn default_params() -> Self {
        Self::new(9, 3)
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<KdjOutput> {
        self.highs.push(high);
        self.lows.push(low);
        if self.highs.len() > self.k_period {
            self.highs.remove(0);
            self.lows.remove(0);
        }

        if self.highs.len() < self.k_period {
            return None;
        }

        let highest_high = highest(&self.highs, self.k_period)?;
        let lowest_low = lowest(&self.lows, self.k_period)?;
        let range = highest_high - lowest_low;

        let rsv = if range.is_zero() {
            Decimal::from(50)
        } else {
            (close - lowest_low) / range * Decimal::from(100)
        };

        let m = self.smoothing;
        self.k = (self.k * (m - Decimal::ONE) + rsv) / m;
        self.d = (self.d * (m - Decimal::ONE) + self.k) / m;
        self.ready = true;

        Some(self.output())
    }

    fn output(&self) -> KdjOutput {
        KdjOutput {
            k: self.k,
            d: self.d,
            j: Decimal::from(3) * self.k - Decimal::from(2) * self.d,
        }
    }
}

impl Indicator for Kdj {
    fn name(&self) -> &'static str {
        "KDJ"
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
        self.k = Decimal::from(50);
        self.d = Decimal::from(50);
        self.ready = false;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KdjOutput {
    pub k: Decimal,
    pub d: Decimal,
    pub j: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn flat_range_stays_at_fifty() {
        let mut kdj = Kdj::default_params();
        let mut out = None;
        for _ in 0..12 {
            out = kdj.update(dec!(10), dec!(10), dec!(10));
        }
        let out = out.unwrap();
        assert_eq!(out.k, dec!(50));
        assert_eq!(out.d, dec!(50));
        assert_eq!(out.j, dec!(50));
    }

    #[test]
    fn close_at_period_high_pushes_k_up() {
        let mut kdj = Kdj::default_params();
        let mut out = None;
        for i in 0..15 {
            let base = dec!(10) + Decimal::from(i);
            out = kdj.update(base + dec!(1), base - dec!(1), base + dec!(1));
        }
        let out = out.unwrap();
        assert!(out.k > dec!(50), "k = {}", out.k);
        assert!(out.j >= out.k, "j = {}, k = {}", out.j, out.k);
    }

    #[test]
    fn warmup_length_matches_k_period() {
        let mut kdj = Kdj::default_params();
        for i in 0..8 {
            let p = dec!(10) + Decimal::from(i);
            assert!(kdj.update(p, p, p).is_none());
        }
        assert!(kdj.update(dec!(20), dec!(19), dec!(20)).is_some());
    }
}
