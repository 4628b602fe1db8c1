pub mod bollinger;
pub mod ema;
pub mod engine;
pub mod kdj;
pub mod ma;
pub mod macd;
pub mod rsi;
pub mod williams;

pub use bollinger::*;
pub use ema::*;
pub use engine::*;
pub use kdj::*;
pub use ma::*;
pub use macd::*;
pub use rsi::*;
pub use williams::*;

use rust_decimal::Decimal;

pub trait Indicator {
    fn name(&self) -> &'static str;
    fn is_ready(&self) -> bool;
    fn reset(&mut self);
}

pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    let sum: Decimal = values.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period as u32))
}

pub fn highest(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    values.iter().rev().take(period).max().copied()
}

pub fn lowest(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    values.iter().rev().take(period).min().copied()
}

pub fn stddev(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    let mean = sma(values, period)?;
    let variance: Decimal = values
        .iter()
        .rev()
        .take(period)
        .map(|v| {
            let diff = *v - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(period as u32);

    Some(sqrt_decimal(variance))
}

fn sqrt_decimal(value: Decimal) -> Decimal {
    if value.is_zero() || value.is_sign_negative() {
        return Decimal::ZERO;
    }

    let mut guess = value / Decimal::from(2);
    let epsilon = Decimal::new(1, 10); // 0.0000000001

    for _ in 0..50 {
        let new_guess = (guess + value / guess) / Decimal::from(2);
        if (new_guess - guess).abs() < epsilon {
            return new_guess;
        }
        guess = new_guess;
    }
    guess
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sma_needs_full_window() {
        let values = vec![dec!(1), dec!(2), dec!(3)];
        assert_eq!(sma(&values, 4), None);
        assert_eq!(sma(&values, 3), Some(dec!(2)));
        assert_eq!(sma(&values, 2), Some(dec!(2.5)));
    }

    #[test]
    fn stddev_of_constant_series_is_zero() {
        let values = vec![dec!(5); 10];
        assert_eq!(stddev(&values, 10), Some(Decimal::ZERO));
    }
}
