use rust_decimal::Decimal;

use crate::types::DailySeries;

use super::{BollingerBands, Kdj, Macd, RollingMean, Rsi, WilliamsR};

/// Same-length indicator columns for one sector series.
///
/// Every column has exactly one value per input bar, computed from bars up
/// to and including that row's date. Rows inside an indicator's warmup
/// window carry that indicator's neutral constant instead of being dropped,
/// so the frame stays aligned with the series and its targets.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub ma5: Vec<f64>,
    pub ma10: Vec<f64>,
    pub ma20: Vec<f64>,
    pub ma30: Vec<f64>,
    pub ma60: Vec<f64>,
    pub rsi: Vec<f64>,
    pub macd: Vec<f64>,
    pub macd_signal: Vec<f64>,
    pub macd_histogram: Vec<f64>,
    pub kdj_k: Vec<f64>,
    pub kdj_d: Vec<f64>,
    pub kdj_j: Vec<f64>,
    pub boll_upper: Vec<f64>,
    pub boll_mid: Vec<f64>,
    pub boll_lower: Vec<f64>,
    pub wr: Vec<f64>,
    pub volume_ma20: Vec<f64>,
}

impl IndicatorFrame {
    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }
}

fn to_f64(value: Decimal, fallback: f64) -> f64 {
    value.try_into().unwrap_or(fallback)
}

fn or_neutral(value: Option<Decimal>, neutral: f64) -> f64 {
    value.map(|v| to_f64(v, neutral)).unwrap_or(neutral)
}

/// Drive the full indicator set across a daily series.
///
/// Neutral constants while warming up (and for flat-range denominators):
/// MA columns and Bollinger bands fall back to the row's close, RSI and
/// KDJ to 50, MACD columns to 0, Williams %R to −50, and the volume
/// average to the row's own volume.
pub fn compute_frame(series: &DailySeries) -> IndicatorFrame {
    let n = series.len();
    let mut frame = IndicatorFrame {
        close: Vec::with_capacity(n),
        volume: Vec::with_capacity(n),
        ma5: Vec::with_capacity(n),
        ma10: Vec::with_capacity(n),
        ma20: Vec::with_capacity(n),
        ma30: Vec::with_capacity(n),
        ma60: Vec::with_capacity(n),
        rsi: Vec::with_capacity(n),
        macd: Vec::with_capacity(n),
        macd_signal: Vec::with_capacity(n),
        macd_histogram: Vec::with_capacity(n),
        kdj_k: Vec::with_capacity(n),
        kdj_d: Vec::with_capacity(n),
        kdj_j: Vec::with_capacity(n),
        boll_upper: Vec::with_capacity(n),
        boll_mid: Vec::with_capacity(n),
        boll_lower: Vec::with_capacity(n),
        wr: Vec::with_capacity(n),
        volume_ma20: Vec::with_capacity(n),
    };

    let mut ma5 = RollingMean::new(5);
    let mut ma10 = RollingMean::new(10);
    let mut ma20 = RollingMean::new(20);
    let mut ma30 = RollingMean::new(30);
    let mut ma60 = RollingMean::new(60);
    let mut rsi = Rsi::new(14);
    let mut macd = Macd::default_params();
    let mut kdj = Kdj::default_params();
    let mut boll = BollingerBands::default_params();
    let mut wr = WilliamsR::default_params();
    let mut vol_ma20 = RollingMean::new(20);

    for bar in &series.bars {
        let close = to_f64(bar.close, 0.0);
        let volume = to_f64(bar.volume, 0.0);

        frame.close.push(close);
        frame.volume.push(volume);

        frame.ma5.push(or_neutral(ma5.update(bar.close), close));
        frame.ma10.push(or_neutral(ma10.update(bar.close), close));
        frame.ma20.push(or_neutral(ma20.update(bar.close), close));
        frame.ma30.push(or_neutral(ma30.update(bar.close), close));
        frame.ma60.push(or_neutral(ma60.update(bar.close), close));

        frame.rsi.push(or_neutral(rsi.update(bar.close), 50.0));

        match macd.update(bar.close) {
            Some(out) => {
                frame.macd.push(to_f64(out.macd_line, 0.0));
                frame.macd_signal.push(to_f64(out.signal_line, 0.0));
                frame.macd_histogram.push(to_f64(out.histogram, 0.0));
            }
            None => {
                frame.macd.push(0.0);
                frame.macd_signal.push(0.0);
                frame.macd_histogram.push(0.0);
            }
        }

        match kdj.update(bar.high, bar.low, bar.close) {
            Some(out) => {
                frame.kdj_k.push(to_f64(out.k, 50.0));
                frame.kdj_d.push(to_f64(out.d, 50.0));
                frame.kdj_j.push(to_f64(out.j, 50.0));
            }
            None => {
                frame.kdj_k.push(50.0);
                frame.kdj_d.push(50.0);
                frame.kdj_j.push(50.0);
            }
        }

        match boll.update(bar.close) {
            Some(out) => {
                frame.boll_upper.push(to_f64(out.upper, close));
                frame.boll_mid.push(to_f64(out.middle, close));
                frame.boll_lower.push(to_f64(out.lower, close));
            }
            None => {
                frame.boll_upper.push(close);
                frame.boll_mid.push(close);
                frame.boll_lower.push(close);
            }
        }

        frame.wr.push(or_neutral(wr.update(bar.high, bar.low, bar.close), -50.0));
        frame.volume_ma20.push(or_neutral(vol_ma20.update(bar.volume), volume));
    }

    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SectorBar;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn series(closes: &[i64]) -> DailySeries {
        let mut s = DailySeries::new("Energy");
        for (i, c) in closes.iter().enumerate() {
            let close = Decimal::from(*c);
            s.push(SectorBar {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close,
                high: close + dec!(1),
                low: close - dec!(1),
                close,
                volume: dec!(1000),
                amount: dec!(0),
                turnover: dec!(0),
            });
        }
        s
    }

    #[test]
    fn columns_match_series_length() {
        let s = series(&(1..=70).collect::<Vec<_>>());
        let frame = compute_frame(&s);
        assert_eq!(frame.len(), 70);
        assert_eq!(frame.ma60.len(), 70);
        assert_eq!(frame.wr.len(), 70);
        assert_eq!(frame.kdj_j.len(), 70);
    }

    #[test]
    fn warmup_rows_carry_neutral_values() {
        let s = series(&[10, 11, 12]);
        let frame = compute_frame(&s);
        // Too short for any window: MAs echo the close, oscillators neutral.
        assert_eq!(frame.ma20[2], 12.0);
        assert_eq!(frame.rsi[0], 50.0);
        assert_eq!(frame.macd[2], 0.0);
        assert_eq!(frame.kdj_k[1], 50.0);
        assert_eq!(frame.wr[2], -50.0);
        assert_eq!(frame.volume_ma20[1], 1000.0);
    }

    #[test]
    fn deterministic_across_runs() {
        let s = series(&(1..=90).map(|i| 100 + (i * 7) % 13).collect::<Vec<_>>());
        let a = compute_frame(&s);
        let b = compute_frame(&s);
        assert_eq!(a.rsi, b.rsi);
        assert_eq!(a.macd_histogram, b.macd_histogram);
        assert_eq!(a.kdj_j, b.kdj_j);
        assert_eq!(a.boll_upper, b.boll_upper);
    }

    #[test]
    fn no_look_ahead_in_prefix() {
        // Columns for the first k rows must not change when later bars are
        // appended.
        let full = series(&(1..=80).map(|i| 50 + (i * 3) % 11).collect::<Vec<_>>());
        let prefix = DailySeries {
            sector: full.sector.clone(),
            bars: full.bars[..40].to_vec(),
        };
        let frame_full = compute_frame(&full);
        let frame_prefix = compute_frame(&prefix);
        assert_eq!(&frame_full.rsi[..40], &frame_prefix.rsi[..]);
        assert_eq!(&frame_full.ma20[..40], &frame_prefix.ma20[..]);
        assert_eq!(&frame_full.kdj_k[..40], &frame_prefix.kdj_k[..]);
    }
}
