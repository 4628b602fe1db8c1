use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::indicators::{compute_frame, IndicatorFrame};
use crate::types::{DailySeries, SentimentDay};

/// Trailing window (rows) for the sentiment volatility feature.
const SENTIMENT_VOL_WINDOW: usize = 7;

/// Fixed-size feature vector for sector prediction.
///
/// The layout is frozen per model version: models persist the scaler over
/// exactly these columns, so adding a feature means retraining everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub ma5: f64,
    pub ma10: f64,
    pub ma20: f64,
    pub ma30: f64,
    pub ma60: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub kdj_k: f64,
    pub kdj_d: f64,
    pub kdj_j: f64,
    pub boll_upper: f64,
    pub boll_mid: f64,
    pub boll_lower: f64,
    pub wr: f64,
    pub sentiment_score: f64,
    pub sentiment_positive_ratio: f64,
    pub sentiment_volatility: f64,
    pub price_position: f64,
    pub momentum: f64,
    pub trend_strength: f64,
    pub volume_ratio: f64,
}

impl FeatureVector {
    pub const NUM_FEATURES: usize = 23;

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [
            self.ma5,
            self.ma10,
            self.ma20,
            self.ma30,
            self.ma60,
            self.rsi,
            self.macd,
            self.macd_signal,
            self.macd_histogram,
            self.kdj_k,
            self.kdj_d,
            self.kdj_j,
            self.boll_upper,
            self.boll_mid,
            self.boll_lower,
            self.wr,
            self.sentiment_score,
            self.sentiment_positive_ratio,
            self.sentiment_volatility,
            self.price_position,
            self.momentum,
            self.trend_strength,
            self.volume_ratio,
        ]
    }
}

/// One (sector, date) row of the feature table. `target` is the next-day
/// fractional change, `None` until that day has closed.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub sector: String,
    pub date: NaiveDate,
    pub features: FeatureVector,
    pub target: Option<f64>,
}

/// Builds the per-sector feature table from a daily series and its
/// sentiment feed.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    min_history_days: usize,
}

impl FeatureBuilder {
    pub fn new(min_history_days: usize) -> Self {
        Self { min_history_days }
    }

    /// Produce one feature row per bar of the series.
    ///
    /// The row count always equals the series length; indicator warmup rows
    /// are neutral-filled upstream, never dropped, so rows stay aligned with
    /// their targets. Sectors shorter than the configured minimum history
    /// fail with `InsufficientData`.
    pub fn build(
        &self,
        series: &DailySeries,
        sentiment: &[SentimentDay],
    ) -> EngineResult<Vec<FeatureRow>> {
        if series.len() < self.min_history_days {
            return Err(EngineError::InsufficientData {
                sector: series.sector.clone(),
                rows: series.len(),
                required: self.min_history_days,
            });
        }

        let frame = compute_frame(series);
        let by_date: HashMap<NaiveDate, &SentimentDay> =
            sentiment.iter().map(|s| (s.date, s)).collect();

        let n = series.len();
        let mut scores = Vec::with_capacity(n);
        let mut rows = Vec::with_capacity(n);

        for (t, bar) in series.bars.iter().enumerate() {
            let neutral = SentimentDay::neutral(bar.date);
            let day = by_date.get(&bar.date).copied().unwrap_or(&neutral);
            let score = day.sentiment_score;
            let positive_ratio = day.positive_ratio;
            scores.push(score);

            let features = FeatureVector {
                ma5: frame.ma5[t],
                ma10: frame.ma10[t],
                ma20: frame.ma20[t],
                ma30: frame.ma30[t],
                ma60: frame.ma60[t],
                rsi: frame.rsi[t],
                macd: frame.macd[t],
                macd_signal: frame.macd_signal[t],
                macd_histogram: frame.macd_histogram[t],
                kdj_k: frame.kdj_k[t],
                kdj_d: frame.kdj_d[t],
                kdj_j: frame.kdj_j[t],
                boll_upper: frame.boll_upper[t],
                boll_mid: frame.boll_mid[t],
                boll_lower: frame.boll_lower[t],
                wr: frame.wr[t],
                sentiment_score: score,
                sentiment_positive_ratio: positive_ratio,
                sentiment_volatility: trailing_std(&scores, SENTIMENT_VOL_WINDOW),
                price_position: ratio_offset(frame.close[t], frame.ma20[t]),
                momentum: momentum(&frame, t),
                trend_strength: trend_strength(&frame, t),
                volume_ratio: safe_ratio(frame.volume[t], frame.volume_ma20[t], 1.0),
            };

            rows.push(FeatureRow {
                sector: series.sector.clone(),
                date: bar.date,
                features,
                target: target(&frame, t),
            });
        }

        debug!(
            sector = %series.sector,
            rows = rows.len(),
            "feature table built"
        );

        Ok(rows)
    }
}

/// `(value − base) / base`, 0 when the base is unusable.
fn ratio_offset(value: f64, base: f64) -> f64 {
    if base == 0.0 {
        return 0.0;
    }
    (value - base) / base
}

fn safe_ratio(numerator: f64, denominator: f64, neutral: f64) -> f64 {
    if denominator == 0.0 {
        return neutral;
    }
    numerator / denominator
}

/// 5-day price momentum: `close[t] / close[t−5] − 1`.
fn momentum(frame: &IndicatorFrame, t: usize) -> f64 {
    if t < 5 {
        return 0.0;
    }
    let prev = frame.close[t - 5];
    if prev == 0.0 {
        return 0.0;
    }
    frame.close[t] / prev - 1.0
}

/// Sign/magnitude composite of the MA5 vs MA20 vs MA60 ordering: the mean of
/// the two adjacent relative spreads. Positive when the short averages sit
/// above the long ones.
fn trend_strength(frame: &IndicatorFrame, t: usize) -> f64 {
    let short = ratio_offset(frame.ma5[t], frame.ma20[t]);
    let long = ratio_offset(frame.ma20[t], frame.ma60[t]);
    (short + long) / 2.0
}

/// Next-day fractional change, `None` at the series tail or for a zero
/// close.
fn target(frame: &IndicatorFrame, t: usize) -> Option<f64> {
    if t + 1 >= frame.len() || frame.close[t] == 0.0 {
        return None;
    }
    Some((frame.close[t + 1] - frame.close[t]) / frame.close[t])
}

/// Population standard deviation of the trailing `window` values.
fn trailing_std(values: &[f64], window: usize) -> f64 {
    let start = values.len().saturating_sub(window);
    let slice = &values[start..];
    if slice.len() < 2 {
        return 0.0;
    }
    let n = slice.len() as f64;
    let mean = slice.iter().sum::<f64>() / n;
    let variance = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
