use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One daily OHLCV bar for an instrument or an aggregated sector.
///
/// Immutable once stored; keyed by (instrument, date), ascending by date
/// within a series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub amount: Decimal,
    pub turnover: Decimal,
}

/// Ordered daily series for one sector, ascending by date.
#[derive(Debug, Clone, Default)]
pub struct DailySeries {
    pub sector: String,
    pub bars: Vec<SectorBar>,
}

impl DailySeries {
    pub fn new(sector: impl Into<String>) -> Self {
        Self {
            sector: sector.into(),
            bars: Vec::new(),
        }
    }

    /// Append a bar, keeping the series ordered. Out-of-order or duplicate
    /// dates are rejected so downstream indicator passes can trust ordering.
    pub fn push(&mut self, bar: SectorBar) -> bool {
        if let Some(last) = self.bars.last() {
            if bar.date <= last.date {
                return false;
            }
        }
        self.bars.push(bar);
        true
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&SectorBar> {
        self.bars.last()
    }
}
