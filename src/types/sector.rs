use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A named grouping of instruments whose aggregate daily performance is
/// modeled. Membership may change over time; `valid_from` marks when an
/// instrument joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorDef {
    pub name: String,
    pub members: Vec<SectorMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorMember {
    pub instrument_id: String,
    pub valid_from: NaiveDate,
}

impl SectorDef {
    /// Instrument ids that belong to the sector as of `date`.
    pub fn members_as_of(&self, date: NaiveDate) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.valid_from <= date)
            .map(|m| m.instrument_id.as_str())
            .collect()
    }
}

/// One day of aggregated sentiment for a sector or instrument.
///
/// `sentiment_score` follows the upstream scraper's [-1, 1] convention;
/// `positive_ratio` is the share of positive mentions in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentDay {
    pub date: NaiveDate,
    pub sentiment_score: f64,
    pub positive_ratio: f64,
    pub mention_count: u64,
}

impl SentimentDay {
    /// The neutral aggregate used for days with no sentiment coverage.
    pub fn neutral(date: NaiveDate) -> Self {
        Self {
            date,
            sentiment_score: 0.0,
            positive_ratio: 0.5,
            mention_count: 0,
        }
    }
}
