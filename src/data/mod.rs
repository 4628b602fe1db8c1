use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::{DailySeries, SectorBar, SectorDef, SectorMember, SentimentDay};

/// Read side of the collaborator data contract: cleaned OHLCV bars, sector
/// membership, and daily sentiment aggregates. The engine never fetches
/// from the network; collectors land rows in the store and this trait reads
/// them back.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// All sectors with at least one member.
    async fn sectors(&self) -> EngineResult<Vec<SectorDef>>;

    /// Aggregated daily series for a sector, up to and including `until`.
    async fn sector_series(
        &self,
        sector: &SectorDef,
        until: NaiveDate,
    ) -> EngineResult<DailySeries>;

    /// Sector-level sentiment rows up to and including `until`, ascending.
    async fn sentiment(&self, sector: &str, until: NaiveDate)
        -> EngineResult<Vec<SentimentDay>>;
}

/// SQLite-backed provider over the feed landing tables.
pub struct SqliteMarketData {
    pool: SqlitePool,
}

impl SqliteMarketData {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Land one OHLCV bar. Collectors own these rows; re-landing a bar for
    /// the same (instrument, date) replaces it wholesale.
    pub async fn insert_bar(&self, instrument_id: &str, bar: &SectorBar) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sector_bars
                (instrument_id, date, open, high, low, close, volume, amount, turnover)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(instrument_id)
        .bind(bar.date.to_string())
        .bind(bar.open.to_string())
        .bind(bar.high.to_string())
        .bind(bar.low.to_string())
        .bind(bar.close.to_string())
        .bind(bar.volume.to_string())
        .bind(bar.amount.to_string())
        .bind(bar.turnover.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_member(
        &self,
        sector: &str,
        instrument_id: &str,
        valid_from: NaiveDate,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sector_members (sector, instrument_id, valid_from)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(sector)
        .bind(instrument_id)
        .bind(valid_from.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_sentiment(&self, scope: &str, day: &SentimentDay) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sentiment_daily
                (scope, date, sentiment_score, positive_ratio, mention_count)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(scope)
        .bind(day.date.to_string())
        .bind(day.sentiment_score)
        .bind(day.positive_ratio)
        .bind(day.mention_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_date(s: &str, scope: &str) -> EngineResult<NaiveDate> {
    NaiveDate::from_str(s).map_err(|_| EngineError::UpstreamData {
        scope: scope.to_string(),
        reason: format!("invalid date: {s}"),
    })
}

fn parse_decimal(s: &str, scope: &str) -> EngineResult<Decimal> {
    Decimal::from_str(s).map_err(|_| EngineError::UpstreamData {
        scope: scope.to_string(),
        reason: format!("invalid decimal: {s}"),
    })
}

#[async_trait]
impl MarketDataProvider for SqliteMarketData {
    async fn sectors(&self) -> EngineResult<Vec<SectorDef>> {
        let rows = sqlx::query(
            r#"
            SELECT sector, instrument_id, valid_from
            FROM sector_members
            ORDER BY sector, instrument_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_sector: BTreeMap<String, Vec<SectorMember>> = BTreeMap::new();
        for row in rows {
            let sector: String = row.get("sector");
            let valid_from: String = row.get("valid_from");
            by_sector.entry(sector).or_default().push(SectorMember {
                instrument_id: row.get("instrument_id"),
                valid_from: parse_date(&valid_from, "sector_members")?,
            });
        }

        Ok(by_sector
            .into_iter()
            .map(|(name, members)| SectorDef { name, members })
            .collect())
    }

    async fn sector_series(
        &self,
        sector: &SectorDef,
        until: NaiveDate,
    ) -> EngineResult<DailySeries> {
        // One bar list per date; the per-date mean over the members valid
        // as of that date forms the sector's derived series.
        let mut by_date: BTreeMap<NaiveDate, Vec<(String, SectorBar)>> = BTreeMap::new();

        for member in &sector.members {
            let rows = sqlx::query(
                r#"
                SELECT date, open, high, low, close, volume, amount, turnover
                FROM sector_bars
                WHERE instrument_id = ? AND date <= ?
                ORDER BY date ASC
                "#,
            )
            .bind(&member.instrument_id)
            .bind(until.to_string())
            .fetch_all(&self.pool)
            .await?;

            for row in rows {
                let date_str: String = row.get("date");
                let date = parse_date(&date_str, "sector_bars")?;
                let field = |name: &str| -> EngineResult<Decimal> {
                    parse_decimal(row.get(name), "sector_bars")
                };
                let bar = SectorBar {
                    date,
                    open: field("open")?,
                    high: field("high")?,
                    low: field("low")?,
                    close: field("close")?,
                    volume: field("volume")?,
                    amount: field("amount")?,
                    turnover: field("turnover")?,
                };
                by_date
                    .entry(date)
                    .or_default()
                    .push((member.instrument_id.clone(), bar));
            }
        }

        if by_date.is_empty() {
            return Err(EngineError::UpstreamData {
                scope: sector.name.clone(),
                reason: "no OHLCV bars for any member".to_string(),
            });
        }

        let mut series = DailySeries::new(sector.name.clone());
        for (date, bars) in by_date {
            let members = sector.members_as_of(date);
            let included: Vec<&SectorBar> = bars
                .iter()
                .filter(|(id, _)| members.contains(&id.as_str()))
                .map(|(_, bar)| bar)
                .collect();
            if included.is_empty() {
                continue;
            }
            series.push(aggregate(date, &included));
        }

        debug!(
            sector = %sector.name,
            days = series.len(),
            "sector series aggregated"
        );
        Ok(series)
    }

    async fn sentiment(
        &self,
        sector: &str,
        until: NaiveDate,
    ) -> EngineResult<Vec<SentimentDay>> {
        let rows = sqlx::query(
            r#"
            SELECT date, sentiment_score, positive_ratio, mention_count
            FROM sentiment_daily
            WHERE scope = ? AND date <= ?
            ORDER BY date ASC
            "#,
        )
        .bind(sector)
        .bind(until.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut days = Vec::with_capacity(rows.len());
        for row in rows {
            let date_str: String = row.get("date");
            days.push(SentimentDay {
                date: parse_date(&date_str, "sentiment_daily")?,
                sentiment_score: row.get("sentiment_score"),
                positive_ratio: row.get("positive_ratio"),
                mention_count: row.get::<i64, _>("mention_count").max(0) as u64,
            });
        }
        Ok(days)
    }
}

/// Equal-weight mean of the member bars for one date.
fn aggregate(date: NaiveDate, bars: &[&SectorBar]) -> SectorBar {
    let n = Decimal::from(bars.len() as u32);
    let mean = |f: fn(&SectorBar) -> Decimal| bars.iter().map(|b| f(b)).sum::<Decimal>() / n;

    SectorBar {
        date,
        open: mean(|b| b.open),
        high: mean(|b| b.high),
        low: mean(|b| b.low),
        close: mean(|b| b.close),
        volume: mean(|b| b.volume),
        amount: mean(|b| b.amount),
        turnover: mean(|b| b.turnover),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use rust_decimal_macros::dec;

    fn bar(date: NaiveDate, close: Decimal) -> SectorBar {
        SectorBar {
            date,
            open: close,
            high: close + dec!(1),
            low: close - dec!(1),
            close,
            volume: dec!(1000),
            amount: dec!(0),
            turnover: dec!(0),
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[tokio::test]
    async fn aggregates_member_bars_by_mean() {
        let pool = database::connect("sqlite::memory:").await.unwrap();
        let data = SqliteMarketData::new(pool);

        data.insert_member("Energy", "A", date(1)).await.unwrap();
        data.insert_member("Energy", "B", date(1)).await.unwrap();
        data.insert_bar("A", &bar(date(2), dec!(10))).await.unwrap();
        data.insert_bar("B", &bar(date(2), dec!(30))).await.unwrap();
        data.insert_bar("A", &bar(date(3), dec!(12))).await.unwrap();

        let sectors = data.sectors().await.unwrap();
        assert_eq!(sectors.len(), 1);

        let series = data.sector_series(&sectors[0], date(5)).await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars[0].close, dec!(20));
        // Only A has a bar on day 3.
        assert_eq!(series.bars[1].close, dec!(12));
    }

    #[tokio::test]
    async fn membership_valid_from_excludes_early_bars() {
        let pool = database::connect("sqlite::memory:").await.unwrap();
        let data = SqliteMarketData::new(pool);

        data.insert_member("Energy", "A", date(1)).await.unwrap();
        data.insert_member("Energy", "B", date(3)).await.unwrap();
        for d in [1, 2, 3, 4] {
            data.insert_bar("A", &bar(date(d), dec!(10))).await.unwrap();
            data.insert_bar("B", &bar(date(d), dec!(20))).await.unwrap();
        }

        let sectors = data.sectors().await.unwrap();
        let series = data.sector_series(&sectors[0], date(10)).await.unwrap();

        // Before B joins the sector mean is A alone.
        assert_eq!(series.bars[0].close, dec!(10));
        assert_eq!(series.bars[1].close, dec!(10));
        assert_eq!(series.bars[2].close, dec!(15));
        assert_eq!(series.bars[3].close, dec!(15));
    }

    #[tokio::test]
    async fn empty_feed_is_an_upstream_error() {
        let pool = database::connect("sqlite::memory:").await.unwrap();
        let data = SqliteMarketData::new(pool);
        data.insert_member("Energy", "A", date(1)).await.unwrap();

        let sectors = data.sectors().await.unwrap();
        let err = data.sector_series(&sectors[0], date(10)).await.unwrap_err();
        assert!(matches!(err, EngineError::UpstreamData { .. }));
    }

    #[tokio::test]
    async fn series_respects_until_cutoff() {
        let pool = database::connect("sqlite::memory:").await.unwrap();
        let data = SqliteMarketData::new(pool);

        data.insert_member("Energy", "A", date(1)).await.unwrap();
        for d in 1..=9 {
            data.insert_bar("A", &bar(date(d), dec!(10))).await.unwrap();
        }

        let sectors = data.sectors().await.unwrap();
        let series = data.sector_series(&sectors[0], date(5)).await.unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(series.last().unwrap().date, date(5));
    }

    #[tokio::test]
    async fn sentiment_rows_come_back_ascending() {
        let pool = database::connect("sqlite::memory:").await.unwrap();
        let data = SqliteMarketData::new(pool);

        for d in [3, 1, 2] {
            data.insert_sentiment(
                "Energy",
                &SentimentDay {
                    date: date(d),
                    sentiment_score: 0.1 * d as f64,
                    positive_ratio: 0.5,
                    mention_count: d as u64,
                },
            )
            .await
            .unwrap();
        }

        let days = data.sentiment("Energy", date(10)).await.unwrap();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].date, date(1));
        assert_eq!(days[2].date, date(3));
        assert!(data.sentiment("Tech", date(10)).await.unwrap().is_empty());
    }
}
