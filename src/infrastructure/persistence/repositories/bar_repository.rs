use crate::domain::market::{Bar, Timeframe};
use crate::domain::repositories::BarRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct SqliteBarRepository {
    database: Database,
}

impl SqliteBarRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn table(frame: Timeframe) -> Result<&'static str> {
        match frame {
            Timeframe::OneMin => Ok("bars_1m"),
            Timeframe::OneHour => Ok("bars_1h"),
            other => bail!("frame {} is not persisted durably", other),
        }
    }
}

type BarRow = (String, i64, String, String, String, String, String, i64, String);

fn row_to_bar(row: BarRow) -> Bar {
    let (symbol, bar_ts, open, high, low, close, volume, trades_count, vwap) = row;
    Bar {
        symbol,
        open: Decimal::from_str(&open).unwrap_or_default(),
        high: Decimal::from_str(&high).unwrap_or_default(),
        low: Decimal::from_str(&low).unwrap_or_default(),
        close: Decimal::from_str(&close).unwrap_or_default(),
        volume: Decimal::from_str(&volume).unwrap_or_default(),
        trades_count: trades_count as u32,
        vwap: Decimal::from_str(&vwap).unwrap_or_default(),
        bar_ts,
    }
}

#[async_trait]
impl BarRepository for SqliteBarRepository {
    async fn save(&self, frame: Timeframe, bar: &Bar) -> Result<()> {
        let table = Self::table(frame)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (symbol, bar_ts, open, high, low, close, volume, trades_count, vwap)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT(symbol, bar_ts) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                trades_count = excluded.trades_count,
                vwap = excluded.vwap
            "#
        ))
        .bind(&bar.symbol)
        .bind(bar.bar_ts)
        .bind(bar.open.to_string())
        .bind(bar.high.to_string())
        .bind(bar.low.to_string())
        .bind(bar.close.to_string())
        .bind(bar.volume.to_string())
        .bind(i64::from(bar.trades_count))
        .bind(bar.vwap.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to save bar")?;
        Ok(())
    }

    async fn bars_range(
        &self,
        symbol: &str,
        frame: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<Bar>> {
        let table = Self::table(frame)?;
        let rows = sqlx::query_as::<_, BarRow>(&format!(
            r#"
            SELECT symbol, bar_ts, open, high, low, close, volume, trades_count, vwap
            FROM {table}
            WHERE symbol = $1 AND bar_ts >= $2 AND bar_ts < $3
            ORDER BY bar_ts ASC
            "#
        ))
        .bind(symbol)
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load bar range")?;
        Ok(rows.into_iter().map(row_to_bar).collect())
    }

    async fn latest_bars(&self, symbol: &str, frame: Timeframe, limit: usize) -> Result<Vec<Bar>> {
        let table = Self::table(frame)?;
        let rows = sqlx::query_as::<_, BarRow>(&format!(
            r#"
            SELECT symbol, bar_ts, open, high, low, close, volume, trades_count, vwap
            FROM {table}
            WHERE symbol = $1
            ORDER BY bar_ts DESC
            LIMIT $2
            "#
        ))
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load latest bars")?;

        let mut bars: Vec<Bar> = rows.into_iter().map(row_to_bar).collect();
        bars.reverse();
        Ok(bars)
    }
}
