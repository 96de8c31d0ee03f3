use crate::domain::market::{Ranking, SymbolMeta};
use crate::domain::repositories::{RankingRepository, SymbolRepository};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct SqliteRankingRepository {
    database: Database,
}

impl SqliteRankingRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RankingRepository for SqliteRankingRepository {
    async fn save_run(&self, rankings: &[Ranking]) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self.database.pool.begin().await?;
        for ranking in rankings {
            sqlx::query(
                r#"
                INSERT INTO rankings (run_id, symbol_id, rank, score, cluster_number, created_at_ms)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT(run_id, symbol_id) DO UPDATE SET
                    rank = excluded.rank,
                    score = excluded.score,
                    cluster_number = excluded.cluster_number
                "#,
            )
            .bind(&ranking.run_id)
            .bind(&ranking.symbol_id)
            .bind(i64::from(ranking.rank))
            .bind(ranking.score.to_string())
            .bind(ranking.cluster_number.map(i64::from))
            .bind(now_ms)
            .execute(&mut *tx)
            .await
            .context("Failed to save ranking row")?;
        }
        tx.commit().await.context("Failed to commit ranking run")?;
        Ok(())
    }

    async fn latest_run(&self) -> Result<Vec<Ranking>> {
        let latest: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT run_id FROM rankings
            ORDER BY created_at_ms DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to find latest run")?;

        let Some((run_id,)) = latest else {
            return Ok(Vec::new());
        };

        let rows: Vec<(String, String, i64, String, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT run_id, symbol_id, rank, score, cluster_number
            FROM rankings
            WHERE run_id = $1
            ORDER BY rank ASC
            "#,
        )
        .bind(&run_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load latest run")?;

        Ok(rows
            .into_iter()
            .map(|(run_id, symbol_id, rank, score, cluster)| Ranking {
                run_id,
                symbol_id,
                rank: rank as u32,
                score: Decimal::from_str(&score).unwrap_or_default(),
                cluster_number: cluster.map(|c| c as u32),
            })
            .collect())
    }
}

pub struct SqliteSymbolRepository {
    database: Database,
}

impl SqliteSymbolRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

type SymbolRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
);

fn row_to_symbol(row: SymbolRow) -> SymbolMeta {
    let (
        id,
        exchange_symbol,
        display_symbol,
        volume_24h_usd,
        spread_mid_pct,
        depth_top10_usd,
        atr_daily_pct,
        real_volume_ratio,
        is_active,
    ) = row;
    SymbolMeta {
        id,
        exchange_symbol,
        display_symbol,
        volume_24h_usd: Decimal::from_str(&volume_24h_usd).unwrap_or_default(),
        spread_mid_pct: Decimal::from_str(&spread_mid_pct).unwrap_or_default(),
        depth_top10_usd: Decimal::from_str(&depth_top10_usd).unwrap_or_default(),
        atr_daily_pct: Decimal::from_str(&atr_daily_pct).unwrap_or_default(),
        real_volume_ratio: real_volume_ratio
            .as_deref()
            .and_then(|v| Decimal::from_str(v).ok()),
        is_active: is_active != 0,
    }
}

#[async_trait]
impl SymbolRepository for SqliteSymbolRepository {
    async fn upsert(&self, meta: &SymbolMeta) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO symbols (
                id, exchange_symbol, display_symbol, volume_24h_usd, spread_mid_pct,
                depth_top10_usd, atr_daily_pct, real_volume_ratio, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT(id) DO UPDATE SET
                volume_24h_usd = excluded.volume_24h_usd,
                spread_mid_pct = excluded.spread_mid_pct,
                depth_top10_usd = excluded.depth_top10_usd,
                atr_daily_pct = excluded.atr_daily_pct,
                real_volume_ratio = excluded.real_volume_ratio,
                is_active = excluded.is_active
            "#,
        )
        .bind(&meta.id)
        .bind(&meta.exchange_symbol)
        .bind(&meta.display_symbol)
        .bind(meta.volume_24h_usd.to_string())
        .bind(meta.spread_mid_pct.to_string())
        .bind(meta.depth_top10_usd.to_string())
        .bind(meta.atr_daily_pct.to_string())
        .bind(meta.real_volume_ratio.map(|v| v.to_string()))
        .bind(i64::from(meta.is_active))
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert symbol")?;
        Ok(())
    }

    async fn active_symbols(&self) -> Result<Vec<SymbolMeta>> {
        let rows = sqlx::query_as::<_, SymbolRow>(
            r#"
            SELECT id, exchange_symbol, display_symbol, volume_24h_usd, spread_mid_pct,
                   depth_top10_usd, atr_daily_pct, real_volume_ratio, is_active
            FROM symbols
            WHERE is_active = 1
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load active symbols")?;
        Ok(rows.into_iter().map(row_to_symbol).collect())
    }

    async fn set_active(&self, symbol_id: &str, active: bool) -> Result<()> {
        sqlx::query("UPDATE symbols SET is_active = $1 WHERE id = $2")
            .bind(i64::from(active))
            .bind(symbol_id)
            .execute(&self.database.pool)
            .await
            .context("Failed to update symbol active flag")?;
        Ok(())
    }
}
