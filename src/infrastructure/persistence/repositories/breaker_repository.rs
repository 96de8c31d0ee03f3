use crate::domain::repositories::{BreakerEventRepository, BreakerRepository};
use crate::domain::risk::{Breaker, BreakerEvent};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct SqliteBreakerRepository {
    database: Database,
}

impl SqliteBreakerRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

type BreakerRow = (
    String,
    String,
    i64,
    Option<String>,
    i64,
    String,
    String,
    Option<i64>,
    Option<i64>,
);

#[async_trait]
impl BreakerRepository for SqliteBreakerRepository {
    async fn upsert(&self, campaign_id: &str, breaker: &Breaker) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO breakers (
                scope_key, campaign_id, level, is_triggered, trigger_reason,
                consecutive_losses, cumulative_loss, window_pnl, triggered_at_ms,
                auto_reset_at_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(scope_key) DO UPDATE SET
                is_triggered = excluded.is_triggered,
                trigger_reason = excluded.trigger_reason,
                consecutive_losses = excluded.consecutive_losses,
                cumulative_loss = excluded.cumulative_loss,
                window_pnl = excluded.window_pnl,
                triggered_at_ms = excluded.triggered_at_ms,
                auto_reset_at_ms = excluded.auto_reset_at_ms
            "#,
        )
        .bind(&breaker.scope_key)
        .bind(campaign_id)
        .bind(breaker.level.to_string())
        .bind(i64::from(breaker.is_triggered))
        .bind(&breaker.trigger_reason)
        .bind(i64::from(breaker.consecutive_losses))
        .bind(breaker.cumulative_loss.to_string())
        .bind(breaker.window_pnl.to_string())
        .bind(breaker.triggered_at_ms)
        .bind(breaker.auto_reset_at_ms)
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert breaker")?;
        Ok(())
    }

    async fn load_all(&self, campaign_id: &str) -> Result<Vec<Breaker>> {
        let rows = sqlx::query_as::<_, BreakerRow>(
            r#"
            SELECT scope_key, level, is_triggered, trigger_reason, consecutive_losses,
                   cumulative_loss, window_pnl, triggered_at_ms, auto_reset_at_ms
            FROM breakers
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load breakers")?;

        Ok(rows
            .into_iter()
            .filter_map(
                |(
                    scope_key,
                    level,
                    is_triggered,
                    trigger_reason,
                    consecutive_losses,
                    cumulative_loss,
                    window_pnl,
                    triggered_at_ms,
                    auto_reset_at_ms,
                )| {
                    Some(Breaker {
                        scope_key,
                        level: level.parse().ok()?,
                        is_triggered: is_triggered != 0,
                        trigger_reason,
                        consecutive_losses: consecutive_losses as u32,
                        cumulative_loss: Decimal::from_str(&cumulative_loss).unwrap_or_default(),
                        window_pnl: Decimal::from_str(&window_pnl).unwrap_or_default(),
                        triggered_at_ms,
                        auto_reset_at_ms,
                    })
                },
            )
            .collect())
    }
}

pub struct SqliteBreakerEventRepository {
    database: Database,
}

impl SqliteBreakerEventRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl BreakerEventRepository for SqliteBreakerEventRepository {
    async fn append(&self, event: &BreakerEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO breaker_events (
                campaign_id, level, breaker_key, event_type, reason, metadata_json,
                created_at_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&event.campaign_id)
        .bind(event.level.to_string())
        .bind(&event.breaker_key)
        .bind(event.event_type.to_string())
        .bind(&event.reason)
        .bind(serde_json::to_string(&event.metadata)?)
        .bind(event.created_at_ms)
        .execute(&self.database.pool)
        .await
        .context("Failed to append breaker event")?;
        Ok(())
    }

    async fn recent(&self, campaign_id: &str, limit: usize) -> Result<Vec<BreakerEvent>> {
        let rows: Vec<(String, String, String, String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT campaign_id, level, breaker_key, event_type, reason, metadata_json,
                   created_at_ms
            FROM breaker_events
            WHERE campaign_id = $1
            ORDER BY created_at_ms DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(campaign_id)
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load breaker events")?;

        Ok(rows
            .into_iter()
            .filter_map(
                |(campaign_id, level, breaker_key, event_type, reason, metadata, created_at_ms)| {
                    let event_type = match event_type.as_str() {
                        "triggered" => crate::domain::risk::BreakerEventType::Triggered,
                        "reset" => crate::domain::risk::BreakerEventType::Reset,
                        "auto_reset" => crate::domain::risk::BreakerEventType::AutoReset,
                        _ => return None,
                    };
                    Some(BreakerEvent {
                        campaign_id,
                        level: level.parse().ok()?,
                        breaker_key,
                        event_type,
                        reason,
                        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
                        created_at_ms,
                    })
                },
            )
            .collect())
    }
}
