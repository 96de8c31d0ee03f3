use crate::domain::repositories::CampaignRepository;
use crate::domain::risk::{Campaign, CampaignRiskState, DailyReport};
use crate::domain::trading::types::SignalConfig;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct SqliteCampaignRepository {
    database: Database,
}

impl SqliteCampaignRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Seed used by operators to create a campaign from the CLI or tests.
    pub async fn create(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, name, status, investor_profile, initial_capital, max_open_positions,
                max_loss_per_pair_r, daily_loss_limit_pct, max_drawdown_pct,
                cooldown_minutes_after_cb
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                investor_profile = excluded.investor_profile
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.name)
        .bind(campaign.status.to_string())
        .bind(campaign.investor_profile.to_string())
        .bind(campaign.initial_capital.to_string())
        .bind(campaign.max_open_positions as i64)
        .bind(campaign.max_loss_per_pair_r.to_string())
        .bind(campaign.daily_loss_limit_pct.to_string())
        .bind(campaign.max_drawdown_pct.to_string())
        .bind(campaign.cooldown_minutes_after_cb)
        .execute(&self.database.pool)
        .await
        .context("Failed to create campaign")?;
        Ok(())
    }
}

type CampaignRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    i64,
);

fn row_to_campaign(row: CampaignRow) -> Option<Campaign> {
    let (
        id,
        name,
        status,
        investor_profile,
        initial_capital,
        max_open_positions,
        max_loss_per_pair_r,
        daily_loss_limit_pct,
        max_drawdown_pct,
        cooldown_minutes_after_cb,
    ) = row;
    Some(Campaign {
        id,
        name,
        status: status.parse().ok()?,
        investor_profile: investor_profile.parse().ok()?,
        initial_capital: Decimal::from_str(&initial_capital).ok()?,
        max_open_positions: max_open_positions as usize,
        max_loss_per_pair_r: Decimal::from_str(&max_loss_per_pair_r).unwrap_or_default(),
        daily_loss_limit_pct: Decimal::from_str(&daily_loss_limit_pct).unwrap_or_default(),
        max_drawdown_pct: Decimal::from_str(&max_drawdown_pct).unwrap_or_default(),
        cooldown_minutes_after_cb,
    })
}

#[async_trait]
impl CampaignRepository for SqliteCampaignRepository {
    async fn active_campaigns(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT id, name, status, investor_profile, initial_capital, max_open_positions,
                   max_loss_per_pair_r, daily_loss_limit_pct, max_drawdown_pct,
                   cooldown_minutes_after_cb
            FROM campaigns
            WHERE status = 'active'
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load active campaigns")?;
        Ok(rows.into_iter().filter_map(row_to_campaign).collect())
    }

    async fn update_status(&self, campaign_id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE campaigns SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(campaign_id)
            .execute(&self.database.pool)
            .await
            .context("Failed to update campaign status")?;
        Ok(())
    }

    async fn load_risk_state(&self, campaign_id: &str) -> Result<Option<CampaignRiskState>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state_json FROM campaign_risk_states WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_optional(&self.database.pool)
                .await
                .context("Failed to load risk state")?;

        Ok(row.and_then(|(json,)| serde_json::from_str(&json).ok()))
    }

    async fn save_risk_state(&self, state: &CampaignRiskState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_risk_states (campaign_id, state_json, updated_at_ms)
            VALUES ($1, $2, $3)
            ON CONFLICT(campaign_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(&state.campaign_id)
        .bind(serde_json::to_string(state)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.database.pool)
        .await
        .context("Failed to save risk state")?;
        Ok(())
    }

    async fn signal_config(
        &self,
        campaign_id: &str,
        symbol: &str,
    ) -> Result<Option<SignalConfig>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT config_json FROM signal_configs WHERE campaign_id = $1 AND symbol = $2",
        )
        .bind(campaign_id)
        .bind(symbol)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load signal config")?;

        Ok(row.and_then(|(json,)| serde_json::from_str(&json).ok()))
    }

    async fn save_daily_report(&self, report: &DailyReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_daily_reports (
                campaign_id, report_date, trades, hit_rate, payoff, expectancy_r,
                var95_r, es95_r, avg_slippage_bps, daily_pnl, created_at_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT(campaign_id, report_date) DO UPDATE SET
                trades = excluded.trades,
                hit_rate = excluded.hit_rate,
                payoff = excluded.payoff,
                expectancy_r = excluded.expectancy_r,
                var95_r = excluded.var95_r,
                es95_r = excluded.es95_r,
                avg_slippage_bps = excluded.avg_slippage_bps,
                daily_pnl = excluded.daily_pnl
            "#,
        )
        .bind(&report.campaign_id)
        .bind(report.report_date.to_string())
        .bind(i64::from(report.trades))
        .bind(report.hit_rate.map(|v| v.to_string()))
        .bind(report.payoff.map(|v| v.to_string()))
        .bind(report.expectancy_r.map(|v| v.to_string()))
        .bind(report.var95_r.map(|v| v.to_string()))
        .bind(report.es95_r.map(|v| v.to_string()))
        .bind(report.avg_slippage_bps.map(|v| v.to_string()))
        .bind(report.daily_pnl.to_string())
        .bind(report.created_at_ms)
        .execute(&self.database.pool)
        .await
        .context("Failed to save daily report")?;
        Ok(())
    }

    async fn daily_report(
        &self,
        campaign_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<DailyReport>> {
        let row: Option<(
            String,
            String,
            i64,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            String,
            i64,
        )> = sqlx::query_as(
            r#"
            SELECT campaign_id, report_date, trades, hit_rate, payoff, expectancy_r,
                   var95_r, es95_r, avg_slippage_bps, daily_pnl, created_at_ms
            FROM campaign_daily_reports
            WHERE campaign_id = $1 AND report_date = $2
            "#,
        )
        .bind(campaign_id)
        .bind(report_date.to_string())
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load daily report")?;

        let parse_opt = |v: Option<String>| v.as_deref().and_then(|s| Decimal::from_str(s).ok());

        Ok(row.and_then(
            |(
                campaign_id,
                report_date,
                trades,
                hit_rate,
                payoff,
                expectancy_r,
                var95_r,
                es95_r,
                avg_slippage_bps,
                daily_pnl,
                created_at_ms,
            )| {
                Some(DailyReport {
                    campaign_id,
                    report_date: report_date.parse().ok()?,
                    trades: trades as u32,
                    hit_rate: parse_opt(hit_rate),
                    payoff: parse_opt(payoff),
                    expectancy_r: parse_opt(expectancy_r),
                    var95_r: parse_opt(var95_r),
                    es95_r: parse_opt(es95_r),
                    avg_slippage_bps: parse_opt(avg_slippage_bps),
                    daily_pnl: Decimal::from_str(&daily_pnl).unwrap_or_default(),
                    created_at_ms,
                })
            },
        ))
    }
}
