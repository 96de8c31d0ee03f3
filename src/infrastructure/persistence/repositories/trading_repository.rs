//! Sqlite repositories for signals, orders, positions and trades.
//!
//! Position open/close run inside explicit transactions so the position
//! row, its OCO order rows and the trade row commit or roll back as one
//! unit.

use crate::domain::repositories::{
    OrderRepository, PositionRepository, SignalRepository, TradeRepository,
};
use crate::domain::trading::types::{
    Order, OrderStatus, Position, Signal, SignalStatus, Trade,
};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

fn decimal(row: &SqliteRow, column: &str) -> Decimal {
    row.try_get::<String, _>(column)
        .ok()
        .and_then(|s| Decimal::from_str(&s).ok())
        .unwrap_or_default()
}

fn opt_decimal(row: &SqliteRow, column: &str) -> Option<Decimal> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .and_then(|s| Decimal::from_str(&s).ok())
}

pub struct SqliteSignalRepository {
    database: Database,
}

impl SqliteSignalRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_signal(row: &SqliteRow) -> Result<Signal> {
    let config_json: String = row.try_get("config_json")?;
    Ok(Signal {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        symbol: row.try_get("symbol")?,
        signal_type: row.try_get::<String, _>("signal_type")?.parse()?,
        price_at_signal: decimal(row, "price_at_signal"),
        ema12: decimal(row, "ema12"),
        ema36: decimal(row, "ema36"),
        atr: decimal(row, "atr"),
        tp1: decimal(row, "tp1"),
        tp2: decimal(row, "tp2"),
        sl: decimal(row, "sl"),
        quantity: decimal(row, "quantity"),
        config_snapshot: serde_json::from_str(&config_json)
            .context("corrupt signal config snapshot")?,
        breaker_state: row.try_get("breaker_state")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at_ms: row.try_get("created_at_ms")?,
        executed_at_ms: row.try_get("executed_at_ms")?,
    })
}

#[async_trait]
impl SignalRepository for SqliteSignalRepository {
    async fn save(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals (
                id, campaign_id, symbol, signal_type, price_at_signal, ema12, ema36, atr,
                tp1, tp2, sl, quantity, config_json, breaker_state, status,
                created_at_ms, executed_at_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(&signal.id)
        .bind(&signal.campaign_id)
        .bind(&signal.symbol)
        .bind(signal.signal_type.to_string())
        .bind(signal.price_at_signal.to_string())
        .bind(signal.ema12.to_string())
        .bind(signal.ema36.to_string())
        .bind(signal.atr.to_string())
        .bind(signal.tp1.to_string())
        .bind(signal.tp2.to_string())
        .bind(signal.sl.to_string())
        .bind(signal.quantity.to_string())
        .bind(serde_json::to_string(&signal.config_snapshot)?)
        .bind(&signal.breaker_state)
        .bind(signal.status.to_string())
        .bind(signal.created_at_ms)
        .bind(signal.executed_at_ms)
        .execute(&self.database.pool)
        .await
        .context("Failed to save signal")?;
        Ok(())
    }

    async fn update_status(
        &self,
        signal_id: &str,
        status: SignalStatus,
        executed_at_ms: Option<i64>,
    ) -> Result<()> {
        sqlx::query("UPDATE signals SET status = $1, executed_at_ms = $2 WHERE id = $3")
            .bind(status.to_string())
            .bind(executed_at_ms)
            .bind(signal_id)
            .execute(&self.database.pool)
            .await
            .context("Failed to update signal status")?;
        Ok(())
    }

    async fn recent(&self, campaign_id: &str, limit: usize) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM signals
            WHERE campaign_id = $1
            ORDER BY created_at_ms DESC
            LIMIT $2
            "#,
        )
        .bind(campaign_id)
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load recent signals")?;
        rows.iter().map(row_to_signal).collect()
    }
}

pub struct SqliteOrderRepository {
    database: Database,
}

impl SqliteOrderRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_order(row: &SqliteRow) -> Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        symbol: row.try_get("symbol")?,
        side: row.try_get::<String, _>("side")?.parse()?,
        order_type: row.try_get::<String, _>("order_type")?.parse()?,
        quantity: decimal(row, "quantity"),
        price: opt_decimal(row, "price"),
        stop_price: opt_decimal(row, "stop_price"),
        status: row.try_get::<String, _>("status")?.parse()?,
        exchange_order_id: row.try_get("exchange_order_id")?,
        filled_qty: decimal(row, "filled_qty"),
        average_fill_price: opt_decimal(row, "average_fill_price"),
        oco_group_id: row.try_get("oco_group_id")?,
        created_at_ms: row.try_get("created_at_ms")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

async fn insert_order(
    executor: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
    order: &Order,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, campaign_id, symbol, side, order_type, quantity, price, stop_price,
            status, exchange_order_id, filled_qty, average_fill_price, oco_group_id,
            created_at_ms, updated_at_ms
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            exchange_order_id = excluded.exchange_order_id,
            filled_qty = excluded.filled_qty,
            average_fill_price = excluded.average_fill_price,
            updated_at_ms = excluded.updated_at_ms
        "#,
    )
    .bind(&order.id)
    .bind(&order.campaign_id)
    .bind(&order.symbol)
    .bind(order.side.to_string())
    .bind(order.order_type.to_string())
    .bind(order.quantity.to_string())
    .bind(order.price.map(|p| p.to_string()))
    .bind(order.stop_price.map(|p| p.to_string()))
    .bind(order.status.to_string())
    .bind(&order.exchange_order_id)
    .bind(order.filled_qty.to_string())
    .bind(order.average_fill_price.map(|p| p.to_string()))
    .bind(&order.oco_group_id)
    .bind(order.created_at_ms)
    .bind(order.updated_at_ms)
    .execute(executor)
    .await
    .context("Failed to insert order")?;
    Ok(())
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn save(&self, order: &Order) -> Result<()> {
        insert_order(&self.database.pool, order).await
    }

    async fn update(&self, order: &Order) -> Result<()> {
        insert_order(&self.database.pool, order).await
    }

    async fn find(&self, order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to find order")?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn open_orders(&self, campaign_id: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE campaign_id = $1 AND status IN ('pending', 'open', 'partially_filled')
            ORDER BY created_at_ms ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load open orders")?;
        rows.iter().map(row_to_order).collect()
    }

    async fn orders_in_group(&self, oco_group_id: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT * FROM orders WHERE oco_group_id = $1")
            .bind(oco_group_id)
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load OCO group")?;
        rows.iter().map(row_to_order).collect()
    }

    async fn set_status(&self, order_id: &str, status: OrderStatus) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
            .bind(status.to_string())
            .bind(order_id)
            .execute(&self.database.pool)
            .await
            .context("Failed to update order status")?;
        Ok(())
    }
}

pub struct SqlitePositionRepository {
    database: Database,
}

impl SqlitePositionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_position(row: &SqliteRow) -> Result<Position> {
    Ok(Position {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        symbol: row.try_get("symbol")?,
        side: row.try_get::<String, _>("side")?.parse()?,
        quantity: decimal(row, "quantity"),
        entry_price: decimal(row, "entry_price"),
        current_price: decimal(row, "current_price"),
        sl: decimal(row, "sl"),
        tp: decimal(row, "tp"),
        oco_group_id: row.try_get("oco_group_id")?,
        unrealized_pnl: decimal(row, "unrealized_pnl"),
        risk_amount: decimal(row, "risk_amount"),
        entry_slippage_bps: opt_decimal(row, "entry_slippage_bps"),
        opened_at_ms: row.try_get("opened_at_ms")?,
    })
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn open_position(
        &self,
        position: &Position,
        sl_order: &Order,
        tp_order: &Order,
    ) -> Result<()> {
        let mut tx = self.database.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, campaign_id, symbol, side, quantity, entry_price, current_price,
                sl, tp, oco_group_id, unrealized_pnl, risk_amount, entry_slippage_bps,
                opened_at_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&position.id)
        .bind(&position.campaign_id)
        .bind(&position.symbol)
        .bind(position.side.to_string())
        .bind(position.quantity.to_string())
        .bind(position.entry_price.to_string())
        .bind(position.current_price.to_string())
        .bind(position.sl.to_string())
        .bind(position.tp.to_string())
        .bind(&position.oco_group_id)
        .bind(position.unrealized_pnl.to_string())
        .bind(position.risk_amount.to_string())
        .bind(position.entry_slippage_bps.map(|s| s.to_string()))
        .bind(position.opened_at_ms)
        .execute(&mut *tx)
        .await
        .context("Failed to insert position")?;

        insert_order(&mut *tx, sl_order).await?;
        insert_order(&mut *tx, tp_order).await?;

        tx.commit().await.context("Failed to commit position open")?;
        Ok(())
    }

    async fn close_position(
        &self,
        position_id: &str,
        trade: &Trade,
        cancel_order_ids: &[String],
    ) -> Result<()> {
        let mut tx = self.database.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM positions WHERE id = $1")
            .bind(position_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete position")?;
        if deleted.rows_affected() == 0 {
            anyhow::bail!("position {} not found", position_id);
        }

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, campaign_id, symbol, side, entry_price, exit_price, quantity,
                realized_pnl, fees, risk_amount, entry_slippage_bps, opened_at_ms,
                closed_at_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.campaign_id)
        .bind(&trade.symbol)
        .bind(trade.side.to_string())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.realized_pnl.to_string())
        .bind(trade.fees.to_string())
        .bind(trade.risk_amount.to_string())
        .bind(trade.entry_slippage_bps.map(|s| s.to_string()))
        .bind(trade.opened_at_ms)
        .bind(trade.closed_at_ms)
        .execute(&mut *tx)
        .await
        .context("Failed to insert trade")?;

        for order_id in cancel_order_ids {
            sqlx::query("UPDATE orders SET status = 'cancelled' WHERE id = $1")
                .bind(order_id)
                .execute(&mut *tx)
                .await
                .context("Failed to cancel order")?;
        }

        tx.commit().await.context("Failed to commit position close")?;
        Ok(())
    }

    async fn open_positions(&self, campaign_id: &str) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            "SELECT * FROM positions WHERE campaign_id = $1 ORDER BY opened_at_ms ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load open positions")?;
        rows.iter().map(row_to_position).collect()
    }

    async fn find(&self, campaign_id: &str, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE campaign_id = $1 AND symbol = $2")
            .bind(campaign_id)
            .bind(symbol)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to find position")?;
        row.as_ref().map(row_to_position).transpose()
    }

    async fn update_mark(&self, position: &Position) -> Result<()> {
        sqlx::query(
            "UPDATE positions SET current_price = $1, unrealized_pnl = $2 WHERE id = $3",
        )
        .bind(position.current_price.to_string())
        .bind(position.unrealized_pnl.to_string())
        .bind(&position.id)
        .execute(&self.database.pool)
        .await
        .context("Failed to update position mark")?;
        Ok(())
    }
}

pub struct SqliteTradeRepository {
    database: Database,
}

impl SqliteTradeRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_trade(row: &SqliteRow) -> Result<Trade> {
    Ok(Trade {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        symbol: row.try_get("symbol")?,
        side: row.try_get::<String, _>("side")?.parse()?,
        entry_price: decimal(row, "entry_price"),
        exit_price: decimal(row, "exit_price"),
        quantity: decimal(row, "quantity"),
        realized_pnl: decimal(row, "realized_pnl"),
        fees: decimal(row, "fees"),
        risk_amount: decimal(row, "risk_amount"),
        entry_slippage_bps: opt_decimal(row, "entry_slippage_bps"),
        opened_at_ms: row.try_get("opened_at_ms")?,
        closed_at_ms: row.try_get("closed_at_ms")?,
    })
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn trades_between(
        &self,
        campaign_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE campaign_id = $1 AND closed_at_ms >= $2 AND closed_at_ms < $3
            ORDER BY closed_at_ms ASC
            "#,
        )
        .bind(campaign_id)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load trades")?;
        rows.iter().map(row_to_trade).collect()
    }

    async fn recent(&self, campaign_id: &str, limit: usize) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE campaign_id = $1
            ORDER BY closed_at_ms DESC
            LIMIT $2
            "#,
        )
        .bind(campaign_id)
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load recent trades")?;
        rows.iter().map(row_to_trade).collect()
    }
}
