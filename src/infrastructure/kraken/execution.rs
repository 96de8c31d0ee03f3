//! Live order execution.
//!
//! Orders are submitted over the signed REST API, then polled to a fill
//! at 500ms up to 10 attempts. On timeout the order is cancelled and
//! re-queried: any residual fill surfaces the distinguished
//! reconciliation error that halts the owning position flow.

use crate::domain::errors::ExecutionError;
use crate::domain::ports::ExecutionAdapter;
use crate::domain::trading::symbols::to_exchange_symbol;
use crate::domain::trading::types::{Order, OrderSide, OrderStatus, OrderType};
use crate::infrastructure::kraken::common::KrakenRestClient;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const FILL_POLL_ATTEMPTS: u32 = 10;
const FILL_POLL_INTERVAL_MS: u64 = 500;

pub struct KrakenExecutionService {
    rest: Arc<KrakenRestClient>,
    /// Local order templates by exchange txid, so query/cancel can return
    /// fully-populated orders.
    placed: Mutex<HashMap<String, Order>>,
}

impl KrakenExecutionService {
    pub fn new(rest: Arc<KrakenRestClient>) -> Self {
        Self {
            rest,
            placed: Mutex::new(HashMap::new()),
        }
    }

    fn order_type_param(order: &Order) -> &'static str {
        match order.order_type {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::StopLoss => "stop-loss",
            OrderType::TakeProfit => "take-profit",
        }
    }

    fn side_param(side: OrderSide) -> &'static str {
        match side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    async fn query_exchange(&self, txid: &str) -> Result<(OrderStatus, Decimal, Option<Decimal>), ExecutionError> {
        let result = self
            .rest
            .private_post("QueryOrders", &[("txid", txid)])
            .await
            .map_err(|e| match e {
                ExecutionError::Exchange { ref message } if message.contains("Unknown order") => {
                    ExecutionError::NotFound {
                        order_id: txid.to_string(),
                    }
                }
                other => other,
            })?;

        let entry = result.get(txid).ok_or_else(|| ExecutionError::NotFound {
            order_id: txid.to_string(),
        })?;

        let status_raw = entry.get("status").and_then(|s| s.as_str()).unwrap_or("");
        let vol_exec = entry
            .get("vol_exec")
            .and_then(|v| v.as_str())
            .and_then(|v| Decimal::from_str(v).ok())
            .unwrap_or(Decimal::ZERO);
        let avg_price = entry
            .get("price")
            .and_then(|p| p.as_str())
            .and_then(|p| Decimal::from_str(p).ok())
            .filter(|p| !p.is_zero());

        let status = match status_raw {
            "closed" => OrderStatus::Filled,
            "canceled" | "expired" => OrderStatus::Cancelled,
            "pending" => OrderStatus::Pending,
            _ if vol_exec > Decimal::ZERO => OrderStatus::PartiallyFilled,
            _ => OrderStatus::Open,
        };
        Ok((status, vol_exec, avg_price))
    }
}

#[async_trait]
impl ExecutionAdapter for KrakenExecutionService {
    async fn place(&self, order: &Order) -> Result<Order, ExecutionError> {
        let pair = to_exchange_symbol(&order.symbol).ok_or_else(|| {
            ExecutionError::StateConflict {
                reason: format!("unmappable symbol {}", order.symbol),
            }
        })?;
        let volume = order.quantity.to_string();

        let mut params: Vec<(&str, &str)> = vec![
            ("pair", &pair),
            ("type", Self::side_param(order.side)),
            ("ordertype", Self::order_type_param(order)),
            ("volume", &volume),
        ];
        let price_str;
        if let Some(price) = order.price.or(order.stop_price) {
            price_str = price.to_string();
            if order.order_type != OrderType::Market {
                params.push(("price", &price_str));
            }
        }

        let result = self.rest.private_post("AddOrder", &params).await?;
        let txid = result
            .get("txid")
            .and_then(|t| t.get(0))
            .and_then(|t| t.as_str())
            .ok_or_else(|| ExecutionError::Exchange {
                message: "AddOrder response missing txid".to_string(),
            })?
            .to_string();

        let mut placed = order.clone();
        placed.exchange_order_id = Some(txid.clone());
        placed.status = OrderStatus::Open;
        placed.updated_at_ms = Utc::now().timestamp_millis();
        self.placed
            .lock()
            .await
            .insert(txid.clone(), placed.clone());
        info!("Order {} submitted as {}", order.id, txid);

        // Poll to fill.
        for _ in 0..FILL_POLL_ATTEMPTS {
            tokio::time::sleep(tokio::time::Duration::from_millis(FILL_POLL_INTERVAL_MS)).await;
            let (status, vol_exec, avg_price) = self.query_exchange(&txid).await?;
            placed.status = status;
            placed.filled_qty = vol_exec;
            placed.average_fill_price = avg_price;
            placed.updated_at_ms = Utc::now().timestamp_millis();

            if status == OrderStatus::Filled {
                info!(
                    "Order {} filled: {} @ {:?}",
                    txid, placed.filled_qty, placed.average_fill_price
                );
                self.placed.lock().await.insert(txid, placed.clone());
                return Ok(placed);
            }
            if status == OrderStatus::Cancelled {
                self.placed.lock().await.insert(txid, placed.clone());
                return Ok(placed);
            }
        }

        // Timed out: cancel, then check for a racing fill.
        warn!("Order {} not filled in time, cancelling", txid);
        let _ = self
            .rest
            .private_post("CancelOrder", &[("txid", &txid)])
            .await;

        let (status, vol_exec, avg_price) = self.query_exchange(&txid).await?;
        placed.status = status;
        placed.filled_qty = vol_exec;
        placed.average_fill_price = avg_price;
        self.placed.lock().await.insert(txid.clone(), placed.clone());

        if vol_exec > Decimal::ZERO && status != OrderStatus::Filled {
            return Err(ExecutionError::TimeoutWithManualReconcile {
                order_id: txid,
                filled_qty: vol_exec,
            });
        }
        if status == OrderStatus::Filled {
            // The cancel lost the race; treat as a normal fill.
            return Ok(placed);
        }
        placed.status = OrderStatus::Cancelled;
        Ok(placed)
    }

    async fn cancel(&self, order_id: &str) -> Result<bool, ExecutionError> {
        match self
            .rest
            .private_post("CancelOrder", &[("txid", order_id)])
            .await
        {
            Ok(result) => {
                let count = result.get("count").and_then(|c| c.as_u64()).unwrap_or(0);
                Ok(count > 0)
            }
            Err(ExecutionError::Exchange { message }) if message.contains("Unknown order") => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn query(&self, order_id: &str) -> Result<Order, ExecutionError> {
        let (status, vol_exec, avg_price) = self.query_exchange(order_id).await?;
        let mut placed = self
            .placed
            .lock()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExecutionError::NotFound {
                order_id: order_id.to_string(),
            })?;
        placed.status = status;
        placed.filled_qty = vol_exec;
        placed.average_fill_price = avg_price;
        placed.updated_at_ms = Utc::now().timestamp_millis();
        Ok(placed)
    }
}
