//! Paper execution.
//!
//! Fills immediately at the L1 mid adjusted by notional-tiered slippage,
//! with taker fees modeled on the notional. Shares the adapter contract
//! with the live service so the scheduler cannot tell them apart.

use crate::domain::errors::ExecutionError;
use crate::domain::ports::{ExecutionAdapter, MarketStore};
use crate::domain::trading::types::{Order, OrderSide, OrderStatus};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Slippage in basis points by executed notional.
fn slippage_bps(notional: Decimal) -> Decimal {
    if notional < dec!(10_000) {
        dec!(2)
    } else if notional < dec!(50_000) {
        dec!(5)
    } else if notional < dec!(250_000) {
        dec!(10)
    } else {
        dec!(20)
    }
}

pub struct PaperExecutionService {
    store: Arc<dyn MarketStore>,
    taker_fee_rate: Decimal,
    orders: Mutex<HashMap<String, Order>>,
}

impl PaperExecutionService {
    pub fn new(store: Arc<dyn MarketStore>, taker_fee_rate: Decimal) -> Self {
        Self {
            store,
            taker_fee_rate,
            orders: Mutex::new(HashMap::new()),
        }
    }

    async fn reference_price(&self, symbol: &str) -> Option<Decimal> {
        if let Ok(Some(quote)) = self.store.l1(symbol).await {
            return Some(quote.mid());
        }
        self.store.current_price(symbol).await.ok().flatten()
    }
}

#[async_trait]
impl ExecutionAdapter for PaperExecutionService {
    async fn place(&self, order: &Order) -> Result<Order, ExecutionError> {
        let mid = self
            .reference_price(&order.symbol)
            .await
            .ok_or_else(|| ExecutionError::StateConflict {
                reason: format!("no market data for {}", order.symbol),
            })?;

        let notional = mid * order.quantity;
        let slip = slippage_bps(notional) / dec!(10_000);
        // Slippage always degrades the fill.
        let execution_price = match order.side {
            OrderSide::Buy => mid * (Decimal::ONE + slip),
            OrderSide::Sell => mid * (Decimal::ONE - slip),
        };
        let fees = self.taker_fee_rate * execution_price * order.quantity;

        let mut filled = order.clone();
        filled.exchange_order_id = Some(format!("paper-{}", uuid::Uuid::new_v4()));
        filled.status = OrderStatus::Filled;
        filled.filled_qty = order.quantity;
        filled.average_fill_price = Some(execution_price);
        filled.updated_at_ms = Utc::now().timestamp_millis();

        self.orders
            .lock()
            .await
            .insert(filled.id.clone(), filled.clone());

        info!(
            "Paper fill {} {} {} @ {} (mid {}, fees {})",
            order.side, order.quantity, order.symbol, execution_price, mid, fees
        );
        Ok(filled)
    }

    async fn cancel(&self, order_id: &str) -> Result<bool, ExecutionError> {
        let mut orders = self.orders.lock().await;
        match orders.get_mut(order_id) {
            Some(order) if order.status.is_live() => {
                order.status = OrderStatus::Cancelled;
                debug!("Paper cancel {}", order_id);
                Ok(true)
            }
            Some(_) => Ok(false),
            // Protective orders are held locally by the scheduler, not
            // placed with the paper venue; cancelling them is a no-op.
            None => Ok(false),
        }
    }

    async fn query(&self, order_id: &str) -> Result<Order, ExecutionError> {
        self.orders
            .lock()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExecutionError::NotFound {
                order_id: order_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::L1Quote;
    use crate::infrastructure::market_store::InMemoryMarketStore;

    async fn venue() -> (Arc<InMemoryMarketStore>, PaperExecutionService) {
        let store = Arc::new(InMemoryMarketStore::new());
        let quote = L1Quote {
            bid: dec!(29_999),
            bid_qty: dec!(5),
            ask: dec!(30_001),
            ask_qty: dec!(5),
            exchange_ts_ms: 0,
            ingest_ts_ms: 0,
        };
        store.put_l1("BTC/USD", &quote).await.unwrap();
        (store.clone(), PaperExecutionService::new(store, dec!(0.0016)))
    }

    #[tokio::test]
    async fn test_buy_fills_above_mid_sell_below() {
        let (_, venue) = venue().await;

        let buy = Order::market("camp-1", "BTC/USD", OrderSide::Buy, dec!(0.1), 0);
        let filled = venue.place(&buy).await.unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert!(filled.average_fill_price.unwrap() > dec!(30_000));

        let sell = Order::market("camp-1", "BTC/USD", OrderSide::Sell, dec!(0.1), 0);
        let filled = venue.place(&sell).await.unwrap();
        assert!(filled.average_fill_price.unwrap() < dec!(30_000));
    }

    #[tokio::test]
    async fn test_slippage_tiers_scale_with_notional() {
        let (_, venue) = venue().await;

        // 0.1 BTC ≈ $3k notional -> 2bps; 5 BTC ≈ $150k -> 10bps.
        let small = venue
            .place(&Order::market("c", "BTC/USD", OrderSide::Buy, dec!(0.1), 0))
            .await
            .unwrap();
        let large = venue
            .place(&Order::market("c", "BTC/USD", OrderSide::Buy, dec!(5), 0))
            .await
            .unwrap();

        let small_slip = small.average_fill_price.unwrap() - dec!(30_000);
        let large_slip = large.average_fill_price.unwrap() - dec!(30_000);
        assert!(large_slip > small_slip);
    }

    #[tokio::test]
    async fn test_query_and_cancel_semantics() {
        let (_, venue) = venue().await;
        let order = Order::market("c", "BTC/USD", OrderSide::Buy, dec!(0.1), 0);
        let filled = venue.place(&order).await.unwrap();

        let queried = venue.query(&filled.id).await.unwrap();
        assert_eq!(queried.status, OrderStatus::Filled);

        // A filled order can no longer be cancelled.
        assert!(!venue.cancel(&filled.id).await.unwrap());

        assert!(matches!(
            venue.query("missing").await,
            Err(ExecutionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_market_data_is_a_state_conflict() {
        let (_, venue) = venue().await;
        let order = Order::market("c", "XYZ/USD", OrderSide::Buy, dec!(1), 0);
        assert!(matches!(
            venue.place(&order).await,
            Err(ExecutionError::StateConflict { .. })
        ));
    }
}
