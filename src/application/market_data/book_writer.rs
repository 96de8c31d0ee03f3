//! Coalesced order-book persistence.
//!
//! Writes to the hot store are coalesced per symbol: while a write is in
//! flight, newer snapshots replace the pending payload instead of queuing,
//! so the store only ever converges to the latest book. A small semaphore
//! caps concurrent writes across all symbols to protect the backend.

use crate::domain::market::L2Snapshot;
use crate::domain::ports::MarketStore;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::warn;

const MAX_CONCURRENT_WRITES: usize = 4;

pub struct CoalescedBookWriter {
    store: Arc<dyn MarketStore>,
    permits: Arc<Semaphore>,
    /// Key present = write in flight for that symbol; `Some` = a newer
    /// snapshot waiting to be written when the in-flight one completes.
    pending: Arc<Mutex<HashMap<String, Option<L2Snapshot>>>>,
    drained: Arc<Notify>,
}

impl CoalescedBookWriter {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_WRITES)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Submits a snapshot for persistence. Returns immediately; the write
    /// happens on a background task.
    pub async fn submit(&self, symbol: &str, snapshot: L2Snapshot) {
        {
            let mut pending = self.pending.lock().await;
            match pending.entry(symbol.to_string()) {
                Entry::Occupied(mut entry) => {
                    // Latest-only: overwrite whatever was waiting.
                    *entry.get_mut() = Some(snapshot);
                    return;
                }
                Entry::Vacant(entry) => {
                    entry.insert(None);
                }
            }
        }
        self.spawn_write(symbol.to_string(), snapshot);
    }

    fn spawn_write(&self, symbol: String, mut snapshot: L2Snapshot) {
        let store = self.store.clone();
        let permits = self.permits.clone();
        let pending = self.pending.clone();
        let drained = self.drained.clone();

        tokio::spawn(async move {
            loop {
                {
                    // Closed semaphore only happens at shutdown.
                    let Ok(_permit) = permits.acquire().await else {
                        break;
                    };
                    if let Err(e) = store.put_l2_snapshot(&symbol, &snapshot).await {
                        warn!("L2 write failed for {}: {}", symbol, e);
                    }
                }

                let mut map = pending.lock().await;
                match map.get_mut(&symbol) {
                    Some(slot) => {
                        if let Some(next) = slot.take() {
                            snapshot = next;
                            continue;
                        }
                        map.remove(&symbol);
                    }
                    None => {}
                }
                if map.is_empty() {
                    drained.notify_waiters();
                }
                break;
            }
        });
    }

    /// Waits until every submitted snapshot has been persisted.
    pub async fn flush(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending.lock().await.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::BookLevel;
    use crate::infrastructure::market_store::InMemoryMarketStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(bid: Decimal, ts: i64) -> L2Snapshot {
        L2Snapshot {
            bids: vec![BookLevel {
                price: bid,
                quantity: dec!(1),
            }],
            asks: vec![BookLevel {
                price: bid + dec!(1),
                quantity: dec!(1),
            }],
            exchange_ts_ms: ts,
        }
    }

    #[tokio::test]
    async fn test_writes_pass_through_when_idle() {
        let store = Arc::new(InMemoryMarketStore::new());
        let writer = CoalescedBookWriter::new(store.clone());

        writer.submit("ETH/USD", snapshot(dec!(2000), 1)).await;
        writer.flush().await;

        let persisted = store.l2_snapshot("ETH/USD").await.unwrap().unwrap();
        assert_eq!(persisted.exchange_ts_ms, 1);
        assert_eq!(store.l2_write_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_symbols_do_not_coalesce() {
        let store = Arc::new(InMemoryMarketStore::new());
        let writer = CoalescedBookWriter::new(store.clone());

        writer.submit("ETH/USD", snapshot(dec!(2000), 1)).await;
        writer.submit("BTC/USD", snapshot(dec!(30000), 2)).await;
        writer.flush().await;

        assert_eq!(store.l2_write_count(), 2);
        assert!(store.l2_snapshot("ETH/USD").await.unwrap().is_some());
        assert!(store.l2_snapshot("BTC/USD").await.unwrap().is_some());
    }
}
