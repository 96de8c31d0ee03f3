//! Application lifecycle: build wires every service together, start
//! spawns the long-running tasks, stop aborts them. The scheduler owns
//! the cadence; everything else reacts to data or events.

use crate::application::campaign::{CampaignScheduler, SchedulerConfig, SchedulerServices};
use crate::application::market_data::{
    BarAggregator, CoalescedBookWriter, IndicatorService, StalenessGuard, StalenessThresholds,
};
use crate::application::risk_management::{CircuitBreakerConfig, CircuitBreakerService};
use crate::application::selection::SelectorConfig;
use crate::application::signals::SizingConfig;
use crate::config::{Config, Mode};
use crate::domain::ports::{ExecutionAdapter, MarketStore};
use crate::domain::repositories::{CampaignRepository, SymbolRepository};
use crate::infrastructure::execution::PaperExecutionService;
use crate::infrastructure::kraken::common::{KrakenRestClient, RateBudget};
use crate::infrastructure::kraken::execution::KrakenExecutionService;
use crate::infrastructure::kraken::market_data::KrakenMarketData;
use crate::infrastructure::kraken::websocket::{IngestorEvent, KrakenWebSocketManager};
use crate::infrastructure::market_store::RedisMarketStore;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteBarRepository, SqliteBreakerEventRepository, SqliteBreakerRepository,
    SqliteCampaignRepository, SqliteOrderRepository, SqlitePositionRepository,
    SqliteRankingRepository, SqliteSignalRepository, SqliteSymbolRepository,
    SqliteTradeRepository,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

const EXCHANGE_NAME: &str = "kraken";

pub struct Application {
    config: Config,
    store: Arc<dyn MarketStore>,
    symbols: Arc<RwLock<Vec<String>>>,
    ws: Arc<KrakenWebSocketManager>,
    market_data: Arc<KrakenMarketData>,
    guard: Arc<StalenessGuard>,
    breakers: Arc<CircuitBreakerService>,
    aggregator: Arc<BarAggregator>,
    scheduler: Arc<CampaignScheduler>,
    metrics: Arc<Metrics>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let database = Database::new(&config.exchange.database_url).await?;
        let store: Arc<dyn MarketStore> = Arc::new(
            RedisMarketStore::connect(&config.exchange.redis_url, EXCHANGE_NAME)
                .await
                .context("hot store connection failed")?,
        );

        let bars = Arc::new(SqliteBarRepository::new(database.clone()));
        let signals = Arc::new(SqliteSignalRepository::new(database.clone()));
        let orders = Arc::new(SqliteOrderRepository::new(database.clone()));
        let positions = Arc::new(SqlitePositionRepository::new(database.clone()));
        let trades = Arc::new(SqliteTradeRepository::new(database.clone()));
        let rankings = Arc::new(SqliteRankingRepository::new(database.clone()));
        let symbol_repo = Arc::new(SqliteSymbolRepository::new(database.clone()));
        let breaker_repo = Arc::new(SqliteBreakerRepository::new(database.clone()));
        let breaker_events = Arc::new(SqliteBreakerEventRepository::new(database.clone()));
        let campaigns = Arc::new(SqliteCampaignRepository::new(database.clone()));

        let active = symbol_repo.active_symbols().await?;
        let symbols = Arc::new(RwLock::new(
            active.iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
        ));
        info!("Catalog holds {} active symbols", active.len());

        let book_writer = Arc::new(CoalescedBookWriter::new(store.clone()));
        let ws = Arc::new(KrakenWebSocketManager::new(
            config.exchange.ws_url.clone(),
            store.clone(),
            book_writer.clone(),
            symbols.clone(),
        ));

        let budget = Arc::new(RateBudget::new(config.exchange.rest_rate_budget_per_sec));
        let credentials = config
            .exchange
            .api_key
            .clone()
            .zip(config.exchange.api_secret.clone());
        let rest = Arc::new(KrakenRestClient::new(
            &config.exchange.rest_base_url,
            credentials,
            budget,
        ));
        let market_data = Arc::new(KrakenMarketData::new(
            rest.clone(),
            store.clone(),
            book_writer.clone(),
            symbols.clone(),
        ));

        let breakers = Arc::new(CircuitBreakerService::new(
            CircuitBreakerConfig::from_risk_config(&config.risk),
            breaker_repo,
            breaker_events,
        ));
        for campaign in campaigns.active_campaigns().await? {
            breakers.hydrate(&campaign.id).await?;
        }

        let thresholds = StalenessThresholds {
            warn_ms: config.trading.staleness_warn_secs as i64 * 1000,
            hard_ms: config.trading.staleness_hard_secs as i64 * 1000,
            kill_ms: config.trading.staleness_kill_secs as i64 * 1000,
            quarantine_ms: config.trading.quarantine_after_secs as i64 * 1000,
        };
        let guard = Arc::new(StalenessGuard::new(
            store.clone(),
            market_data.clone(),
            breakers.clone(),
            thresholds,
            config.trading.staleness_sweep_secs,
        ));
        guard.set_symbols(symbols.read().await.clone()).await;

        let aggregator = Arc::new(BarAggregator::new(
            store.clone(),
            bars.clone(),
            symbols.clone(),
        ));
        let indicators = Arc::new(IndicatorService::new(store.clone(), bars.clone()));

        let executor: Arc<dyn ExecutionAdapter> = match config.mode {
            Mode::Paper => {
                info!("Execution mode: PAPER");
                Arc::new(PaperExecutionService::new(
                    store.clone(),
                    config.risk.fee_rate,
                ))
            }
            Mode::Live => {
                info!("Execution mode: LIVE");
                Arc::new(KrakenExecutionService::new(rest.clone()))
            }
        };

        let scheduler = Arc::new(CampaignScheduler::new(
            SchedulerServices {
                campaigns,
                positions,
                orders,
                trades,
                signals,
                rankings,
                symbols: symbol_repo,
                store: store.clone(),
                indicators,
                guard: guard.clone(),
                breakers: breakers.clone(),
                executor,
            },
            SchedulerConfig {
                tick_secs: config.trading.scheduler_tick_secs,
                rebalance_interval_ms: config.trading.rebalance_interval_hours as i64 * 3_600_000,
                audit_interval_ms: config.trading.audit_interval_hours as i64 * 3_600_000,
                selector: SelectorConfig::from_trading_config(&config.trading),
                sizing: SizingConfig::from_risk_config(&config.risk),
                default_signal_config: config.trading.default_signal_config.clone(),
            },
        ));

        let metrics = Arc::new(Metrics::new()?);

        Ok(Self {
            config,
            store,
            symbols,
            ws,
            market_data,
            guard,
            breakers,
            aggregator,
            scheduler,
            metrics,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;

        // Streaming ingestion with REST fallback on disconnect.
        handles.push(tokio::spawn({
            let ws = self.ws.clone();
            async move { ws.run().await }
        }));
        handles.push(tokio::spawn({
            let market_data = self.market_data.clone();
            async move { market_data.run_fallback_loop().await }
        }));

        // Bridge ingestor events to the guard and the fallback toggle.
        handles.push(tokio::spawn({
            let mut events = self.ws.subscribe_events();
            let guard = self.guard.clone();
            let market_data = self.market_data.clone();
            let metrics = self.metrics.clone();
            async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        IngestorEvent::Connected => market_data.set_fallback_enabled(false),
                        IngestorEvent::Disconnected { reason } => {
                            warn!("Stream down ({}), switching to REST fallback", reason);
                            metrics.ws_reconnects.inc();
                            market_data.set_fallback_enabled(true);
                        }
                        IngestorEvent::UnsupportedSymbol { symbol } => {
                            guard.mark_unsupported(&symbol).await;
                        }
                    }
                }
            }
        }));

        handles.push(tokio::spawn({
            let guard = self.guard.clone();
            async move { guard.run().await }
        }));
        handles.extend(self.aggregator.clone().start());
        handles.push(tokio::spawn({
            let breakers = self.breakers.clone();
            let interval = self.config.risk.auto_reset_interval_secs;
            async move { breakers.run_auto_reset_job(interval).await }
        }));
        handles.push(tokio::spawn({
            let scheduler = self.scheduler.clone();
            async move { scheduler.run().await }
        }));

        if self.config.observability.enabled {
            handles.push(tokio::spawn({
                let metrics = self.metrics.clone();
                let guard = self.guard.clone();
                let ws = self.ws.clone();
                let interval = self.config.observability.report_interval_secs;
                async move {
                    let mut ticker =
                        tokio::time::interval(tokio::time::Duration::from_secs(interval));
                    loop {
                        ticker.tick().await;
                        let (fresh, warn_n, hard, kill, quarantined) = guard.level_counts().await;
                        metrics.symbols_fresh.set(fresh as i64);
                        metrics.symbols_warn.set(warn_n as i64);
                        metrics.symbols_hard.set(hard as i64);
                        metrics.symbols_kill.set(kill as i64);
                        metrics.symbols_quarantined.set(quarantined as i64);
                        metrics.validation_drops.set(ws.validation_drops() as i64);
                        for line in metrics.render().lines() {
                            if !line.starts_with('#') && !line.is_empty() {
                                info!(target: "metrics", "{}", line);
                            }
                        }
                    }
                }
            }));
        }

        info!("Application started ({} tasks)", handles.len());
        Ok(())
    }

    pub async fn stop(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("Application stopped");
    }

    pub fn store(&self) -> Arc<dyn MarketStore> {
        self.store.clone()
    }

    pub async fn tracked_symbols(&self) -> Vec<String> {
        self.symbols.read().await.clone()
    }
}
