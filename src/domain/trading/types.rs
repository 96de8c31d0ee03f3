use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => anyhow::bail!("Invalid order side: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::StopLoss => write!(f, "stop_loss"),
            OrderType::TakeProfit => write!(f, "take_profit"),
        }
    }
}

impl FromStr for OrderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "stop_loss" => Ok(OrderType::StopLoss),
            "take_profit" => Ok(OrderType::TakeProfit),
            other => anyhow::bail!("Invalid order type: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Whether the order can still receive fills.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Open | OrderStatus::PartiallyFilled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "open" => Ok(OrderStatus::Open),
            "partially_filled" => Ok(OrderStatus::PartiallyFilled),
            "filled" => Ok(OrderStatus::Filled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "rejected" => Ok(OrderStatus::Rejected),
            other => anyhow::bail!("Invalid order status: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub campaign_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub exchange_order_id: Option<String>,
    pub filled_qty: Decimal,
    pub average_fill_price: Option<Decimal>,
    /// SL and TP of the same position share a group; cancelling one
    /// cancels the other.
    pub oco_group_id: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Order {
    pub fn market(
        campaign_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        now_ms: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: campaign_id.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            status: OrderStatus::Pending,
            exchange_order_id: None,
            filled_qty: Decimal::ZERO,
            average_fill_price: None,
            oco_group_id: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Builds the SL/TP pair protecting a position. Both orders share a
    /// fresh OCO group id and the exit side of the position.
    pub fn oco_pair(
        campaign_id: &str,
        symbol: &str,
        position_side: OrderSide,
        quantity: Decimal,
        sl: Decimal,
        tp: Decimal,
        now_ms: i64,
    ) -> (Order, Order) {
        let group = uuid::Uuid::new_v4().to_string();
        let exit_side = position_side.opposite();
        let base = Order {
            id: String::new(),
            campaign_id: campaign_id.to_string(),
            symbol: symbol.to_string(),
            side: exit_side,
            order_type: OrderType::StopLoss,
            quantity,
            price: None,
            stop_price: None,
            status: OrderStatus::Open,
            exchange_order_id: None,
            filled_qty: Decimal::ZERO,
            average_fill_price: None,
            oco_group_id: Some(group),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        };

        let mut sl_order = base.clone();
        sl_order.id = uuid::Uuid::new_v4().to_string();
        sl_order.stop_price = Some(sl);

        let mut tp_order = base;
        tp_order.id = uuid::Uuid::new_v4().to_string();
        tp_order.order_type = OrderType::TakeProfit;
        tp_order.price = Some(tp);

        (sl_order, tp_order)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Long,
    Short,
}

impl SignalType {
    pub fn entry_side(&self) -> OrderSide {
        match self {
            SignalType::Long => OrderSide::Buy,
            SignalType::Short => OrderSide::Sell,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalType::Long => write!(f, "long"),
            SignalType::Short => write!(f, "short"),
        }
    }
}

impl FromStr for SignalType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(SignalType::Long),
            "short" => Ok(SignalType::Short),
            other => anyhow::bail!("Invalid signal type: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Pending,
    Executed,
    Expired,
    Cancelled,
}

impl FromStr for SignalStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SignalStatus::Pending),
            "executed" => Ok(SignalStatus::Executed),
            "expired" => Ok(SignalStatus::Expired),
            "cancelled" => Ok(SignalStatus::Cancelled),
            other => anyhow::bail!("Invalid signal status: {}", other),
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Executed => "executed",
            SignalStatus::Expired => "expired",
            SignalStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Per-(campaign, symbol) thresholds for signal evaluation and sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub enabled: bool,
    /// ATR multiple the price must clear above/below EMA12 to fire.
    pub long_atr_mult: Decimal,
    pub short_atr_mult: Decimal,
    pub tp1_atr_mult: Decimal,
    pub tp2_atr_mult: Decimal,
    pub sl_atr_mult: Decimal,
    pub risk_per_trade_bps: Decimal,
}

/// A fired trading signal with the full context snapshotted for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub campaign_id: String,
    pub symbol: String,
    pub signal_type: SignalType,
    pub price_at_signal: Decimal,
    pub ema12: Decimal,
    pub ema36: Decimal,
    pub atr: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub sl: Decimal,
    pub quantity: Decimal,
    pub config_snapshot: SignalConfig,
    /// Breaker state at evaluation time, e.g. "clear" or the blocking level.
    pub breaker_state: String,
    pub status: SignalStatus,
    pub created_at_ms: i64,
    pub executed_at_ms: Option<i64>,
}

/// An open position. At most one per (campaign, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub campaign_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    /// Group shared by the protective SL/TP orders.
    pub oco_group_id: Option<String>,
    pub unrealized_pnl: Decimal,
    /// Dollar amount at risk when the position was sized (for R-units).
    pub risk_amount: Decimal,
    /// Fill price deviation from the signal price, for the daily audit.
    pub entry_slippage_bps: Option<Decimal>,
    pub opened_at_ms: i64,
}

impl Position {
    /// Re-marks the position at `price` and recomputes unrealized PnL.
    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = match self.side {
            OrderSide::Buy => (price - self.entry_price) * self.quantity,
            OrderSide::Sell => (self.entry_price - price) * self.quantity,
        };
    }
}

/// A closed round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub campaign_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub realized_pnl: Decimal,
    pub fees: Decimal,
    /// Risk amount the position was sized with, carried over for R-units.
    pub risk_amount: Decimal,
    pub entry_slippage_bps: Option<Decimal>,
    pub opened_at_ms: i64,
    pub closed_at_ms: i64,
}

impl Trade {
    /// Closes a position into a trade at `exit_price`, net of `fees`.
    pub fn from_position(
        position: &Position,
        exit_price: Decimal,
        fees: Decimal,
        closed_at_ms: i64,
    ) -> Self {
        let gross = match position.side {
            OrderSide::Buy => (exit_price - position.entry_price) * position.quantity,
            OrderSide::Sell => (position.entry_price - exit_price) * position.quantity,
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: position.campaign_id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            realized_pnl: gross - fees,
            fees,
            risk_amount: position.risk_amount,
            entry_slippage_bps: position.entry_slippage_bps,
            opened_at_ms: position.opened_at_ms,
            closed_at_ms,
        }
    }

    /// Loss/gain expressed in multiples of the pre-trade risk amount.
    pub fn r_multiple(&self) -> Option<Decimal> {
        if self.risk_amount.is_zero() {
            return None;
        }
        Some(self.realized_pnl / self.risk_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_oco_pair_shares_group_and_exit_side() {
        let (sl, tp) = Order::oco_pair(
            "camp-1",
            "BTC/USD",
            OrderSide::Buy,
            dec!(0.5),
            dec!(29_900),
            dec!(30_120),
            1_700_000_000_000,
        );
        assert_eq!(sl.oco_group_id, tp.oco_group_id);
        assert!(sl.oco_group_id.is_some());
        assert_eq!(sl.side, OrderSide::Sell);
        assert_eq!(tp.side, OrderSide::Sell);
        assert_eq!(sl.order_type, OrderType::StopLoss);
        assert_eq!(tp.order_type, OrderType::TakeProfit);
        assert_eq!(sl.stop_price, Some(dec!(29_900)));
        assert_eq!(tp.price, Some(dec!(30_120)));
        assert_ne!(sl.id, tp.id);
    }

    #[test]
    fn test_position_mark_long_and_short() {
        let mut long = Position {
            id: "p1".to_string(),
            campaign_id: "c1".to_string(),
            symbol: "ETH/USD".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(2),
            entry_price: dec!(2000),
            current_price: dec!(2000),
            sl: dec!(1950),
            tp: dec!(2100),
            oco_group_id: None,
            unrealized_pnl: Decimal::ZERO,
            risk_amount: dec!(100),
            entry_slippage_bps: None,
            opened_at_ms: 0,
        };
        long.mark(dec!(2050));
        assert_eq!(long.unrealized_pnl, dec!(100));

        let mut short = long.clone();
        short.side = OrderSide::Sell;
        short.mark(dec!(2050));
        assert_eq!(short.unrealized_pnl, dec!(-100));
    }

    #[test]
    fn test_trade_pnl_net_of_fees() {
        let position = Position {
            id: "p1".to_string(),
            campaign_id: "c1".to_string(),
            symbol: "ETH/USD".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(1),
            entry_price: dec!(2000),
            current_price: dec!(2000),
            sl: dec!(1950),
            tp: dec!(2100),
            oco_group_id: None,
            unrealized_pnl: Decimal::ZERO,
            risk_amount: dec!(50),
            entry_slippage_bps: None,
            opened_at_ms: 0,
        };
        let trade = Trade::from_position(&position, dec!(2100), dec!(4), 1000);
        assert_eq!(trade.realized_pnl, dec!(96));
        assert_eq!(trade.r_multiple().unwrap(), dec!(1.92));
    }
}
