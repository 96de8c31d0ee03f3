pub mod symbols;
pub mod types;

pub use types::{
    Order, OrderSide, OrderStatus, OrderType, Position, Signal, SignalConfig, SignalStatus,
    SignalType, Trade,
};
