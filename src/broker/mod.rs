// =============================================================================
// Broker Abstraction — the capability set the engine consumes
// =============================================================================
//
// The engine never talks to an exchange directly; it is handed something
// implementing [`Broker`].  Variants (live wire clients, the in-process
// paper broker) are interchangeable behind the trait, so the decision
// pipeline cannot tell — and must not care — whether fills are real.
//
// Wire clients live outside this crate; the paper broker ships here because
// the snapshot stage drives it with observed prices.

pub mod paper;

pub use paper::{PaperBroker, PriceTick};

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market_data::{Candle, Quote};
use crate::types::{Exchange, SymbolKey, Timeframe};

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type. SL / SL-M carry a trigger price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLossMarket,
}

/// Product segment for Indian brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Intraday,
    Delivery,
    Margin,
    CarryForward,
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal orders leave the pending set during reconciliation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Open => "OPEN",
            Self::Filled => "FILLED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

/// A new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: Exchange,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    pub product_type: ProductType,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub tag: Option<String>,
}

impl OrderRequest {
    /// Market intraday order, the engine's default shape.
    pub fn market(key: &SymbolKey, side: OrderSide, quantity: u32) -> Self {
        Self {
            symbol: key.symbol.clone(),
            exchange: key.exchange,
            side,
            quantity,
            order_type: OrderType::Market,
            product_type: ProductType::Intraday,
            price: None,
            trigger_price: None,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn key(&self) -> SymbolKey {
        SymbolKey::new(self.exchange, self.symbol.clone())
    }
}

/// Outcome of placing / modifying / cancelling an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub message: String,
    pub status: OrderStatus,
    pub filled_quantity: u32,
    pub average_price: f64,
    pub timestamp: DateTime<Utc>,
}

impl OrderResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            message: message.into(),
            status: OrderStatus::Rejected,
            filled_quantity: 0,
            average_price: 0.0,
            timestamp: Utc::now(),
        }
    }
}

/// An open position at the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub exchange: Exchange,
    pub quantity: u32,
    pub average_price: f64,
    pub ltp: f64,
    pub pnl: f64,
    pub side: OrderSide,
    pub product_type: ProductType,
}

/// A demat holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub exchange: Exchange,
    pub quantity: u32,
    pub average_price: f64,
    pub ltp: f64,
    pub pnl: f64,
}

/// Full capability set the engine requires from an injected brokerage.
#[async_trait]
pub trait Broker: Send + Sync {
    // --- Session ------------------------------------------------------------
    async fn connect(&self) -> anyhow::Result<bool>;
    async fn disconnect(&self) -> anyhow::Result<()>;
    async fn is_connected(&self) -> bool;
    async fn refresh_token(&self) -> anyhow::Result<bool>;

    // --- Orders -------------------------------------------------------------
    async fn place_order(&self, order: OrderRequest) -> anyhow::Result<OrderResult>;
    async fn modify_order(
        &self,
        order_id: &str,
        quantity: Option<u32>,
        price: Option<f64>,
        trigger_price: Option<f64>,
    ) -> anyhow::Result<OrderResult>;
    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<OrderResult>;
    async fn get_order_status(&self, order_id: &str) -> anyhow::Result<OrderResult>;
    async fn get_order_book(&self) -> anyhow::Result<Vec<OrderResult>>;

    // --- Positions & holdings -----------------------------------------------
    async fn get_positions(&self) -> anyhow::Result<Vec<Position>>;
    async fn get_holdings(&self) -> anyhow::Result<Vec<Holding>>;

    // --- Market data --------------------------------------------------------
    async fn get_ltp(&self, key: &SymbolKey) -> anyhow::Result<f64>;
    async fn get_quote(&self, key: &SymbolKey) -> anyhow::Result<Quote>;
    async fn get_historical_data(
        &self,
        key: &SymbolKey,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>>;

    // --- Symbols ------------------------------------------------------------
    async fn get_symbol_token(&self, key: &SymbolKey) -> anyhow::Result<String>;
    async fn search_symbols(&self, query: &str) -> anyhow::Result<Vec<SymbolKey>>;

    // --- Account ------------------------------------------------------------
    async fn get_profile(&self) -> anyhow::Result<HashMap<String, String>>;
    async fn get_funds(&self) -> anyhow::Result<HashMap<String, f64>>;

    /// Whether this broker can source live market data.  The standalone
    /// paper broker cannot: it only echoes prices the snapshot stage pushed
    /// into it, so using it as a data source would be circular.
    fn provides_market_data(&self) -> bool {
        true
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn market_order_defaults() {
        let key = SymbolKey::nse("TCS");
        let order = OrderRequest::market(&key, OrderSide::Buy, 10).with_tag("T1");
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.product_type, ProductType::Intraday);
        assert_eq!(order.quantity, 10);
        assert!(order.price.is_none());
        assert_eq!(order.tag.as_deref(), Some("T1"));
        assert_eq!(order.key(), key);
    }
}
