// =============================================================================
// Paper Broker — simulated fills against observed prices
// =============================================================================
//
// Implements the full [`Broker`] capability set without touching a wire.
// The snapshot stage pushes the prices it observed into `update_prices`
// each cycle, so paper fills happen at exactly the prices the strategy saw.
//
// Fill rules:
//   - MARKET fills at ask (BUY) / bid (SELL), falling back to ltp
//   - LIMIT fills when marketable, otherwise rests OPEN
//   - SL / SL-M rest OPEN and trigger on a price update crossing the trigger
//   - BUY fills debit available capital and reject on insufficient funds
//   - SELL fills close long inventory and realise PnL; no short opens
//
// The standalone paper broker is not a market data source: `get_quote`
// merely echoes pushed prices, so `provides_market_data()` is false.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::{
    Broker, Holding, OrderRequest, OrderResult, OrderSide, OrderStatus, OrderType, Position,
};
use crate::market_data::{Candle, Quote};
use crate::types::{SymbolKey, Timeframe};

/// Latest observed prices for one symbol, pushed by the snapshot stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub ltp: f64,
    pub bid: f64,
    pub ask: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    status: OrderStatus,
    average_price: f64,
    filled_quantity: u32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    connected: bool,
    available_capital: f64,
    prices: HashMap<SymbolKey, PriceTick>,
    orders: HashMap<String, PaperOrder>,
    positions: HashMap<SymbolKey, Position>,
    realized_pnl: f64,
}

/// In-process paper trading broker.
pub struct PaperBroker {
    inner: RwLock<Inner>,
    initial_capital: f64,
}

impl PaperBroker {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                available_capital: initial_capital,
                ..Default::default()
            }),
            initial_capital,
        }
    }

    /// Push the prices observed this cycle. Open SL / SL-M orders whose
    /// trigger has been crossed fill immediately at their trigger price, and
    /// open position marks are refreshed.
    pub fn update_prices(&self, prices: HashMap<SymbolKey, PriceTick>) {
        let mut inner = self.inner.write();
        inner.prices = prices;

        // Refresh position marks.
        let marks: Vec<(SymbolKey, f64)> = inner
            .positions
            .keys()
            .filter_map(|key| inner.prices.get(key).map(|t| (key.clone(), t.ltp)))
            .collect();
        for (key, ltp) in marks {
            if let Some(pos) = inner.positions.get_mut(&key) {
                pos.ltp = ltp;
                let signed = match pos.side {
                    OrderSide::Buy => ltp - pos.average_price,
                    OrderSide::Sell => pos.average_price - ltp,
                };
                pos.pnl = signed * pos.quantity as f64;
            }
        }

        // Fire stop orders whose trigger crossed.
        let triggered: Vec<String> = inner
            .orders
            .iter()
            .filter(|(_, o)| {
                o.status == OrderStatus::Open
                    && matches!(
                        o.request.order_type,
                        OrderType::StopLoss | OrderType::StopLossMarket
                    )
            })
            .filter_map(|(id, o)| {
                let trigger = o.request.trigger_price?;
                let ltp = inner.prices.get(&o.request.key())?.ltp;
                let crossed = match o.request.side {
                    OrderSide::Sell => ltp <= trigger,
                    OrderSide::Buy => ltp >= trigger,
                };
                crossed.then(|| id.clone())
            })
            .collect();

        for order_id in triggered {
            if let Some(order) = inner.orders.get(&order_id).cloned() {
                let trigger = order.request.trigger_price.unwrap_or(0.0);
                debug!(order_id = %order_id, trigger, "paper stop order triggered");
                Self::fill(&mut inner, &order_id, trigger);
            }
        }
    }

    /// Mark an order filled and settle its cash / position effects.
    fn fill(inner: &mut Inner, order_id: &str, price: f64) {
        let Some(order) = inner.orders.get_mut(order_id) else {
            return;
        };
        order.status = OrderStatus::Filled;
        order.average_price = price;
        order.filled_quantity = order.request.quantity;
        let request = order.request.clone();
        Self::settle(inner, &request, price);
    }

    fn settle(inner: &mut Inner, request: &OrderRequest, price: f64) {
        let key = request.key();
        let quantity = request.quantity;
        let value = price * quantity as f64;

        match request.side {
            OrderSide::Buy => {
                inner.available_capital -= value;
                let pos = inner.positions.entry(key).or_insert_with(|| Position {
                    symbol: request.symbol.clone(),
                    exchange: request.exchange,
                    quantity: 0,
                    average_price: 0.0,
                    ltp: price,
                    pnl: 0.0,
                    side: OrderSide::Buy,
                    product_type: request.product_type,
                });
                let total = pos.quantity + quantity;
                pos.average_price = (pos.average_price * pos.quantity as f64 + value) / total as f64;
                pos.quantity = total;
                pos.ltp = price;
            }
            OrderSide::Sell => {
                inner.available_capital += value;
                // Long + exit only: a sell reduces existing long inventory.
                if let Some(pos) = inner.positions.get_mut(&key) {
                    let closed = quantity.min(pos.quantity);
                    let pnl = (price - pos.average_price) * closed as f64;
                    inner.realized_pnl += pnl;
                    pos.quantity -= closed;
                    if pos.quantity == 0 {
                        inner.positions.remove(&key);
                    }
                }
            }
        }
    }

    fn result_for(order_id: &str, order: &PaperOrder) -> OrderResult {
        OrderResult {
            success: true,
            order_id: Some(order_id.to_string()),
            message: format!("Paper order {}", order.status),
            status: order.status,
            filled_quantity: order.filled_quantity,
            average_price: order.average_price,
            timestamp: order.created_at,
        }
    }

    /// Realised PnL since start, for tests and status surfaces.
    pub fn realized_pnl(&self) -> f64 {
        self.inner.read().realized_pnl
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&self) -> anyhow::Result<bool> {
        let mut inner = self.inner.write();
        inner.connected = true;
        info!(capital = self.initial_capital, "paper broker connected");
        Ok(true)
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.inner.write().connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.inner.read().connected
    }

    async fn refresh_token(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn place_order(&self, request: OrderRequest) -> anyhow::Result<OrderResult> {
        let mut inner = self.inner.write();
        if !inner.connected {
            return Ok(OrderResult::failure("Not connected"));
        }

        let key = request.key();
        let Some(tick) = inner.prices.get(&key).cloned() else {
            return Ok(OrderResult::failure(format!(
                "No market price available for {key}"
            )));
        };

        let market_price = match request.side {
            OrderSide::Buy => {
                if tick.ask > 0.0 {
                    tick.ask
                } else {
                    tick.ltp
                }
            }
            OrderSide::Sell => {
                if tick.bid > 0.0 {
                    tick.bid
                } else {
                    tick.ltp
                }
            }
        };
        if market_price <= 0.0 {
            return Ok(OrderResult::failure(format!("No market price for {key}")));
        }

        // Determine fill status and price.
        let (status, exec_price) = match request.order_type {
            OrderType::Market => (OrderStatus::Filled, market_price),
            OrderType::Limit => match (request.side, request.price) {
                (OrderSide::Buy, Some(limit)) if limit >= market_price => {
                    (OrderStatus::Filled, limit)
                }
                (OrderSide::Sell, Some(limit)) if limit <= market_price => {
                    (OrderStatus::Filled, limit)
                }
                (_, Some(_)) => (OrderStatus::Open, 0.0),
                (_, None) => {
                    return Ok(OrderResult::failure("Limit order without a price"));
                }
            },
            OrderType::StopLoss | OrderType::StopLossMarket => {
                if request.trigger_price.is_none() {
                    return Ok(OrderResult::failure("Stop order without a trigger price"));
                }
                (OrderStatus::Open, 0.0)
            }
        };

        // Capital check for immediate buy fills.
        if request.side == OrderSide::Buy && status == OrderStatus::Filled {
            let value = exec_price * request.quantity as f64;
            if value > inner.available_capital {
                return Ok(OrderResult::failure("Insufficient capital"));
            }
        }

        let order_id = format!("PAPER_{}", Uuid::new_v4().simple().to_string()[..12].to_uppercase());
        let order = PaperOrder {
            request: request.clone(),
            status,
            average_price: if status == OrderStatus::Filled {
                exec_price
            } else {
                0.0
            },
            filled_quantity: if status == OrderStatus::Filled {
                request.quantity
            } else {
                0
            },
            created_at: Utc::now(),
        };
        inner.orders.insert(order_id.clone(), order);

        if status == OrderStatus::Filled {
            Self::settle(&mut inner, &request, exec_price);
            info!(
                order_id = %order_id,
                symbol = %key,
                side = %request.side,
                quantity = request.quantity,
                price = exec_price,
                "paper order filled"
            );
        }

        let stored = inner.orders.get(&order_id).cloned();
        Ok(stored
            .map(|o| Self::result_for(&order_id, &o))
            .unwrap_or_else(|| OrderResult::failure("order vanished")))
    }

    async fn modify_order(
        &self,
        order_id: &str,
        quantity: Option<u32>,
        price: Option<f64>,
        trigger_price: Option<f64>,
    ) -> anyhow::Result<OrderResult> {
        let mut inner = self.inner.write();
        match inner.orders.get_mut(order_id) {
            Some(order) if !order.status.is_terminal() => {
                if let Some(q) = quantity {
                    order.request.quantity = q;
                }
                if price.is_some() {
                    order.request.price = price;
                }
                if trigger_price.is_some() {
                    order.request.trigger_price = trigger_price;
                }
                let order = order.clone();
                Ok(Self::result_for(order_id, &order))
            }
            Some(_) => Ok(OrderResult::failure("Order already terminal")),
            None => Ok(OrderResult::failure("Unknown order")),
        }
    }

    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<OrderResult> {
        let mut inner = self.inner.write();
        match inner.orders.get_mut(order_id) {
            Some(order) if !order.status.is_terminal() => {
                order.status = OrderStatus::Cancelled;
                let order = order.clone();
                Ok(Self::result_for(order_id, &order))
            }
            Some(_) => Ok(OrderResult::failure("Order already terminal")),
            None => Ok(OrderResult::failure("Unknown order")),
        }
    }

    async fn get_order_status(&self, order_id: &str) -> anyhow::Result<OrderResult> {
        let inner = self.inner.read();
        match inner.orders.get(order_id) {
            Some(order) => Ok(Self::result_for(order_id, order)),
            None => Ok(OrderResult::failure("Unknown order")),
        }
    }

    async fn get_order_book(&self) -> anyhow::Result<Vec<OrderResult>> {
        let inner = self.inner.read();
        Ok(inner
            .orders
            .iter()
            .map(|(id, o)| Self::result_for(id, o))
            .collect())
    }

    async fn get_positions(&self) -> anyhow::Result<Vec<Position>> {
        Ok(self.inner.read().positions.values().cloned().collect())
    }

    async fn get_holdings(&self) -> anyhow::Result<Vec<Holding>> {
        // Intraday engine: nothing is ever delivered to the demat account.
        Ok(Vec::new())
    }

    async fn get_ltp(&self, key: &SymbolKey) -> anyhow::Result<f64> {
        self.inner
            .read()
            .prices
            .get(key)
            .map(|t| t.ltp)
            .ok_or_else(|| anyhow::anyhow!("no price for {key}"))
    }

    async fn get_quote(&self, key: &SymbolKey) -> anyhow::Result<Quote> {
        let inner = self.inner.read();
        let tick = inner
            .prices
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("no price for {key}"))?;
        Ok(Quote {
            key: key.clone(),
            ltp: tick.ltp,
            open: tick.open,
            high: tick.high,
            low: tick.low,
            close: tick.close,
            volume: tick.volume,
            bid: tick.bid,
            ask: tick.ask,
            timestamp: Utc::now(),
            simulated: true,
        })
    }

    async fn get_historical_data(
        &self,
        key: &SymbolKey,
        _interval: Timeframe,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>> {
        anyhow::bail!("paper broker has no historical data for {key}")
    }

    async fn get_symbol_token(&self, key: &SymbolKey) -> anyhow::Result<String> {
        Ok(format!("PAPER-{}", key.symbol))
    }

    async fn search_symbols(&self, query: &str) -> anyhow::Result<Vec<SymbolKey>> {
        let query = query.to_uppercase();
        Ok(self
            .inner
            .read()
            .prices
            .keys()
            .filter(|k| k.symbol.contains(&query))
            .cloned()
            .collect())
    }

    async fn get_profile(&self) -> anyhow::Result<HashMap<String, String>> {
        let mut profile = HashMap::new();
        profile.insert("client_id".to_string(), "PAPER".to_string());
        profile.insert("name".to_string(), "Paper Trading Account".to_string());
        Ok(profile)
    }

    async fn get_funds(&self) -> anyhow::Result<HashMap<String, f64>> {
        let inner = self.inner.read();
        let mut funds = HashMap::new();
        funds.insert("available".to_string(), inner.available_capital);
        funds.insert("initial".to_string(), self.initial_capital);
        funds.insert("realized_pnl".to_string(), inner.realized_pnl);
        Ok(funds)
    }

    fn provides_market_data(&self) -> bool {
        false
    }
}
