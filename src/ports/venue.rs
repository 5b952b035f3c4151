use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    #[error("venue unreachable: {0}")]
    Connectivity(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("price unavailable: {0}")]
    PriceUnavailable(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    ImmediateOrCancel,
    GoodTilCancel,
}

/// Venue-reported lifecycle state of a single order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Open,
    Filled,
    PartiallyFilled,
    Killed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderState::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMeta {
    pub oracle_price: Decimal,
    pub min_order_size: Decimal,
    pub step_size: Decimal,
    pub tick_size: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LivePosition {
    /// Signed size; positive is long.
    pub size: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub free_collateral: Decimal,
    pub margin_used: Decimal,
    pub positions: HashMap<String, LivePosition>,
}

impl AccountSnapshot {
    /// Signed live size for `market`, `None` when flat.
    pub fn live_size(&self, market: &str) -> Option<Decimal> {
        self.positions
            .get(market)
            .map(|p| p.size)
            .filter(|size| !size.is_zero())
    }

    pub fn is_live(&self, market: &str) -> bool {
        self.live_size(market).is_some()
    }

    pub fn unrealized_pnl(&self, market: &str) -> Decimal {
        self.positions
            .get(market)
            .filter(|p| !p.size.is_zero())
            .map(|p| p.unrealized_pnl)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn open_markets(&self) -> impl Iterator<Item = (&String, &LivePosition)> {
        self.positions.iter().filter(|(_, p)| !p.size.is_zero())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub market: String,
    pub side: OrderSide,
    pub size: Decimal,
    /// Worst acceptable execution price.
    pub price: Decimal,
    pub reduce_only: bool,
    pub time_in_force: TimeInForce,
    /// Anti-replay counter; stamped by the connector box, callers leave it at zero.
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_ref: String,
    /// Optimistic state reported at submission; not authoritative.
    pub state: OrderState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatusReport {
    pub order_ref: String,
    pub state: OrderState,
    pub filled_size: Decimal,
    /// Unreliable for cancelled or partially filled orders on some venues.
    pub remaining_size: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillRecord {
    pub order_ref: String,
    pub size: Decimal,
    pub price: Decimal,
}

#[async_trait]
pub trait VenueConnector {
    async fn start(&self) -> Result<(), VenueError> {
        Ok(())
    }

    async fn get_markets(&self) -> Result<HashMap<String, MarketMeta>, VenueError>;

    /// Closing prices, oldest first.
    async fn get_candles(
        &self,
        market: &str,
        resolution: &str,
        limit: usize,
    ) -> Result<Vec<f64>, VenueError>;

    async fn get_account(&self) -> Result<AccountSnapshot, VenueError>;

    /// Next sequence the venue expects for this signing identity.
    async fn get_sequence(&self) -> Result<u64, VenueError>;

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, VenueError>;

    async fn get_order(&self, order_ref: &str) -> Result<OrderStatusReport, VenueError>;

    async fn get_fills(&self, order_ref: &str) -> Result<Vec<FillRecord>, VenueError>;

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
