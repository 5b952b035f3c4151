use rust_decimal::Decimal;
use thiserror::Error;

use crate::ports::venue::VenueError;

/// Per-pair failure taxonomy. None of these abort the scheduler loop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TradeError {
    #[error("connectivity: {0}")]
    Connectivity(String),
    #[error("order rejected on {market}: {reason}")]
    OrderRejected { market: String, reason: String },
    #[error("zero fill on {market}")]
    ZeroFill { market: String },
    #[error("residual imbalance {residual} USD on {market} could not be flattened: {reason}")]
    ResidualImbalance {
        market: String,
        residual: Decimal,
        reason: String,
    },
    #[error("stale record {0}")]
    StaleRecord(String),
    #[error("free collateral {free} below {threshold}")]
    CollateralBreach { free: Decimal, threshold: Decimal },
    #[error("{open} open pairs at or above {limit}")]
    CapBreach { open: usize, limit: usize },
    #[error("price unavailable for {0}")]
    PriceUnavailable(String),
}

impl TradeError {
    pub fn from_venue(market: &str, err: VenueError) -> Self {
        match err {
            VenueError::Connectivity(msg) | VenueError::RateLimited(msg) => {
                TradeError::Connectivity(msg)
            }
            VenueError::PriceUnavailable(_) => TradeError::PriceUnavailable(market.to_string()),
            other => TradeError::OrderRejected {
                market: market.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
