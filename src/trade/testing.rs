//! In-memory venue double with scripted order outcomes.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::ports::venue::{
    AccountSnapshot, FillRecord, LivePosition, MarketMeta, OrderAck, OrderRequest, OrderSide,
    OrderState, OrderStatusReport, VenueConnector, VenueError,
};

/// What the next order on a market does.
#[derive(Debug, Clone, PartialEq)]
pub enum FillPlan {
    /// Fills `ratio` of the requested size; 0 is killed, 1 is filled.
    Fill(Decimal),
    Reject,
    Connectivity,
    RateLimited,
}

type ScriptedStatus = (OrderState, Decimal, Option<Decimal>);

#[derive(Default)]
struct Inner {
    markets: HashMap<String, MarketMeta>,
    candles: HashMap<String, Vec<f64>>,
    account: AccountSnapshot,
    account_error: Option<VenueError>,
    plans: HashMap<String, VecDeque<FillPlan>>,
    statuses: HashMap<String, VecDeque<ScriptedStatus>>,
    fills: HashMap<String, Vec<Decimal>>,
    polls: HashMap<String, usize>,
    requests: Vec<OrderRequest>,
    next_sequence: u64,
    order_count: u64,
    now: Option<DateTime<Utc>>,
    apply_fills: bool,
}

pub struct ScriptedVenue {
    inner: Mutex<Inner>,
}

impl ScriptedVenue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                account: AccountSnapshot {
                    equity: dec!(20000),
                    free_collateral: dec!(20000),
                    ..Default::default()
                },
                now: Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
                apply_fills: true,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn add_market(&self, market: &str, price: Decimal, step: Decimal, min: Decimal) {
        self.lock().markets.insert(
            market.to_string(),
            MarketMeta {
                oracle_price: price,
                min_order_size: min,
                step_size: step,
                tick_size: dec!(0.01),
            },
        );
    }

    pub fn set_price(&self, market: &str, price: Decimal) {
        if let Some(meta) = self.lock().markets.get_mut(market) {
            meta.oracle_price = price;
        }
    }

    pub fn set_candles(&self, market: &str, closes: Vec<f64>) {
        self.lock().candles.insert(market.to_string(), closes);
    }

    pub fn set_position(&self, market: &str, size: Decimal, unrealized_pnl: Decimal) {
        self.lock().account.positions.insert(
            market.to_string(),
            LivePosition {
                size,
                unrealized_pnl,
            },
        );
    }

    pub fn position(&self, market: &str) -> Decimal {
        self.lock()
            .account
            .positions
            .get(market)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn set_collateral(&self, equity: Decimal, free: Decimal) {
        let mut inner = self.lock();
        inner.account.equity = equity;
        inner.account.free_collateral = free;
    }

    pub fn fail_account(&self, err: Option<VenueError>) {
        self.lock().account_error = err;
    }

    pub fn set_sequence(&self, next: u64) {
        self.lock().next_sequence = next;
    }

    /// Leaves positions untouched when orders fill.
    pub fn freeze_positions(&self) {
        self.lock().apply_fills = false;
    }

    pub fn plan(&self, market: &str, plans: Vec<FillPlan>) {
        self.lock()
            .plans
            .entry(market.to_string())
            .or_default()
            .extend(plans);
    }

    /// Status responses for `order_ref`, in order; the last one repeats.
    pub fn script_status(&self, order_ref: &str, statuses: Vec<ScriptedStatus>) {
        self.lock()
            .statuses
            .insert(order_ref.to_string(), statuses.into());
    }

    pub fn script_fills(&self, order_ref: &str, sizes: Vec<Decimal>) {
        self.lock().fills.insert(order_ref.to_string(), sizes);
    }

    pub fn status_polls(&self, order_ref: &str) -> usize {
        self.lock().polls.get(order_ref).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<OrderRequest> {
        self.lock().requests.clone()
    }

    pub fn requests_for(&self, market: &str) -> Vec<OrderRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.market == market)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VenueConnector for ScriptedVenue {
    async fn get_markets(&self) -> Result<HashMap<String, MarketMeta>, VenueError> {
        Ok(self.lock().markets.clone())
    }

    async fn get_candles(
        &self,
        market: &str,
        _resolution: &str,
        limit: usize,
    ) -> Result<Vec<f64>, VenueError> {
        let inner = self.lock();
        let closes = inner
            .candles
            .get(market)
            .ok_or_else(|| VenueError::PriceUnavailable(market.to_string()))?;
        let start = closes.len().saturating_sub(limit);
        Ok(closes[start..].to_vec())
    }

    async fn get_account(&self) -> Result<AccountSnapshot, VenueError> {
        let inner = self.lock();
        match &inner.account_error {
            Some(err) => Err(err.clone()),
            None => Ok(inner.account.clone()),
        }
    }

    async fn get_sequence(&self) -> Result<u64, VenueError> {
        Ok(self.lock().next_sequence)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, VenueError> {
        let mut inner = self.lock();
        inner.requests.push(request.clone());
        let plan = inner
            .plans
            .get_mut(&request.market)
            .and_then(|q| q.pop_front())
            .unwrap_or(FillPlan::Fill(Decimal::ONE));
        let ratio = match plan {
            FillPlan::Fill(ratio) => ratio,
            FillPlan::Reject => return Err(VenueError::Rejected("scripted reject".to_string())),
            FillPlan::Connectivity => {
                return Err(VenueError::Connectivity("scripted outage".to_string()))
            }
            FillPlan::RateLimited => {
                return Err(VenueError::RateLimited("scripted 429".to_string()))
            }
        };
        inner.order_count += 1;
        inner.next_sequence = inner.next_sequence.max(request.sequence + 1);
        let order_ref = format!("ord-{}", inner.order_count);

        let mut filled = request.size * ratio;
        if request.reduce_only {
            let live = inner
                .account
                .positions
                .get(&request.market)
                .map(|p| p.size.abs())
                .unwrap_or(Decimal::ZERO);
            filled = filled.min(live);
        }
        let state = if filled.is_zero() {
            OrderState::Killed
        } else if filled < request.size {
            OrderState::PartiallyFilled
        } else {
            OrderState::Filled
        };
        // statuses scripted ahead of submission win over the simulated outcome
        inner
            .statuses
            .entry(order_ref.clone())
            .or_insert_with(|| VecDeque::from(vec![(state, filled, None)]));
        if !filled.is_zero() {
            inner.fills.entry(order_ref.clone()).or_insert_with(|| vec![filled]);
        }
        if inner.apply_fills && !filled.is_zero() {
            let signed = match request.side {
                OrderSide::Buy => filled,
                OrderSide::Sell => -filled,
            };
            let entry = inner
                .account
                .positions
                .entry(request.market.clone())
                .or_default();
            entry.size += signed;
            if entry.size.is_zero() {
                inner.account.positions.remove(&request.market);
            }
        }
        Ok(OrderAck {
            order_ref,
            state: OrderState::Open,
        })
    }

    async fn get_order(&self, order_ref: &str) -> Result<OrderStatusReport, VenueError> {
        let mut inner = self.lock();
        *inner.polls.entry(order_ref.to_string()).or_default() += 1;
        let queue = inner
            .statuses
            .get_mut(order_ref)
            .ok_or_else(|| VenueError::NotFound(order_ref.to_string()))?;
        let (state, filled_size, remaining_size) = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
        .ok_or_else(|| VenueError::NotFound(order_ref.to_string()))?;
        Ok(OrderStatusReport {
            order_ref: order_ref.to_string(),
            state,
            filled_size,
            remaining_size,
        })
    }

    async fn get_fills(&self, order_ref: &str) -> Result<Vec<FillRecord>, VenueError> {
        let inner = self.lock();
        Ok(inner
            .fills
            .get(order_ref)
            .map(|sizes| {
                sizes
                    .iter()
                    .map(|size| FillRecord {
                        order_ref: order_ref.to_string(),
                        size: *size,
                        price: Decimal::ZERO,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn now(&self) -> DateTime<Utc> {
        self.lock().now.unwrap_or_else(Utc::now)
    }
}
