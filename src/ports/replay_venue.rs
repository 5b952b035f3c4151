use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use crate::ports::venue::{
    AccountSnapshot, FillRecord, LivePosition, MarketMeta, OrderAck, OrderRequest, OrderSide,
    OrderState, OrderStatusReport, VenueConnector, VenueError,
};

const MARGIN_FRACTION: Decimal = dec!(0.1);

fn default_step() -> Decimal {
    dec!(0.001)
}

fn default_tick() -> Decimal {
    dec!(0.01)
}

// One market inside a JSONL row
#[derive(Debug, Clone, Deserialize)]
struct DumpedMarket {
    price: Decimal,
    #[serde(default = "default_step")]
    step_size: Decimal,
    #[serde(default = "default_step")]
    min_order_size: Decimal,
    #[serde(default = "default_tick")]
    tick_size: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct DumpedRow {
    /// Milliseconds since the epoch.
    timestamp: i64,
    prices: HashMap<String, DumpedMarket>,
}

#[derive(Debug, Clone, Default)]
struct SimPosition {
    size: Decimal,
    entry_price: Decimal,
}

#[derive(Debug, Clone)]
struct SimOrder {
    state: OrderState,
    filled: Decimal,
    price: Decimal,
}

#[derive(Debug, Default)]
struct SimState {
    cash_pnl: Decimal,
    positions: HashMap<String, SimPosition>,
    orders: HashMap<String, SimOrder>,
    next_sequence: u64,
}

/// Paper venue driven by a JSONL price dump. Every IOC order fills in full at the
/// current row's price when that is within the order's limit, otherwise it is killed.
#[derive(Debug)]
pub struct ReplayVenue {
    data: Vec<DumpedRow>,
    cursor: AtomicUsize,
    initial_equity: Decimal,
    state: Mutex<SimState>,
}

impl ReplayVenue {
    pub fn from_file(path: &str, initial_equity: Decimal) -> Result<Self, VenueError> {
        let file = File::open(path)
            .map_err(|e| VenueError::Other(format!("failed to open replay file {}: {}", path, e)))?;
        let reader = BufReader::new(file);
        let mut data = Vec::new();
        for line in reader.lines() {
            let line =
                line.map_err(|e| VenueError::Other(format!("failed to read replay line: {}", e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let row: DumpedRow = serde_json::from_str(&line).map_err(|e| {
                VenueError::Other(format!("failed to parse replay row '{}': {}", line, e))
            })?;
            data.push(row);
        }
        Self::from_rows(data, initial_equity)
    }

    fn from_rows(data: Vec<DumpedRow>, initial_equity: Decimal) -> Result<Self, VenueError> {
        if data.is_empty() {
            return Err(VenueError::Other(
                "replay file is empty or invalid".to_string(),
            ));
        }
        log::info!("[REPLAY] loaded {} rows", data.len());
        Ok(Self {
            data,
            cursor: AtomicUsize::new(0),
            initial_equity,
            state: Mutex::new(SimState::default()),
        })
    }

    /// Advances one row. Returns false once the last row is reached.
    pub fn tick(&self) -> bool {
        let current = self.cursor.load(AtomicOrdering::SeqCst);
        if current + 1 < self.data.len() {
            self.cursor.fetch_add(1, AtomicOrdering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn row(&self) -> &DumpedRow {
        let idx = self
            .cursor
            .load(AtomicOrdering::SeqCst)
            .min(self.data.len().saturating_sub(1));
        &self.data[idx]
    }

    fn price(&self, market: &str) -> Result<Decimal, VenueError> {
        self.row()
            .prices
            .get(market)
            .map(|m| m.price)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| VenueError::PriceUnavailable(market.to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>, VenueError> {
        self.state
            .lock()
            .map_err(|_| VenueError::Other("replay state poisoned".to_string()))
    }
}

impl SimPosition {
    /// Applies a signed fill and returns the realized PnL.
    fn apply(&mut self, signed_qty: Decimal, price: Decimal) -> Decimal {
        let same_direction = self.size.is_zero() || (self.size > Decimal::ZERO) == (signed_qty > Decimal::ZERO);
        if same_direction {
            let total = self.size.abs() + signed_qty.abs();
            if !total.is_zero() {
                self.entry_price =
                    (self.size.abs() * self.entry_price + signed_qty.abs() * price) / total;
            }
            self.size += signed_qty;
            return Decimal::ZERO;
        }
        let closing = signed_qty.abs().min(self.size.abs());
        let direction = if self.size > Decimal::ZERO {
            Decimal::ONE
        } else {
            -Decimal::ONE
        };
        let realized = (price - self.entry_price) * closing * direction;
        self.size += signed_qty;
        if !self.size.is_zero() && (self.size > Decimal::ZERO) != (direction > Decimal::ZERO) {
            // flipped through zero
            self.entry_price = price;
        }
        realized
    }
}

#[async_trait]
impl VenueConnector for ReplayVenue {
    async fn get_markets(&self) -> Result<HashMap<String, MarketMeta>, VenueError> {
        Ok(self
            .row()
            .prices
            .iter()
            .map(|(name, m)| {
                (
                    name.clone(),
                    MarketMeta {
                        oracle_price: m.price,
                        min_order_size: m.min_order_size,
                        step_size: m.step_size,
                        tick_size: m.tick_size,
                    },
                )
            })
            .collect())
    }

    async fn get_candles(
        &self,
        market: &str,
        _resolution: &str,
        limit: usize,
    ) -> Result<Vec<f64>, VenueError> {
        let end = self.cursor.load(AtomicOrdering::SeqCst).min(self.data.len() - 1) + 1;
        let closes: Vec<f64> = self.data[..end]
            .iter()
            .filter_map(|row| row.prices.get(market))
            .filter_map(|m| m.price.to_f64())
            .collect();
        if closes.is_empty() {
            return Err(VenueError::PriceUnavailable(market.to_string()));
        }
        let start = closes.len().saturating_sub(limit);
        Ok(closes[start..].to_vec())
    }

    async fn get_account(&self) -> Result<AccountSnapshot, VenueError> {
        let state = self.lock()?;
        let mut positions = HashMap::new();
        let mut unrealized_total = Decimal::ZERO;
        let mut margin_used = Decimal::ZERO;
        for (market, pos) in state.positions.iter().filter(|(_, p)| !p.size.is_zero()) {
            let mark = self.price(market).unwrap_or(pos.entry_price);
            let unrealized = (mark - pos.entry_price) * pos.size;
            unrealized_total += unrealized;
            margin_used += pos.size.abs() * mark * MARGIN_FRACTION;
            positions.insert(
                market.clone(),
                LivePosition {
                    size: pos.size,
                    unrealized_pnl: unrealized,
                },
            );
        }
        let equity = self.initial_equity + state.cash_pnl + unrealized_total;
        Ok(AccountSnapshot {
            equity,
            free_collateral: equity - margin_used,
            margin_used,
            positions,
        })
    }

    async fn get_sequence(&self) -> Result<u64, VenueError> {
        Ok(self.lock()?.next_sequence)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, VenueError> {
        let price = self.price(&request.market)?;
        let mut state = self.lock()?;
        if request.sequence < state.next_sequence {
            return Err(VenueError::Rejected(format!(
                "sequence {} already used (next {})",
                request.sequence, state.next_sequence
            )));
        }
        if request.size <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!("size {}", request.size)));
        }
        let live = state
            .positions
            .get(&request.market)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO);
        let mut size = request.size;
        if request.reduce_only {
            let reduces = match request.side {
                OrderSide::Buy => live < Decimal::ZERO,
                OrderSide::Sell => live > Decimal::ZERO,
            };
            if !reduces {
                return Err(VenueError::Rejected(format!(
                    "reduce-only {:?} on {} with position {}",
                    request.side, request.market, live
                )));
            }
            size = size.min(live.abs());
        }
        state.next_sequence = request.sequence + 1;

        let marketable = match request.side {
            OrderSide::Buy => price <= request.price,
            OrderSide::Sell => price >= request.price,
        };
        let order_ref = rand::random::<u64>().to_string();
        let filled = if marketable { size } else { Decimal::ZERO };
        if !filled.is_zero() {
            let signed = match request.side {
                OrderSide::Buy => filled,
                OrderSide::Sell => -filled,
            };
            let realized = state
                .positions
                .entry(request.market.clone())
                .or_default()
                .apply(signed, price);
            state.cash_pnl += realized;
        }
        let order_state = if filled.is_zero() {
            OrderState::Killed
        } else if filled < request.size {
            OrderState::PartiallyFilled
        } else {
            OrderState::Filled
        };
        state.orders.insert(
            order_ref.clone(),
            SimOrder {
                state: order_state,
                filled,
                price,
            },
        );
        log::debug!(
            "[REPLAY] {} {:?} size={} filled={} px={} ref={}",
            request.market,
            request.side,
            request.size,
            filled,
            price,
            order_ref
        );
        Ok(OrderAck {
            order_ref,
            state: OrderState::Open,
        })
    }

    async fn get_order(&self, order_ref: &str) -> Result<OrderStatusReport, VenueError> {
        let state = self.lock()?;
        let order = state
            .orders
            .get(order_ref)
            .ok_or_else(|| VenueError::NotFound(order_ref.to_string()))?;
        Ok(OrderStatusReport {
            order_ref: order_ref.to_string(),
            state: order.state,
            filled_size: order.filled,
            remaining_size: None,
        })
    }

    async fn get_fills(&self, order_ref: &str) -> Result<Vec<FillRecord>, VenueError> {
        let state = self.lock()?;
        Ok(state
            .orders
            .get(order_ref)
            .filter(|o| !o.filled.is_zero())
            .map(|o| {
                vec![FillRecord {
                    order_ref: order_ref.to_string(),
                    size: o.filled,
                    price: o.price,
                }]
            })
            .unwrap_or_default())
    }

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.row().timestamp)
            .single()
            .unwrap_or_else(Utc::now)
    }
}
