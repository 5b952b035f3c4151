use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ports::venue::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LegSide {
    Long,
    Short,
}

impl LegSide {
    pub fn entry_order_side(self) -> OrderSide {
        match self {
            LegSide::Long => OrderSide::Buy,
            LegSide::Short => OrderSide::Sell,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            LegSide::Long => LegSide::Short,
            LegSide::Short => LegSide::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PairStatus {
    Open,
    Closing,
    Closed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Leg {
    pub market: String,
    pub side: LegSide,
    pub intended_size: Decimal,
    pub filled_size: Decimal,
    /// Oracle price at submission, not necessarily the true fill price.
    pub entry_price: Decimal,
    pub order_ref: String,
}

impl Leg {
    pub fn new(market: &str, side: LegSide, intended_size: Decimal, entry_price: Decimal) -> Self {
        Self {
            market: market.to_string(),
            side,
            intended_size,
            filled_size: Decimal::ZERO,
            entry_price,
            order_ref: String::new(),
        }
    }

    /// Records a fill, clamped to `[0, intended_size]`.
    pub fn record_fill(&mut self, filled: Decimal) {
        self.filled_size = filled.max(Decimal::ZERO).min(self.intended_size);
    }

    pub fn reduce_fill(&mut self, by: Decimal) {
        self.filled_size = (self.filled_size - by.max(Decimal::ZERO)).max(Decimal::ZERO);
    }

    pub fn filled_notional(&self) -> Decimal {
        self.filled_size * self.entry_price
    }

    pub fn entry_notional(&self) -> Decimal {
        self.filled_notional().abs()
    }

    /// Mark-to-market PnL of the filled size against `exit_price`.
    pub fn proxy_pnl(&self, exit_price: Decimal) -> Decimal {
        match self.side {
            LegSide::Long => (exit_price - self.entry_price) * self.filled_size,
            LegSide::Short => (self.entry_price - exit_price) * self.filled_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairPosition {
    pub market_a: String,
    pub market_b: String,
    pub hedge_ratio: f64,
    pub entry_z_score: f64,
    #[serde(default)]
    pub half_life: Option<f64>,
    pub leg_a: Leg,
    pub leg_b: Leg,
    pub opened_at: DateTime<Utc>,
    pub status: PairStatus,
    #[serde(default)]
    pub comments: String,
}

impl PairPosition {
    pub fn key(&self) -> String {
        format!("{}/{}", self.market_a, self.market_b)
    }

    pub fn markets(&self) -> [&str; 2] {
        [self.market_a.as_str(), self.market_b.as_str()]
    }

    pub fn involves(&self, market: &str) -> bool {
        self.market_a == market || self.market_b == market
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_milliseconds() as f64 / 3_600_000.0
    }

    pub fn total_entry_notional(&self) -> Decimal {
        self.leg_a.entry_notional() + self.leg_b.entry_notional()
    }

    pub fn proxy_pnl(&self, exit_price_a: Decimal, exit_price_b: Decimal) -> Decimal {
        self.leg_a.proxy_pnl(exit_price_a) + self.leg_b.proxy_pnl(exit_price_b)
    }

    /// Appends a diagnostic line unless it repeats the last one.
    pub fn note(&mut self, message: &str) {
        if self.comments.lines().last() == Some(message) {
            return;
        }
        if !self.comments.is_empty() {
            self.comments.push('\n');
        }
        self.comments.push_str(message);
    }

    /// Structural checks applied to every record read back from disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.market_a.trim().is_empty() || self.market_b.trim().is_empty() {
            return Err("missing market".to_string());
        }
        if self.market_a == self.market_b {
            return Err(format!("both legs on {}", self.market_a));
        }
        if self.leg_a.market != self.market_a || self.leg_b.market != self.market_b {
            return Err("leg market does not match pair".to_string());
        }
        if !self.hedge_ratio.is_finite() || !self.entry_z_score.is_finite() {
            return Err("non-finite hedge ratio or entry z".to_string());
        }
        for leg in [&self.leg_a, &self.leg_b] {
            if leg.filled_size < Decimal::ZERO || leg.filled_size > leg.intended_size {
                return Err(format!(
                    "{} filled {} outside [0, {}]",
                    leg.market, leg.filled_size, leg.intended_size
                ));
            }
        }
        if self.status == PairStatus::Open
            && (self.leg_a.filled_size.is_zero() || self.leg_b.filled_size.is_zero())
        {
            return Err("open pair with an unfilled leg".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    /// Long A / short B, 1 unit each at 100 / 50, opened `age_hours` before `now`.
    pub fn open_pair(
        market_a: &str,
        market_b: &str,
        entry_z: f64,
        age_hours: i64,
        now: DateTime<Utc>,
    ) -> PairPosition {
        let mut leg_a = Leg::new(market_a, LegSide::Long, dec!(1), dec!(100));
        leg_a.record_fill(dec!(1));
        leg_a.order_ref = format!("{}-entry", market_a);
        let mut leg_b = Leg::new(market_b, LegSide::Short, dec!(2), dec!(50));
        leg_b.record_fill(dec!(2));
        leg_b.order_ref = format!("{}-entry", market_b);
        PairPosition {
            market_a: market_a.to_string(),
            market_b: market_b.to_string(),
            hedge_ratio: 2.0,
            entry_z_score: entry_z,
            half_life: Some(6.0),
            leg_a,
            leg_b,
            opened_at: now - Duration::hours(age_hours),
            status: PairStatus::Open,
            comments: String::new(),
        }
    }
}
