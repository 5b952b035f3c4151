use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::ports::venue::{
    AccountSnapshot, MarketMeta, OrderRequest, OrderSide, TimeInForce, VenueConnector,
};
use crate::trade::error::TradeError;
use crate::trade::execution::audit::{audit_order, RetryPolicy};
use crate::trade::position::{PairPosition, PairStatus};
use crate::trade::quantize::{acceptable_price, quantize_size_by_step_ceiling};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairCloseStatus {
    /// Both legs confirmed flat.
    Flat,
    /// One leg flat, the other still live; stays CLOSING.
    PartiallyClosed,
    /// Neither leg closed; reverted to OPEN for a retry.
    Failed,
}

/// Reduce-only IOC close mechanics shared by exits, risk-off, the orphan sweep and the
/// startup abort. Sizes come from the live signed position, never the stored intent.
pub struct Closer<'a> {
    venue: &'a (dyn VenueConnector + Send + Sync),
    slippage_pct: Decimal,
    policy: RetryPolicy,
}

impl<'a> Closer<'a> {
    pub fn new(
        venue: &'a (dyn VenueConnector + Send + Sync),
        slippage_pct: Decimal,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            venue,
            slippage_pct,
            policy,
        }
    }

    /// Flattens `live_size` on `market`. `Ok` only when the audited fill covers it.
    pub async fn close_market(
        &self,
        market: &str,
        live_size: Decimal,
        meta: Option<&MarketMeta>,
    ) -> Result<Decimal, TradeError> {
        let meta = meta
            .filter(|m| m.oracle_price > Decimal::ZERO)
            .ok_or_else(|| TradeError::PriceUnavailable(market.to_string()))?;
        let live_abs = live_size.abs();
        if live_abs.is_zero() {
            return Ok(Decimal::ZERO);
        }
        // positive live size is long, so it closes with a sell
        let side = if live_size > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let size = quantize_size_by_step_ceiling(live_abs, meta.step_size);
        let request = OrderRequest {
            market: market.to_string(),
            side,
            size,
            price: acceptable_price(meta.oracle_price, self.slippage_pct, meta.tick_size, side),
            reduce_only: true,
            time_in_force: TimeInForce::ImmediateOrCancel,
            sequence: 0,
        };
        let ack = self
            .venue
            .create_order(&request)
            .await
            .map_err(|err| TradeError::from_venue(market, err))?;
        let outcome = audit_order(self.venue, &ack.order_ref, self.policy).await;
        let filled = outcome.filled_size();
        log::info!(
            "[CLOSE] market={} live={} size={} filled={} state={}",
            market,
            live_size,
            size,
            filled,
            outcome.label()
        );
        if filled >= live_abs {
            Ok(filled)
        } else {
            Err(TradeError::OrderRejected {
                market: market.to_string(),
                reason: format!("close filled {} of {} ({})", filled, live_abs, outcome.label()),
            })
        }
    }

    /// Closes whatever is still live on both legs and moves the status accordingly.
    pub async fn close_pair(
        &self,
        position: &mut PairPosition,
        account: &AccountSnapshot,
        markets: &HashMap<String, MarketMeta>,
        reason: &str,
    ) -> PairCloseStatus {
        let key = position.key();
        position.status = PairStatus::Closing;
        position.note(&format!("closing: {}", reason));

        let mut flat = 0;
        let mut errors = Vec::new();
        for market in [position.market_a.clone(), position.market_b.clone()] {
            let Some(live) = account.live_size(&market) else {
                flat += 1;
                continue;
            };
            match self.close_market(&market, live, markets.get(&market)).await {
                Ok(_) => flat += 1,
                Err(err) => {
                    log::warn!("[CLOSE] pair={} leg {} failed: {}", key, market, err);
                    errors.push(err.to_string());
                }
            }
        }

        let status = match flat {
            2 => {
                position.status = PairStatus::Closed;
                position.note(&format!("closed: {}", reason));
                PairCloseStatus::Flat
            }
            1 => {
                position.note(&format!("close incomplete: {}", errors.join("; ")));
                PairCloseStatus::PartiallyClosed
            }
            _ => {
                position.status = PairStatus::Open;
                position.note(&format!("close failed: {}", errors.join("; ")));
                PairCloseStatus::Failed
            }
        };
        log::info!("[CLOSE] pair={} reason={} result={:?}", key, reason, status);
        status
    }
}
