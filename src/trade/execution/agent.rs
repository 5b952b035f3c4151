use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::{ExecutionConfig, PairSpec};
use crate::ports::venue::{MarketMeta, OrderRequest, OrderSide, TimeInForce, VenueConnector};
use crate::trade::error::TradeError;
use crate::trade::execution::audit::{audit_order, AuditOutcome, RetryPolicy};
use crate::trade::position::{Leg, PairPosition, PairStatus};
use crate::trade::quantize::{
    acceptable_price, quantize_size_by_step, quantize_size_by_step_ceiling,
};
use crate::trade::signal::EntrySignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStage {
    Init,
    LegASubmitted,
    LegAAudited,
    LegBSubmitted,
    LegBAudited,
    Flattening,
    Live,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// Both legs filled and within residual tolerance.
    Live(PairPosition),
    /// Nothing left on the venue from this attempt.
    Failed { stage: EntryStage, error: TradeError },
    /// Unhedged exposure may remain; the record is kept for inspection.
    Error {
        position: PairPosition,
        error: TradeError,
    },
}

/// Largest tolerated `|notional_a - notional_b|`.
pub fn residual_tolerance(notional_a: Decimal, notional_b: Decimal, cfg: &ExecutionConfig) -> Decimal {
    let pct = cfg.residual_pct * notional_a.min(notional_b);
    cfg.residual_floor_usd.max(pct)
}

pub fn needs_flatten(notional_a: Decimal, notional_b: Decimal, cfg: &ExecutionConfig) -> bool {
    (notional_a - notional_b).abs() > residual_tolerance(notional_a, notional_b, cfg)
}

struct Attempt<'p> {
    pair: &'p PairSpec,
    stage: EntryStage,
}

impl Attempt<'_> {
    fn advance(&mut self, next: EntryStage) {
        log::debug!(
            "[ENTRY] pair={}/{} stage {:?} -> {:?}",
            self.pair.base,
            self.pair.quote,
            self.stage,
            next
        );
        self.stage = next;
    }
}

/// Drives one two-leg entry: leg A, audit, leg B sized off A's real fill, residual flatten.
pub struct ExecutionAgent<'a> {
    venue: &'a (dyn VenueConnector + Send + Sync),
    cfg: &'a ExecutionConfig,
    policy: RetryPolicy,
    usd_per_trade: Decimal,
}

impl<'a> ExecutionAgent<'a> {
    pub fn new(
        venue: &'a (dyn VenueConnector + Send + Sync),
        cfg: &'a ExecutionConfig,
        policy: RetryPolicy,
        usd_per_trade: Decimal,
    ) -> Self {
        Self {
            venue,
            cfg,
            policy,
            usd_per_trade,
        }
    }

    pub async fn open_pair(
        &self,
        pair: &PairSpec,
        signal: &EntrySignal,
        meta_a: &MarketMeta,
        meta_b: &MarketMeta,
        now: DateTime<Utc>,
    ) -> EntryOutcome {
        let mut attempt = Attempt {
            pair,
            stage: EntryStage::Init,
        };
        let price_a = meta_a.oracle_price;
        let price_b = meta_b.oracle_price;
        if price_a <= Decimal::ZERO {
            return failed(&mut attempt, TradeError::PriceUnavailable(pair.base.clone()));
        }
        if price_b <= Decimal::ZERO {
            return failed(&mut attempt, TradeError::PriceUnavailable(pair.quote.clone()));
        }

        let size_a = quantize_size_by_step(self.usd_per_trade / price_a, meta_a.step_size);
        let planned_b = quantize_size_by_step(size_a * price_a / price_b, meta_b.step_size);
        if size_a.is_zero() || size_a < meta_a.min_order_size {
            return failed(
                &mut attempt,
                TradeError::OrderRejected {
                    market: pair.base.clone(),
                    reason: format!("size {} under minimum {}", size_a, meta_a.min_order_size),
                },
            );
        }
        if planned_b.is_zero() || planned_b < meta_b.min_order_size {
            return failed(
                &mut attempt,
                TradeError::OrderRejected {
                    market: pair.quote.clone(),
                    reason: format!("size {} under minimum {}", planned_b, meta_b.min_order_size),
                },
            );
        }

        // leg A
        let mut leg_a = Leg::new(&pair.base, signal.side_a, size_a, price_a);
        attempt.advance(EntryStage::LegASubmitted);
        let order_a = match self
            .submit(&leg_a.market, signal.side_a.entry_order_side(), size_a, price_a, meta_a, false)
            .await
        {
            Ok(order_ref) => order_ref,
            Err(err) => return failed(&mut attempt, err),
        };
        leg_a.order_ref = order_a.clone();
        let audit_a = audit_order(self.venue, &order_a, self.policy).await;
        attempt.advance(EntryStage::LegAAudited);
        leg_a.record_fill(audit_a.filled_size());
        log::info!(
            "[ENTRY] pair={}/{} leg=A market={} intended={} filled={} state={}",
            pair.base,
            pair.quote,
            leg_a.market,
            size_a,
            leg_a.filled_size,
            audit_a.label()
        );
        if leg_a.filled_size.is_zero() {
            if audit_a == AuditOutcome::Timeout {
                log::warn!(
                    "[ENTRY] pair={}/{} leg A {} unaudited; orphan sweep will pick up any fill",
                    pair.base,
                    pair.quote,
                    order_a
                );
            }
            return failed(
                &mut attempt,
                TradeError::ZeroFill {
                    market: leg_a.market.clone(),
                },
            );
        }

        let mut position = PairPosition {
            market_a: pair.base.clone(),
            market_b: pair.quote.clone(),
            hedge_ratio: pair.hedge_ratio,
            entry_z_score: signal.z,
            half_life: pair.half_life,
            leg_a,
            leg_b: Leg::new(&pair.quote, signal.side_b, Decimal::ZERO, price_b),
            opened_at: now,
            status: PairStatus::Open,
            comments: String::new(),
        };

        // leg B: dollar-neutral against A's actual fill
        let size_b = quantize_size_by_step(
            position.leg_a.filled_size * price_a / price_b,
            meta_b.step_size,
        );
        position.leg_b.intended_size = size_b;
        if size_b.is_zero() || size_b < meta_b.min_order_size {
            let error = TradeError::OrderRejected {
                market: pair.quote.clone(),
                reason: format!(
                    "hedge size {} under minimum {} after partial fill",
                    size_b, meta_b.min_order_size
                ),
            };
            return self.unwind_leg_a(&mut attempt, position, meta_a, error).await;
        }
        attempt.advance(EntryStage::LegBSubmitted);
        let order_b = match self
            .submit(&pair.quote, signal.side_b.entry_order_side(), size_b, price_b, meta_b, false)
            .await
        {
            Ok(order_ref) => order_ref,
            Err(err) => return self.unwind_leg_a(&mut attempt, position, meta_a, err).await,
        };
        position.leg_b.order_ref = order_b.clone();
        let audit_b = audit_order(self.venue, &order_b, self.policy).await;
        attempt.advance(EntryStage::LegBAudited);
        if audit_b == AuditOutcome::Timeout {
            // fill unknown: the venue position decides, never unwind A blind
            match self.venue.get_account().await {
                Ok(account) => {
                    let live_b = account.live_size(&pair.quote).unwrap_or(Decimal::ZERO).abs();
                    log::warn!(
                        "[ENTRY] pair={}/{} leg B {} unaudited; venue shows {} on {}",
                        pair.base,
                        pair.quote,
                        order_b,
                        live_b,
                        pair.quote
                    );
                    position.leg_b.record_fill(live_b);
                }
                Err(err) => {
                    let error = TradeError::ResidualImbalance {
                        market: pair.quote.clone(),
                        residual: position.leg_a.filled_notional(),
                        reason: format!("leg B {} unaudited and account unavailable: {}", order_b, err),
                    };
                    return errored(&mut attempt, position, error);
                }
            }
        } else {
            position.leg_b.record_fill(audit_b.filled_size());
        }
        log::info!(
            "[ENTRY] pair={}/{} leg=B market={} intended={} filled={} state={}",
            pair.base,
            pair.quote,
            pair.quote,
            size_b,
            position.leg_b.filled_size,
            audit_b.label()
        );
        if position.leg_b.filled_size.is_zero() {
            let error = TradeError::ZeroFill {
                market: pair.quote.clone(),
            };
            return self.unwind_leg_a(&mut attempt, position, meta_a, error).await;
        }

        // residual
        let notional_a = position.leg_a.filled_notional();
        let notional_b = position.leg_b.filled_notional();
        if needs_flatten(notional_a, notional_b, self.cfg) {
            attempt.advance(EntryStage::Flattening);
            let residual = (notional_a - notional_b).abs();
            let (leg, meta) = if notional_a > notional_b {
                (&position.leg_a, meta_a)
            } else {
                (&position.leg_b, meta_b)
            };
            let market = leg.market.clone();
            let reduce = quantize_size_by_step(residual / leg.entry_price, meta.step_size)
                .min(leg.filled_size);
            if reduce.is_zero() || reduce < meta.min_order_size {
                let error = TradeError::ResidualImbalance {
                    market,
                    residual,
                    reason: format!("trim {} below minimum size {}", reduce, meta.min_order_size),
                };
                return errored(&mut attempt, position, error);
            }
            let side = leg.side.entry_order_side().opposite();
            let price = leg.entry_price;
            let flattened = self.reduce(&market, side, reduce, price, meta).await;
            match flattened {
                Ok(filled) if filled >= reduce => {
                    let leg = if market == position.leg_a.market {
                        &mut position.leg_a
                    } else {
                        &mut position.leg_b
                    };
                    leg.reduce_fill(filled);
                    position.note(&format!("flattened {} {} residual {}", market, filled, residual));
                }
                Ok(filled) => {
                    let error = TradeError::ResidualImbalance {
                        market,
                        residual,
                        reason: format!("flatten filled {} of {}", filled, reduce),
                    };
                    return errored(&mut attempt, position, error);
                }
                Err(err) => {
                    let error = TradeError::ResidualImbalance {
                        market,
                        residual,
                        reason: err.to_string(),
                    };
                    return errored(&mut attempt, position, error);
                }
            }
            let notional_a = position.leg_a.filled_notional();
            let notional_b = position.leg_b.filled_notional();
            if needs_flatten(notional_a, notional_b, self.cfg) {
                let error = TradeError::ResidualImbalance {
                    market,
                    residual: (notional_a - notional_b).abs(),
                    reason: "step rounding left the legs outside tolerance".to_string(),
                };
                return errored(&mut attempt, position, error);
            }
        }

        attempt.advance(EntryStage::Live);
        position.note(&format!(
            "opened z={:.3} A={} {} B={} {}",
            signal.z,
            position.leg_a.filled_size,
            price_a,
            position.leg_b.filled_size,
            price_b
        ));
        log::info!(
            "[ENTRY] pair={} live z={:.3} notional_a={} notional_b={}",
            position.key(),
            signal.z,
            position.leg_a.filled_notional(),
            position.leg_b.filled_notional()
        );
        EntryOutcome::Live(position)
    }

    async fn submit(
        &self,
        market: &str,
        side: OrderSide,
        size: Decimal,
        reference: Decimal,
        meta: &MarketMeta,
        reduce_only: bool,
    ) -> Result<String, TradeError> {
        let request = OrderRequest {
            market: market.to_string(),
            side,
            size,
            price: acceptable_price(reference, self.cfg.slippage_pct, meta.tick_size, side),
            reduce_only,
            time_in_force: TimeInForce::ImmediateOrCancel,
            sequence: 0,
        };
        self.venue
            .create_order(&request)
            .await
            .map(|ack| ack.order_ref)
            .map_err(|err| TradeError::from_venue(market, err))
    }

    /// Reduce-only IOC, audited. Returns the confirmed filled size.
    async fn reduce(
        &self,
        market: &str,
        side: OrderSide,
        size: Decimal,
        reference: Decimal,
        meta: &MarketMeta,
    ) -> Result<Decimal, TradeError> {
        let order_ref = self.submit(market, side, size, reference, meta, true).await?;
        Ok(audit_order(self.venue, &order_ref, self.policy)
            .await
            .filled_size())
    }

    /// Leg B could not be established: take leg A back off the venue.
    async fn unwind_leg_a(
        &self,
        attempt: &mut Attempt<'_>,
        mut position: PairPosition,
        meta_a: &MarketMeta,
        cause: TradeError,
    ) -> EntryOutcome {
        attempt.advance(EntryStage::Flattening);
        let leg = &position.leg_a;
        let size = quantize_size_by_step_ceiling(leg.filled_size, meta_a.step_size);
        let side = leg.side.entry_order_side().opposite();
        log::warn!(
            "[ENTRY] pair={} leg B failed ({}); flattening {} {} on {}",
            position.key(),
            cause,
            side_label(side),
            size,
            leg.market
        );
        let market = leg.market.clone();
        let price = leg.entry_price;
        match self.reduce(&market, side, size, price, meta_a).await {
            Ok(filled) if filled >= position.leg_a.filled_size => failed(attempt, cause),
            Ok(filled) => {
                position.leg_a.reduce_fill(filled);
                let residual = position.leg_a.filled_notional();
                errored(
                    attempt,
                    position,
                    TradeError::ResidualImbalance {
                        market,
                        residual,
                        reason: format!("after {}: flatten filled {} of {}", cause, filled, size),
                    },
                )
            }
            Err(err) => {
                let residual = position.leg_a.filled_notional();
                errored(
                    attempt,
                    position,
                    TradeError::ResidualImbalance {
                        market,
                        residual,
                        reason: format!("after {}: {}", cause, err),
                    },
                )
            }
        }
    }
}

fn side_label(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

fn failed(attempt: &mut Attempt<'_>, error: TradeError) -> EntryOutcome {
    let stage = attempt.stage;
    attempt.advance(EntryStage::Failed);
    log::info!(
        "[ENTRY] pair={}/{} failed at {:?}: {}",
        attempt.pair.base,
        attempt.pair.quote,
        stage,
        error
    );
    EntryOutcome::Failed { stage, error }
}

fn errored(attempt: &mut Attempt<'_>, mut position: PairPosition, error: TradeError) -> EntryOutcome {
    attempt.advance(EntryStage::Error);
    position.status = PairStatus::Error;
    position.note(&format!("ERROR: {}", error));
    log::error!(
        "[ENTRY] pair={} unhedged exposure: {}",
        position.key(),
        error
    );
    EntryOutcome::Error { position, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::venue::{OrderState, VenueError};
    use crate::trade::position::LegSide;
    use crate::trade::testing::{FillPlan, ScriptedVenue};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn exec_cfg() -> ExecutionConfig {
        ExecutionConfig {
            slippage_pct: dec!(0.05),
            audit_attempts: 3,
            audit_backoff_ms: 10,
            residual_floor_usd: dec!(10),
            residual_pct: dec!(0.01),
        }
    }

    fn pair() -> PairSpec {
        PairSpec {
            base: "AAA".to_string(),
            quote: "BBB".to_string(),
            hedge_ratio: 1.7,
            half_life: Some(5.0),
        }
    }

    fn long_a() -> EntrySignal {
        EntrySignal {
            z: -2.1,
            side_a: LegSide::Long,
            side_b: LegSide::Short,
        }
    }

    fn venue() -> ScriptedVenue {
        let venue = ScriptedVenue::new();
        venue.add_market("AAA", dec!(100), dec!(0.1), dec!(0.1));
        venue.add_market("BBB", dec!(50), dec!(0.1), dec!(0.1));
        venue
    }

    async fn open(venue: &ScriptedVenue, cfg: &ExecutionConfig) -> EntryOutcome {
        let markets = venue.get_markets().await.unwrap();
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let agent = ExecutionAgent::new(venue, cfg, policy, dec!(1000));
        agent
            .open_pair(&pair(), &long_a(), &markets["AAA"], &markets["BBB"], venue.now())
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn zero_fill_on_leg_a_never_submits_leg_b() {
        let venue = venue();
        venue.plan("AAA", vec![FillPlan::Fill(dec!(0))]);
        let cfg = exec_cfg();
        let outcome = open(&venue, &cfg).await;
        assert!(matches!(
            outcome,
            EntryOutcome::Failed {
                stage: EntryStage::LegAAudited,
                error: TradeError::ZeroFill { .. }
            }
        ));
        assert!(venue.requests_for("BBB").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn leg_b_is_sized_from_leg_a_actual_fill() {
        for (ratio, expected_b) in [(dec!(1), dec!(20)), (dec!(0.5), dec!(10)), (dec!(0.3), dec!(6))] {
            let venue = venue();
            venue.plan("AAA", vec![FillPlan::Fill(ratio)]);
            let cfg = exec_cfg();
            let outcome = open(&venue, &cfg).await;
            let EntryOutcome::Live(position) = outcome else {
                panic!("expected live entry for ratio {}", ratio);
            };
            let leg_b_orders = venue.requests_for("BBB");
            assert_eq!(leg_b_orders.len(), 1);
            assert_eq!(leg_b_orders[0].size, expected_b);
            assert_eq!(leg_b_orders[0].side, OrderSide::Sell);
            assert!(!leg_b_orders[0].reduce_only);
            assert_eq!(position.leg_b.filled_size, expected_b);
            assert_eq!(position.status, PairStatus::Open);
            assert!(position.leg_a.filled_size <= position.leg_a.intended_size);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn orders_are_ioc_with_slippage_capped_price() {
        let venue = venue();
        let cfg = exec_cfg();
        open(&venue, &cfg).await;
        let requests = venue.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|r| r.time_in_force == TimeInForce::ImmediateOrCancel));
        assert_eq!(requests[0].price, dec!(105));
        assert_eq!(requests[1].price, dec!(47.5));
    }

    #[test]
    fn residual_flatten_triggers_only_beyond_tolerance() {
        let cfg = exec_cfg();
        // tolerance = max(10, 1% of 990) = 10
        assert!(!needs_flatten(dec!(1000), dec!(990), &cfg));
        assert!(needs_flatten(dec!(1000), dec!(989), &cfg));
        // pct dominates for large notionals: 1% of 5000 = 50
        assert!(!needs_flatten(dec!(5050), dec!(5000), &cfg));
        assert!(needs_flatten(dec!(5000), dec!(5050.01), &cfg));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_leg_b_flattens_the_larger_leg() {
        let venue = venue();
        venue.plan("BBB", vec![FillPlan::Fill(dec!(0.5))]);
        let cfg = exec_cfg();
        let EntryOutcome::Live(position) = open(&venue, &cfg).await else {
            panic!("expected live entry");
        };
        let a_orders = venue.requests_for("AAA");
        assert_eq!(a_orders.len(), 2);
        assert!(a_orders[1].reduce_only);
        assert_eq!(a_orders[1].side, OrderSide::Sell);
        assert_eq!(a_orders[1].size, dec!(5));
        assert_eq!(position.leg_a.filled_size, dec!(5));
        assert_eq!(venue.position("AAA"), dec!(5));
        assert!(!needs_flatten(
            position.leg_a.filled_notional(),
            position.leg_b.filled_notional(),
            &cfg
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn residual_within_tolerance_is_left_alone() {
        let venue = venue();
        // B fills 19.9 of 20: 5 USD residual on 1000
        venue.plan("BBB", vec![FillPlan::Fill(dec!(0.995))]);
        let cfg = exec_cfg();
        let EntryOutcome::Live(_) = open(&venue, &cfg).await else {
            panic!("expected live entry");
        };
        assert_eq!(venue.requests_for("AAA").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flatten_marks_error() {
        let venue = venue();
        venue.plan("AAA", vec![FillPlan::Fill(dec!(1)), FillPlan::Reject]);
        venue.plan("BBB", vec![FillPlan::Fill(dec!(0.5))]);
        let cfg = exec_cfg();
        let outcome = open(&venue, &cfg).await;
        let EntryOutcome::Error { position, error } = outcome else {
            panic!("expected error outcome");
        };
        assert_eq!(position.status, PairStatus::Error);
        assert!(matches!(error, TradeError::ResidualImbalance { .. }));
        assert!(position.comments.contains("ERROR"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_leg_b_unwinds_leg_a() {
        let venue = venue();
        venue.plan("BBB", vec![FillPlan::Reject]);
        let cfg = exec_cfg();
        let outcome = open(&venue, &cfg).await;
        assert!(matches!(
            outcome,
            EntryOutcome::Failed {
                stage: EntryStage::Flattening,
                error: TradeError::OrderRejected { .. }
            }
        ));
        let a_orders = venue.requests_for("AAA");
        assert_eq!(a_orders.len(), 2);
        assert!(a_orders[1].reduce_only);
        assert_eq!(venue.position("AAA"), Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn undersized_entry_submits_nothing() {
        let venue = venue();
        venue.add_market("BBB", dec!(50), dec!(1), dec!(100));
        let cfg = exec_cfg();
        let outcome = open(&venue, &cfg).await;
        assert!(matches!(
            outcome,
            EntryOutcome::Failed {
                stage: EntryStage::Init,
                ..
            }
        ));
        assert!(venue.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn untradable_residual_trim_marks_error() {
        let venue = venue();
        venue.add_market("AAA", dec!(100), dec!(0.1), dec!(6));
        venue.plan("BBB", vec![FillPlan::Fill(dec!(0.5))]);
        let cfg = exec_cfg();
        let EntryOutcome::Error { position, error } = open(&venue, &cfg).await else {
            panic!("expected error outcome");
        };
        // trimming 5 AAA is under the 6 minimum: 1000 vs 500 stays unhedged
        assert!(matches!(
            error,
            TradeError::ResidualImbalance { ref market, .. } if market.as_str() == "AAA"
        ));
        assert_eq!(position.status, PairStatus::Error);
        assert_eq!(position.leg_a.filled_size, dec!(10));
        assert_eq!(position.leg_b.filled_size, dec!(10));
        assert_eq!(venue.requests_for("AAA").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn trim_floored_by_step_still_outside_tolerance_marks_error() {
        let venue = venue();
        // A: 8 @100 = 800; B fills 4 of 16 @50 = 200; trim floors 6 to 4 -> 400 vs 200
        venue.add_market("AAA", dec!(100), dec!(4), dec!(0.1));
        venue.plan("BBB", vec![FillPlan::Fill(dec!(0.25))]);
        let cfg = exec_cfg();
        let EntryOutcome::Error { position, error } = open(&venue, &cfg).await else {
            panic!("expected error outcome");
        };
        assert!(matches!(error, TradeError::ResidualImbalance { .. }));
        let a_orders = venue.requests_for("AAA");
        assert_eq!(a_orders.len(), 2);
        assert_eq!(a_orders[1].size, dec!(4));
        assert_eq!(position.leg_a.filled_size, dec!(4));
        assert_eq!(venue.position("AAA"), dec!(4));
    }

    #[tokio::test(start_paused = true)]
    async fn leg_b_audit_timeout_reads_venue_position() {
        let venue = venue();
        // ord-2 is leg B; it never reaches a terminal state but did fill on the venue
        venue.script_status("ord-2", vec![(OrderState::Open, Decimal::ZERO, None)]);
        let cfg = exec_cfg();
        let EntryOutcome::Live(position) = open(&venue, &cfg).await else {
            panic!("expected live entry");
        };
        assert_eq!(position.leg_b.filled_size, dec!(20));
        assert_eq!(venue.requests_for("AAA").len(), 1);
        assert_eq!(venue.position("BBB"), dec!(-20));
    }

    #[tokio::test(start_paused = true)]
    async fn leg_b_audit_timeout_without_fill_unwinds_leg_a() {
        let venue = venue();
        venue.plan("BBB", vec![FillPlan::Fill(dec!(0))]);
        venue.script_status("ord-2", vec![(OrderState::Open, Decimal::ZERO, None)]);
        let cfg = exec_cfg();
        let outcome = open(&venue, &cfg).await;
        assert!(matches!(
            outcome,
            EntryOutcome::Failed {
                stage: EntryStage::Flattening,
                error: TradeError::ZeroFill { .. }
            }
        ));
        assert_eq!(venue.position("AAA"), Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn leg_b_audit_timeout_without_account_keeps_both_legs() {
        let venue = venue();
        venue.script_status("ord-2", vec![(OrderState::Open, Decimal::ZERO, None)]);
        venue.fail_account(Some(VenueError::Connectivity("down".to_string())));
        let cfg = exec_cfg();
        let EntryOutcome::Error { position, .. } = open(&venue, &cfg).await else {
            panic!("expected error outcome");
        };
        assert_eq!(position.status, PairStatus::Error);
        assert_eq!(position.leg_b.order_ref, "ord-2");
        assert_eq!(position.leg_a.filled_size, dec!(10));
        // no blind unwind of A
        assert_eq!(venue.requests_for("AAA").len(), 1);
        assert_eq!(venue.position("AAA"), dec!(10));
    }
}
