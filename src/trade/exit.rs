use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::config::{EntryConfig, ExitConfig};
use crate::notifier::Notifier;
use crate::ports::venue::{AccountSnapshot, MarketMeta, VenueConnector};
use crate::trade::close::{Closer, PairCloseStatus};
use crate::trade::error::TradeError;
use crate::trade::position::{PairPosition, PairStatus};
use crate::trade::signal::fetch_spread_signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TimeStop,
    ZeroCross,
    RiskOff,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TimeStop => "time_stop",
            ExitReason::ZeroCross => "zero_cross",
            ExitReason::RiskOff => "risk_off",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitDecision {
    Hold,
    /// z is inside the take-profit band but the proxy PnL has not cleared the floor.
    HoldForProfitFloor {
        pnl: Option<Decimal>,
        required: Decimal,
    },
    Close(ExitReason),
}

pub fn required_profit(cfg: &ExitConfig, position: &PairPosition) -> Decimal {
    cfg.min_profit_usd
        .max(cfg.min_profit_pct * position.total_entry_notional())
}

/// First satisfied rule wins: take-profit, stop-loss, time-stop, zero cross.
/// Without a z-score only the time-stop can fire.
pub fn evaluate_exit(
    cfg: &ExitConfig,
    position: &PairPosition,
    z_now: Option<f64>,
    proxy_pnl: Option<Decimal>,
    now: DateTime<Utc>,
) -> ExitDecision {
    let entry_abs = position.entry_z_score.abs();

    if let Some(z) = z_now {
        if cfg.use_z_tp && z.abs() <= cfg.z_tp {
            if !cfg.use_min_profit_tp {
                return ExitDecision::Close(ExitReason::TakeProfit);
            }
            let required = required_profit(cfg, position);
            return match proxy_pnl {
                Some(pnl) if pnl > required => ExitDecision::Close(ExitReason::TakeProfit),
                pnl => ExitDecision::HoldForProfitFloor { pnl, required },
            };
        }
        if cfg.use_z_sl && z.abs() >= entry_abs + cfg.z_sl_delta {
            return ExitDecision::Close(ExitReason::StopLoss);
        }
    }

    if cfg.use_time_stop && position.age_hours(now) >= cfg.time_stop_hours {
        return ExitDecision::Close(ExitReason::TimeStop);
    }

    if let Some(z) = z_now {
        let crossed = z * position.entry_z_score < 0.0;
        if cfg.close_at_zscore_cross && crossed && z.abs() >= entry_abs {
            return ExitDecision::Close(ExitReason::ZeroCross);
        }
    }
    ExitDecision::Hold
}

#[derive(Debug, Default)]
pub struct ExitSweep {
    pub closed: Vec<(String, ExitReason)>,
    /// CLOSING records whose remaining legs went flat this sweep.
    pub completed: Vec<String>,
    /// Stale records and cleared ERROR records.
    pub dropped: Vec<String>,
    pub flagged: Vec<String>,
    pub held: Vec<String>,
}

/// Runs the exit rules over the ledger against one account snapshot.
pub struct ExitEngine<'a> {
    venue: &'a (dyn VenueConnector + Send + Sync),
    cfg: &'a ExitConfig,
    entry: &'a EntryConfig,
    closer: Closer<'a>,
    notifier: &'a dyn Notifier,
}

impl<'a> ExitEngine<'a> {
    pub fn new(
        venue: &'a (dyn VenueConnector + Send + Sync),
        cfg: &'a ExitConfig,
        entry: &'a EntryConfig,
        closer: Closer<'a>,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            venue,
            cfg,
            entry,
            closer,
            notifier,
        }
    }

    pub async fn sweep(
        &self,
        positions: Vec<PairPosition>,
        account: &AccountSnapshot,
        markets: &HashMap<String, MarketMeta>,
    ) -> (Vec<PairPosition>, ExitSweep) {
        let now = self.venue.now();
        let mut report = ExitSweep::default();
        let mut kept = Vec::with_capacity(positions.len());

        for mut position in positions {
            let key = position.key();
            let live_a = account.is_live(&position.market_a);
            let live_b = account.is_live(&position.market_b);

            match position.status {
                PairStatus::Closed => {
                    report.completed.push(key);
                    continue;
                }
                PairStatus::Error => {
                    if !live_a && !live_b {
                        log::info!("[EXIT] pair={} error record flat on venue; dropping", key);
                        self.notifier.send(
                            &format!("[EXIT] {} error cleared", key),
                            &position.comments,
                        );
                        report.dropped.push(key);
                    } else {
                        kept.push(position);
                    }
                    continue;
                }
                PairStatus::Closing => {
                    if !live_a && !live_b {
                        log::info!("[EXIT] pair={} close completed", key);
                        report.completed.push(key);
                        continue;
                    }
                    let status = self
                        .closer
                        .close_pair(&mut position, account, markets, "close continuation")
                        .await;
                    if status == PairCloseStatus::Flat {
                        self.notifier
                            .send(&format!("[EXIT] {} closed", key), &position.comments);
                        report.completed.push(key);
                    } else {
                        kept.push(position);
                    }
                    continue;
                }
                PairStatus::Open => {}
            }

            if !live_a || !live_b {
                let missing = if !live_a {
                    &position.market_a
                } else {
                    &position.market_b
                };
                let reason =
                    TradeError::StaleRecord(format!("{} no longer live on venue", missing))
                        .to_string();
                if self.cfg.drop_stale_records {
                    log::warn!("[EXIT] pair={} {}; dropping record", key, reason);
                    self.notifier
                        .send(&format!("[EXIT] {} stale record dropped", key), &reason);
                    report.dropped.push(key);
                } else {
                    log::warn!("[EXIT] pair={} {}; keeping record", key, reason);
                    if !position.comments.contains(&reason) {
                        self.notifier
                            .send(&format!("[EXIT] {} stale record kept", key), &reason);
                    }
                    position.note(&reason);
                    report.flagged.push(key);
                    kept.push(position);
                }
                continue;
            }

            let z_now = self.current_z(&position).await;
            let proxy_pnl = match (
                markets.get(&position.market_a),
                markets.get(&position.market_b),
            ) {
                (Some(a), Some(b)) => Some(position.proxy_pnl(a.oracle_price, b.oracle_price)),
                _ => None,
            };
            let decision = evaluate_exit(self.cfg, &position, z_now, proxy_pnl, now);
            log::debug!(
                "[EXIT] pair={} z={:?} entry_z={:.3} pnl={:?} age_h={:.2} decision={:?}",
                key,
                z_now,
                position.entry_z_score,
                proxy_pnl,
                position.age_hours(now),
                decision
            );

            match decision {
                ExitDecision::Hold => {
                    report.held.push(key);
                    kept.push(position);
                }
                ExitDecision::HoldForProfitFloor { pnl, required } => {
                    log::info!(
                        "[EXIT] pair={} z inside TP band but pnl={:?} <= floor={}; holding",
                        key,
                        pnl,
                        required
                    );
                    report.held.push(key);
                    kept.push(position);
                }
                ExitDecision::Close(reason) => {
                    let detail = format!(
                        "{} z={} entry_z={:.3} pnl={} age_h={:.2}",
                        reason.as_str(),
                        z_now
                            .map(|z| format!("{:.3}", z))
                            .unwrap_or_else(|| "n/a".to_string()),
                        position.entry_z_score,
                        proxy_pnl
                            .map(|p| p.round_dp(2).to_string())
                            .unwrap_or_else(|| "n/a".to_string()),
                        position.age_hours(now)
                    );
                    let status = self
                        .closer
                        .close_pair(&mut position, account, markets, &detail)
                        .await;
                    self.notifier.send(
                        &format!("[EXIT] {} {} {:?}", key, reason.as_str(), status),
                        &position.comments,
                    );
                    match status {
                        PairCloseStatus::Flat => {
                            report.closed.push((key, reason));
                        }
                        _ => kept.push(position),
                    }
                }
            }
        }
        (kept, report)
    }

    async fn current_z(&self, position: &PairPosition) -> Option<f64> {
        match fetch_spread_signal(
            self.venue,
            &position.market_a,
            &position.market_b,
            position.hedge_ratio,
            self.entry,
        )
        .await
        {
            Ok(signal) => signal.map(|s| s.z),
            Err(err) => {
                log::warn!(
                    "[EXIT] pair={} candles unavailable: {}",
                    position.key(),
                    err
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::RecordingNotifier;
    use crate::trade::execution::audit::RetryPolicy;
    use crate::trade::position::fixtures::open_pair;
    use crate::trade::testing::ScriptedVenue;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn exit_cfg() -> ExitConfig {
        ExitConfig {
            use_z_tp: true,
            z_tp: 0.5,
            use_z_sl: true,
            z_sl_delta: 1.0,
            use_time_stop: true,
            time_stop_hours: 12.0,
            use_min_profit_tp: true,
            min_profit_pct: dec!(0.02),
            min_profit_usd: dec!(20),
            close_at_zscore_cross: true,
            drop_stale_records: true,
        }
    }

    fn entry_cfg() -> EntryConfig {
        EntryConfig {
            zscore_thresh: 1.5,
            z_window: 21,
            candle_resolution: "1HOUR".to_string(),
            candle_limit: 100,
            usd_per_trade: dec!(2000),
            usd_min_collateral: dec!(7000),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn take_profit_wins_over_stop_loss() {
        let mut cfg = exit_cfg();
        cfg.z_sl_delta = 0.1;
        let pair = open_pair("AAA", "BBB", 0.2, 1, now());
        // |0.4| <= 0.5 and |0.4| >= 0.2 + 0.1
        let decision = evaluate_exit(&cfg, &pair, Some(0.4), Some(dec!(100)), now());
        assert_eq!(decision, ExitDecision::Close(ExitReason::TakeProfit));
    }

    #[test]
    fn profit_floor_holds_even_past_time_stop() {
        let cfg = exit_cfg();
        let pair = open_pair("AAA", "BBB", -2.0, 30, now());
        let decision = evaluate_exit(&cfg, &pair, Some(0.1), Some(dec!(5)), now());
        assert_eq!(
            decision,
            ExitDecision::HoldForProfitFloor {
                pnl: Some(dec!(5)),
                required: dec!(20)
            }
        );
        let mut no_floor = cfg.clone();
        no_floor.use_min_profit_tp = false;
        assert_eq!(
            evaluate_exit(&no_floor, &pair, Some(0.1), Some(dec!(5)), now()),
            ExitDecision::Close(ExitReason::TakeProfit)
        );
    }

    #[test]
    fn floor_uses_pct_of_entry_notional_when_larger() {
        let mut cfg = exit_cfg();
        cfg.min_profit_pct = dec!(0.5);
        let pair = open_pair("AAA", "BBB", -2.0, 1, now());
        // 50% of 200 = 100
        assert_eq!(required_profit(&cfg, &pair), dec!(100));
    }

    #[test]
    fn stop_loss_on_widening() {
        let cfg = exit_cfg();
        let pair = open_pair("AAA", "BBB", -2.0, 1, now());
        assert_eq!(
            evaluate_exit(&cfg, &pair, Some(-3.0), None, now()),
            ExitDecision::Close(ExitReason::StopLoss)
        );
        assert_eq!(
            evaluate_exit(&cfg, &pair, Some(-2.9), None, now()),
            ExitDecision::Hold
        );
    }

    #[test]
    fn time_stop_fires_on_age_alone() {
        let cfg = exit_cfg();
        let fresh = open_pair("AAA", "BBB", -2.0, 11, now());
        let old = open_pair("AAA", "BBB", -2.0, 12, now());
        // z far outside every band, and unavailable
        for z in [Some(-2.5), None] {
            assert_eq!(evaluate_exit(&cfg, &fresh, z, None, now()), ExitDecision::Hold);
            assert_eq!(
                evaluate_exit(&cfg, &old, z, None, now()),
                ExitDecision::Close(ExitReason::TimeStop)
            );
        }
    }

    #[test]
    fn zero_cross_needs_magnitude_and_sign_flip() {
        let cfg = exit_cfg();
        let pair = open_pair("AAA", "BBB", -2.0, 1, now());
        assert_eq!(
            evaluate_exit(&cfg, &pair, Some(2.1), None, now()),
            ExitDecision::Close(ExitReason::ZeroCross)
        );
        assert_eq!(evaluate_exit(&cfg, &pair, Some(1.9), None, now()), ExitDecision::Hold);
        let mut off = cfg.clone();
        off.close_at_zscore_cross = false;
        assert_eq!(evaluate_exit(&off, &pair, Some(2.1), None, now()), ExitDecision::Hold);
    }

    fn flat_spread_candles(venue: &ScriptedVenue) {
        // spread a - 2b alternates 0/1 and ends on its mean: z = 0
        let mut a: Vec<f64> = (0..20).map(|i| 100.0 + (i % 2) as f64).collect();
        a.push(100.5);
        venue.set_candles("AAA", a);
        venue.set_candles("BBB", vec![50.0; 21]);
    }

    fn live_venue() -> ScriptedVenue {
        let venue = ScriptedVenue::new();
        venue.add_market("AAA", dec!(100), dec!(0.1), dec!(0.1));
        venue.add_market("BBB", dec!(50), dec!(0.1), dec!(0.1));
        venue.set_position("AAA", dec!(1), dec!(0));
        venue.set_position("BBB", dec!(-2), dec!(0));
        venue
    }

    async fn sweep_once(
        venue: &ScriptedVenue,
        cfg: &ExitConfig,
        positions: Vec<PairPosition>,
        sink: &RecordingNotifier,
    ) -> (Vec<PairPosition>, ExitSweep) {
        let entry = entry_cfg();
        let closer = Closer::new(venue, dec!(0.05), RetryPolicy::new(2, Duration::from_millis(5)));
        let engine = ExitEngine::new(venue, cfg, &entry, closer, sink);
        let account = venue.get_account().await.unwrap();
        let markets = venue.get_markets().await.unwrap();
        engine.sweep(positions, &account, &markets).await
    }

    #[tokio::test(start_paused = true)]
    async fn monetary_gate_keeps_pair_open_until_profitable() {
        let venue = live_venue();
        flat_spread_candles(&venue);
        let cfg = exit_cfg();
        let sink = RecordingNotifier::default();
        let pair = open_pair("AAA", "BBB", -2.0, 1, venue.now());

        let (kept, report) = sweep_once(&venue, &cfg, vec![pair], &sink).await;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].status, PairStatus::Open);
        assert_eq!(report.held.len(), 1);
        assert!(venue.requests().is_empty());

        // +30 on leg A clears max(20, 2% of 200)
        venue.set_price("AAA", dec!(130));
        let (kept, report) = sweep_once(&venue, &cfg, kept, &sink).await;
        assert!(kept.is_empty());
        assert_eq!(report.closed, vec![("AAA/BBB".to_string(), ExitReason::TakeProfit)]);
        assert_eq!(venue.position("AAA"), Decimal::ZERO);
        assert_eq!(venue.position("BBB"), Decimal::ZERO);
        assert!(sink.contains("take_profit"));
    }

    #[tokio::test(start_paused = true)]
    async fn old_pair_without_candles_is_time_stopped() {
        let venue = live_venue();
        let cfg = exit_cfg();
        let sink = RecordingNotifier::default();
        let pair = open_pair("AAA", "BBB", -2.0, 13, venue.now());

        let (kept, report) = sweep_once(&venue, &cfg, vec![pair], &sink).await;
        assert!(kept.is_empty());
        assert_eq!(report.closed[0].1, ExitReason::TimeStop);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_record_dropped_or_flagged_per_policy() {
        let venue = live_venue();
        venue.set_position("BBB", dec!(0), dec!(0));
        let sink = RecordingNotifier::default();
        let pair = open_pair("AAA", "BBB", -2.0, 1, venue.now());

        let cfg = exit_cfg();
        let (kept, report) = sweep_once(&venue, &cfg, vec![pair.clone()], &sink).await;
        assert!(kept.is_empty());
        assert_eq!(report.dropped, vec!["AAA/BBB".to_string()]);

        let mut conservative = exit_cfg();
        conservative.drop_stale_records = false;
        let (kept, report) = sweep_once(&venue, &conservative, vec![pair], &sink).await;
        assert_eq!(kept.len(), 1);
        assert_eq!(report.flagged.len(), 1);
        assert!(kept[0].comments.contains("stale record BBB"));
        // flagged records are not closed
        assert!(venue.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_record_finishes_remaining_leg() {
        let venue = live_venue();
        venue.set_position("AAA", dec!(0), dec!(0));
        let cfg = exit_cfg();
        let sink = RecordingNotifier::default();
        let mut pair = open_pair("AAA", "BBB", -2.0, 1, venue.now());
        pair.status = PairStatus::Closing;

        let (kept, report) = sweep_once(&venue, &cfg, vec![pair], &sink).await;
        assert!(kept.is_empty());
        assert_eq!(report.completed, vec!["AAA/BBB".to_string()]);
        assert!(report.dropped.is_empty());
        assert_eq!(venue.requests_for("BBB").len(), 1);
        assert!(venue.requests_for("AAA").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn error_record_kept_until_flat() {
        let venue = live_venue();
        venue.set_position("BBB", dec!(0), dec!(0));
        let cfg = exit_cfg();
        let sink = RecordingNotifier::default();
        let mut pair = open_pair("AAA", "BBB", -2.0, 30, venue.now());
        pair.status = PairStatus::Error;

        let (kept, _) = sweep_once(&venue, &cfg, vec![pair], &sink).await;
        assert_eq!(kept.len(), 1);
        assert!(venue.requests().is_empty());

        venue.set_position("AAA", dec!(0), dec!(0));
        let (kept, report) = sweep_once(&venue, &cfg, kept, &sink).await;
        assert!(kept.is_empty());
        assert_eq!(report.dropped.len(), 1);
    }
}
