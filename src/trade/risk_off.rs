use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::config::{EntryConfig, RiskOffConfig};
use crate::notifier::Notifier;
use crate::ports::venue::{AccountSnapshot, MarketMeta, VenueConnector};
use crate::trade::close::{Closer, PairCloseStatus};
use crate::trade::error::TradeError;
use crate::trade::exit::ExitReason;
use crate::trade::position::{PairPosition, PairStatus};
use crate::trade::signal::fetch_spread_signal;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskCandidate {
    pub key: String,
    pub score: f64,
    pub age_hours: f64,
    pub abs_z: f64,
    pub unrealized_pnl: Decimal,
}

/// `w_age * age + w_z * |z| + w_pnl * max(0, -unrealized)`. A missing z scores as zero.
pub fn risk_score(cfg: &RiskOffConfig, age_hours: f64, z: Option<f64>, unrealized: Decimal) -> f64 {
    let abs_z = z.map(f64::abs).filter(|z| z.is_finite()).unwrap_or(0.0);
    let loss = (-unrealized).max(Decimal::ZERO).to_f64().unwrap_or(0.0);
    cfg.w_age * age_hours + cfg.w_abs_z * abs_z + cfg.w_unreal_pnl * loss
}

pub fn collateral_trigger(cfg: &RiskOffConfig, free_collateral: Decimal) -> Option<TradeError> {
    (cfg.enabled && free_collateral < cfg.free_collateral_trigger).then(|| {
        TradeError::CollateralBreach {
            free: free_collateral,
            threshold: cfg.free_collateral_trigger,
        }
    })
}

pub fn count_trigger(cfg: &RiskOffConfig, open_pairs: usize) -> Option<TradeError> {
    (cfg.enabled && open_pairs >= cfg.force_if_open_trades_ge).then(|| TradeError::CapBreach {
        open: open_pairs,
        limit: cfg.force_if_open_trades_ge,
    })
}

pub fn unrealized_pnl(position: &PairPosition, account: &AccountSnapshot) -> Decimal {
    account.unrealized_pnl(&position.market_a) + account.unrealized_pnl(&position.market_b)
}

/// Highest-scoring eligible pair: OPEN, both legs live, past the grace period, non-zero hedge.
pub fn select_candidate(
    cfg: &RiskOffConfig,
    positions: &[PairPosition],
    account: &AccountSnapshot,
    z_scores: &HashMap<String, Option<f64>>,
    now: DateTime<Utc>,
) -> Option<RiskCandidate> {
    positions
        .iter()
        .filter(|p| p.status == PairStatus::Open)
        .filter(|p| p.hedge_ratio != 0.0)
        .filter(|p| account.is_live(&p.market_a) && account.is_live(&p.market_b))
        .filter(|p| p.age_hours(now) >= cfg.min_age_hours)
        .map(|p| {
            let key = p.key();
            let z = z_scores.get(&key).copied().flatten();
            let age_hours = p.age_hours(now);
            let unrealized = unrealized_pnl(p, account);
            RiskCandidate {
                score: risk_score(cfg, age_hours, z, unrealized),
                abs_z: z.map(f64::abs).unwrap_or(0.0),
                age_hours,
                unrealized_pnl: unrealized,
                key,
            }
        })
        .fold(None, |best: Option<RiskCandidate>, candidate| match best {
            Some(b) if b.score >= candidate.score => Some(b),
            _ => Some(candidate),
        })
}

/// Force-closes at most one pair per invocation.
pub struct RiskOffManager<'a> {
    venue: &'a (dyn VenueConnector + Send + Sync),
    cfg: &'a RiskOffConfig,
    entry: &'a EntryConfig,
    closer: Closer<'a>,
    notifier: &'a dyn Notifier,
}

impl<'a> RiskOffManager<'a> {
    pub fn new(
        venue: &'a (dyn VenueConnector + Send + Sync),
        cfg: &'a RiskOffConfig,
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

    /// Returns the closed candidate, if any. A partially closed pair stays CLOSING in the ledger.
    pub async fn run(
        &self,
        trigger: &TradeError,
        positions: &mut Vec<PairPosition>,
        account: &AccountSnapshot,
        markets: &HashMap<String, MarketMeta>,
    ) -> Option<RiskCandidate> {
        let now = self.venue.now();
        let mut z_scores = HashMap::new();
        for p in positions.iter().filter(|p| p.status == PairStatus::Open) {
            let z = match fetch_spread_signal(
                self.venue,
                &p.market_a,
                &p.market_b,
                p.hedge_ratio,
                self.entry,
            )
            .await
            {
                Ok(signal) => signal.map(|s| s.z),
                Err(err) => {
                    log::warn!("[RISK_OFF] pair={} z unavailable: {}", p.key(), err);
                    None
                }
            };
            z_scores.insert(p.key(), z);
        }

        let Some(candidate) = select_candidate(self.cfg, positions, account, &z_scores, now) else {
            log::info!("[RISK_OFF] trigger={} but no eligible pair", trigger);
            return None;
        };
        let idx = positions.iter().position(|p| p.key() == candidate.key)?;
        log::warn!(
            "[RISK_OFF] trigger={} closing pair={} score={:.3} age_h={:.2} |z|={:.3} unreal={}",
            trigger,
            candidate.key,
            candidate.score,
            candidate.age_hours,
            candidate.abs_z,
            candidate.unrealized_pnl
        );
        let reason = format!(
            "{} ({}) score={:.3}",
            ExitReason::RiskOff.as_str(),
            trigger,
            candidate.score
        );
        let status = self
            .closer
            .close_pair(&mut positions[idx], account, markets, &reason)
            .await;
        self.notifier.send(
            &format!("[RISK_OFF] {} {:?}", candidate.key, status),
            &positions[idx].comments,
        );
        match status {
            PairCloseStatus::Flat => {
                positions.remove(idx);
                Some(candidate)
            }
            PairCloseStatus::PartiallyClosed => Some(candidate),
            PairCloseStatus::Failed => None,
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
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn cfg() -> RiskOffConfig {
        RiskOffConfig {
            enabled: true,
            free_collateral_trigger: dec!(7000),
            force_if_open_trades_ge: 6,
            min_age_hours: 2.0,
            w_age: 1.0,
            w_abs_z: 3.0,
            w_unreal_pnl: 0.001,
        }
    }

    #[test]
    fn score_ignores_gains_and_missing_z() {
        let cfg = cfg();
        assert_eq!(risk_score(&cfg, 4.0, None, dec!(500)), 4.0);
        let s = risk_score(&cfg, 4.0, Some(-2.0), dec!(-1000));
        assert!((s - (4.0 + 6.0 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn triggers_fire_at_thresholds() {
        let cfg = cfg();
        assert!(collateral_trigger(&cfg, dec!(6999.99)).is_some());
        assert!(collateral_trigger(&cfg, dec!(7000)).is_none());
        assert!(count_trigger(&cfg, 6).is_some());
        assert!(count_trigger(&cfg, 5).is_none());
        let mut off = cfg.clone();
        off.enabled = false;
        assert!(count_trigger(&off, 10).is_none());
    }

    fn three_pairs(venue: &ScriptedVenue) -> Vec<PairPosition> {
        let now = venue.now();
        for (m, size, pnl) in [
            ("A1", dec!(1), dec!(-50)),
            ("B1", dec!(-2), dec!(0)),
            ("A2", dec!(1), dec!(-2000)),
            ("B2", dec!(-2), dec!(0)),
            ("A3", dec!(1), dec!(0)),
            ("B3", dec!(-2), dec!(0)),
            ("A4", dec!(1), dec!(-9000)),
            ("B4", dec!(-2), dec!(0)),
        ] {
            venue.set_position(m, size, pnl);
            venue.add_market(m, dec!(100), dec!(0.1), dec!(0.1));
        }
        vec![
            open_pair("A1", "B1", -2.0, 10, now),
            open_pair("A2", "B2", -2.0, 3, now),
            open_pair("A3", "B3", -2.0, 6, now),
            // loses most but inside the grace period
            open_pair("A4", "B4", -2.0, 1, now),
        ]
    }

    #[tokio::test]
    async fn selects_argmax_among_eligible() {
        let venue = ScriptedVenue::new();
        let positions = three_pairs(&venue);
        let account = venue.get_account().await.unwrap();
        let mut z = HashMap::new();
        z.insert("A1/B1".to_string(), Some(0.5));
        z.insert("A2/B2".to_string(), Some(-1.0));
        z.insert("A3/B3".to_string(), Some(2.5));
        z.insert("A4/B4".to_string(), Some(4.0));
        // A1: 10 + 1.5 + 0.05 = 11.55; A2: 3 + 3 + 2 = 8; A3: 6 + 7.5 = 13.5
        let best = select_candidate(&cfg(), &positions, &account, &z, venue.now()).unwrap();
        assert_eq!(best.key, "A3/B3");
        assert!((best.score - 13.5).abs() < 1e-9);

        z.insert("A3/B3".to_string(), None);
        let best = select_candidate(&cfg(), &positions, &account, &z, venue.now()).unwrap();
        assert_eq!(best.key, "A1/B1");
    }

    #[tokio::test]
    async fn zero_hedge_ratio_and_young_pairs_are_skipped() {
        let venue = ScriptedVenue::new();
        let mut positions = three_pairs(&venue);
        for p in positions.iter_mut().take(3) {
            p.hedge_ratio = 0.0;
        }
        let account = venue.get_account().await.unwrap();
        let none = select_candidate(&cfg(), &positions, &account, &HashMap::new(), venue.now());
        assert!(none.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_closes_exactly_one_pair() {
        let venue = ScriptedVenue::new();
        let mut positions = three_pairs(&venue);
        let account = venue.get_account().await.unwrap();
        let markets = venue.get_markets().await.unwrap();
        let cfg = cfg();
        let entry = EntryConfig {
            zscore_thresh: 1.5,
            z_window: 21,
            candle_resolution: "1HOUR".to_string(),
            candle_limit: 100,
            usd_per_trade: dec!(2000),
            usd_min_collateral: dec!(7000),
        };
        let sink = RecordingNotifier::default();
        let closer = Closer::new(&venue, dec!(0.05), RetryPolicy::new(2, Duration::from_millis(5)));
        let manager = RiskOffManager::new(&venue, &cfg, &entry, closer, &sink);
        let trigger = count_trigger(&cfg, 6).unwrap();

        // no candles: ranking falls back to age and losses
        let closed = manager
            .run(&trigger, &mut positions, &account, &markets)
            .await
            .unwrap();
        assert_eq!(closed.key, "A1/B1");
        assert_eq!(positions.len(), 3);
        assert_eq!(venue.requests().len(), 2);
        assert!(sink.contains("RISK_OFF"));
    }
}
