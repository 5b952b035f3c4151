use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::config::PairTradeConfig;
use crate::notifier::Notifier;
use crate::ports::replay_venue::ReplayVenue;
use crate::ports::venue::{AccountSnapshot, MarketMeta, VenueConnector};
use crate::trade::close::Closer;
use crate::trade::error::TradeError;
use crate::trade::execution::agent::{EntryOutcome, ExecutionAgent};
use crate::trade::execution::connector_box::VenueConnectorBox;
use crate::trade::exit::{ExitEngine, ExitSweep};
use crate::trade::kpi::KpiSnapshot;
use crate::trade::ledger::Ledger;
use crate::trade::position::{PairPosition, PairStatus};
use crate::trade::risk_off::{collateral_trigger, count_trigger, RiskOffManager};
use crate::trade::signal::{entry_signal, fetch_spread_signal};

/// What one scheduler tick did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub exits: Option<ExitSweep>,
    pub forced_exits: Option<ExitSweep>,
    pub opened: Vec<String>,
    pub errored: Vec<String>,
    pub risk_off_closed: Vec<String>,
    pub kpi: Option<KpiSnapshot>,
    pub orphans: Vec<String>,
}

/// Single-flight control loop: exits every tick, KPI every N ticks, batched entries,
/// risk-off on collateral (KPI) and open-count (after a batch).
pub struct PairTradeEngine {
    cfg: PairTradeConfig,
    venue: Arc<dyn VenueConnector + Send + Sync>,
    replay: Option<Arc<ReplayVenue>>,
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    tick_count: u64,
    orphans_reported: HashSet<String>,
}

impl PairTradeEngine {
    pub async fn new(cfg: PairTradeConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let (connector, replay) = VenueConnectorBox::create(&cfg, notifier.clone())
            .context("failed to initialize venue connector")?;
        connector
            .start()
            .await
            .context("failed to start venue connector")?;
        Ok(Self::with_venue(cfg, Arc::new(connector), replay, notifier))
    }

    pub fn with_venue(
        cfg: PairTradeConfig,
        venue: Arc<dyn VenueConnector + Send + Sync>,
        replay: Option<Arc<ReplayVenue>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ledger = Ledger::new(&cfg.ledger_file);
        Self {
            cfg,
            venue,
            replay,
            ledger,
            notifier,
            tick_count: 0,
            orphans_reported: HashSet::new(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        log::info!(
            "[CONFIG] venue={} pairs={} interval={}s kpi_every={} batch={} cap={}",
            self.cfg.venue,
            self.cfg.pairs.len(),
            self.cfg.cadence.interval_secs,
            self.cfg.cadence.kpi_every_ticks,
            self.cfg.cadence.batch_open_trades,
            self.cfg.cadence.max_open_trades
        );
        log::info!(
            "[CONFIG] ledger={} manage_exits={} place_trades={} risk_off={} drop_stale={}",
            self.ledger.path().display(),
            self.cfg.cadence.manage_exits,
            self.cfg.cadence.place_trades,
            self.cfg.risk_off.enabled,
            self.cfg.exit.drop_stale_records
        );
        if self.cfg.abort_all_positions {
            self.force_close_on_startup().await?;
        }

        if let Some(replay) = self.replay.clone() {
            log::info!("[BACKTEST] replaying {} rows", replay.len());
            loop {
                if let Err(e) = self.step().await {
                    log::error!("[BACKTEST] step failed: {:?}", e);
                }
                if !replay.tick() {
                    log::info!("[BACKTEST] end of data reached");
                    break;
                }
            }
            if let Ok(account) = self.venue.get_account().await {
                log::info!(
                    "[BACKTEST] final equity={} free_collateral={}",
                    account.equity.round_dp(2),
                    account.free_collateral.round_dp(2)
                );
            }
            return Ok(());
        }

        log::info!("[LIVE] running");
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.cfg.cadence.interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = self.step().await {
                log::error!("pairtrade step failed: {:?}", e);
            }
        }
    }

    fn closer(&self) -> Closer<'_> {
        Closer::new(
            self.venue.as_ref(),
            self.cfg.execution.slippage_pct,
            self.cfg.audit_policy(),
        )
    }

    fn notify(&self, subject: &str, body: &str) {
        self.notifier.send(subject, body);
    }

    fn save(&self, positions: &[PairPosition]) -> Result<()> {
        self.ledger
            .save(positions)
            .with_context(|| format!("failed to write ledger {}", self.ledger.path().display()))
    }

    async fn snapshot(&self) -> Result<(AccountSnapshot, HashMap<String, MarketMeta>)> {
        let account = self
            .venue
            .get_account()
            .await
            .context("account snapshot unavailable")?;
        let markets = self
            .venue
            .get_markets()
            .await
            .context("market metadata unavailable")?;
        Ok((account, markets))
    }

    /// One scheduler tick. Errors here skip the rest of the tick only.
    pub async fn step(&mut self) -> Result<CycleReport> {
        self.tick_count += 1;
        let mut report = CycleReport::default();

        let loaded = self
            .ledger
            .load()
            .with_context(|| format!("failed to read ledger {}", self.ledger.path().display()))?;
        for rejected in &loaded.rejected {
            self.notify("[LEDGER] stale record dropped", rejected);
        }
        let mut positions = loaded.positions;
        let (account, markets) = self.snapshot().await?;

        report.orphans = self.sweep_orphans(&positions, &account, &markets).await;

        if self.cfg.cadence.manage_exits {
            let (kept, sweep) = self.run_exits(positions, &account, &markets).await;
            positions = kept;
            report.exits = Some(sweep);
        }
        self.save(&positions)?;

        if (self.tick_count - 1) % self.cfg.cadence.kpi_every_ticks == 0 {
            match self.snapshot().await {
                Ok((account, markets)) => {
                    let kpi = KpiSnapshot::collect(&account, &markets, &positions);
                    log::info!(
                        "[KPI] equity={} free={} margin={} notional={} unreal={} legs={} pairs={}",
                        kpi.equity.round_dp(2),
                        kpi.free_collateral.round_dp(2),
                        kpi.margin_used.round_dp(2),
                        kpi.open_notional.round_dp(2),
                        kpi.unrealized_pnl.round_dp(2),
                        kpi.open_legs,
                        kpi.open_pairs
                    );
                    self.notify("[KPI] account snapshot", &kpi.to_string());
                    if let Some(trigger) =
                        collateral_trigger(&self.cfg.risk_off, account.free_collateral)
                    {
                        if let Some(closed) = self
                            .run_risk_off(&trigger, &mut positions, &account, &markets)
                            .await
                        {
                            report.risk_off_closed.push(closed);
                        }
                        self.save(&positions)?;
                    }
                    report.kpi = Some(kpi);
                }
                Err(err) => {
                    log::warn!("[KPI] snapshot failed: {:?}", err);
                    self.notify("[KPI] snapshot failed", &format!("{:#}", err));
                }
            }
        }

        if !self.cfg.cadence.place_trades {
            return Ok(report);
        }
        let (opened, errored) = self.search_entries(&mut positions, &markets).await?;
        let batch_done = !opened.is_empty() || !errored.is_empty();
        report.opened = opened;
        report.errored = errored;
        if !batch_done {
            return Ok(report);
        }

        // review the new batch before anything else accumulates
        let (account, markets) = self.snapshot().await?;
        if self.cfg.cadence.manage_exits {
            let (kept, sweep) = self.run_exits(positions, &account, &markets).await;
            positions = kept;
            report.forced_exits = Some(sweep);
            self.save(&positions)?;
        }
        let open_pairs = positions
            .iter()
            .filter(|p| p.status == PairStatus::Open)
            .count();
        if let Some(trigger) = count_trigger(&self.cfg.risk_off, open_pairs) {
            let account = self
                .venue
                .get_account()
                .await
                .context("account snapshot unavailable for risk-off")?;
            if let Some(closed) = self
                .run_risk_off(&trigger, &mut positions, &account, &markets)
                .await
            {
                report.risk_off_closed.push(closed);
            }
            self.save(&positions)?;
        }
        Ok(report)
    }

    async fn run_exits(
        &self,
        positions: Vec<PairPosition>,
        account: &AccountSnapshot,
        markets: &HashMap<String, MarketMeta>,
    ) -> (Vec<PairPosition>, ExitSweep) {
        let engine = ExitEngine::new(
            self.venue.as_ref(),
            &self.cfg.exit,
            &self.cfg.entry,
            self.closer(),
            self.notifier.as_ref(),
        );
        let (kept, sweep) = engine.sweep(positions, account, markets).await;
        let changed =
            !sweep.closed.is_empty() || !sweep.completed.is_empty() || !sweep.dropped.is_empty();
        if changed {
            log::info!(
                "[EXIT] closed={} completed={} dropped={} flagged={} held={}",
                sweep.closed.len(),
                sweep.completed.len(),
                sweep.dropped.len(),
                sweep.flagged.len(),
                sweep.held.len()
            );
        }
        (kept, sweep)
    }

    async fn run_risk_off(
        &self,
        trigger: &TradeError,
        positions: &mut Vec<PairPosition>,
        account: &AccountSnapshot,
        markets: &HashMap<String, MarketMeta>,
    ) -> Option<String> {
        let manager = RiskOffManager::new(
            self.venue.as_ref(),
            &self.cfg.risk_off,
            &self.cfg.entry,
            self.closer(),
            self.notifier.as_ref(),
        );
        manager
            .run(trigger, positions, account, markets)
            .await
            .map(|c| c.key)
    }

    /// Opens up to one batch of new pairs. Returns the keys opened and the keys left in ERROR.
    async fn search_entries(
        &self,
        positions: &mut Vec<PairPosition>,
        markets: &HashMap<String, MarketMeta>,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let cadence = &self.cfg.cadence;
        let mut opened = Vec::new();
        let mut errored = Vec::new();
        let tracked = positions
            .iter()
            .filter(|p| p.status != PairStatus::Closed)
            .count();
        if tracked >= cadence.max_open_trades {
            log::info!(
                "[ENTRY] {} pairs tracked, cap {} reached",
                tracked,
                cadence.max_open_trades
            );
            return Ok((opened, errored));
        }
        let budget = cadence
            .batch_open_trades
            .min(cadence.max_open_trades - tracked);
        let mut account = self
            .venue
            .get_account()
            .await
            .context("account snapshot unavailable for entries")?;
        let agent = ExecutionAgent::new(
            self.venue.as_ref(),
            &self.cfg.execution,
            self.cfg.audit_policy(),
            self.cfg.entry.usd_per_trade,
        );

        for pair in &self.cfg.pairs {
            if opened.len() + errored.len() >= budget {
                break;
            }
            if account.free_collateral < self.cfg.entry.usd_min_collateral {
                log::info!(
                    "[ENTRY] free collateral {} below {}; batch stopped",
                    account.free_collateral.round_dp(2),
                    self.cfg.entry.usd_min_collateral
                );
                break;
            }
            let key = pair.key();
            let busy = [pair.base.as_str(), pair.quote.as_str()]
                .iter()
                .any(|m| positions.iter().any(|p| p.involves(m)) || account.is_live(m));
            if busy {
                log::debug!("[ENTRY] pair={} skipped: market already in use", key);
                continue;
            }
            let (Some(meta_a), Some(meta_b)) = (markets.get(&pair.base), markets.get(&pair.quote))
            else {
                log::debug!("[ENTRY] pair={} skipped: no market metadata", key);
                continue;
            };
            let signal = match fetch_spread_signal(
                self.venue.as_ref(),
                &pair.base,
                &pair.quote,
                pair.hedge_ratio,
                &self.cfg.entry,
            )
            .await
            {
                Ok(Some(signal)) => signal,
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("[ENTRY] pair={} candles unavailable: {}", key, err);
                    continue;
                }
            };
            let Some(entry) = entry_signal(&signal, self.cfg.entry.zscore_thresh) else {
                continue;
            };
            log::info!(
                "[ENTRY] pair={} z={:.3} threshold={} side_a={:?}",
                key,
                entry.z,
                self.cfg.entry.zscore_thresh,
                entry.side_a
            );

            let outcome = agent
                .open_pair(pair, &entry, meta_a, meta_b, self.venue.now())
                .await;
            match outcome {
                EntryOutcome::Live(position) => {
                    self.notify(&format!("[ENTRY] {} opened", key), &position.comments);
                    positions.push(position);
                    self.save(positions)?;
                    opened.push(key);
                }
                EntryOutcome::Error { position, error } => {
                    self.notify(
                        &format!("[ENTRY] {} ERROR: unhedged exposure", key),
                        &format!("{}\n{}", error, position.comments),
                    );
                    positions.push(position);
                    self.save(positions)?;
                    errored.push(key);
                }
                EntryOutcome::Failed { stage, error } => {
                    self.notify(
                        &format!("[ENTRY] {} failed", key),
                        &format!("stage={:?} {}", stage, error),
                    );
                }
            }
            match self.venue.get_account().await {
                Ok(refreshed) => account = refreshed,
                Err(err) => {
                    log::warn!("[ENTRY] account refresh failed; batch stopped: {}", err);
                    break;
                }
            }
        }
        Ok((opened, errored))
    }

    /// Live legs on markets no ledger record references.
    async fn sweep_orphans(
        &mut self,
        positions: &[PairPosition],
        account: &AccountSnapshot,
        markets: &HashMap<String, MarketMeta>,
    ) -> Vec<String> {
        let orphans: Vec<(String, Decimal)> = account
            .open_markets()
            .filter(|(market, _)| !positions.iter().any(|p| p.involves(market)))
            .map(|(market, live)| (market.clone(), live.size))
            .collect();
        let mut found = Vec::new();
        for (market, size) in orphans {
            found.push(market.clone());
            if !self.cfg.close_orphan_legs {
                if self.orphans_reported.insert(market.clone()) {
                    log::warn!("[ORPHAN] market={} size={} not in ledger", market, size);
                    self.notify(
                        &format!("[ORPHAN] {} live without a ledger record", market),
                        &format!("size={}", size),
                    );
                }
                continue;
            }
            log::warn!("[ORPHAN] market={} size={} closing", market, size);
            let result = self
                .closer()
                .close_market(&market, size, markets.get(&market))
                .await;
            match result {
                Ok(filled) => {
                    self.orphans_reported.remove(&market);
                    self.notify(
                        &format!("[ORPHAN] {} closed", market),
                        &format!("size={} filled={}", size, filled),
                    );
                }
                Err(err) => {
                    log::error!("[ORPHAN] market={} close failed: {}", market, err);
                    if self.orphans_reported.insert(market.clone()) {
                        self.notify(
                            &format!("[ORPHAN] {} close failed", market),
                            &err.to_string(),
                        );
                    }
                }
            }
        }
        found
    }

    /// Flattens every live position and clears the ledger before trading starts.
    async fn force_close_on_startup(&self) -> Result<()> {
        let attempts = self.cfg.startup_close_attempts.max(1);
        let wait = Duration::from_secs(self.cfg.startup_close_wait_secs);
        log::info!(
            "[Startup] closing all positions (attempts={}, wait={}s)",
            attempts,
            wait.as_secs()
        );
        let closer = self.closer();
        for attempt in 1..=attempts {
            let (account, markets) = match self.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    log::warn!(
                        "[Startup] snapshot failed on attempt {}/{}: {:?}",
                        attempt,
                        attempts,
                        err
                    );
                    sleep(wait).await;
                    continue;
                }
            };
            let live: Vec<(String, Decimal)> = account
                .open_markets()
                .map(|(m, p)| (m.clone(), p.size))
                .collect();
            if live.is_empty() {
                if attempt == 1 {
                    log::info!("[Startup] no open positions detected");
                } else {
                    log::info!("[Startup] all positions closed");
                }
                self.save(&[])?;
                return Ok(());
            }
            log::info!(
                "[Startup] close attempt {}/{}: {}",
                attempt,
                attempts,
                format_live(&live)
            );
            for (market, size) in &live {
                if let Err(err) = closer.close_market(market, *size, markets.get(market)).await {
                    log::warn!("[Startup] close {} failed: {}", market, err);
                }
            }
            if attempt < attempts {
                sleep(wait).await;
            }
        }

        let account = self
            .venue
            .get_account()
            .await
            .context("account snapshot unavailable after startup close")?;
        let live: Vec<(String, Decimal)> = account
            .open_markets()
            .map(|(m, p)| (m.clone(), p.size))
            .collect();
        if live.is_empty() {
            log::info!("[Startup] all positions closed");
            self.save(&[])?;
            return Ok(());
        }
        let summary = format_live(&live);
        log::error!(
            "[Startup] positions still open after {} attempts: {}",
            attempts,
            summary
        );
        self.notify(
            "[Startup] close failed",
            &format!(
                "Startup close failed after {} attempts.\nOpen positions: {}",
                attempts, summary
            ),
        );
        bail!("startup close left positions open: {}", summary)
    }
}

fn format_live(live: &[(String, Decimal)]) -> String {
    live.iter()
        .map(|(m, s)| format!("{}={}", m, s))
        .collect::<Vec<_>>()
        .join(", ")
}
