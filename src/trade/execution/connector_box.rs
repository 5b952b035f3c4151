use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::PairTradeConfig;
use crate::notifier::Notifier;
use crate::ports::replay_venue::ReplayVenue;
use crate::ports::venue::{
    AccountSnapshot, FillRecord, MarketMeta, OrderAck, OrderRequest, OrderStatusReport,
    VenueConnector, VenueError,
};
use crate::rate_limit_notifier::RateLimitNotifier;
use crate::trade::execution::sequence::SubmissionSequence;

/// Wraps a venue connector: stamps every submission with the identity's sequence and
/// reports rate limits. All order flow goes through one box.
pub struct VenueConnectorBox {
    inner: Arc<dyn VenueConnector + Send + Sync>,
    sequence: SubmissionSequence,
    submit_lock: Mutex<()>,
    rate_limits: Option<RateLimitNotifier>,
}

impl VenueConnectorBox {
    pub fn new(
        inner: Arc<dyn VenueConnector + Send + Sync>,
        notifier: Option<Arc<dyn Notifier>>,
        label: &str,
    ) -> Self {
        Self {
            inner,
            sequence: SubmissionSequence::default(),
            submit_lock: Mutex::new(()),
            rate_limits: notifier.map(|n| RateLimitNotifier::new(n, label)),
        }
    }

    /// Builds the configured venue. The replay handle is returned separately so the
    /// scheduler can advance it.
    pub fn create(
        cfg: &PairTradeConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(Self, Option<Arc<ReplayVenue>>), VenueError> {
        let label = cfg.agent_name.clone().unwrap_or_else(|| "zpair".to_string());
        match cfg.venue.as_str() {
            "replay" => {
                let path = cfg
                    .replay_file
                    .as_deref()
                    .ok_or_else(|| VenueError::Other("replay venue needs REPLAY_FILE".to_owned()))?;
                let replay = Arc::new(ReplayVenue::from_file(path, cfg.replay_equity)?);
                let boxed = Self::new(replay.clone(), Some(notifier), &label);
                Ok((boxed, Some(replay)))
            }
            other => Err(VenueError::Other(format!("Unsupported venue: {}", other))),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.current()
    }

    fn report_rate_limit(&self, operation: &str, detail: &str, err: &VenueError) {
        let is_rate_limit = match err {
            VenueError::RateLimited(_) => true,
            other => {
                let text = other.to_string();
                text.contains("429") || text.contains("Too Many Requests")
            }
        };
        if !is_rate_limit {
            return;
        }
        if let Some(notifier) = &self.rate_limits {
            notifier.notify(operation, &format!("{} | {}", detail, err));
        }
    }

    async fn ensure_synced(&self) -> Result<(), VenueError> {
        if self.sequence.is_synced() {
            return Ok(());
        }
        let venue_next = self.inner.get_sequence().await;
        if let Err(ref err) = venue_next {
            self.report_rate_limit("get_sequence", "sync", err);
        }
        let venue_next = venue_next?;
        self.sequence.sync(venue_next);
        log::debug!("[ORDER] sequence synced next={}", self.sequence.current());
        Ok(())
    }
}

#[async_trait]
impl VenueConnector for VenueConnectorBox {
    async fn start(&self) -> Result<(), VenueError> {
        let result = self.inner.start().await;
        if let Err(ref err) = result {
            self.report_rate_limit("start", "connector", err);
        }
        result?;
        let _guard = self.submit_lock.lock().await;
        self.ensure_synced().await
    }

    async fn get_markets(&self) -> Result<HashMap<String, MarketMeta>, VenueError> {
        let result = self.inner.get_markets().await;
        if let Err(ref err) = result {
            self.report_rate_limit("get_markets", "all", err);
        }
        result
    }

    async fn get_candles(
        &self,
        market: &str,
        resolution: &str,
        limit: usize,
    ) -> Result<Vec<f64>, VenueError> {
        let result = self.inner.get_candles(market, resolution, limit).await;
        if let Err(ref err) = result {
            self.report_rate_limit(
                "get_candles",
                &format!("{} | {} x{}", market, resolution, limit),
                err,
            );
        }
        result
    }

    async fn get_account(&self) -> Result<AccountSnapshot, VenueError> {
        let result = self.inner.get_account().await;
        if let Err(ref err) = result {
            self.report_rate_limit("get_account", "account", err);
        }
        result
    }

    async fn get_sequence(&self) -> Result<u64, VenueError> {
        let result = self.inner.get_sequence().await;
        if let Err(ref err) = result {
            self.report_rate_limit("get_sequence", "account", err);
        }
        result
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, VenueError> {
        // one submission in flight per identity
        let _guard = self.submit_lock.lock().await;
        self.ensure_synced().await?;

        let mut stamped = request.clone();
        stamped.sequence = self.sequence.current();
        let result = self.inner.create_order(&stamped).await;
        match &result {
            Ok(ack) => {
                self.sequence.commit(stamped.sequence);
                log::info!(
                    "[ORDER] {} {:?} size={} px={} reduce_only={} seq={} ref={}",
                    stamped.market,
                    stamped.side,
                    stamped.size,
                    stamped.price,
                    stamped.reduce_only,
                    stamped.sequence,
                    ack.order_ref
                );
            }
            Err(err) => {
                // the venue may have consumed the value: burn it, then resync forward
                self.sequence.commit(stamped.sequence);
                self.sequence.invalidate();
                log::warn!(
                    "[ORDER] {} {:?} size={} seq={} failed: {}",
                    stamped.market,
                    stamped.side,
                    stamped.size,
                    stamped.sequence,
                    err
                );
                self.report_rate_limit(
                    "create_order",
                    &format!("{} | side={:?} size={}", stamped.market, stamped.side, stamped.size),
                    err,
                );
            }
        }
        result
    }

    async fn get_order(&self, order_ref: &str) -> Result<OrderStatusReport, VenueError> {
        let result = self.inner.get_order(order_ref).await;
        if let Err(ref err) = result {
            self.report_rate_limit("get_order", order_ref, err);
        }
        result
    }

    async fn get_fills(&self, order_ref: &str) -> Result<Vec<FillRecord>, VenueError> {
        let result = self.inner.get_fills(order_ref).await;
        if let Err(ref err) = result {
            self.report_rate_limit("get_fills", order_ref, err);
        }
        result
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }
}
