use rust_decimal::Decimal;
use tokio::time::{sleep, Duration};

use crate::ports::venue::{OrderState, OrderStatusReport, VenueConnector, VenueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }
}

/// Terminal result of polling one order.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditOutcome {
    Filled { filled: Decimal },
    Partial { filled: Decimal },
    Cancelled { filled: Decimal },
    /// Retry budget exhausted without a terminal state; fill unknown.
    Timeout,
}

impl AuditOutcome {
    pub fn filled_size(&self) -> Decimal {
        match self {
            AuditOutcome::Filled { filled }
            | AuditOutcome::Partial { filled }
            | AuditOutcome::Cancelled { filled } => (*filled).max(Decimal::ZERO),
            AuditOutcome::Timeout => Decimal::ZERO,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AuditOutcome::Filled { .. } => "FILLED",
            AuditOutcome::Partial { .. } => "PARTIALLY_FILLED",
            AuditOutcome::Cancelled { .. } => "KILLED",
            AuditOutcome::Timeout => "TIMEOUT",
        }
    }
}

/// Polls `order_ref` until the venue reports a terminal state or the budget runs out.
/// The first poll happens after one backoff so the venue has time to match.
pub async fn audit_order(
    venue: &(dyn VenueConnector + Send + Sync),
    order_ref: &str,
    policy: RetryPolicy,
) -> AuditOutcome {
    for attempt in 1..=policy.attempts {
        sleep(policy.backoff).await;
        match venue.get_order(order_ref).await {
            Ok(report) if report.state.is_terminal() => {
                let filled = authoritative_fill(venue, &report).await;
                log::debug!(
                    "[AUDIT] order={} state={:?} filled={} attempt={}",
                    order_ref,
                    report.state,
                    filled,
                    attempt
                );
                return match report.state {
                    OrderState::Filled => AuditOutcome::Filled { filled },
                    OrderState::PartiallyFilled => AuditOutcome::Partial { filled },
                    _ => AuditOutcome::Cancelled { filled },
                };
            }
            Ok(_) => {
                log::debug!(
                    "[AUDIT] order={} still open attempt={}/{}",
                    order_ref,
                    attempt,
                    policy.attempts
                );
            }
            Err(VenueError::NotFound(_)) => {
                log::debug!(
                    "[AUDIT] order={} not indexed yet attempt={}/{}",
                    order_ref,
                    attempt,
                    policy.attempts
                );
            }
            Err(err) => {
                log::warn!(
                    "[AUDIT] order={} status poll failed attempt={}/{}: {}",
                    order_ref,
                    attempt,
                    policy.attempts,
                    err
                );
            }
        }
    }
    log::warn!(
        "[AUDIT] order={} no terminal state after {} attempts",
        order_ref,
        policy.attempts
    );
    AuditOutcome::Timeout
}

async fn authoritative_fill(
    venue: &(dyn VenueConnector + Send + Sync),
    report: &OrderStatusReport,
) -> Decimal {
    // remaining-size accounting is unreliable once an IOC order is partially killed
    let needs_fills = match report.state {
        OrderState::Filled => report.filled_size <= Decimal::ZERO,
        OrderState::PartiallyFilled | OrderState::Killed => true,
        OrderState::Open => false,
    };
    if !needs_fills {
        return report.filled_size;
    }
    match venue.get_fills(&report.order_ref).await {
        Ok(fills) if !fills.is_empty() => fills.iter().map(|f| f.size).sum(),
        Ok(_) => report.filled_size.max(Decimal::ZERO),
        Err(err) => {
            log::warn!(
                "[AUDIT] order={} fills lookup failed, using reported size: {}",
                report.order_ref,
                err
            );
            report.filled_size.max(Decimal::ZERO)
        }
    }
}
