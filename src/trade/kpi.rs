use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;

use crate::ports::venue::{AccountSnapshot, MarketMeta};
use crate::trade::position::{PairPosition, PairStatus};

/// Account-level figures reported every KPI interval.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiSnapshot {
    pub equity: Decimal,
    pub free_collateral: Decimal,
    pub margin_used: Decimal,
    /// Sum of `|live size| * oracle price` over every live market.
    pub open_notional: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_legs: usize,
    pub open_pairs: usize,
    pub error_pairs: usize,
}

impl KpiSnapshot {
    pub fn collect(
        account: &AccountSnapshot,
        markets: &HashMap<String, MarketMeta>,
        positions: &[PairPosition],
    ) -> Self {
        let mut open_notional = Decimal::ZERO;
        let mut unrealized_pnl = Decimal::ZERO;
        let mut open_legs = 0;
        for (market, live) in account.open_markets() {
            open_legs += 1;
            unrealized_pnl += live.unrealized_pnl;
            match markets.get(market) {
                Some(meta) => open_notional += live.size.abs() * meta.oracle_price,
                None => log::debug!("[KPI] no price for {}; notional skipped", market),
            }
        }
        Self {
            equity: account.equity,
            free_collateral: account.free_collateral,
            margin_used: account.margin_used,
            open_notional,
            unrealized_pnl,
            open_legs,
            open_pairs: positions
                .iter()
                .filter(|p| matches!(p.status, PairStatus::Open | PairStatus::Closing))
                .count(),
            error_pairs: positions
                .iter()
                .filter(|p| p.status == PairStatus::Error)
                .count(),
        }
    }
}

impl fmt::Display for KpiSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "equity: {}", self.equity.round_dp(2))?;
        writeln!(f, "free collateral: {}", self.free_collateral.round_dp(2))?;
        writeln!(f, "margin used: {}", self.margin_used.round_dp(2))?;
        writeln!(f, "open notional: {}", self.open_notional.round_dp(2))?;
        writeln!(f, "unrealized pnl: {}", self.unrealized_pnl.round_dp(2))?;
        writeln!(f, "open legs: {}", self.open_legs)?;
        write!(
            f,
            "open pairs: {} (error: {})",
            self.open_pairs, self.error_pairs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::venue::LivePosition;
    use crate::trade::position::fixtures::open_pair;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn snapshot_sums_live_markets_only() {
        let mut account = AccountSnapshot {
            equity: dec!(12000),
            free_collateral: dec!(9000),
            margin_used: dec!(3000),
            positions: HashMap::new(),
        };
        for (m, size, pnl) in [
            ("AAA", dec!(2), dec!(15)),
            ("BBB", dec!(-4), dec!(-5)),
            ("CCC", dec!(0), dec!(99)),
        ] {
            account.positions.insert(
                m.to_string(),
                LivePosition {
                    size,
                    unrealized_pnl: pnl,
                },
            );
        }
        let mut markets = HashMap::new();
        for (m, px) in [("AAA", dec!(100)), ("BBB", dec!(50))] {
            markets.insert(
                m.to_string(),
                MarketMeta {
                    oracle_price: px,
                    min_order_size: dec!(0.1),
                    step_size: dec!(0.1),
                    tick_size: dec!(0.01),
                },
            );
        }
        let mut error = open_pair("DDD", "EEE", 2.0, 1, Utc::now());
        error.status = PairStatus::Error;
        let positions = vec![open_pair("AAA", "BBB", 2.0, 1, Utc::now()), error];

        let kpi = KpiSnapshot::collect(&account, &markets, &positions);
        assert_eq!(kpi.open_notional, dec!(400));
        assert_eq!(kpi.unrealized_pnl, dec!(10));
        assert_eq!(kpi.open_legs, 2);
        assert_eq!(kpi.open_pairs, 1);
        assert_eq!(kpi.error_pairs, 1);
        assert!(kpi.to_string().contains("free collateral: 9000"));
    }
}
