use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_INTERVAL_SECS: u64 = 30;
const DEFAULT_KPI_SECS: u64 = 600;
const DEFAULT_BATCH_OPEN_TRADES: usize = 3;
const DEFAULT_MAX_OPEN_TRADES: usize = 6;
const DEFAULT_ZSCORE_THRESH: f64 = 1.5;
const DEFAULT_Z_WINDOW: usize = 21;
const DEFAULT_CANDLE_RESOLUTION: &str = "1HOUR";
const DEFAULT_CANDLE_LIMIT: usize = 100;
const DEFAULT_USD_PER_TRADE: Decimal = dec!(2000);
const DEFAULT_USD_MIN_COLLATERAL: Decimal = dec!(7000);
const DEFAULT_SLIPPAGE_PCT: Decimal = dec!(0.05);
const DEFAULT_AUDIT_ATTEMPTS: u32 = 5;
const DEFAULT_AUDIT_BACKOFF_MS: u64 = 2000;
const DEFAULT_RESIDUAL_FLOOR_USD: Decimal = dec!(10);
const DEFAULT_RESIDUAL_PCT: Decimal = dec!(0.01);
const DEFAULT_Z_TP: f64 = 0.5;
const DEFAULT_Z_SL_DELTA: f64 = 1.0;
const DEFAULT_TIME_STOP_HOURS: f64 = 12.0;
const DEFAULT_MIN_PROFIT_PCT: Decimal = dec!(0.02);
const DEFAULT_MIN_PROFIT_USD: Decimal = dec!(20);
const DEFAULT_RISK_OFF_FREE_COLLATERAL: Decimal = dec!(7000);
const DEFAULT_RISK_OFF_FORCE_OPEN_TRADES: usize = 6;
const DEFAULT_RISK_OFF_MIN_AGE_HOURS: f64 = 2.0;
const DEFAULT_RISK_SCORE_W_AGE: f64 = 1.0;
const DEFAULT_RISK_SCORE_W_ABS_Z: f64 = 3.0;
const DEFAULT_RISK_SCORE_W_UNREAL_PNL: f64 = 0.001;
const DEFAULT_LEDGER_FILE: &str = "open_pairs.json";
const DEFAULT_REPLAY_EQUITY: Decimal = dec!(10000);
const DEFAULT_STARTUP_CLOSE_ATTEMPTS: u32 = 3;
const DEFAULT_STARTUP_CLOSE_WAIT_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("invalid pair spec '{0}' (expected BASE/QUOTE@HEDGE_RATIO[@HALF_LIFE])")]
    InvalidPair(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PairSpec {
    pub base: String,
    pub quote: String,
    pub hedge_ratio: f64,
    #[serde(default)]
    pub half_life: Option<f64>,
}

impl PairSpec {
    pub fn key(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CadenceConfig {
    pub interval_secs: u64,
    /// KPI snapshot (and collateral risk-off check) every N ticks.
    pub kpi_every_ticks: u64,
    pub batch_open_trades: usize,
    pub max_open_trades: usize,
    pub manage_exits: bool,
    pub place_trades: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryConfig {
    pub zscore_thresh: f64,
    pub z_window: usize,
    pub candle_resolution: String,
    pub candle_limit: usize,
    pub usd_per_trade: Decimal,
    pub usd_min_collateral: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub slippage_pct: Decimal,
    pub audit_attempts: u32,
    pub audit_backoff_ms: u64,
    pub residual_floor_usd: Decimal,
    pub residual_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitConfig {
    pub use_z_tp: bool,
    pub z_tp: f64,
    pub use_z_sl: bool,
    pub z_sl_delta: f64,
    pub use_time_stop: bool,
    pub time_stop_hours: f64,
    pub use_min_profit_tp: bool,
    pub min_profit_pct: Decimal,
    pub min_profit_usd: Decimal,
    pub close_at_zscore_cross: bool,
    pub drop_stale_records: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskOffConfig {
    pub enabled: bool,
    pub free_collateral_trigger: Decimal,
    pub force_if_open_trades_ge: usize,
    pub min_age_hours: f64,
    pub w_age: f64,
    pub w_abs_z: f64,
    pub w_unreal_pnl: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairTradeConfig {
    pub venue: String,
    pub agent_name: Option<String>,
    pub replay_file: Option<String>,
    pub replay_equity: Decimal,
    pub ledger_file: String,
    pub abort_all_positions: bool,
    pub startup_close_attempts: u32,
    pub startup_close_wait_secs: u64,
    pub close_orphan_legs: bool,
    pub cadence: CadenceConfig,
    pub entry: EntryConfig,
    pub execution: ExecutionConfig,
    pub exit: ExitConfig,
    pub risk_off: RiskOffConfig,
    pub pairs: Vec<PairSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
struct PairTradeYaml {
    venue: Option<String>,
    agent_name: Option<String>,
    replay_file: Option<String>,
    replay_equity: Option<Decimal>,
    ledger_file: Option<String>,
    abort_all_positions: Option<bool>,
    startup_close_attempts: Option<u32>,
    startup_close_wait_secs: Option<u64>,
    close_orphan_legs: Option<bool>,
    interval_secs: Option<u64>,
    kpi_secs: Option<u64>,
    batch_open_trades: Option<usize>,
    max_open_trades: Option<usize>,
    manage_exits: Option<bool>,
    place_trades: Option<bool>,
    zscore_thresh: Option<f64>,
    z_window: Option<usize>,
    candle_resolution: Option<String>,
    candle_limit: Option<usize>,
    usd_per_trade: Option<Decimal>,
    usd_min_collateral: Option<Decimal>,
    slippage_pct: Option<Decimal>,
    audit_attempts: Option<u32>,
    audit_backoff_ms: Option<u64>,
    residual_floor_usd: Option<Decimal>,
    residual_pct: Option<Decimal>,
    use_z_tp: Option<bool>,
    z_tp: Option<f64>,
    use_z_sl: Option<bool>,
    z_sl_delta: Option<f64>,
    use_time_stop: Option<bool>,
    time_stop_hours: Option<f64>,
    use_min_profit_tp: Option<bool>,
    min_profit_pct: Option<Decimal>,
    min_profit_usd: Option<Decimal>,
    close_at_zscore_cross: Option<bool>,
    drop_stale_records: Option<bool>,
    risk_off_enabled: Option<bool>,
    risk_off_free_collateral_trigger: Option<Decimal>,
    risk_off_force_if_open_trades_ge: Option<usize>,
    risk_off_min_age_hours: Option<f64>,
    risk_score_w_age: Option<f64>,
    risk_score_w_abs_z: Option<f64>,
    risk_score_w_unreal_pnl: Option<f64>,
    pairs: Option<Vec<PairSpec>>,
}

impl PairTradeConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("PAIRTRADE_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open PairTrade config {}", path_ref.display()))?;
        let yaml: PairTradeYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse PairTrade config {}", path_ref.display()))?;
        let mut cfg = Self::from_yaml(yaml);
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let yaml: PairTradeYaml =
            serde_yaml::from_str(raw).context("failed to parse PairTrade config")?;
        let cfg = Self::from_yaml(yaml);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::from_yaml(PairTradeYaml::default());
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_yaml(yaml: PairTradeYaml) -> Self {
        let interval_secs = yaml.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS).max(1);
        let kpi_secs = yaml.kpi_secs.unwrap_or(DEFAULT_KPI_SECS);
        PairTradeConfig {
            venue: yaml.venue.unwrap_or_else(|| "replay".to_string()),
            agent_name: yaml.agent_name,
            replay_file: yaml.replay_file,
            replay_equity: yaml.replay_equity.unwrap_or(DEFAULT_REPLAY_EQUITY),
            ledger_file: yaml
                .ledger_file
                .unwrap_or_else(|| DEFAULT_LEDGER_FILE.to_string()),
            abort_all_positions: yaml.abort_all_positions.unwrap_or(false),
            startup_close_attempts: yaml
                .startup_close_attempts
                .unwrap_or(DEFAULT_STARTUP_CLOSE_ATTEMPTS),
            startup_close_wait_secs: yaml
                .startup_close_wait_secs
                .unwrap_or(DEFAULT_STARTUP_CLOSE_WAIT_SECS),
            close_orphan_legs: yaml.close_orphan_legs.unwrap_or(false),
            cadence: CadenceConfig {
                interval_secs,
                kpi_every_ticks: (kpi_secs / interval_secs).max(1),
                batch_open_trades: yaml.batch_open_trades.unwrap_or(DEFAULT_BATCH_OPEN_TRADES),
                max_open_trades: yaml.max_open_trades.unwrap_or(DEFAULT_MAX_OPEN_TRADES),
                manage_exits: yaml.manage_exits.unwrap_or(true),
                place_trades: yaml.place_trades.unwrap_or(true),
            },
            entry: EntryConfig {
                zscore_thresh: yaml.zscore_thresh.unwrap_or(DEFAULT_ZSCORE_THRESH),
                z_window: yaml.z_window.unwrap_or(DEFAULT_Z_WINDOW),
                candle_resolution: yaml
                    .candle_resolution
                    .unwrap_or_else(|| DEFAULT_CANDLE_RESOLUTION.to_string()),
                candle_limit: yaml.candle_limit.unwrap_or(DEFAULT_CANDLE_LIMIT),
                usd_per_trade: yaml.usd_per_trade.unwrap_or(DEFAULT_USD_PER_TRADE),
                usd_min_collateral: yaml
                    .usd_min_collateral
                    .unwrap_or(DEFAULT_USD_MIN_COLLATERAL),
            },
            execution: ExecutionConfig {
                slippage_pct: yaml.slippage_pct.unwrap_or(DEFAULT_SLIPPAGE_PCT),
                audit_attempts: yaml.audit_attempts.unwrap_or(DEFAULT_AUDIT_ATTEMPTS),
                audit_backoff_ms: yaml.audit_backoff_ms.unwrap_or(DEFAULT_AUDIT_BACKOFF_MS),
                residual_floor_usd: yaml
                    .residual_floor_usd
                    .unwrap_or(DEFAULT_RESIDUAL_FLOOR_USD),
                residual_pct: yaml.residual_pct.unwrap_or(DEFAULT_RESIDUAL_PCT),
            },
            exit: ExitConfig {
                use_z_tp: yaml.use_z_tp.unwrap_or(true),
                z_tp: yaml.z_tp.unwrap_or(DEFAULT_Z_TP),
                use_z_sl: yaml.use_z_sl.unwrap_or(true),
                z_sl_delta: yaml.z_sl_delta.unwrap_or(DEFAULT_Z_SL_DELTA),
                use_time_stop: yaml.use_time_stop.unwrap_or(true),
                time_stop_hours: yaml.time_stop_hours.unwrap_or(DEFAULT_TIME_STOP_HOURS),
                use_min_profit_tp: yaml.use_min_profit_tp.unwrap_or(true),
                min_profit_pct: yaml.min_profit_pct.unwrap_or(DEFAULT_MIN_PROFIT_PCT),
                min_profit_usd: yaml.min_profit_usd.unwrap_or(DEFAULT_MIN_PROFIT_USD),
                close_at_zscore_cross: yaml.close_at_zscore_cross.unwrap_or(true),
                drop_stale_records: yaml.drop_stale_records.unwrap_or(true),
            },
            risk_off: RiskOffConfig {
                enabled: yaml.risk_off_enabled.unwrap_or(true),
                free_collateral_trigger: yaml
                    .risk_off_free_collateral_trigger
                    .unwrap_or(DEFAULT_RISK_OFF_FREE_COLLATERAL),
                force_if_open_trades_ge: yaml
                    .risk_off_force_if_open_trades_ge
                    .unwrap_or(DEFAULT_RISK_OFF_FORCE_OPEN_TRADES),
                min_age_hours: yaml
                    .risk_off_min_age_hours
                    .unwrap_or(DEFAULT_RISK_OFF_MIN_AGE_HOURS),
                w_age: yaml.risk_score_w_age.unwrap_or(DEFAULT_RISK_SCORE_W_AGE),
                w_abs_z: yaml.risk_score_w_abs_z.unwrap_or(DEFAULT_RISK_SCORE_W_ABS_Z),
                w_unreal_pnl: yaml
                    .risk_score_w_unreal_pnl
                    .unwrap_or(DEFAULT_RISK_SCORE_W_UNREAL_PNL),
            },
            pairs: yaml.pairs.unwrap_or_default(),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var("VENUE") {
            if !value.trim().is_empty() {
                self.venue = value;
            }
        }
        if let Ok(value) = env::var("AGENT_NAME") {
            if !value.trim().is_empty() {
                self.agent_name = Some(value);
            }
        }
        if let Ok(value) = env::var("REPLAY_FILE") {
            if !value.trim().is_empty() {
                self.replay_file = Some(value);
            }
        }
        if let Ok(value) = env::var("LEDGER_FILE") {
            if !value.trim().is_empty() {
                self.ledger_file = value;
            }
        }
        if let Ok(value) = env::var("PAIRS") {
            if !value.trim().is_empty() {
                self.pairs = parse_pairs_list(&value)?;
            }
        }

        let prev_interval = self.cadence.interval_secs;
        override_from_env("INTERVAL_SECS", &mut self.cadence.interval_secs)?;
        if self.cadence.interval_secs != prev_interval {
            self.cadence.interval_secs = self.cadence.interval_secs.max(1);
            let kpi_secs = prev_interval * self.cadence.kpi_every_ticks;
            self.cadence.kpi_every_ticks = (kpi_secs / self.cadence.interval_secs).max(1);
        }
        if let Ok(value) = env::var("KPI_SECS") {
            let kpi_secs: u64 = parse_env("KPI_SECS", &value)?;
            self.cadence.kpi_every_ticks = (kpi_secs / self.cadence.interval_secs).max(1);
        }
        override_from_env("BATCH_OPEN_TRADES", &mut self.cadence.batch_open_trades)?;
        override_from_env("MAX_OPEN_TRADES", &mut self.cadence.max_open_trades)?;
        override_from_env("MANAGE_EXITS", &mut self.cadence.manage_exits)?;
        override_from_env("PLACE_TRADES", &mut self.cadence.place_trades)?;
        override_from_env("ABORT_ALL_POSITIONS", &mut self.abort_all_positions)?;
        override_from_env("CLOSE_ORPHAN_LEGS", &mut self.close_orphan_legs)?;
        override_from_env("STARTUP_CLOSE_ATTEMPTS", &mut self.startup_close_attempts)?;
        override_from_env("STARTUP_CLOSE_WAIT_SECS", &mut self.startup_close_wait_secs)?;

        override_from_env("ZSCORE_THRESH", &mut self.entry.zscore_thresh)?;
        override_from_env("Z_WINDOW", &mut self.entry.z_window)?;
        override_from_env("CANDLE_LIMIT", &mut self.entry.candle_limit)?;
        override_from_env("USD_PER_TRADE", &mut self.entry.usd_per_trade)?;
        override_from_env("USD_MIN_COLLATERAL", &mut self.entry.usd_min_collateral)?;

        override_from_env("SLIPPAGE_PCT", &mut self.execution.slippage_pct)?;
        override_from_env("AUDIT_ATTEMPTS", &mut self.execution.audit_attempts)?;
        override_from_env("AUDIT_BACKOFF_MS", &mut self.execution.audit_backoff_ms)?;
        override_from_env("RESIDUAL_FLOOR_USD", &mut self.execution.residual_floor_usd)?;
        override_from_env("RESIDUAL_PCT", &mut self.execution.residual_pct)?;

        override_from_env("USE_Z_TP", &mut self.exit.use_z_tp)?;
        override_from_env("Z_TP", &mut self.exit.z_tp)?;
        override_from_env("USE_Z_SL", &mut self.exit.use_z_sl)?;
        override_from_env("Z_SL_DELTA", &mut self.exit.z_sl_delta)?;
        override_from_env("USE_TIME_STOP", &mut self.exit.use_time_stop)?;
        override_from_env("TIME_STOP_HOURS", &mut self.exit.time_stop_hours)?;
        override_from_env("USE_MIN_PROFIT_TP", &mut self.exit.use_min_profit_tp)?;
        override_from_env("MIN_PROFIT_PCT", &mut self.exit.min_profit_pct)?;
        override_from_env("MIN_PROFIT_USD", &mut self.exit.min_profit_usd)?;
        override_from_env("CLOSE_AT_ZSCORE_CROSS", &mut self.exit.close_at_zscore_cross)?;
        override_from_env("DROP_STALE_RECORDS", &mut self.exit.drop_stale_records)?;

        override_from_env("RISK_OFF_ENABLED", &mut self.risk_off.enabled)?;
        override_from_env(
            "RISK_OFF_FREE_COLLATERAL_TRIGGER",
            &mut self.risk_off.free_collateral_trigger,
        )?;
        override_from_env(
            "RISK_OFF_FORCE_IF_OPEN_TRADES_GE",
            &mut self.risk_off.force_if_open_trades_ge,
        )?;
        override_from_env("RISK_OFF_MIN_AGE_HOURS", &mut self.risk_off.min_age_hours)?;
        override_from_env("RISK_SCORE_W_AGE", &mut self.risk_off.w_age)?;
        override_from_env("RISK_SCORE_W_ABS_Z", &mut self.risk_off.w_abs_z)?;
        override_from_env("RISK_SCORE_W_UNREAL_PNL", &mut self.risk_off.w_unreal_pnl)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cadence.batch_open_trades == 0 {
            return Err(ConfigError::Invalid(
                "batch_open_trades must be at least 1".to_string(),
            ));
        }
        if self.risk_off.force_if_open_trades_ge > self.cadence.max_open_trades {
            return Err(ConfigError::Invalid(format!(
                "risk_off_force_if_open_trades_ge ({}) exceeds max_open_trades ({})",
                self.risk_off.force_if_open_trades_ge, self.cadence.max_open_trades
            )));
        }
        if self.entry.z_window < 2 {
            return Err(ConfigError::Invalid("z_window must be at least 2".to_string()));
        }
        if self.entry.candle_limit < self.entry.z_window {
            return Err(ConfigError::Invalid(format!(
                "candle_limit ({}) is shorter than z_window ({})",
                self.entry.candle_limit, self.entry.z_window
            )));
        }
        if self.execution.slippage_pct < Decimal::ZERO || self.execution.slippage_pct >= Decimal::ONE
        {
            return Err(ConfigError::Invalid(format!(
                "slippage_pct {} outside [0, 1)",
                self.execution.slippage_pct
            )));
        }
        let mut seen = HashSet::new();
        for pair in &self.pairs {
            if pair.base.trim().is_empty() || pair.quote.trim().is_empty() || pair.base == pair.quote
            {
                return Err(ConfigError::InvalidPair(pair.key()));
            }
            if !pair.hedge_ratio.is_finite() || pair.hedge_ratio == 0.0 {
                return Err(ConfigError::InvalidPair(format!(
                    "{}@{}",
                    pair.key(),
                    pair.hedge_ratio
                )));
            }
            if !seen.insert(pair.key()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate pair {}",
                    pair.key()
                )));
            }
        }
        Ok(())
    }

    pub fn audit_policy(&self) -> crate::trade::execution::audit::RetryPolicy {
        crate::trade::execution::audit::RetryPolicy::new(
            self.execution.audit_attempts,
            std::time::Duration::from_millis(self.execution.audit_backoff_ms),
        )
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn override_from_env<T: FromStr>(key: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = env::var(key) {
        if !value.trim().is_empty() {
            *target = parse_env(key, &value.to_lowercase())
                .or_else(|_| parse_env(key, &value))?;
        }
    }
    Ok(())
}

/// Parses `BASE/QUOTE@HEDGE[@HALF_LIFE]` items separated by commas.
pub fn parse_pairs_list(raw: &str) -> Result<Vec<PairSpec>, ConfigError> {
    let mut pairs = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut parts = item.split('@');
        let markets = parts.next().unwrap_or_default();
        let (base, quote) = markets
            .split_once('/')
            .ok_or_else(|| ConfigError::InvalidPair(item.to_string()))?;
        let hedge_ratio: f64 = parts
            .next()
            .and_then(|h| h.trim().parse().ok())
            .ok_or_else(|| ConfigError::InvalidPair(item.to_string()))?;
        let half_life = match parts.next() {
            Some(h) => Some(
                h.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidPair(item.to_string()))?,
            ),
            None => None,
        };
        pairs.push(PairSpec {
            base: base.trim().to_string(),
            quote: quote.trim().to_string(),
            hedge_ratio,
            half_life,
        });
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_cadence_constants() {
        let cfg = PairTradeConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg.cadence.interval_secs, 30);
        assert_eq!(cfg.cadence.kpi_every_ticks, 20);
        assert_eq!(cfg.cadence.max_open_trades, 6);
        assert_eq!(cfg.risk_off.force_if_open_trades_ge, 6);
        assert_eq!(cfg.exit.z_tp, 0.5);
        assert!(cfg.exit.drop_stale_records);
        assert_eq!(cfg.execution.slippage_pct, dec!(0.05));
    }

    #[test]
    fn yaml_pairs_and_overrides_are_read() {
        let raw = r#"
interval_secs: 10
kpi_secs: 60
max_open_trades: 4
risk_off_force_if_open_trades_ge: 4
min_profit_usd: 35.5
pairs:
  - base: ETH-USD
    quote: BTC-USD
    hedge_ratio: 0.052
    half_life: 7.5
  - base: SOL-USD
    quote: AVAX-USD
    hedge_ratio: 3.1
"#;
        let cfg = PairTradeConfig::from_yaml_str(raw).unwrap();
        assert_eq!(cfg.cadence.kpi_every_ticks, 6);
        assert_eq!(cfg.exit.min_profit_usd, dec!(35.5));
        assert_eq!(cfg.pairs.len(), 2);
        assert_eq!(cfg.pairs[0].half_life, Some(7.5));
        assert_eq!(cfg.pairs[1].half_life, None);
    }

    #[test]
    fn risk_score_weights_follow_env() {
        let mut cfg = PairTradeConfig::from_yaml_str("risk_score_w_age: 2.0\n").unwrap();
        env::set_var("RISK_SCORE_W_ABS_Z", "4.5");
        env::set_var("RISK_SCORE_W_UNREAL_PNL", "0.01");
        let applied = cfg.apply_env_overrides();
        env::remove_var("RISK_SCORE_W_ABS_Z");
        env::remove_var("RISK_SCORE_W_UNREAL_PNL");
        applied.unwrap();
        assert_eq!(cfg.risk_off.w_age, 2.0);
        assert_eq!(cfg.risk_off.w_abs_z, 4.5);
        assert_eq!(cfg.risk_off.w_unreal_pnl, 0.01);
    }

    #[test]
    fn force_threshold_above_cap_is_rejected() {
        let raw = "max_open_trades: 3\nrisk_off_force_if_open_trades_ge: 5\n";
        assert!(PairTradeConfig::from_yaml_str(raw).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PairTradeConfig::from_yaml_str("z_tpp: 0.4\n").is_err());
    }

    #[test]
    fn pairs_list_parses_optional_half_life() {
        let pairs = parse_pairs_list("ETH-USD/BTC-USD@0.05@12, SOL-USD/AVAX-USD@2.5").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].base, "ETH-USD");
        assert_eq!(pairs[0].half_life, Some(12.0));
        assert_eq!(pairs[1].quote, "AVAX-USD");
        assert!(parse_pairs_list("ETH-USD@0.05").is_err());
        assert!(parse_pairs_list("ETH-USD/BTC-USD").is_err());
    }

    #[test]
    fn duplicate_pairs_are_rejected() {
        let raw = "pairs:\n  - {base: A, quote: B, hedge_ratio: 1.0}\n  - {base: A, quote: B, hedge_ratio: 2.0}\n";
        assert!(PairTradeConfig::from_yaml_str(raw).is_err());
    }
}
