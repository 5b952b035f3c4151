use chrono::{DateTime, FixedOffset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;
use std::str::FromStr;
use zpair::config::PairTradeConfig;
use zpair::notifier;
use zpair::pairtrade::PairTradeEngine;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging with local timezone
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .unwrap_or_else(|_| "0".to_string())
        .parse::<i32>()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let offset = FixedOffset::east_opt(offset_seconds).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid TIMEZONE_OFFSET")
    })?;
    Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
                .unwrap_or(LevelFilter::Info),
        )
        .init();

    log::info!("zpair git: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    log::info!("Starting pair-trade loop...");
    let to_io = |e: anyhow::Error| std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e));
    let cfg = PairTradeConfig::from_env_or_yaml().map_err(to_io)?;
    let alerts = notifier::from_env(cfg.agent_name.as_deref());
    let mut engine = PairTradeEngine::new(cfg, alerts).await.map_err(to_io)?;
    engine.run().await.map_err(to_io)
}
