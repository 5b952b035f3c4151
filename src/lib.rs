// src/lib.rs
pub mod ports {
    pub mod replay_venue;
    pub mod venue;
}
pub mod trade {
    pub mod close;
    pub mod error;
    pub mod execution {
        pub mod agent;
        pub mod audit;
        pub mod connector_box;
        pub mod sequence;
    }
    pub mod exit;
    pub mod kpi;
    pub mod ledger;
    pub mod position;
    pub mod quantize;
    pub mod risk_off;
    pub mod signal;
    #[cfg(test)]
    pub(crate) mod testing;
}
pub mod config;
pub mod email_client;
pub mod notifier;
pub mod pairtrade;
pub mod rate_limit_notifier;
