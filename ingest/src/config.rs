use std::net::SocketAddr;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "0.0.0.0:8080")]
    pub address: SocketAddr,

    #[envconfig(default = "data/dedup.db")]
    pub database_path: String,

    #[envconfig(default = "10000")]
    pub queue_capacity: usize,

    /// 0 uses the logging sink; anything else installs a sink that sleeps
    /// this long per event, to model a slow downstream.
    #[envconfig(default = "0")]
    pub sink_delay_ms: u64,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    /// 0 disables the periodic purge of old records.
    #[envconfig(default = "0")]
    pub cleanup_interval_secs: u64,

    #[envconfig(default = "30")]
    pub cleanup_max_age_days: u32,
}
