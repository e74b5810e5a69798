use std::path::PathBuf;

use serde::Deserialize;
use service::{
    grading::GradingLimits,
    pg_pool::PgParams,
    Service,
};

#[macro_use]
extern crate log;

mod middleware;
mod service;

#[derive(Deserialize, Debug)]
#[serde(default)]
struct Config {
    address: String,
    port: u16,
    pool_size: u32,
    assets_dir: PathBuf,
    statement_timeout_ms: u64,
    row_limit: usize,
    diff_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        let limits = GradingLimits::default();
        Config {
            address: "0.0.0.0".into(),
            port: 3000,
            pool_size: 4,
            assets_dir: PathBuf::from("public"),
            statement_timeout_ms: limits.statement_timeout_ms,
            row_limit: limits.row_limit,
            diff_limit: limits.diff_limit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("sqlgrade=info"))
        .init();

    // Env config
    let cfg = envy::from_env::<Config>().unwrap_or_else(|e| {
        warn!("Ignoring service environment, using defaults: {}", e);
        Config::default()
    });
    let pg_params = envy::prefixed("PG")
        .from_env::<PgParams>()
        .unwrap_or_else(|e| {
            warn!("Ignoring PG* environment, using defaults: {}", e);
            PgParams::default()
        });
    trace!("Loaded config: {:?}", cfg);

    let limits = GradingLimits {
        statement_timeout_ms: cfg.statement_timeout_ms,
        row_limit: cfg.row_limit,
        diff_limit: cfg.diff_limit,
    };

    // Initialize service
    let host_addr = format!("{}:{}", cfg.address, cfg.port);
    let service = Service::new(&host_addr, &pg_params, cfg.pool_size, limits, cfg.assets_dir).await?;

    // Run until finished
    service.run().await
}
