use std::{path::PathBuf, sync::Arc};

use tokio::net::TcpListener;

use self::{
    api::AppState,
    grading::{Grader, GradingLimits},
    pg_pool::{PgParams, PostgresConnectionManager},
};

pub mod api;
pub mod error;
pub mod grading;
pub mod pg_pool;

/*
    # Flow of a grading request through this service

    POST /api/run ──► middleware (safety gate, case decoding) ──► 400 on reject
                                        │
    ┌──── wait for the run queue ◄──────┘
    │
    └──► pooled session ──► sandbox per case ──► comparator ──► aggregate ──► 200
*/

pub struct Service<'a> {
    host_addr: &'a str,
    assets_dir: PathBuf,

    // Run coordinator, owns the postgres connection pool and the run queue
    grader: Arc<Grader<PostgresConnectionManager>>,
}

impl<'a> Service<'a> {
    pub async fn new(
        host_addr: &'a str,
        pg_params: &PgParams,
        pool_size: u32,
        limits: GradingLimits,
        assets_dir: PathBuf,
    ) -> Result<Service<'a>, Box<dyn std::error::Error>> {
        // Create postgres connection pool, building it waits for the first connections
        let manager = PostgresConnectionManager::new(pg_params);
        let pool = tokio::task::spawn_blocking(move || {
            r2d2::Pool::builder().max_size(pool_size).build(manager)
        })
        .await??;
        info!(
            "Connection pool ready for {}:{}/{} ({} session(s))",
            pg_params.host, pg_params.port, pg_params.database, pool_size
        );

        Ok(Self {
            host_addr,
            assets_dir,
            grader: Arc::new(Grader::new(pool, limits)),
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let state = AppState {
            grader: self.grader.clone(),
            assets_dir: Arc::new(self.assets_dir),
        };

        let listener = TcpListener::bind(self.host_addr).await?;
        info!("Grading service listening on: {}", self.host_addr);

        let served = axum::serve(listener, api::router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await;

        // Pooled postgres clients own a runtime of their own and must not be
        // dropped on an async worker
        let grader = self.grader;
        tokio::task::spawn_blocking(move || drop(grader)).await?;

        served?;
        info!("Grading service stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!("Could not listen for the shutdown signal: {}", e),
    }
}
