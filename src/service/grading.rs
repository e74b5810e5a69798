use std::sync::Arc;

use r2d2::{ManageConnection, Pool};
use tokio::sync::Mutex;
use uuid::Uuid;

use self::{
    models::{PreparedCase, RunResult},
    safety::SafeQuery,
    session::Session,
};
use super::error::RunError;

pub mod comparator;
pub mod models;
pub mod normalizer;
pub mod safety;
pub mod sandbox;
pub mod session;

/// Bounds applied to every case of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradingLimits {
    /// Backend statement timeout, scoped to the case's transaction
    pub statement_timeout_ms: u64,

    /// Rows kept from a query result
    pub row_limit: usize,

    /// Rows reported per side of a diff
    pub diff_limit: usize,
}

impl Default for GradingLimits {
    fn default() -> Self {
        GradingLimits {
            statement_timeout_ms: 2000,
            row_limit: 200,
            diff_limit: 20,
        }
    }
}

/// Run coordinator.
///
/// Runs are admitted one at a time across the whole process; the queue is a
/// tokio mutex, which hands out turns in FIFO order.
pub struct Grader<M: ManageConnection> {
    pool: Pool<M>,
    turn: Arc<Mutex<()>>,
    limits: GradingLimits,
}

impl<M> Grader<M>
where
    M: ManageConnection,
    M::Connection: Session,
{
    pub fn new(pool: Pool<M>, limits: GradingLimits) -> Grader<M> {
        Grader {
            pool,
            turn: Arc::new(Mutex::new(())),
            limits,
        }
    }

    /// Grades `query` against every case, in order, on one pooled session.
    ///
    /// Case failures are part of the result; only faults that prevent the run
    /// itself (no cases, no session, a crashed worker) are errors.
    pub async fn run(&self, query: SafeQuery, cases: Vec<PreparedCase>) -> Result<RunResult, RunError> {
        if cases.is_empty() {
            return Err(RunError::NoCases);
        }

        // The turn travels into the worker so it is held for as long as the
        // session is, even if the caller stops waiting
        let turn = self.turn.clone().lock_owned().await;
        let run_id = Uuid::new_v4();
        let pool = self.pool.clone();
        let limits = self.limits.clone();
        trace!("run {}: admitted with {} case(s)", run_id, cases.len());

        let results = tokio::task::spawn_blocking(move || {
            let _turn = turn;
            let mut session = pool.get().map_err(|e| {
                error!("run {}: no database session available: {}", run_id, e);
                RunError::from(e)
            })?;

            let results = cases
                .iter()
                .map(|case| sandbox::run_case(&mut *session, &query, case, &limits))
                .collect::<Vec<_>>();
            Ok::<_, RunError>(results)
        })
        .await
        .map_err(|e| {
            error!("run {}: grading worker crashed: {}", run_id, e);
            RunError::from(e)
        })??;

        let result = RunResult::aggregate(results);
        info!(
            "run {}: {} case(s) graded, overall {:?}",
            run_id,
            result.cases.len(),
            result.overall
        );
        Ok(result)
    }
}
