//! 🎬 *[a checkpoint sits in the store. somewhere, a worker wakes up.]*
//! *[the clock on the wall reads 2:47am.]*
//! *[nobody asked for this reindex. and yet, here we are.]*
//!
//! 🔄 The SyncWorker: patient, tireless, and deeply unbothered by the chaos happening in
//! the dashboard. It runs a slice. It runs another slice. It stops when the orchestrator
//! says there is nothing left to continue.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::Worker;
use crate::orchestrator::{ExecutionBudget, RunOutcome, SyncOrchestrator};

/// 🔄 Drives `run_slice` until the run stops yielding.
#[derive(Debug)]
pub struct SyncWorker {
    orchestrator: SyncOrchestrator,
    budget: ExecutionBudget,
    // -- 😮‍💨 breather between slices so the store is not hammered by one hot loop
    pause_between_slices: Duration,
}

impl SyncWorker {
    pub fn new(orchestrator: SyncOrchestrator, budget: ExecutionBudget) -> Self {
        Self {
            orchestrator,
            budget,
            pause_between_slices: Duration::ZERO,
        }
    }

    pub fn with_pause_between_slices(mut self, pause: Duration) -> Self {
        self.pause_between_slices = pause;
        self
    }
}

impl Worker for SyncWorker {
    type Output = RunOutcome;

    fn start(self) -> JoinHandle<Result<RunOutcome>> {
        tokio::spawn(async move {
            debug!(scope = %self.orchestrator.scope(), "🧵 SyncWorker clocking in");
            let mut slices = 0u64;
            loop {
                let outcome = self
                    .orchestrator
                    .run_slice(self.budget)
                    .await
                    .context("💀 SyncWorker could not run a slice. The checkpoint is untouched; start a worker again once the store is reachable")?;
                slices += 1;
                if !outcome.should_continue() {
                    info!(slices, ?outcome, "🏁 SyncWorker clocking out");
                    return Ok(outcome);
                }
                if self.pause_between_slices.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(self.pause_between_slices).await;
                }
            }
        })
    }
}
