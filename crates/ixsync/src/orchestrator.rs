//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where processes get killed at batch 37..."
//! 🎬 "One checkpoint remembered everything."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Sync Orchestrator: part middle manager, part state machine, part that one
//! coworker who writes down where they left off before every coffee break.
//!
//! 🧠 Knowledge graph:
//! - `start_sync` validates, builds the stack, and CLAIMS the checkpoint atomically.
//! - `run_slice(budget)` is the process loop. Each iteration: read the interrupt flag
//!   (straight from the store), check the budget, do one step, persist (owner-checked).
//! - A step is one of: start the next item, create its mapping, index one batch, or
//!   finish the item. Only indexed batches count against the budget.
//! - Outcomes: Completed, Paused, Stopped, Yielded (budget spent), Superseded (someone
//!   else owns the checkpoint now), Failed (fatal error), Idle (nothing to do).
//! - Fatal = mapping rejected, bulk transport exhausted, content source broken. Fatal
//!   deletes the checkpoint and leaves a `LastSyncReport` with the reason.
//!
//! The checkpoint is the only shared mutable thing. Everything else is plumbing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::checkpoint::{
    CheckpointState, CurrentSyncItem, LastSyncReport, LogLevel, SyncCheckpoint, SyncCounts, SyncOptions,
    SyncOutcome, SyncStackItem,
};
use crate::engine::BulkIndexClient;
use crate::enumerator;
use crate::error::{StoreError, SyncError};
use crate::indexables::{Indexable, IndexableDescriptor, IndexableRegistry};
use crate::protocol::SyncProjection;
use crate::serializer::DocumentSerializer;
use crate::store::{Interrupt, ProgressStore, Scope, StoreBackend};

/// ⏱️ How much work one `run_slice` call may do before handing control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionBudget {
    pub max_batches: Option<u32>,
    pub max_duration: Option<Duration>,
}

impl ExecutionBudget {
    /// ♾️ Run until done, paused, stopped or failed.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn batches(max_batches: u32) -> Self {
        Self {
            max_batches: Some(max_batches),
            max_duration: None,
        }
    }

    pub fn with_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    fn is_exhausted(&self, batches: u32, elapsed: Duration) -> bool {
        self.max_batches.is_some_and(|max| batches >= max) || self.max_duration.is_some_and(|max| elapsed >= max)
    }
}

/// 🏁 How a slice ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RunOutcome {
    /// 💤 No checkpoint for the scope. Nothing to do.
    Idle,
    Completed,
    Paused,
    Stopped,
    /// ⏱️ Budget spent; call again to continue.
    Yielded,
    /// 🔒 The checkpoint vanished or belongs to another run now.
    Superseded,
    Failed { reason: String },
}

impl RunOutcome {
    /// 🔁 Should the driver call `run_slice` again?
    pub fn should_continue(&self) -> bool {
        matches!(self, RunOutcome::Yielded)
    }
}

/// 🛑 What `request_stop` managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopRequest {
    /// The sync was paused, so it was stopped on the spot.
    Stopped,
    /// The flag is set; the runner honors it at its next batch boundary.
    Requested,
}

/// 🚀 Whether `resume_or_start` picked up an old run or began a new one.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStart {
    Fresh(SyncCheckpoint),
    Resumed(SyncCheckpoint),
}

impl SyncStart {
    pub fn checkpoint(&self) -> &SyncCheckpoint {
        match self {
            SyncStart::Fresh(checkpoint) | SyncStart::Resumed(checkpoint) => checkpoint,
        }
    }

    pub fn is_resumed(&self) -> bool {
        matches!(self, SyncStart::Resumed(_))
    }
}

/// 🔧 Knobs that are not part of a run's options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub index_prefix: String,
    /// 📦 Objects per batch when the run's options do not say otherwise.
    pub batch_size: usize,
    /// 🏘️ Sites a network-scope sync walks for non-global indexables.
    pub network_sites: Vec<u64>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            index_prefix: "wp".to_string(),
            batch_size: 350,
            network_sites: Vec::new(),
        }
    }
}

enum Step {
    ItemStarted,
    MappingCreated,
    Batch,
    ItemFinished,
    Finished,
}

/// 🎬 The orchestrator. Cheap to clone; everything heavy is shared.
#[derive(Debug, Clone)]
pub struct SyncOrchestrator {
    scope: Scope,
    registry: Arc<IndexableRegistry>,
    serializer: Arc<DocumentSerializer>,
    bulk: BulkIndexClient,
    store: StoreBackend,
    settings: OrchestratorSettings,
}

impl SyncOrchestrator {
    pub fn new(
        scope: Scope,
        registry: Arc<IndexableRegistry>,
        serializer: Arc<DocumentSerializer>,
        bulk: BulkIndexClient,
        store: StoreBackend,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            scope,
            registry,
            serializer,
            bulk,
            store,
            settings,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn store(&self) -> &StoreBackend {
        &self.store
    }

    pub fn registry(&self) -> &IndexableRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn indexable(&self, slug: &str) -> Result<&Indexable, SyncError> {
        self.registry
            .get(slug)
            .ok_or_else(|| SyncError::UnknownIndexable(slug.to_string()))
    }

    // ============================================================================================
    // 🚀 Starting
    // ============================================================================================

    /// 🚀 Claim the scope and queue every requested indexable.
    ///
    /// Unknown slugs are rejected before anything touches the store. With `restart`, any
    /// existing checkpoint and interrupt flag are wiped first; without it, an existing
    /// checkpoint means `AlreadyRunning`.
    pub async fn start_sync(&self, options: SyncOptions) -> Result<SyncCheckpoint, SyncError> {
        let selected = self.select_indexables(&options.indexables)?;

        if options.restart {
            info!(scope = %self.scope, "🔄 restart requested, clearing any previous checkpoint");
            self.store.clear_checkpoint(&self.scope).await?;
            self.store.clear_interrupt(&self.scope).await?;
        } else if let Some(existing) = self.store.get_checkpoint(&self.scope).await? {
            return Err(self.already_running(&existing));
        }

        let stack = self.build_stack(&selected, &options).await?;
        let mut checkpoint = SyncCheckpoint::new(options, stack);
        checkpoint.push_log(
            LogLevel::Info,
            format!(
                "🚀 sync started for {} by {}: {} item(s) queued, {} object(s) found",
                self.scope,
                checkpoint.method,
                checkpoint.sync_stack.len(),
                checkpoint.items_total()
            ),
        );

        match self.store.claim_checkpoint(&self.scope, &checkpoint).await {
            Ok(()) => {}
            Err(StoreError::AlreadyClaimed(_)) => {
                // -- 🏁 lost the race. Report whoever won.
                let winner = self.store.get_checkpoint(&self.scope).await?;
                return Err(self.already_running(winner.as_ref().unwrap_or(&checkpoint)));
            }
            Err(e) => return Err(e.into()),
        }
        // -- 🧹 a flag left over from a previous run must not pause this one
        self.store.clear_interrupt(&self.scope).await?;

        info!(
            scope = %self.scope,
            sync_id = %checkpoint.sync_id,
            items_total = checkpoint.items_total(),
            "🚀 sync claimed"
        );
        Ok(checkpoint)
    }

    /// 🔁 CLI semantics: pick up our own checkpoint if there is one, else start fresh.
    ///
    /// A checkpoint driven by a different method is not ours to take: `AlreadyRunning`.
    pub async fn resume_or_start(&self, options: SyncOptions) -> Result<SyncStart, SyncError> {
        if !options.restart {
            if let Some(mut existing) = self.store.get_checkpoint(&self.scope).await? {
                if existing.method != options.method {
                    return Err(self.already_running(&existing));
                }
                self.store.clear_interrupt_if(&self.scope, Interrupt::Pause).await?;
                existing.state = CheckpointState::Running;
                existing.push_log(
                    LogLevel::Info,
                    format!(
                        "🔁 resuming sync at {}/{} object(s)",
                        existing.items_processed(),
                        existing.items_total()
                    ),
                );
                self.store.save_checkpoint(&self.scope, &existing).await?;
                info!(scope = %self.scope, sync_id = %existing.sync_id, "🔁 resuming existing sync");
                return Ok(SyncStart::Resumed(existing));
            }
        }
        Ok(SyncStart::Fresh(self.start_sync(options).await?))
    }

    fn already_running(&self, checkpoint: &SyncCheckpoint) -> SyncError {
        SyncError::AlreadyRunning {
            scope: self.scope.key(),
            method: checkpoint.method.to_string(),
        }
    }

    /// 🏷️ Requested slugs in registration order. Empty request = everything.
    fn select_indexables(&self, slugs: &[String]) -> Result<Vec<&Indexable>, SyncError> {
        if let Some(unknown) = slugs.iter().find(|slug| self.registry.get(slug).is_none()) {
            return Err(SyncError::UnknownIndexable(unknown.clone()));
        }
        Ok(self
            .registry
            .iter()
            .filter(|i| slugs.is_empty() || slugs.iter().any(|s| s == i.slug()))
            .collect())
    }

    /// 🏘️ Which site ids an indexable is walked for in this scope.
    fn site_targets(&self, descriptor: &IndexableDescriptor) -> Vec<Option<u64>> {
        if descriptor.is_global {
            return vec![None];
        }
        match self.scope {
            Scope::Site(id) => vec![Some(id)],
            Scope::Network if self.settings.network_sites.is_empty() => vec![None],
            Scope::Network => self.settings.network_sites.iter().copied().map(Some).collect(),
        }
    }

    async fn build_stack(
        &self,
        selected: &[&Indexable],
        options: &SyncOptions,
    ) -> Result<VecDeque<SyncStackItem>, SyncError> {
        let mut stack = VecDeque::new();
        for indexable in selected {
            for site_id in self.site_targets(&indexable.descriptor) {
                let cursor = enumerator::initial_cursor(&indexable.descriptor, options, options.offset);
                let found_items = enumerator::count(indexable, site_id, cursor, options).await?;
                trace!(slug = indexable.slug(), ?site_id, found_items, "📚 queued");
                stack.push_back(SyncStackItem {
                    slug: indexable.slug().to_string(),
                    site_id,
                    found_items,
                    processed_offset: options.offset,
                });
            }
        }
        Ok(stack)
    }

    // ============================================================================================
    // 🔄 The process loop
    // ============================================================================================

    /// 🔄 Process batches until done, interrupted, failed, or out of budget.
    ///
    /// Interrupts are honored at batch boundaries only: a batch in flight always finishes
    /// and is persisted first.
    pub async fn run_slice(&self, budget: ExecutionBudget) -> Result<RunOutcome, SyncError> {
        let started = Instant::now();
        let Some(mut checkpoint) = self.store.get_checkpoint(&self.scope).await? else {
            trace!(scope = %self.scope, "💤 no checkpoint, nothing to run");
            return Ok(RunOutcome::Idle);
        };

        let mut batches = 0u32;
        loop {
            match self.store.get_interrupt(&self.scope).await? {
                Interrupt::Pause => return self.honor_pause(checkpoint).await,
                Interrupt::Stop => return self.honor_stop(checkpoint).await,
                Interrupt::None => {}
            }
            if checkpoint.is_paused() {
                return Ok(RunOutcome::Paused);
            }
            if budget.is_exhausted(batches, started.elapsed()) {
                debug!(batches, "⏱️ budget spent, yielding");
                return Ok(RunOutcome::Yielded);
            }

            let step = match self.step(&mut checkpoint).await {
                Ok(step) => step,
                Err(err) if err.is_fatal() || matches!(err, SyncError::UnknownIndexable(_)) => {
                    return self.fail(checkpoint, err).await;
                }
                Err(err) => return Err(err),
            };
            match step {
                Step::Finished => return self.complete(checkpoint).await,
                Step::Batch => batches += 1,
                Step::ItemStarted | Step::MappingCreated | Step::ItemFinished => {}
            }

            if !self.persist(&checkpoint).await? {
                warn!(scope = %self.scope, sync_id = %checkpoint.sync_id, "🔒 checkpoint taken over by another run, backing off");
                return Ok(RunOutcome::Superseded);
            }
        }
    }

    /// 💾 Owner-checked save. `false` means the checkpoint is no longer ours.
    async fn persist(&self, checkpoint: &SyncCheckpoint) -> Result<bool, SyncError> {
        match self.store.save_checkpoint(&self.scope, checkpoint).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotOwner { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn step(&self, checkpoint: &mut SyncCheckpoint) -> Result<Step, SyncError> {
        let Some(current) = checkpoint.current_sync_item.as_ref() else {
            return self.start_next_item(checkpoint).await;
        };
        let indexable = self.indexable(&current.slug)?;

        if checkpoint.put_mapping && !current.mapping_created {
            let index_name = current.index_name.clone();
            // -- 🗺️ no retry: a rejected mapping is a config problem, not a network blip
            self.bulk.put_mapping(&index_name, &indexable.mapping).await?;
            if let Some(current) = checkpoint.current_sync_item.as_mut() {
                current.mapping_created = true;
            }
            checkpoint.push_log(LogLevel::Info, format!("🗺️ mapping created for '{index_name}'"));
            return Ok(Step::MappingCreated);
        }

        let (site_id, cursor, index_name) = (current.site_id, current.cursor, current.index_name.clone());
        let per_page = checkpoint.options.per_page.unwrap_or(self.settings.batch_size).max(1);
        let objects = enumerator::fetch_batch(indexable, site_id, cursor, &checkpoint.options, per_page).await?;

        if objects.is_empty() {
            if let Some(done) = checkpoint.complete_current_item() {
                info!(slug = %done.slug, synced = done.counts.synced, "✅ item finished");
                checkpoint.push_log(
                    LogLevel::Info,
                    format!(
                        "✅ finished '{}': {} synced, {} skipped, {} failed",
                        done.slug, done.counts.synced, done.counts.skipped, done.counts.failed
                    ),
                );
            }
            return Ok(Step::ItemFinished);
        }

        let serialized = self.serializer.serialize_batch(&indexable.descriptor, &objects);
        let result = self.bulk.bulk_index(&index_name, &serialized.documents).await?;

        let mut entries = Vec::new();
        if let Some(current) = checkpoint.current_sync_item.as_mut() {
            for skipped in &serialized.skipped {
                current.counts.skipped += 1;
                current.record_error(skipped.to_string());
                entries.push((LogLevel::Warning, format!("⚠️ skipped: {skipped}")));
            }
            current.counts.synced += result.succeeded();
            current.counts.failed += result.failed_count();
            for failed in &result.failed {
                let message = format!("object {} rejected by the engine: {}", failed.id, failed.reason);
                current.record_error(message.clone());
                entries.push((LogLevel::Warning, format!("❌ {message}")));
            }
            current.cursor = enumerator::advance(cursor, &objects);
            // -- 🧮 rows added mid-walk can push processed past the up-front count
            current.found_items = current.found_items.max(current.counts.processed());
            debug!(
                slug = %current.slug,
                batch = objects.len(),
                processed = current.counts.processed(),
                found = current.found_items,
                "📦 batch indexed"
            );
            entries.push((
                LogLevel::Info,
                format!(
                    "📦 '{}': {}/{} processed",
                    current.slug,
                    current.counts.processed(),
                    current.found_items
                ),
            ));
        }
        for (level, message) in entries {
            checkpoint.push_log(level, message);
        }
        Ok(Step::Batch)
    }

    async fn start_next_item(&self, checkpoint: &mut SyncCheckpoint) -> Result<Step, SyncError> {
        let Some(next) = checkpoint.sync_stack.pop_front() else {
            return Ok(Step::Finished);
        };
        let indexable = self.indexable(&next.slug)?;
        let cursor = enumerator::initial_cursor(&indexable.descriptor, &checkpoint.options, next.processed_offset);
        // -- 🔢 fresh count: the world moved on since start_sync counted
        let found_items = enumerator::count(indexable, next.site_id, cursor, &checkpoint.options).await?;
        let index_name = indexable.index_name(&self.settings.index_prefix, next.site_id);

        info!(slug = %next.slug, index = %index_name, found_items, "📚 starting item");
        checkpoint.push_log(
            LogLevel::Info,
            format!("📚 indexing '{}' into '{index_name}': {found_items} object(s) found", next.slug),
        );
        checkpoint.current_sync_item = Some(CurrentSyncItem {
            slug: next.slug,
            site_id: next.site_id,
            index_name,
            found_items,
            cursor,
            counts: SyncCounts::default(),
            mapping_created: false,
            errors: Vec::new(),
        });
        Ok(Step::ItemStarted)
    }

    // ============================================================================================
    // 🏁 Endings
    // ============================================================================================

    async fn honor_pause(&self, mut checkpoint: SyncCheckpoint) -> Result<RunOutcome, SyncError> {
        checkpoint.state = CheckpointState::Paused;
        checkpoint.push_log(
            LogLevel::Info,
            format!(
                "⏸️ paused at {}/{} object(s)",
                checkpoint.items_processed(),
                checkpoint.items_total()
            ),
        );
        if !self.persist(&checkpoint).await? {
            return Ok(RunOutcome::Superseded);
        }
        // -- 🛑 a stop that landed after we read the pause stays put for the next slice
        if !self.store.clear_interrupt_if(&self.scope, Interrupt::Pause).await? {
            debug!(scope = %self.scope, "⏸️ interrupt changed while pausing; leaving it for the next slice");
        }
        info!(scope = %self.scope, processed = checkpoint.items_processed(), "⏸️ sync paused");
        Ok(RunOutcome::Paused)
    }

    async fn honor_stop(&self, mut checkpoint: SyncCheckpoint) -> Result<RunOutcome, SyncError> {
        checkpoint.push_log(
            LogLevel::Info,
            format!(
                "🛑 stopped at {}/{} object(s)",
                checkpoint.items_processed(),
                checkpoint.items_total()
            ),
        );
        if !self.store.release_checkpoint(&self.scope, checkpoint.sync_id).await? {
            return Ok(RunOutcome::Superseded);
        }
        self.store.clear_interrupt(&self.scope).await?;
        self.write_report(&checkpoint, SyncOutcome::Stopped, None).await?;
        info!(scope = %self.scope, "🛑 sync stopped");
        Ok(RunOutcome::Stopped)
    }

    async fn complete(&self, mut checkpoint: SyncCheckpoint) -> Result<RunOutcome, SyncError> {
        let totals = checkpoint.totals;
        checkpoint.push_log(
            LogLevel::Info,
            format!(
                "🏁 sync complete: {} synced, {} skipped, {} failed",
                totals.synced, totals.skipped, totals.failed
            ),
        );
        if !self.store.release_checkpoint(&self.scope, checkpoint.sync_id).await? {
            return Ok(RunOutcome::Superseded);
        }
        self.write_report(&checkpoint, SyncOutcome::Completed, None).await?;
        info!(scope = %self.scope, synced = totals.synced, skipped = totals.skipped, failed = totals.failed, "🏁 sync complete");
        Ok(RunOutcome::Completed)
    }

    async fn fail(&self, mut checkpoint: SyncCheckpoint, err: SyncError) -> Result<RunOutcome, SyncError> {
        let reason = err.to_string();
        error!(scope = %self.scope, error = %reason, "💀 sync failed");
        if let Some(current) = checkpoint.current_sync_item.as_mut() {
            current.record_error(reason.clone());
        }
        checkpoint.push_log(LogLevel::Error, reason.clone());
        if !self.store.release_checkpoint(&self.scope, checkpoint.sync_id).await? {
            return Ok(RunOutcome::Superseded);
        }
        self.write_report(&checkpoint, SyncOutcome::Failed, Some(reason.clone())).await?;
        Ok(RunOutcome::Failed { reason })
    }

    async fn write_report(
        &self,
        checkpoint: &SyncCheckpoint,
        outcome: SyncOutcome,
        failed_reason: Option<String>,
    ) -> Result<(), SyncError> {
        let report = LastSyncReport::from_checkpoint(checkpoint, outcome, failed_reason);
        self.store.save_last_sync(&self.scope, &report).await?;
        Ok(())
    }

    // ============================================================================================
    // 🎛️ Controls
    // ============================================================================================

    /// ⏸️ Ask the runner to pause at its next batch boundary.
    pub async fn request_pause(&self) -> Result<(), SyncError> {
        let checkpoint = self.require_checkpoint().await?;
        if checkpoint.is_paused() {
            return Ok(());
        }
        self.store.set_interrupt(&self.scope, Interrupt::Pause).await?;
        info!(scope = %self.scope, "⏸️ pause requested");
        Ok(())
    }

    /// ▶️ Cancel a pending pause, or wake a paused checkpoint.
    pub async fn request_resume(&self) -> Result<SyncCheckpoint, SyncError> {
        let mut checkpoint = self.require_checkpoint().await?;
        self.store.clear_interrupt_if(&self.scope, Interrupt::Pause).await?;
        if checkpoint.is_paused() {
            checkpoint.state = CheckpointState::Running;
            checkpoint.push_log(LogLevel::Info, "▶️ resumed");
            self.store.save_checkpoint(&self.scope, &checkpoint).await?;
            info!(scope = %self.scope, "▶️ sync resumed");
        }
        Ok(checkpoint)
    }

    /// 🛑 Stop. A paused sync has no runner to notice a flag, so it stops right here.
    pub async fn request_stop(&self) -> Result<StopRequest, SyncError> {
        let checkpoint = self.require_checkpoint().await?;
        if checkpoint.is_paused() {
            self.honor_stop(checkpoint).await?;
            return Ok(StopRequest::Stopped);
        }
        self.store.set_interrupt(&self.scope, Interrupt::Stop).await?;
        info!(scope = %self.scope, "🛑 stop requested");
        Ok(StopRequest::Requested)
    }

    /// 💣 Stop whatever is running, forget it, and start over with fresh mappings.
    pub async fn delete_and_resync(&self, mut options: SyncOptions) -> Result<SyncCheckpoint, SyncError> {
        self.select_indexables(&options.indexables)?;
        if let Some(mut old) = self.store.get_checkpoint(&self.scope).await? {
            old.push_log(LogLevel::Info, "💣 stopped for delete-and-resync");
            self.write_report(&old, SyncOutcome::Stopped, None).await?;
        }
        self.store.clear_checkpoint(&self.scope).await?;
        self.store.clear_interrupt(&self.scope).await?;

        options.put_mapping = true;
        options.restart = false;
        self.start_sync(options).await
    }

    /// 🧹 Delete the checkpoint and flag, no questions asked. Returns whether one existed.
    pub async fn force_clear(&self) -> Result<bool, SyncError> {
        let existed = self.store.get_checkpoint(&self.scope).await?.is_some();
        self.store.clear_checkpoint(&self.scope).await?;
        self.store.clear_interrupt(&self.scope).await?;
        warn!(scope = %self.scope, existed, "🧹 checkpoint force-cleared");
        Ok(existed)
    }

    async fn require_checkpoint(&self) -> Result<SyncCheckpoint, SyncError> {
        self.store
            .get_checkpoint(&self.scope)
            .await?
            .ok_or_else(|| SyncError::NotRunning(self.scope.key()))
    }

    // ============================================================================================
    // 🔭 Reads
    // ============================================================================================

    pub async fn checkpoint(&self) -> Result<Option<SyncCheckpoint>, SyncError> {
        Ok(self.store.get_checkpoint(&self.scope).await?)
    }

    pub async fn last_sync(&self) -> Result<Option<LastSyncReport>, SyncError> {
        Ok(self.store.get_last_sync(&self.scope).await?)
    }

    /// 🔭 What a progress client sees right now.
    pub async fn projection(&self) -> Result<SyncProjection, SyncError> {
        let checkpoint = self.store.get_checkpoint(&self.scope).await?;
        let last_sync = self.store.get_last_sync(&self.scope).await?;
        Ok(SyncProjection::from_parts(checkpoint.as_ref(), last_sync.as_ref()))
    }
}
