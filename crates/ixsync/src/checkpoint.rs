//! 📍 Checkpoint: the sync's memory between invocations.
//!
//! 🎬 COLD OPEN: the process dies at batch 37. A new one wakes up with nothing but this
//! struct and a vague sense of purpose. It reads the cursor, it reads the stack, and it
//! carries on as if nothing happened. That is the entire trick.
//!
//! 🧠 Knowledge graph:
//! - `SyncCheckpoint` is the durable state of ONE run for ONE scope. `sync_id` names the run;
//!   the store refuses saves from anyone holding a different `sync_id`.
//! - `sync_stack` is what's left, `current_sync_item` is what's underway, `totals` and
//!   `completed_items` are what's done.
//! - `LastSyncReport` outlives the checkpoint, so clients can tell Completed from Failed
//!   after the checkpoint is gone.
//! - The progress numbers (`items_total`, `items_processed`) are computed here so every
//!   reader agrees on them.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::indexables::Cursor;

/// 📜 How many log entries a checkpoint keeps. Older ones fall off the front.
pub const LOG_CAPACITY: usize = 50;

/// 🖥️ Who drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Cli,
    Dashboard,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Cli => f.write_str("cli"),
            Method::Dashboard => f.write_str("dashboard"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Manual,
    Auto,
}

/// 🚦 Running, or parked until someone says resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointState {
    #[default]
    Running,
    Paused,
}

/// 🔢 synced + skipped + failed. Every processed object lands in exactly one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCounts {
    pub synced: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl SyncCounts {
    pub fn processed(&self) -> u64 {
        self.synced + self.skipped + self.failed
    }

    pub fn absorb(&mut self, other: &SyncCounts) {
        self.synced += other.synced;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// 📚 One queued unit of work: an indexable, optionally for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStackItem {
    pub slug: String,
    #[serde(default)]
    pub site_id: Option<u64>,
    pub found_items: u64,
    /// 🧮 Where offset pagination starts for this item.
    #[serde(default)]
    pub processed_offset: u64,
}

/// ⚙️ The item being walked right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentSyncItem {
    pub slug: String,
    #[serde(default)]
    pub site_id: Option<u64>,
    pub index_name: String,
    pub found_items: u64,
    pub cursor: Cursor,
    #[serde(default)]
    pub counts: SyncCounts,
    #[serde(default)]
    pub mapping_created: bool,
    /// 💀 Per-object errors seen so far (bounded like the log).
    #[serde(default)]
    pub errors: Vec<String>,
}

impl CurrentSyncItem {
    pub fn record_error(&mut self, error: String) {
        self.errors.push(error);
        if self.errors.len() > LOG_CAPACITY {
            let overflow = self.errors.len() - LOG_CAPACITY;
            self.errors.drain(..overflow);
        }
    }
}

/// ✅ A finished item, kept for the summary table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedSyncItem {
    pub slug: String,
    #[serde(default)]
    pub site_id: Option<u64>,
    pub found_items: u64,
    pub counts: SyncCounts,
}

/// 🎛️ What the run was started with. Stored so a resumed run applies the same filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default)]
    pub put_mapping: bool,
    /// 🏷️ Slugs to sync. Empty means every registered indexable.
    #[serde(default)]
    pub indexables: Vec<String>,
    #[serde(default)]
    pub lower_limit_object_id: Option<u64>,
    #[serde(default)]
    pub upper_limit_object_id: Option<u64>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub include: Vec<u64>,
    #[serde(default)]
    pub post_type: Vec<String>,
    /// 📦 Batch size override. None means the configured default.
    #[serde(default)]
    pub per_page: Option<usize>,
    pub method: Method,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub restart: bool,
}

impl SyncOptions {
    pub fn new(method: Method) -> Self {
        Self {
            put_mapping: false,
            indexables: Vec::new(),
            lower_limit_object_id: None,
            upper_limit_object_id: None,
            offset: 0,
            include: Vec::new(),
            post_type: Vec::new(),
            per_page: None,
            method,
            trigger: Trigger::Manual,
            restart: false,
        }
    }

    pub fn cli() -> Self {
        Self::new(Method::Cli)
    }

    pub fn dashboard() -> Self {
        Self::new(Method::Dashboard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// 📜 One line of the run's story. `seq` only ever goes up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// 📍 The durable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub sync_id: Uuid,
    pub sync_stack: VecDeque<SyncStackItem>,
    #[serde(default)]
    pub current_sync_item: Option<CurrentSyncItem>,
    #[serde(default)]
    pub totals: SyncCounts,
    #[serde(default)]
    pub completed_items: Vec<CompletedSyncItem>,
    pub method: Method,
    pub put_mapping: bool,
    pub start_date_time: DateTime<Utc>,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub state: CheckpointState,
    pub options: SyncOptions,
    #[serde(default)]
    pub log: Vec<SyncLogEntry>,
    #[serde(default)]
    pub next_seq: u64,
}

impl SyncCheckpoint {
    /// 🏗️ A fresh checkpoint with a brand new `sync_id`.
    pub fn new(options: SyncOptions, sync_stack: VecDeque<SyncStackItem>) -> Self {
        Self {
            sync_id: Uuid::new_v4(),
            sync_stack,
            current_sync_item: None,
            totals: SyncCounts::default(),
            completed_items: Vec::new(),
            method: options.method,
            put_mapping: options.put_mapping,
            start_date_time: Utc::now(),
            trigger: options.trigger,
            state: CheckpointState::Running,
            options,
            log: Vec::new(),
            next_seq: 1,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state == CheckpointState::Paused
    }

    /// 📜 Append to the log, dropping the oldest entries past `LOG_CAPACITY`.
    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>) {
        // -- 🧮 next_seq starts at 1; a checkpoint deserialized without it starts there too
        let seq = self.next_seq.max(self.log.last().map_or(0, |e| e.seq) + 1);
        self.next_seq = seq + 1;
        self.log.push(SyncLogEntry {
            seq,
            at: Utc::now(),
            level,
            message: message.into(),
        });
        if self.log.len() > LOG_CAPACITY {
            let overflow = self.log.len() - LOG_CAPACITY;
            self.log.drain(..overflow);
        }
    }

    /// 🔢 Everything this run will have touched: done + underway + queued.
    pub fn items_total(&self) -> u64 {
        let current = self.current_sync_item.as_ref().map_or(0, |c| c.found_items);
        let queued: u64 = self.sync_stack.iter().map(|s| s.found_items).sum();
        current + queued + self.totals.processed()
    }

    /// 🔢 Everything this run has processed so far.
    pub fn items_processed(&self) -> u64 {
        let current = self.current_sync_item.as_ref().map_or(0, |c| c.counts.processed());
        current + self.totals.processed()
    }

    /// ✅ Fold the current item into the totals. Returns the folded item, if there was one.
    pub fn complete_current_item(&mut self) -> Option<CompletedSyncItem> {
        let current = self.current_sync_item.take()?;
        self.totals.absorb(&current.counts);
        let completed = CompletedSyncItem {
            slug: current.slug,
            site_id: current.site_id,
            found_items: current.found_items,
            counts: current.counts,
        };
        self.completed_items.push(completed.clone());
        Some(completed)
    }
}

/// 🏁 How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Completed,
    Stopped,
    Failed,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Completed => f.write_str("completed"),
            SyncOutcome::Stopped => f.write_str("stopped"),
            SyncOutcome::Failed => f.write_str("failed"),
        }
    }
}

/// 🪦 What is left of a run once its checkpoint is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSyncReport {
    pub sync_id: Uuid,
    pub outcome: SyncOutcome,
    pub method: Method,
    pub trigger: Trigger,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub totals: SyncCounts,
    pub completed_items: Vec<CompletedSyncItem>,
    #[serde(default)]
    pub failed_reason: Option<String>,
    #[serde(default)]
    pub log: Vec<SyncLogEntry>,
}

impl LastSyncReport {
    /// 📝 Snapshot a checkpoint as it ends. Work on an unfinished item still counts.
    pub fn from_checkpoint(checkpoint: &SyncCheckpoint, outcome: SyncOutcome, failed_reason: Option<String>) -> Self {
        let mut totals = checkpoint.totals;
        let mut completed_items = checkpoint.completed_items.clone();
        if let Some(ref current) = checkpoint.current_sync_item {
            totals.absorb(&current.counts);
            completed_items.push(CompletedSyncItem {
                slug: current.slug.clone(),
                site_id: current.site_id,
                found_items: current.found_items,
                counts: current.counts,
            });
        }
        Self {
            sync_id: checkpoint.sync_id,
            outcome,
            method: checkpoint.method,
            trigger: checkpoint.trigger,
            start_date_time: checkpoint.start_date_time,
            end_date_time: Utc::now(),
            totals,
            completed_items,
            failed_reason,
            log: checkpoint.log.clone(),
        }
    }
}
