//! 📊 progress.rs: "Are we there yet?" Every sync, every time, forever.
//!
//! 🚀 The terminal face of a sync: a progress bar over items processed vs. items total,
//! and comfy-table summaries for `status` and for the run that just ended.
//!
//! ⚠️  Warning: Watching this progress bar will not make it go faster.
//! Neither will refreshing it. We've tried. Science says no.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::checkpoint::{LastSyncReport, SyncCounts};
use crate::protocol::SyncProjection;

/// 🔢 "1000000 items" → "1,000,000 items". You're welcome, eyes.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls.
/// If it shows HH:MM:SS, you should probably call your mom. It's been a while.
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn counts_rows(table: &mut Table, counts: &SyncCounts) {
    table.add_row(vec![Cell::new("synced"), Cell::new(format_number(counts.synced)).set_alignment(CellAlignment::Right)]);
    table.add_row(vec![Cell::new("skipped"), Cell::new(format_number(counts.skipped)).set_alignment(CellAlignment::Right)]);
    table.add_row(vec![Cell::new("failed"), Cell::new(format_number(counts.failed)).set_alignment(CellAlignment::Right)]);
}

fn bare_table() -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// 🪦 The run that just ended, one indexable per row, totals at the bottom.
pub fn report_table(report: &LastSyncReport) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["indexable", "site", "found", "synced", "skipped", "failed"]);
    for item in &report.completed_items {
        table.add_row(vec![
            Cell::new(&item.slug),
            Cell::new(item.site_id.map_or_else(|| "network".to_string(), |id| id.to_string())),
            Cell::new(format_number(item.found_items)).set_alignment(CellAlignment::Right),
            Cell::new(format_number(item.counts.synced)).set_alignment(CellAlignment::Right),
            Cell::new(format_number(item.counts.skipped)).set_alignment(CellAlignment::Right),
            Cell::new(format_number(item.counts.failed)).set_alignment(CellAlignment::Right),
        ]);
    }
    table.add_row(vec![
        Cell::new(format!("total ({})", report.outcome)),
        Cell::new(format_duration(
            (report.end_date_time - report.start_date_time).to_std().unwrap_or_default(),
        )),
        Cell::new(""),
        Cell::new(format_number(report.totals.synced)).set_alignment(CellAlignment::Right),
        Cell::new(format_number(report.totals.skipped)).set_alignment(CellAlignment::Right),
        Cell::new(format_number(report.totals.failed)).set_alignment(CellAlignment::Right),
    ]);
    table
}

/// 🔭 What `ixsync status` prints.
pub fn status_table(projection: &SyncProjection) -> Table {
    let mut table = bare_table();
    let state = match (projection.is_syncing, projection.is_paused) {
        (true, true) => "paused",
        (true, false) => "syncing",
        (false, _) => "idle",
    };
    table.add_row(vec![Cell::new("state"), Cell::new(state)]);
    if projection.is_syncing {
        if let Some(method) = projection.method {
            table.add_row(vec![Cell::new("method"), Cell::new(method.to_string())]);
        }
        if let Some(ref slug) = projection.current_indexable {
            table.add_row(vec![Cell::new("indexable"), Cell::new(slug)]);
        }
        table.add_row(vec![
            Cell::new("progress"),
            Cell::new(format!(
                "{} / {}",
                format_number(projection.items_processed),
                format_number(projection.items_total)
            )),
        ]);
        counts_rows(&mut table, &projection.totals);
    }
    if let Some(ref last) = projection.last_sync {
        table.add_row(vec![
            Cell::new("last sync"),
            Cell::new(format!("{} at {}", last.outcome, last.end_date_time.format("%Y-%m-%d %H:%M:%S UTC"))),
        ]);
        if let Some(ref reason) = last.failed_reason {
            table.add_row(vec![Cell::new("reason"), Cell::new(reason)]);
        }
    }
    table
}

/// 📊 The live bar. Items processed over items total, with a rate over a sliding window.
///
/// # Ancient Proverb
/// "He who runs a reindex without a progress bar, reindexes alone and in darkness."
pub struct SyncProgress {
    progress_bar: ProgressBar,
    /// 🔄 (timestamp, processed) samples for the rate
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
    processed: u64,
    total: u64,
}

impl std::fmt::Debug for SyncProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("SyncProgress")
            .field("processed", &self.processed)
            .field("total", &self.total)
            .finish()
    }
}

impl SyncProgress {
    pub fn new(total: u64) -> Self {
        let progress_bar = ProgressBar::new(total);
        // -- 🎨 the template is a literal; if indicatif ever rejects it, the default bar will do
        if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
            progress_bar.set_style(style.progress_chars("=>-"));
        }
        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));
        Self {
            progress_bar,
            rate_samples,
            start_time,
            processed: 0,
            total,
        }
    }

    /// 🙈 For tests and non-interactive runs.
    pub fn hidden() -> Self {
        let mut progress = Self::new(0);
        progress.progress_bar = ProgressBar::hidden();
        progress
    }

    /// 🔄 Feed in the latest projection.
    pub fn update(&mut self, projection: &SyncProjection) {
        self.processed = projection.items_processed;
        // -- 📏 totals grow as later indexables get counted; never shrink the bar
        self.total = self.total.max(projection.items_total).max(self.processed);
        self.progress_bar.set_length(self.total);
        self.progress_bar.set_position(self.processed);
        let rate = self.items_per_sec();
        self.render(rate, projection.current_indexable.as_deref());
    }

    pub fn finish(&self) {
        self.progress_bar.finish();
    }

    /// 🛑 Leave the bar where it stopped.
    pub fn abandon(&self) {
        self.progress_bar.abandon();
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn items_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.processed));
        match self.rate_samples.front() {
            Some(&(oldest_time, oldest_processed)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    self.processed.saturating_sub(oldest_processed) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn render(&self, items_per_sec: f64, indexable: Option<&str>) {
        let percent = if self.total > 0 {
            (self.processed as f64 / self.total as f64) * 100.0
        } else {
            0.0
        };
        let elapsed = self.start_time.elapsed();
        let remaining = if items_per_sec > 0.0 && self.total > self.processed {
            // 🔮 linear extrapolation, assumes the future looks like the past
            format_duration(Duration::from_secs_f64((self.total - self.processed) as f64 / items_per_sec))
        } else {
            "--:--".to_string()
        };

        let mut table = bare_table();
        table.add_row(vec![
            Cell::new(format!("{} items/s", format_number(items_per_sec as u64))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} / {} items", format_number(self.processed), format_number(self.total)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}% ({} remaining)", percent, remaining)).set_alignment(CellAlignment::Right),
        ]);
        self.progress_bar
            .set_message(format!("indexable: {}\n{}", indexable.unwrap_or("-"), table));
    }
}
