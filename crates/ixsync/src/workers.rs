//! 🧵 Workers: the ones who actually do the work while the endpoint takes all the credit
//! in the sprint retro.
//!
//! 🧠 Knowledge graph:
//! - `Worker` is the spawn contract: hand over `self`, get a `JoinHandle` back.
//! - `SyncWorker` is background mode: it calls `run_slice` over and over, with the
//!   persisted checkpoint as its recovery log. Kill it anywhere and a new one picks up
//!   at the last saved batch.
//!
//! ⚠️ "If you're reading this, the code review went poorly."

// 🎉 anyhowwwww.... it's useful! Like duct tape for error handling.
use anyhow::Result;
use tokio::task::JoinHandle;

mod sync_worker;
pub use sync_worker::SyncWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" -- Seinfeld, on Rust
pub trait Worker {
    /// 🏁 What the worker reports when it is done.
    type Output;

    /// 🚀 Start the worker. Returns a JoinHandle because we trust
    /// but verify. Mostly verify. Okay, we don't trust at all.
    fn start(self) -> JoinHandle<Result<Self::Output>>;
}
