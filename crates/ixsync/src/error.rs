//! 💀 Errors: the taxonomy of things that go bump in the night.
//!
//! 🧠 Knowledge graph:
//! - `SyncError`: what the orchestrator hands back. Some are fatal (mapping, transport,
//!   source), some are "you asked for something silly" (already running, unknown slug).
//! - `EngineError`: one failed conversation with the search engine.
//! - `StoreError`: the progress store had a bad day, or someone else owns the run.
//! - `SerializeError`: one object could not become a document. Counted as skipped, never fatal.
//! - `ProtocolError`: the client side of the progress protocol, including the 403 dance.
//!
//! Glue code (config, CLI) stays on `anyhow`. These enums exist where callers branch on the kind.

use thiserror::Error;

/// 🚦 Everything the orchestrator can refuse to do, or fail to finish.
#[derive(Debug, Error)]
pub enum SyncError {
    /// 🔒 Somebody already holds the checkpoint for this scope.
    #[error("💀 a sync is already running for scope '{scope}' (driven by {method}). Stop it, or start with restart=true")]
    AlreadyRunning { scope: String, method: String },

    /// 🤷 Pause/resume/stop without a checkpoint to act on.
    #[error("💤 no sync is in progress for scope '{0}'")]
    NotRunning(String),

    /// 🏷️ A slug nobody registered.
    #[error("💀 unknown indexable '{0}'. Registered indexables are the only ones we know how to walk")]
    UnknownIndexable(String),

    /// 🗺️ Mapping creation was rejected. Always fatal.
    #[error("💀 mapping creation failed for index '{index}': {reason}. Fix the mapping or the cluster, then run a fresh sync with put_mapping")]
    Mapping { index: String, reason: String },

    /// 📡 The bulk endpoint stayed unreachable after every retry.
    #[error("💀 bulk indexing into '{index}' failed after {attempts} attempt(s): {reason}. Check that the search engine is reachable, then re-run the sync")]
    Transport {
        index: String,
        attempts: u32,
        reason: String,
    },

    /// 🚰 The content source could not enumerate objects.
    #[error("💀 content source for '{slug}' failed: {reason}")]
    Source { slug: String, reason: String },

    /// 🗄️ Progress store trouble.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// ☠️ Fatal errors end the run and delete the checkpoint.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Mapping { .. } | SyncError::Transport { .. } | SyncError::Source { .. }
        )
    }
}

/// 📡 One failed exchange with the search engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// 🔌 The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// 🧾 We got an answer. It was not a 2xx.
    #[error("search engine answered {status}: {body}")]
    Status { status: u16, body: String },

    /// 🧩 We got a 2xx with a body we could not read.
    #[error("malformed search engine response: {0}")]
    MalformedResponse(String),
}

impl EngineError {
    /// 🔁 Worth another try: the request never landed, or the engine said "not now".
    ///
    /// A 4xx is our fault and stays our fault. A malformed 2xx means the engine already
    /// applied the batch, so sending it again would double the work.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport(_) => true,
            EngineError::Status { status, .. } => *status == 429 || *status >= 500,
            EngineError::MalformedResponse(_) => false,
        }
    }
}

/// 🗄️ The progress store's list of grievances.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("💀 progress store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("💀 progress store holds unreadable JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 🔒 The stored checkpoint belongs to a different run, or is gone.
    #[error("🔒 checkpoint for scope '{scope}' is no longer owned by sync {sync_id}")]
    NotOwner { scope: String, sync_id: String },

    /// 🔒 Atomic claim lost: a checkpoint already exists.
    #[error("🔒 a checkpoint already exists for scope '{0}'")]
    AlreadyClaimed(String),
}

/// 🧪 Why one object could not be turned into a document.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SerializeError {
    #[error("source object {0} is missing or not a JSON object")]
    MissingSource(u64),

    #[error("stage '{stage}' rejected object {id}: {reason}")]
    Stage {
        stage: String,
        id: u64,
        reason: String,
    },
}

/// 🛰️ Client-side progress protocol failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// 🔑 Still 403 after one refresh. Surface it; do not loop.
    #[error("🔑 authorization token expired and a refreshed token was rejected too. Reload the page and sign in again")]
    TokenExpired,

    #[error("📡 progress endpoint unreachable: {0}")]
    Transport(String),

    #[error("📡 progress endpoint answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("🧩 could not decode progress response: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_only_the_scary_errors_are_fatal() {
        let mapping = SyncError::Mapping {
            index: "wp-post-1".into(),
            reason: "400".into(),
        };
        let transport = SyncError::Transport {
            index: "wp-post-1".into(),
            attempts: 3,
            reason: "connection refused".into(),
        };
        assert!(mapping.is_fatal());
        assert!(transport.is_fatal());
        assert!(!SyncError::NotRunning("site-1".into()).is_fatal());
        assert!(!SyncError::UnknownIndexable("comment".into()).is_fatal());
    }

    #[test]
    fn the_one_where_store_errors_keep_their_scope_in_the_message() {
        let err = SyncError::from(StoreError::AlreadyClaimed("network".into()));
        assert!(err.to_string().contains("network"));
    }
}
