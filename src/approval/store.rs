//! ActionStore trait: durable backing for the approval queue and history
//!
//! Two backends:
//! - `SledActionStore`: embedded sled database, one tree per collection
//! - `InMemoryActionStore`: for tests and dry runs
//!
//! Collections are rewritten whole on every save. Each tree is keyed by the
//! entry's position (big-endian u64) so iteration yields the saved order.

use crate::config::defaults::HISTORY_RETENTION;
use crate::types::{Action, ExecutionRecord};
use sled::Tree;
use std::path::Path;
use std::sync::RwLock;
use tracing::warn;

const QUEUE_TREE: &str = "queue";
const HISTORY_TREE: &str = "history";
const READY_TREE: &str = "ready";
const EXECUTIONS_TREE: &str = "executions";

/// Store errors. Callers log these and keep their in-memory state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable collections owned by the approval engine.
///
/// Implementations must be thread-safe; the HTTP surface never writes, but
/// the store handle is shared through `Arc`.
pub trait ActionStore: Send + Sync {
    /// Pending actions, in submission order
    fn load_queue(&self) -> Result<Vec<Action>, StoreError>;
    fn save_queue(&self, queue: &[Action]) -> Result<(), StoreError>;

    /// Resolved actions, oldest first
    fn load_history(&self) -> Result<Vec<Action>, StoreError>;
    fn save_history(&self, history: &[Action]) -> Result<(), StoreError>;

    /// Approved actions not yet handed to the executor
    fn load_ready(&self) -> Result<Vec<Action>, StoreError>;
    fn save_ready(&self, ready: &[Action]) -> Result<(), StoreError>;

    /// Append one executor result to the ledger, dropping the oldest
    /// records past `HISTORY_RETENTION`
    fn record_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// Most recent executor results, newest first
    fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// Sled backend
// ============================================================================

/// sled-backed store. Every save is flushed before returning.
///
/// The execution ledger is keyed by action id; ids share a fixed-width
/// millisecond suffix so key order follows submission order.
#[derive(Clone)]
pub struct SledActionStore {
    _db: sled::Db,
    queue: Tree,
    history: Tree,
    ready: Tree,
    executions: Tree,
}

impl SledActionStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            queue: db.open_tree(QUEUE_TREE)?,
            history: db.open_tree(HISTORY_TREE)?,
            ready: db.open_tree(READY_TREE)?,
            executions: db.open_tree(EXECUTIONS_TREE)?,
            _db: db,
        })
    }

    fn load(tree: &Tree) -> Result<Vec<Action>, StoreError> {
        let mut actions = Vec::with_capacity(tree.len());
        for item in tree.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<Action>(&value) {
                Ok(action) => actions.push(action),
                Err(e) => warn!(key = ?key, error = %e, "Skipping unreadable action record"),
            }
        }
        Ok(actions)
    }

    /// Replace the tree contents atomically, then flush.
    fn rewrite(tree: &Tree, actions: &[Action]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for key in tree.iter().keys() {
            batch.remove(key?);
        }
        for (idx, action) in actions.iter().enumerate() {
            let value = serde_json::to_vec(action)?;
            batch.insert((idx as u64).to_be_bytes().to_vec(), value);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }
}

impl ActionStore for SledActionStore {
    fn load_queue(&self) -> Result<Vec<Action>, StoreError> {
        Self::load(&self.queue)
    }

    fn save_queue(&self, queue: &[Action]) -> Result<(), StoreError> {
        Self::rewrite(&self.queue, queue)
    }

    fn load_history(&self) -> Result<Vec<Action>, StoreError> {
        Self::load(&self.history)
    }

    fn save_history(&self, history: &[Action]) -> Result<(), StoreError> {
        Self::rewrite(&self.history, history)
    }

    fn load_ready(&self) -> Result<Vec<Action>, StoreError> {
        Self::load(&self.ready)
    }

    fn save_ready(&self, ready: &[Action]) -> Result<(), StoreError> {
        Self::rewrite(&self.ready, ready)
    }

    fn record_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(record)?;
        self.executions.insert(record.action_id.as_bytes(), value)?;
        while self.executions.len() > HISTORY_RETENTION {
            if self.executions.pop_min()?.is_none() {
                break;
            }
        }
        self.executions.flush()?;
        Ok(())
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records = Vec::new();
        for item in self.executions.iter().rev() {
            if records.len() >= limit {
                break;
            }
            let (_, value) = item?;
            if let Ok(record) = serde_json::from_slice::<ExecutionRecord>(&value) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
struct Collections {
    queue: Vec<Action>,
    history: Vec<Action>,
    ready: Vec<Action>,
    executions: Vec<ExecutionRecord>,
}

/// In-memory store. Not durable: data is lost when dropped.
#[derive(Default)]
pub struct InMemoryActionStore {
    inner: RwLock<Collections>,
}

impl InMemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Collections) -> T) -> Result<T, StoreError> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&guard))
    }

    fn write(&self, f: impl FnOnce(&mut Collections)) -> Result<(), StoreError> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard);
        Ok(())
    }
}

impl ActionStore for InMemoryActionStore {
    fn load_queue(&self) -> Result<Vec<Action>, StoreError> {
        self.read(|c| c.queue.clone())
    }

    fn save_queue(&self, queue: &[Action]) -> Result<(), StoreError> {
        self.write(|c| c.queue = queue.to_vec())
    }

    fn load_history(&self) -> Result<Vec<Action>, StoreError> {
        self.read(|c| c.history.clone())
    }

    fn save_history(&self, history: &[Action]) -> Result<(), StoreError> {
        self.write(|c| c.history = history.to_vec())
    }

    fn load_ready(&self) -> Result<Vec<Action>, StoreError> {
        self.read(|c| c.ready.clone())
    }

    fn save_ready(&self, ready: &[Action]) -> Result<(), StoreError> {
        self.write(|c| c.ready = ready.to_vec())
    }

    fn record_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.write(|c| {
            c.executions.push(record.clone());
            let excess = c.executions.len().saturating_sub(HISTORY_RETENTION);
            c.executions.drain(..excess);
        })
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.read(|c| c.executions.iter().rev().take(limit).cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
