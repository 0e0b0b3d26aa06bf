//! Snapshot publication with a single-flight rebuild guard.

use crate::db::Database;
use crate::error::Result;
use crate::types::CallIndex;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Holds the current [`CallIndex`].
///
/// Readers load the current `Arc` without locking. Rebuilds are serialized
/// by an internal mutex; a new snapshot is persisted (when a database is
/// attached) and only then published, so readers never observe a partial
/// index and the database never lags the published snapshot.
pub struct IndexStore {
    current: ArcSwap<CallIndex>,
    rebuild_lock: Mutex<()>,
    generation: AtomicU64,
    db: Option<Database>,
}

impl IndexStore {
    /// A store without persistence, starting from an empty snapshot.
    pub fn in_memory() -> Self {
        Self {
            current: ArcSwap::new(Arc::new(CallIndex::empty())),
            rebuild_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            db: None,
        }
    }

    /// A store backed by `db`, hydrated from its last persisted snapshot.
    pub fn open(db: Database) -> Result<Self> {
        db.migrate()?;
        let initial = db.load_index()?.unwrap_or_else(CallIndex::empty);

        tracing::info!(
            dialogs = initial.dialogs.len(),
            source_capture = %initial.source_capture,
            "Index store opened"
        );

        Ok(Self {
            current: ArcSwap::new(Arc::new(initial)),
            rebuild_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            db: Some(db),
        })
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<CallIndex> {
        self.current.load_full()
    }

    /// Number of snapshots published by this store since it was created.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run `build` and publish its result as the new snapshot.
    ///
    /// Concurrent callers queue behind each other. If `build` or the
    /// persistence step fails, the previous snapshot stays published.
    pub fn rebuild_with<F>(&self, build: F) -> Result<Arc<CallIndex>>
    where
        F: FnOnce() -> Result<CallIndex>,
    {
        let _guard = self
            .rebuild_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let index = Arc::new(build()?);
        if let Some(db) = &self.db {
            db.replace_index(&index)?;
        }

        self.current.store(Arc::clone(&index));
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(index)
    }
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
