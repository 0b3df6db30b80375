//! Single logical writer over the catalog.
//!
//! Scans, watch batches, organize and dedup all mutate the catalog. They take the
//! writer lock for the duration of their mutation phase so their effects never
//! interleave. Every released guard bumps a generation counter that derived views
//! use to detect staleness.

use super::trait_def::CatalogStore;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct CatalogWriter {
    store: Arc<dyn CatalogStore>,
    lock: Mutex<()>,
    generation: AtomicU64,
}

pub struct WriteGuard<'a> {
    writer: &'a CatalogWriter,
    _guard: MutexGuard<'a, ()>,
}

impl CatalogWriter {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Blocks until no other writer holds the catalog.
    pub fn lock(&self) -> WriteGuard<'_> {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        WriteGuard {
            writer: self,
            _guard: guard,
        }
    }

    /// Read handle. Reads do not take the writer lock.
    pub fn reader(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    /// Number of write sessions completed so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Deref for WriteGuard<'_> {
    type Target = dyn CatalogStore;

    fn deref(&self) -> &Self::Target {
        self.writer.store.as_ref()
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.writer.generation.fetch_add(1, Ordering::AcqRel);
    }
}
