use super::generator::LibraryViewEntry;
use std::sync::{Arc, Mutex, PoisonError};

/// Last generated library view, tagged with the catalog generation it was built from.
#[derive(Default)]
pub struct ViewCache {
    cached: Mutex<Option<(u64, Arc<Vec<LibraryViewEntry>>)>>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached view if it was built at `generation`.
    pub fn get(&self, generation: u64) -> Option<Arc<Vec<LibraryViewEntry>>> {
        let cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            Some((built_at, view)) if *built_at == generation => Some(view.clone()),
            _ => None,
        }
    }

    pub fn store(&self, generation: u64, view: Vec<LibraryViewEntry>) -> Arc<Vec<LibraryViewEntry>> {
        let view = Arc::new(view);
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((generation, view.clone()));
        view
    }

    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
