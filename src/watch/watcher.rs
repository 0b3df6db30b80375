//! Filesystem watcher producing [`WatchEvent`] batches for library roots.

use super::events::WatchEvent;
use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct LibraryWatcher {
    rx: mpsc::Receiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl LibraryWatcher {
    /// Start watching every existing root recursively.
    pub fn new(roots: &[PathBuf]) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(tx).context("Failed to create library watcher")?;

        let mut watched = Vec::new();
        for root in roots {
            if !root.is_dir() {
                warn!("Not watching {:?}: not a directory", root);
                continue;
            }
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch library: {}", root.display()))?;
            info!("Watching library {:?}", root);
            watched.push(root.clone());
        }

        Ok(Self {
            rx,
            _watcher: watcher,
            roots: watched,
        })
    }

    /// Block until at least one relevant change arrives, then keep collecting
    /// until `gather` has passed. Returns `None` once the watcher has shut down.
    pub fn next_batch(&self, gather: Duration) -> Option<Vec<WatchEvent>> {
        let mut batch = Vec::new();
        loop {
            let event = self.rx.recv().ok()?;
            self.push_event(event, &mut batch);
            if !batch.is_empty() {
                break;
            }
        }

        let deadline = Instant::now() + gather;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.rx.recv_timeout(remaining) {
                Ok(event) => self.push_event(event, &mut batch),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        Some(batch)
    }

    fn push_event(&self, event: notify::Result<Event>, batch: &mut Vec<WatchEvent>) {
        match event {
            Ok(event) => batch.extend(convert_event(&self.roots, &event)),
            Err(e) => warn!("Watch error: {}", e),
        }
    }
}

fn library_for<'a>(roots: &'a [PathBuf], path: &Path) -> Option<&'a PathBuf> {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
}

/// Translate a raw notification into library events. Paths outside every root
/// are dropped.
pub fn convert_event(roots: &[PathBuf], event: &Event) -> Vec<WatchEvent> {
    let single = |make: fn(PathBuf, PathBuf) -> WatchEvent| -> Vec<WatchEvent> {
        event
            .paths
            .iter()
            .filter_map(|path| {
                library_for(roots, path).map(|library| make(library.clone(), path.clone()))
            })
            .collect()
    };
    let created = |library: PathBuf, path: PathBuf| WatchEvent::Created { library, path };
    let deleted = |library: PathBuf, path: PathBuf| WatchEvent::Deleted { library, path };
    let modified = |library: PathBuf, path: PathBuf| WatchEvent::Modified { library, path };

    match &event.kind {
        EventKind::Create(_) => single(created),
        EventKind::Remove(_) => single(deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let (from, to) = (&event.paths[0], &event.paths[1]);
            match (library_for(roots, from), library_for(roots, to)) {
                (_, Some(library)) => vec![WatchEvent::Moved {
                    library: library.clone(),
                    from: from.clone(),
                    to: to.clone(),
                }],
                (Some(library), None) => vec![WatchEvent::Deleted {
                    library: library.clone(),
                    path: from.clone(),
                }],
                (None, None) => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => single(deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => single(created),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => single(modified),
        _ => Vec::new(),
    }
}
