//! Incremental library maintenance driven by filesystem notifications.

mod aggregator;
mod debounce;
mod events;
mod watcher;

pub use aggregator::{BatchReport, ChangeAggregator};
pub use debounce::{spawn_debounce_loop, Clock, Debouncer, ManualClock, RefreshHook, SystemClock};
pub use events::WatchEvent;
pub use watcher::{convert_event, LibraryWatcher};
