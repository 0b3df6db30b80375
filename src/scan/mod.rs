//! Library scanning: directory walks, identification and catalog inserts.

mod coordinator;
mod gate;

pub use coordinator::{
    IdentifyFailure, ScanCoordinator, ScanOutcome, ScanReport, DEFAULT_GAME_EXTENSIONS,
};
pub use gate::{ScanGate, ScanPermit};
