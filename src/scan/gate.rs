use std::sync::{Arc, Mutex, PoisonError};

/// Fail-fast gate allowing at most one scan in flight.
#[derive(Debug, Default, Clone)]
pub struct ScanGate {
    in_progress: Arc<Mutex<bool>>,
}

/// Held for the duration of a scan. Dropping it reopens the gate, including
/// when the scan unwinds.
#[derive(Debug)]
pub struct ScanPermit {
    in_progress: Arc<Mutex<bool>>,
}

impl ScanGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` immediately if another scan holds the gate.
    pub fn try_begin(&self) -> Option<ScanPermit> {
        let mut in_progress = self
            .in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *in_progress {
            return None;
        }
        *in_progress = true;
        Some(ScanPermit {
            in_progress: self.in_progress.clone(),
        })
    }

    pub fn is_scanning(&self) -> bool {
        *self
            .in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ScanPermit {
    fn drop(&mut self) {
        *self
            .in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_second_scan_is_rejected() {
        let gate = ScanGate::new();
        let permit = gate.try_begin().unwrap();
        assert!(gate.is_scanning());
        assert!(gate.try_begin().is_none());
        drop(permit);
        assert!(!gate.is_scanning());
        assert!(gate.try_begin().is_some());
    }

    #[test]
    fn test_gate_reopens_after_panic() {
        let gate = ScanGate::new();
        let other = gate.clone();
        let result = thread::spawn(move || {
            let _permit = other.try_begin().unwrap();
            panic!("scan blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!gate.is_scanning());
        assert!(gate.try_begin().is_some());
    }
}
