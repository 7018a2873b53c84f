use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Best-effort peak resident memory of this process, in bytes.
///
/// Each sample refreshes the current process and folds its resident size
/// into a running maximum, so the reported value never decreases.
pub struct MemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    peak: AtomicU64,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            peak: AtomicU64::new(0),
        }
    }

    pub fn sample(&self) -> u64 {
        let current = self.pid.map_or(0, |pid| {
            let mut system = self.system.lock();
            if system.refresh_process(pid) {
                system.process(pid).map_or(0, |p| p.memory())
            } else {
                0
            }
        });
        self.peak.fetch_max(current, Ordering::Relaxed).max(current)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}
