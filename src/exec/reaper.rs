//! Orphan tracking for agent process groups.
//!
//! Every spawned agent leads its own process group. The group id is recorded
//! here for as long as the executor is waiting on it; [`reap_all`] runs at
//! shutdown and kills whatever is still registered.

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

static LIVE_GROUPS: LazyLock<Mutex<HashSet<u32>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

fn live_groups() -> MutexGuard<'static, HashSet<u32>> {
    LIVE_GROUPS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Signals sent to a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    Terminate,
    Kill,
}

/// Registration of one live process group; deregisters on drop.
///
/// A guard dropped while still armed kills the whole group first, so an
/// execution abandoned mid-run (its task aborted) takes its descendants
/// with it.
#[derive(Debug)]
#[must_use = "the process is untracked as soon as the guard drops"]
pub struct Tracked {
    pid: u32,
    armed: bool,
}

impl Tracked {
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// The run reached a terminal state; dropping no longer signals.
    pub const fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        if self.armed {
            debug!(pid = self.pid, "execution abandoned, killing process group");
            signal_group(self.pid, GroupSignal::Kill);
        }
        live_groups().remove(&self.pid);
    }
}

/// Register `pid` (also its process group id) until the guard drops.
pub fn track(pid: u32) -> Tracked {
    live_groups().insert(pid);
    Tracked { pid, armed: true }
}

/// Process groups currently registered.
pub fn tracked_count() -> usize {
    live_groups().len()
}

pub fn is_tracked(pid: u32) -> bool {
    live_groups().contains(&pid)
}

/// Kill every registered process group. Returns how many were signalled.
pub fn reap_all() -> usize {
    let pids: Vec<u32> = live_groups().drain().collect();
    for pid in &pids {
        warn!(pid, "killing orphaned agent process group");
        signal_group(*pid, GroupSignal::Kill);
    }
    pids.len()
}

/// Send `signal` to the process group led by `pid`. A group that is already
/// gone is not an error.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: GroupSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let sig = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), sig) {
        Ok(()) => debug!(pid, signal = %sig, "signalled process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, signal = %sig, error = %e, "failed to signal process group"),
    }
}

/// Process groups are a unix concept; callers also kill the direct child.
#[cfg(not(unix))]
pub fn signal_group(pid: u32, signal: GroupSignal) {
    debug!(pid, ?signal, "process-group signalling unsupported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    // Above the kernel pid_max ceiling, so never a live process.
    const FAKE_PID: u32 = 4_194_400;

    #[test]
    fn test_guard_deregisters_on_drop() {
        let mut guard = track(FAKE_PID);
        assert!(is_tracked(FAKE_PID));
        guard.disarm();
        assert_eq!(guard.pid(), FAKE_PID);
        drop(guard);
        assert!(!is_tracked(FAKE_PID));
    }

    #[test]
    fn test_concurrent_registration() {
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                std::thread::spawn(move || {
                    let pid = FAKE_PID + 10 + i;
                    let guard = track(pid);
                    assert!(is_tracked(pid));
                    // Armed: dropping signals a group that does not exist.
                    drop(guard);
                    assert!(!is_tracked(pid));
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
    }

    #[test]
    fn test_signalling_missing_group_is_quiet() {
        signal_group(FAKE_PID + 100, GroupSignal::Kill);
    }
}
