//! Monitors between component-runtime processes.
//!
//! ProtoSched needs to know the instant a delivery's handler finishes, even
//! when the handler never calls `thread_end` (e.g. it crashes, or the
//! process exits for an unrelated reason). A monitor is the one-directional
//! primitive for that: the monitoring side gets a `Down` notification
//! carrying the monitored process's [`ExitReason`] exactly once.

use std::sync::atomic::{AtomicU64, Ordering};

use super::process::{ExitReason, ProcessId};

/// A monitor reference, unique per `monitor()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorRef(u64);

impl MonitorRef {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        MonitorRef(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Notification delivered to a monitor's owner when the monitored process
/// terminates.
#[derive(Debug, Clone)]
pub struct Down {
    pub monitor_ref: MonitorRef,
    pub pid: ProcessId,
    pub reason: ExitReason,
}

/// A registry of outstanding monitors for one process being watched by
/// others. Held by the runtime driver alongside a process's mailboxes;
/// `notify_down` is called exactly once, when the process exits.
#[derive(Debug, Default)]
pub struct MonitorSet {
    watchers: Vec<(MonitorRef, crossbeam_channel::Sender<Down>)>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new watcher, returning the reference it should match
    /// against incoming `Down` notifications.
    pub fn add(&mut self, on_down: crossbeam_channel::Sender<Down>) -> MonitorRef {
        let r = MonitorRef::next();
        self.watchers.push((r, on_down));
        r
    }

    pub fn remove(&mut self, r: MonitorRef) {
        self.watchers.retain(|(existing, _)| *existing != r);
    }

    /// Deliver a `Down` notification to every remaining watcher. Consumes
    /// the set since a process can only exit once.
    pub fn notify_all(self, pid: ProcessId, reason: ExitReason) {
        for (monitor_ref, tx) in self.watchers {
            let _ = tx.send(Down {
                monitor_ref,
                pid,
                reason: reason.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_all_reaches_every_watcher() {
        let mut set = MonitorSet::new();
        let (tx1, rx1) = crossbeam_channel::unbounded();
        let (tx2, rx2) = crossbeam_channel::unbounded();
        set.add(tx1);
        set.add(tx2);

        let pid = ProcessId::next();
        set.notify_all(pid, ExitReason::Normal);

        assert_eq!(rx1.recv().unwrap().pid, pid);
        assert_eq!(rx2.recv().unwrap().pid, pid);
    }

    #[test]
    fn removed_watcher_is_not_notified() {
        let mut set = MonitorSet::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let r = set.add(tx);
        set.remove(r);

        set.notify_all(ProcessId::next(), ExitReason::Normal);
        assert!(rx.try_recv().is_err());
    }
}
