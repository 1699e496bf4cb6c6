//! Process identity and control-block state for the component runtime.
//!
//! Each logical process (an RM-TMan node, a ProtoSched-instrumented
//! participant, ...) is a [`ProcessId`] plus a small bundle of scheduling
//! metadata: links, monitors, and exit state. The actual message loop
//! lives in [`super::runtime`]; this module only holds the bookkeeping a
//! loop needs to support links/monitors and breakpoints.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use super::link::MonitorSet;

/// Unique identifier for a logical process.
///
/// Assigned sequentially from a global atomic counter, guaranteeing
/// uniqueness within a single runtime instance (a single node's process
/// table, not across the overlay -- remote identity is carried by the
/// node descriptor's process-address, see [`crate::neighborhood`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Generate a fresh, globally unique local PID.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        ProcessId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// The execution state of a process, exposed for introspection
/// (`get_state`/`get_component_state`) and the breakpoint discipline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Draining its ordinary mailbox.
    Running,
    /// Blocked on an empty mailbox, or paused behind an active breakpoint.
    Waiting,
    /// Terminated with the given reason.
    Exited(ExitReason),
}

/// Why a process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The handler returned `Next::Kill`, or the loop exited cleanly.
    Normal,
    /// Clean, externally requested shutdown.
    Shutdown,
    /// A handler panicked and the loop chose to stop rather than retry.
    Error(String),
    /// A linked process exited, propagating its reason.
    Linked(ProcessId, Box<ExitReason>),
    /// The node/connection carrying this process was lost; the remote
    /// process may still be alive elsewhere.
    Noconnection,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::Error(e) => write!(f, "error: {e}"),
            ExitReason::Linked(pid, reason) => write!(f, "linked({pid}, {reason})"),
            ExitReason::Noconnection => write!(f, "noconnection"),
        }
    }
}

/// Per-process bookkeeping shared by the runtime driver: links (bidirectional
/// exit propagation) and the set of outstanding monitors watching this
/// process for `DOWN`, the primitive ProtoSched uses to detect a crashed
/// delivery target and cancel the in-flight delivery.
#[derive(Debug, Default)]
pub struct ProcessLinks {
    pub links: HashSet<ProcessId>,
    pub monitors: FxHashMap<u64, ProcessId>,
    pub down_watchers: MonitorSet,
    pub trap_exit: bool,
}

impl ProcessLinks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_unique() {
        let pids: Vec<ProcessId> = (0..100).map(|_| ProcessId::next()).collect();
        let mut seen = HashSet::new();
        for pid in &pids {
            assert!(seen.insert(pid.as_u64()));
        }
    }

    #[test]
    fn pid_display() {
        let pid = ProcessId::next();
        assert_eq!(format!("{pid}"), format!("<{}>", pid.as_u64()));
    }

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::Normal.to_string(), "normal");
        assert_eq!(ExitReason::Error("boom".into()).to_string(), "error: boom");
    }

    #[test]
    fn process_links_default_empty() {
        let links = ProcessLinks::new();
        assert!(links.links.is_empty());
        assert!(!links.trap_exit);
    }
}
