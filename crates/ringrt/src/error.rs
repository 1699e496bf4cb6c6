//! Error types shared across the ring overlay core.
//!
//! Each subsystem gets its own enum rather than a single catch-all error,
//! mirroring how lexer/parser errors are kept separate in a compiler
//! front end: callers that only care about one subsystem's failures don't
//! have to match on variants that can never occur for them.

use std::fmt;

/// Errors produced while constructing or loading a [`crate::config::RingConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A list-length bound (`pred_list_length`/`succ_list_length`) was zero.
    ZeroListLength(&'static str),
    /// `cyclon_cache_size` was below the minimum of 3.
    CacheTooSmall(u32),
    /// `stabilization_interval_base` was zero.
    ZeroStabilizationInterval,
    /// The TOML document could not be parsed or was missing a required key.
    Malformed(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroListLength(which) => write!(f, "{which} must be >= 1"),
            Self::CacheTooSmall(n) => write!(f, "cyclon_cache_size must be >= 3, got {n}"),
            Self::ZeroStabilizationInterval => {
                write!(f, "stabilization_interval_base must be > 0")
            }
            Self::Malformed(msg) => write!(f, "malformed configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors surfaced by the component runtime.
///
/// Per the spec, unknown events and handler panics are logged and do not
/// tear down the process -- these variants exist for observability (e.g.
/// a test harness asserting on what was logged) rather than as fatal
/// conditions a caller must react to.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    /// A handler returned `Next::Unknown` for a message it did not recognize.
    UnknownEvent(String),
    /// A handler panicked; the payload is the panic message, if recoverable.
    HandlerPanicked(String),
    /// `get_state`/`get_component_state` timed out waiting for a reply.
    StateQueryTimedOut,
    /// The target process no longer exists (mailbox closed).
    ProcessGone,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEvent(tag) => write!(f, "unknown event: {tag}"),
            Self::HandlerPanicked(msg) => write!(f, "handler panicked: {msg}"),
            Self::StateQueryTimedOut => write!(f, "state query timed out"),
            Self::ProcessGone => write!(f, "target process is gone"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Errors surfaced by [`crate::protosched`] for caller misuse.
///
/// These never corrupt trace state -- the operation that would misuse the
/// trace is rejected up front and the trace is left exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// `thread_num` was called twice for the same trace.
    ThreadNumCalledTwice,
    /// `thread_begin` was called after the trace already started running.
    ThreadBeginAfterRunning,
    /// `cleanup` was called from a thread that is itself infected.
    CleanupWhileInfected,
    /// `wait_for_end` was called from a thread that is itself infected.
    WaitWhileInfected,
    /// The named trace has no state (never registered, or already cleaned up).
    TraceNotFound,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadNumCalledTwice => write!(f, "thread_num called twice for this trace"),
            Self::ThreadBeginAfterRunning => {
                write!(f, "thread_begin called after the trace started running")
            }
            Self::CleanupWhileInfected => write!(f, "cleanup called from an infected thread"),
            Self::WaitWhileInfected => write!(f, "wait_for_end called from an infected thread"),
            Self::TraceNotFound => write!(f, "trace not found"),
        }
    }
}

impl std::error::Error for SchedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::CacheTooSmall(2);
        assert_eq!(err.to_string(), "cyclon_cache_size must be >= 3, got 2");
    }

    #[test]
    fn sched_error_display_all_variants() {
        assert_eq!(
            SchedError::ThreadNumCalledTwice.to_string(),
            "thread_num called twice for this trace"
        );
        assert_eq!(
            SchedError::TraceNotFound.to_string(),
            "trace not found"
        );
    }

    #[test]
    fn runtime_error_display() {
        let err = RuntimeError::UnknownEvent("ping".into());
        assert_eq!(err.to_string(), "unknown event: ping");
    }
}
