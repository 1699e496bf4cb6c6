//! The ambient "current trace" tag a ProtoSched-infected handler call
//! runs under, per the spec's instrumentation-contract design note:
//! "tag both messages and per-task context with the same trace
//! identifier; a task inherits infection when it is released by
//! ProtoSched; outbound sends read the current task tag and route
//! accordingly."
//!
//! Each component-runtime process owns one OS thread (see
//! [`crate::actor::spawn`]), so a thread-local is exactly the right
//! vehicle: it gives every send performed during an infected handler
//! call a way to see the trace it's running under without threading an
//! extra parameter through [`crate::actor::Handler::on`].

use std::cell::RefCell;

thread_local! {
    static CURRENT_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Mark the calling thread as infected by `trace` for whatever it does
/// until [`clear`] is called.
pub fn set(trace: &str) {
    CURRENT_TRACE.with(|c| *c.borrow_mut() = Some(trace.to_string()));
}

/// Clear the calling thread's infection.
pub fn clear() {
    CURRENT_TRACE.with(|c| *c.borrow_mut() = None);
}

/// The calling thread's current trace, if infected.
pub fn current() -> Option<String> {
    CURRENT_TRACE.with(|c| c.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_thread_is_not_infected() {
        assert_eq!(current(), None);
    }

    #[test]
    fn set_and_clear_round_trip() {
        set("t1");
        assert_eq!(current(), Some("t1".to_string()));
        clear();
        assert_eq!(current(), None);
    }
}
