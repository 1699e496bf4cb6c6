//! The component-runtime primitives each process in the overlay is built
//! from: identity ([`process`]), mailboxes ([`mailbox`]), monitors
//! ([`link`]), and the driver loop itself ([`runtime`]).
//!
//! RM-TMan's node and ProtoSched's scheduler are each one of these
//! processes with a domain-specific `Handler` plugged in.

pub mod link;
pub mod mailbox;
pub mod process;
pub mod runtime;

pub use link::{Down, MonitorRef, MonitorSet};
pub use mailbox::Mailbox;
pub use process::{ExitReason, ProcessId, ProcessLinks, ProcessState};
pub use runtime::{
    spawn, BpControl, BreakpointMatch, ControlTag, Envelope, Handler, Next, ProcessHandle, Tagged,
};
