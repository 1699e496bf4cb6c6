//! Ring overlay runtime: 128-bit identifier arithmetic, gossip-driven ring
//! maintenance (RM-TMan), and a deterministic protocol scheduler
//! (ProtoSched), built over a small component-runtime/messaging substrate.
//!
//! ## Modules
//!
//! - [`id`]: modular key-space arithmetic and ring intervals.
//! - [`neighborhood`]: a node's ordered predecessor/successor view.
//! - [`peer_source`]: the random-peer-cache collaborator trait.
//! - [`actor`]: the component runtime each process runs on (mailboxes,
//!   the driver loop, monitors, breakpoints).
//! - [`messaging`]: process-addressed send over the component runtime.
//! - [`rm`]: RM-TMan, the ring-maintenance protocol.
//! - [`protosched`]: the deterministic message interleaver.
//! - [`infection`]: the ambient trace tag ProtoSched infection rides on.
//! - [`config`]: validated runtime configuration.
//! - [`error`]: per-subsystem error types.

pub mod actor;
pub mod config;
pub mod error;
pub mod id;
pub(crate) mod infection;
pub mod messaging;
pub mod neighborhood;
pub mod peer_source;
pub mod protosched;
pub mod rm;

pub use config::RingConfig;
pub use id::{Interval, Key};
