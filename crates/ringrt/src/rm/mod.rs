//! RM-TMan: gossip-driven ring maintenance.

pub mod handler;
pub mod state;

pub use handler::{initial_remove_pred, NullZombieSink, RmHandler, RmMsg, ZombieSink};
pub use state::{BufferPlan, RemovePredOutcome, RmDump, RmPhase, RmState, UpdateOutcome};
