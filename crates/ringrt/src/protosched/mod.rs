//! ProtoSched: a deterministic, exploratory message interleaver.

pub mod bridge;
pub mod scheduler;
pub mod trace;

pub use bridge::{pump_one, route_send, Instrumented};
pub use scheduler::{default_trace, DeliveryStep, ProtoSched, TraceId};
pub use trace::{Channel, DeliveredRecord, TraceInfos, TraceState, TraceStatus};
