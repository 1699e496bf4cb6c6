//! Process-addressed point-to-point messaging over the component runtime.
//!
//! A [`MessageBus`] is a registry mapping an address to a process's ordinary
//! mailbox. `send` is fire-and-forget; `send_shepherded` additionally calls
//! back on delivery failure (unknown destination), the substrate-level error
//! RM-TMan and ProtoSched both translate into their own recovery paths.
//!
//! The bus is generic over the address type so it can route by a node's
//! overlay-level address (RM-TMan's `A`) as well as by a local
//! [`crate::actor::ProcessId`] -- both are just `Eq + Hash + Copy` keys.

use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::actor::{Envelope, Mailbox, ProcessId};

/// Why a send could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// No process registered under that address (already exited, or
    /// never existed on this node).
    UnknownDestination,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::UnknownDestination => write!(f, "unknown destination process"),
        }
    }
}

impl std::error::Error for SendError {}

/// A registry of live mailboxes, one bus per component (each component runs
/// its own typed bus; ProtoSched sits in front of one when instrumenting a
/// trace).
pub struct MessageBus<Addr, S, M> {
    routes: RwLock<FxHashMap<Addr, Arc<Mailbox<Envelope<S, M>>>>>,
}

impl<Addr: Eq + Hash + Copy, S, M> MessageBus<Addr, S, M> {
    pub fn new() -> Self {
        MessageBus {
            routes: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn register(&self, addr: Addr, mailbox: Arc<Mailbox<Envelope<S, M>>>) {
        self.routes.write().insert(addr, mailbox);
    }

    pub fn unregister(&self, addr: Addr) {
        self.routes.write().remove(&addr);
    }

    /// Best-effort send: silently a no-op if the destination is unknown.
    /// Most RM-TMan gossip is fire-and-forget by design (the periodic
    /// tick will simply retry).
    pub fn send(&self, dst: Addr, msg: M) {
        if let Some(mb) = self.routes.read().get(&dst) {
            mb.push(Envelope::User(msg));
        }
    }

    /// Send with an explicit failure callback ("shepherd"), invoked
    /// synchronously when the destination is not registered.
    pub fn send_shepherded(&self, dst: Addr, msg: M, on_error: impl FnOnce(SendError)) {
        match self.routes.read().get(&dst) {
            Some(mb) => mb.push(Envelope::User(msg)),
            None => on_error(SendError::UnknownDestination),
        }
    }

    pub fn is_registered(&self, addr: Addr) -> bool {
        self.routes.read().contains_key(&addr)
    }

    /// Deliver `msg` infected by `trace`, with a shepherd invoked if the
    /// destination is not registered. ProtoSched uses this for the
    /// scheduling loop's "send the message infected to the destination
    /// with a delivery-error shepherd" step; `src` is the delivering
    /// process's own identity, carried in the infection envelope.
    pub fn send_infected_shepherded(
        &self,
        trace: &str,
        src: ProcessId,
        dst: Addr,
        msg: M,
        on_error: impl FnOnce(SendError),
    ) {
        match self.routes.read().get(&dst) {
            Some(mb) => mb.push(Envelope::Infected {
                trace: trace.to_string(),
                src,
                payload: msg,
            }),
            None => on_error(SendError::UnknownDestination),
        }
    }
}

impl<Addr: Eq + Hash + Copy, S, M> Default for MessageBus<Addr, S, M> {
    fn default() -> Self {
        Self::new()
    }
}
