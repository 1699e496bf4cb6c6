//! Wires [`RmState`] into the component runtime: translates `RmMsg`
//! deliveries into state-transition calls and performs the resulting IO
//! (gossip sends, peer-source requests, probes) against a [`MessageBus`].

use std::sync::Arc;

use crate::actor::{Handler, Next, Tagged};
use crate::messaging::MessageBus;
use crate::neighborhood::{NeighborhoodView, NodeDescriptor, ProcessAddress};
use crate::peer_source::PeerSource;

use super::state::{RemovePredOutcome, RmState};

/// Bound on the predecessor-removal retry loop (see design notes:
/// "bound the loop by a small constant and fall back to best-effort").
const MAX_REMOVE_PRED_RETRIES: u32 = 3;

/// RM-TMan's wire vocabulary, per the spec's external-interfaces section.
#[derive(Debug, Clone)]
pub enum RmMsg<A: ProcessAddress> {
    Trigger,
    CacheResponse(Vec<NodeDescriptor<A>>),
    Buffer {
        from: NodeDescriptor<A>,
        other_nbh: NeighborhoodView<A>,
        req_preds_min: usize,
        req_succs_min: usize,
    },
    BufferResponse {
        from: NodeDescriptor<A>,
        other_nbh: NeighborhoodView<A>,
    },
    GetNodeDetails {
        asker: A,
    },
    GetNodeDetailsResponse {
        node: NodeDescriptor<A>,
        is_leaving: bool,
    },
    NewPred(NodeDescriptor<A>),
    NewSucc(NodeDescriptor<A>),
    RemovePred {
        old: NodeDescriptor<A>,
        pred_of_old: NodeDescriptor<A>,
        retries_left: u32,
    },
    RemoveSucc {
        old: NodeDescriptor<A>,
        succ_of_old: NodeDescriptor<A>,
    },
    UpdateNode(NodeDescriptor<A>),
    CrashedNode(A),
    ZombieNode(NodeDescriptor<A>),
}

impl<A: ProcessAddress> Tagged for RmMsg<A> {
    fn tag(&self) -> &'static str {
        match self {
            RmMsg::Trigger => "rm_trigger",
            RmMsg::CacheResponse(_) => "cache_response",
            RmMsg::Buffer { .. } => "buffer",
            RmMsg::BufferResponse { .. } => "buffer_response",
            RmMsg::GetNodeDetails { .. } => "get_node_details",
            RmMsg::GetNodeDetailsResponse { .. } => "get_node_details_response",
            RmMsg::NewPred(_) => "new_pred",
            RmMsg::NewSucc(_) => "new_succ",
            RmMsg::RemovePred { .. } => "remove_pred",
            RmMsg::RemoveSucc { .. } => "remove_succ",
            RmMsg::UpdateNode(_) => "update_node",
            RmMsg::CrashedNode(_) => "crashed_node",
            RmMsg::ZombieNode(_) => "zombie_node",
        }
    }
}

/// A process's zombie-candidate sink -- an external collaborator per the
/// spec ("enqueues the removed entry into an external suspicion list").
pub trait ZombieSink<A: ProcessAddress>: Send + Sync {
    fn suspect(&self, node: &NodeDescriptor<A>);
}

pub struct NullZombieSink;
impl<A: ProcessAddress> ZombieSink<A> for NullZombieSink {
    fn suspect(&self, _node: &NodeDescriptor<A>) {}
}

/// The `Handler` implementation that drives one RM-TMan node.
pub struct RmHandler<A: ProcessAddress> {
    bus: Arc<MessageBus<A, RmState<A>, RmMsg<A>>>,
    peers: Arc<dyn PeerSource<A>>,
    zombies: Arc<dyn ZombieSink<A>>,
}

impl<A: ProcessAddress> RmHandler<A> {
    pub fn new(
        bus: Arc<MessageBus<A, RmState<A>, RmMsg<A>>>,
        peers: Arc<dyn PeerSource<A>>,
        zombies: Arc<dyn ZombieSink<A>>,
    ) -> Self {
        RmHandler { bus, peers, zombies }
    }

    fn run_periodic_action(&self, state: &mut RmState<A>) {
        let random_view = self.random_view_snapshot(state);
        for plan in state.periodic_action(random_view) {
            self.bus.send(
                plan.to,
                RmMsg::Buffer {
                    from: state.nbh.me,
                    other_nbh: state.nbh.view(),
                    req_preds_min: plan.req_preds_min,
                    req_succs_min: plan.req_succs_min,
                },
            );
        }
    }

    fn random_view_snapshot(&self, state: &RmState<A>) -> Vec<NodeDescriptor<A>> {
        let mut out = Vec::new();
        self.peers.request(state.rand_view_size.max(1) as usize, &mut |v| out = v);
        out
    }

    /// Issue `get_node_details` probes for every newly-appeared candidate
    /// surfaced by `trigger_update`.
    fn probe_new_peers(&self, state: &RmState<A>, candidates: Vec<NodeDescriptor<A>>) {
        for c in candidates {
            self.bus.send(c.addr, RmMsg::GetNodeDetails { asker: state.nbh.me.addr });
        }
    }
}

impl<A: ProcessAddress> Handler<RmState<A>, RmMsg<A>> for RmHandler<A> {
    fn on(&mut self, msg: RmMsg<A>, mut state: RmState<A>) -> Next<RmState<A>, RmMsg<A>> {
        match msg {
            RmMsg::Trigger => {
                self.run_periodic_action(&mut state);
                Next::Continue(state)
            }

            RmMsg::CacheResponse(view) => {
                let new_peers = state.trigger_update(&[], &view, None);
                self.probe_new_peers(&state, new_peers);
                Next::Continue(state)
            }

            RmMsg::Buffer {
                from,
                other_nbh,
                req_preds_min,
                req_succs_min,
            } => {
                let reply = state.build_buffer_reply(from, &other_nbh, req_preds_min, req_succs_min);
                self.bus.send(
                    from.addr,
                    RmMsg::BufferResponse {
                        from: state.nbh.me,
                        other_nbh: reply,
                    },
                );
                let new_peers = state.trigger_update(&other_nbh.all_descriptors(), &[], Some(&other_nbh));
                self.probe_new_peers(&state, new_peers);
                Next::Continue(state)
            }

            RmMsg::BufferResponse { other_nbh, .. } => {
                let new_peers =
                    state.trigger_update(&other_nbh.all_descriptors(), &[], Some(&other_nbh));
                self.probe_new_peers(&state, new_peers);
                Next::Continue(state)
            }

            RmMsg::GetNodeDetails { asker } => {
                self.bus.send(
                    asker,
                    RmMsg::GetNodeDetailsResponse {
                        node: state.nbh.me,
                        is_leaving: false,
                    },
                );
                Next::Continue(state)
            }

            RmMsg::GetNodeDetailsResponse { node, is_leaving } => {
                if !is_leaving {
                    let outcome = state.update_nodes(vec![node], &[], |_| {});
                    if outcome.pred_changed || outcome.succ_changed {
                        self.run_periodic_action(&mut state);
                    }
                }
                Next::Continue(state)
            }

            RmMsg::NewPred(_) | RmMsg::NewSucc(_) => {
                self.run_periodic_action(&mut state);
                Next::Continue(state)
            }

            RmMsg::RemovePred {
                old,
                pred_of_old,
                retries_left,
            } => {
                match state.remove_pred(old, pred_of_old) {
                    RemovePredOutcome::Done => {}
                    RemovePredOutcome::NeedsProbe(Some(candidate)) if retries_left > 0 => {
                        self.bus.send(
                            candidate.addr,
                            RmMsg::GetNodeDetails { asker: state.nbh.me.addr },
                        );
                        self.bus.send(
                            state.nbh.me.addr,
                            RmMsg::RemovePred {
                                old,
                                pred_of_old,
                                retries_left: retries_left - 1,
                            },
                        );
                    }
                    RemovePredOutcome::NeedsProbe(_) => {
                        tracing::warn!("remove_pred retries exhausted, falling back to ordinary gossip");
                    }
                }
                Next::Continue(state)
            }

            RmMsg::RemoveSucc { old, succ_of_old } => {
                state.remove_succ(old, succ_of_old);
                Next::Continue(state)
            }

            RmMsg::UpdateNode(new_me) => {
                state.nbh.me = new_me;
                Next::Continue(state)
            }

            RmMsg::CrashedNode(addr) => {
                let zombies = Arc::clone(&self.zombies);
                state.update_nodes(vec![], &[addr], |d| zombies.suspect(d));
                Next::Continue(state)
            }

            RmMsg::ZombieNode(n) => {
                state.update_nodes(vec![n], &[], |_| {});
                Next::Continue(state)
            }
        }
    }
}

/// Kick off a `remove_pred` retry chain bounded by [`MAX_REMOVE_PRED_RETRIES`].
pub fn initial_remove_pred<A: ProcessAddress>(
    old: NodeDescriptor<A>,
    pred_of_old: NodeDescriptor<A>,
) -> RmMsg<A> {
    RmMsg::RemovePred {
        old,
        pred_of_old,
        retries_left: MAX_REMOVE_PRED_RETRIES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Key;
    use crate::neighborhood::NodeDescriptor;

    type Addr = u32;

    fn desc(addr: Addr, id: u128) -> NodeDescriptor<Addr> {
        NodeDescriptor::new(addr, Key(id), 0, 0)
    }

    #[test]
    fn probe_response_admits_non_leaving_node() {
        let bus: Arc<MessageBus<Addr, RmState<Addr>, RmMsg<Addr>>> = Arc::new(MessageBus::new());
        let peers = Arc::new(crate::peer_source::CyclonCacheStub::new(Vec::new()));
        let mut handler = RmHandler::new(bus, peers, Arc::new(NullZombieSink));
        let state = RmState::new(desc(0, 0), 4, 4, 8);

        let next = handler.on(
            RmMsg::GetNodeDetailsResponse {
                node: desc(1, 100),
                is_leaving: false,
            },
            state,
        );
        match next {
            Next::Continue(s) => assert!(s.nbh.succs().iter().any(|d| d.addr == 1)),
            _ => panic!("expected Continue"),
        }
    }

    #[test]
    fn probe_response_drops_leaving_node() {
        let bus: Arc<MessageBus<Addr, RmState<Addr>, RmMsg<Addr>>> = Arc::new(MessageBus::new());
        let peers = Arc::new(crate::peer_source::CyclonCacheStub::new(Vec::new()));
        let mut handler = RmHandler::new(bus, peers, Arc::new(NullZombieSink));
        let state = RmState::new(desc(0, 0), 4, 4, 8);

        let next = handler.on(
            RmMsg::GetNodeDetailsResponse {
                node: desc(1, 100),
                is_leaving: true,
            },
            state,
        );
        match next {
            Next::Continue(s) => assert!(!s.nbh.succs().iter().any(|d| d.addr == 1)),
            _ => panic!("expected Continue"),
        }
    }

    #[test]
    fn get_node_details_replies_with_own_descriptor() {
        let bus: Arc<MessageBus<Addr, RmState<Addr>, RmMsg<Addr>>> = Arc::new(MessageBus::new());
        let peers = Arc::new(crate::peer_source::CyclonCacheStub::new(Vec::new()));
        let mut handler = RmHandler::new(Arc::clone(&bus), peers, Arc::new(NullZombieSink));
        let state = RmState::new(desc(0, 0), 4, 4, 8);

        bus.register(0, Arc::new(crate::actor::Mailbox::new()));
        let mb: Arc<crate::actor::Mailbox<crate::actor::Envelope<RmState<Addr>, RmMsg<Addr>>>> =
            Arc::new(crate::actor::Mailbox::new());
        bus.register(42, mb.clone());

        let _ = handler.on(RmMsg::GetNodeDetails { asker: 42 }, state);
        match mb.pop() {
            Some(crate::actor::Envelope::User(RmMsg::GetNodeDetailsResponse { node, is_leaving })) => {
                assert_eq!(node.addr, 0);
                assert!(!is_leaving);
            }
            _ => panic!("expected a GetNodeDetailsResponse"),
        }
    }
}
