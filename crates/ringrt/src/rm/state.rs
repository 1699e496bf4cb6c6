//! Pure RM-TMan state transitions, independent of messaging/IO so they can
//! be exercised directly by tests without spinning up a process.

use std::collections::HashSet;

use crate::id::Interval;
use crate::neighborhood::{Neighborhood, NeighborhoodView, NodeDescriptor, ProcessAddress};

/// `alone`/`integrated`, per the spec's ring-maintenance state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmPhase {
    /// No real predecessor or successor yet; the periodic trigger is
    /// quiescent and we wait for a joining peer to contact us.
    Alone,
    Integrated,
}

/// A gossip target chosen by the periodic action.
#[derive(Debug, Clone, Copy)]
pub struct BufferPlan<A: ProcessAddress> {
    pub to: A,
    pub req_preds_min: usize,
    pub req_succs_min: usize,
}

/// Outcome of [`RmState::update_nodes`]: which invariants changed, to
/// decide whether the caller should reset the random-view-size heuristic
/// or re-run the periodic action immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub churn: bool,
    pub pred_changed: bool,
    pub succ_changed: bool,
}

/// Result of a graceful-predecessor-removal step.
#[derive(Debug, Clone, Copy)]
pub enum RemovePredOutcome<A: ProcessAddress> {
    /// `pred_of_old` is now confirmed as the immediate predecessor.
    Done,
    /// The new immediate predecessor is not `pred_of_old`; it may be
    /// stale and should be probed before retrying the removal.
    NeedsProbe(Option<NodeDescriptor<A>>),
}

/// `(Neighborhood, randViewSize, randomPeerCache, churnFlag)` from the
/// spec's data model, plus the bounds needed to run the protocol.
#[derive(Clone)]
pub struct RmState<A: ProcessAddress> {
    pub nbh: Neighborhood<A>,
    pub rand_view_size: u32,
    pub random_peer_cache: Vec<NodeDescriptor<A>>,
    pub churn_flag: bool,
    max_cache_size: u32,
}

impl<A: ProcessAddress> RmState<A> {
    pub fn new(me: NodeDescriptor<A>, pred_bound: u32, succ_bound: u32, max_cache_size: u32) -> Self {
        RmState {
            nbh: Neighborhood::new(me, me, me, pred_bound as usize, succ_bound as usize),
            rand_view_size: 1,
            random_peer_cache: Vec::new(),
            churn_flag: false,
            max_cache_size,
        }
    }

    pub fn phase(&self) -> RmPhase {
        if self.nbh.has_real_pred() || self.nbh.has_real_succ() {
            RmPhase::Integrated
        } else {
            RmPhase::Alone
        }
    }

    /// Capability-set "dump" for `get_component_state` introspection (see
    /// the design notes' polymorphism-over-routing-table capability set).
    pub fn dump(&self) -> RmDump<A> {
        RmDump {
            phase: self.phase(),
            churn_flag: self.churn_flag,
            rand_view_size: self.rand_view_size,
            preds: self.nbh.preds().to_vec(),
            succs: self.nbh.succs().to_vec(),
        }
    }

    /// Step 1 of the periodic action: build up to `rand_view_size` peers
    /// from the cache (the caller already queried the peer source; this
    /// just bounds and stores it), then pick gossip targets.
    pub fn periodic_action(&mut self, random_view: Vec<NodeDescriptor<A>>) -> Vec<BufferPlan<A>> {
        if self.phase() == RmPhase::Alone {
            return Vec::new();
        }

        let mut view = random_view;
        view.truncate(self.rand_view_size.max(1) as usize);
        self.random_peer_cache = view.clone();

        let req_preds_min = self
            .nbh
            .pred_bound()
            .saturating_sub(self.nbh.preds().len());
        let req_succs_min = self
            .nbh
            .succ_bound()
            .saturating_sub(self.nbh.succs().len());

        let me = self.nbh.me.addr;
        let succ = self
            .nbh
            .immediate_succ()
            .filter(|d| d.addr != me)
            .map(|d| d.addr)
            .or_else(|| view.first().map(|d| d.addr));
        let pred = self
            .nbh
            .immediate_pred()
            .filter(|d| d.addr != me)
            .map(|d| d.addr)
            .or_else(|| view.first().map(|d| d.addr));

        let mut plans = Vec::new();
        if let Some(s) = succ {
            plans.push(BufferPlan {
                to: s,
                req_preds_min,
                req_succs_min,
            });
        }
        if let Some(p) = pred {
            if Some(p) != succ {
                plans.push(BufferPlan {
                    to: p,
                    req_preds_min,
                    req_succs_min,
                });
            }
        }
        plans
    }

    /// Respond to an incoming `buffer`: merge our candidate pool, frame it
    /// around the sender, prefer entries close to the sender on either
    /// side while guaranteeing the requested minimums.
    pub fn build_buffer_reply(
        &self,
        sender: NodeDescriptor<A>,
        sender_nbh: &NeighborhoodView<A>,
        req_preds_min: usize,
        req_succs_min: usize,
    ) -> NeighborhoodView<A> {
        let mut pool: Vec<NodeDescriptor<A>> = self.nbh.preds().to_vec();
        pool.extend(self.nbh.succs().to_vec());
        pool.push(self.nbh.me);
        pool.extend(self.random_peer_cache.clone());
        pool.retain(|d| d.addr != sender.addr);

        let other_pred_last = sender_nbh.preds.last().map(|d| d.id).unwrap_or(sender.id);
        let other_succ_last = sender_nbh.succs.last().map(|d| d.id).unwrap_or(sender.id);
        let pred_arc = Interval::segment(other_pred_last, true, sender.id, true);
        let succ_arc = Interval::segment(sender.id, true, other_succ_last, true);

        let preferred: Vec<NodeDescriptor<A>> = pool
            .iter()
            .filter(|d| pred_arc.contains(d.id) || succ_arc.contains(d.id))
            .copied()
            .collect();

        let mut framed = Neighborhood::new(
            sender,
            sender,
            sender,
            self.nbh.pred_bound(),
            self.nbh.succ_bound(),
        );
        framed.add(preferred);
        if framed.preds().len() < req_preds_min || framed.succs().len() < req_succs_min {
            framed.add(pool);
        }
        framed.view()
    }

    /// Adopt version updates for already-known processes, then compute
    /// (without committing) which processes from `random_view`/`foreign`
    /// are genuinely new so the caller can probe them before admission.
    /// The committed neighborhood after this call only differs by version
    /// bumps, never by new members.
    pub fn trigger_update(
        &mut self,
        foreign_nodes: &[NodeDescriptor<A>],
        random_view: &[NodeDescriptor<A>],
        foreign_nbh: Option<&NeighborhoodView<A>>,
    ) -> Vec<NodeDescriptor<A>> {
        self.nbh.update_ids(foreign_nodes);

        let mut candidate = self.nbh.clone();
        candidate.add(random_view.to_vec());
        if let Some(view) = foreign_nbh {
            candidate.add(view.all_descriptors());
        }

        let known: HashSet<A> = self
            .nbh
            .preds()
            .iter()
            .chain(self.nbh.succs().iter())
            .map(|d| d.addr)
            .chain(std::iter::once(self.nbh.me.addr))
            .collect();

        let mut new_peers: Vec<NodeDescriptor<A>> = candidate
            .preds()
            .iter()
            .chain(candidate.succs().iter())
            .filter(|d| !known.contains(&d.addr))
            .copied()
            .collect();
        new_peers.sort_by_key(|d| d.addr);
        new_peers.dedup_by_key(|d| d.addr);
        new_peers
    }

    /// Join/leave/crash entry point: remove `remove` (invoking `on_remove`
    /// per dropped entry), add `add`, recompute churn/rand-view-size.
    pub fn update_nodes(
        &mut self,
        add: Vec<NodeDescriptor<A>>,
        remove: &[A],
        mut on_remove: impl FnMut(&NodeDescriptor<A>),
    ) -> UpdateOutcome {
        let old_pred = self.nbh.immediate_pred().map(|d| d.addr);
        let old_succ = self.nbh.immediate_succ().map(|d| d.addr);
        let old_set: HashSet<A> = self
            .nbh
            .preds()
            .iter()
            .chain(self.nbh.succs().iter())
            .map(|d| d.addr)
            .collect();

        if !remove.is_empty() {
            self.nbh
                .filter(|d| !remove.contains(&d.addr), |d| on_remove(d));
        }
        if !add.is_empty() {
            self.nbh.add(add);
        }

        let new_set: HashSet<A> = self
            .nbh
            .preds()
            .iter()
            .chain(self.nbh.succs().iter())
            .map(|d| d.addr)
            .collect();
        let churn = old_set != new_set;
        self.churn_flag = churn;

        if !remove.is_empty() && churn {
            self.rand_view_size = 0;
        } else if churn {
            self.rand_view_size = (self.rand_view_size + 1).min(self.max_cache_size);
        }

        UpdateOutcome {
            churn,
            pred_changed: self.nbh.immediate_pred().map(|d| d.addr) != old_pred,
            succ_changed: self.nbh.immediate_succ().map(|d| d.addr) != old_succ,
        }
    }

    /// `remove_pred(old, pred_of_old)`: the caller (handler) retries while
    /// this returns `NeedsProbe`, bounded by a small constant per the
    /// design notes.
    pub fn remove_pred(
        &mut self,
        old: NodeDescriptor<A>,
        pred_of_old: NodeDescriptor<A>,
    ) -> RemovePredOutcome<A> {
        self.update_nodes(vec![pred_of_old], &[old.addr], |_| {});
        match self.nbh.immediate_pred() {
            Some(p) if p.addr == pred_of_old.addr => RemovePredOutcome::Done,
            other => RemovePredOutcome::NeedsProbe(other.copied()),
        }
    }

    /// `remove_succ(old, succ_of_old)`: no retry loop -- a wrong successor
    /// self-corrects through ordinary gossip.
    pub fn remove_succ(&mut self, old: NodeDescriptor<A>, succ_of_old: NodeDescriptor<A>) -> UpdateOutcome {
        self.update_nodes(vec![succ_of_old], &[old.addr], |_| {})
    }
}

/// Snapshot exposed through `get_component_state`.
#[derive(Debug, Clone)]
pub struct RmDump<A: ProcessAddress> {
    pub phase: RmPhase,
    pub churn_flag: bool,
    pub rand_view_size: u32,
    pub preds: Vec<NodeDescriptor<A>>,
    pub succs: Vec<NodeDescriptor<A>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Key;

    type Addr = u32;

    fn desc(addr: Addr, id: u128, version: u64) -> NodeDescriptor<Addr> {
        NodeDescriptor::new(addr, Key(id), version, 0)
    }

    #[test]
    fn fresh_state_is_alone() {
        let me = desc(0, 0, 0);
        let st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        assert_eq!(st.phase(), RmPhase::Alone);
    }

    #[test]
    fn periodic_action_is_noop_while_alone() {
        let me = desc(0, 0, 0);
        let mut st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        assert!(st.periodic_action(vec![]).is_empty());
    }

    #[test]
    fn admitting_a_peer_transitions_to_integrated() {
        let me = desc(0, 0, 0);
        let mut st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        st.update_nodes(vec![desc(1, 100, 0)], &[], |_| {});
        assert_eq!(st.phase(), RmPhase::Integrated);
    }

    #[test]
    fn update_nodes_identity_is_noop_and_reports_no_churn() {
        let me = desc(0, 0, 0);
        let mut st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        st.update_nodes(vec![desc(1, 100, 0)], &[], |_| {});
        let outcome = st.update_nodes(vec![], &[], |_| {});
        assert!(!outcome.churn);
        assert!(!outcome.pred_changed);
        assert!(!outcome.succ_changed);
    }

    #[test]
    fn removing_last_real_neighbor_goes_back_to_alone() {
        let me = desc(0, 0, 0);
        let mut st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        st.update_nodes(vec![desc(1, 100, 0)], &[], |_| {});
        assert_eq!(st.phase(), RmPhase::Integrated);
        st.update_nodes(vec![], &[1], |_| {});
        assert_eq!(st.phase(), RmPhase::Alone);
    }

    #[test]
    fn crash_resets_rand_view_size() {
        let me = desc(0, 0, 0);
        let mut st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        st.update_nodes(vec![desc(1, 100, 0), desc(2, 200, 0)], &[], |_| {});
        st.rand_view_size = 5;
        st.update_nodes(vec![], &[1], |_| {});
        assert_eq!(st.rand_view_size, 0);
    }

    #[test]
    fn crash_invokes_on_remove_once_per_dropped_entry() {
        let me = desc(0, 0, 0);
        let mut st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        st.update_nodes(vec![desc(1, 100, 0)], &[], |_| {});
        let mut zombied = Vec::new();
        st.update_nodes(vec![], &[1], |d| zombied.push(d.addr));
        assert_eq!(zombied, vec![1]);
    }

    #[test]
    fn stale_version_is_ignored_by_update_ids() {
        let me = desc(0, 0, 0);
        let mut st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        st.update_nodes(vec![desc(1, 100, 3)], &[], |_| {});
        st.nbh.update_ids(&[desc(1, 100, 2)]);
        assert_eq!(st.nbh.succs()[0].version, 3);
    }

    #[test]
    fn remove_pred_confirms_when_new_pred_matches() {
        let me = desc(0, 0, 0);
        let mut st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        st.update_nodes(
            vec![desc(1, u128::MAX - 10, 0), desc(2, u128::MAX - 20, 0)],
            &[],
            |_| {},
        );
        let old = *st.nbh.immediate_pred().unwrap();
        let pred_of_old = desc(2, u128::MAX - 20, 0);
        let outcome = st.remove_pred(old, pred_of_old);
        assert!(matches!(outcome, RemovePredOutcome::Done));
        assert_eq!(st.nbh.immediate_pred().unwrap().addr, 2);
    }

    #[test]
    fn trigger_update_only_commits_version_bumps_not_new_peers() {
        let me = desc(0, 0, 0);
        let mut st: RmState<Addr> = RmState::new(me, 4, 4, 8);
        let new_peers = st.trigger_update(&[], &[desc(9, 500, 0)], None);
        assert_eq!(new_peers.len(), 1);
        assert_eq!(new_peers[0].addr, 9);
        // Not actually admitted yet -- still alone.
        assert_eq!(st.phase(), RmPhase::Alone);
    }
}
