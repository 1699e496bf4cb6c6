//! A node's local view of its predecessor and successor lists.

use crate::id::Key;

/// A process's address within this runtime instance. Any `Copy + Eq +
/// Ord + Hash + Send`-able identifier works; RM-TMan and the demo CLI use
/// the component runtime's `ProcessId`. `Hash` lets a `MessageBus` key its
/// routing table directly by address.
pub trait ProcessAddress:
    Copy + Eq + Ord + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static
{
}
impl<T: Copy + Eq + Ord + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static> ProcessAddress
    for T
{
}

/// A (process-address, identifier, version) tuple. Two descriptors denote
/// the same process iff their addresses coincide; the higher version
/// supersedes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDescriptor<A: ProcessAddress> {
    pub addr: A,
    pub id: Key,
    pub version: u64,
    /// Monotonic local timestamp of last update, for `dump()` diagnostics
    /// only -- never used for ordering, since `version` already totally
    /// orders descriptors from the same process.
    pub local_ts: u64,
}

impl<A: ProcessAddress> NodeDescriptor<A> {
    pub fn new(addr: A, id: Key, version: u64, local_ts: u64) -> Self {
        NodeDescriptor {
            addr,
            id,
            version,
            local_ts,
        }
    }

    fn supersedes(&self, other: &NodeDescriptor<A>) -> bool {
        self.addr == other.addr && self.version > other.version
    }
}

/// Sort key for a predecessor-side entry: larger counterclockwise distance
/// from `me` sorts later (farthest last, so truncation drops the tail).
fn pred_distance<A: ProcessAddress>(me: Key, d: &NodeDescriptor<A>) -> u128 {
    d.id.distance_to(me)
}

/// Sort key for a successor-side entry: clockwise distance from `me`.
fn succ_distance<A: ProcessAddress>(me: Key, d: &NodeDescriptor<A>) -> u128 {
    me.distance_to(d.id)
}

fn sort_and_truncate<A: ProcessAddress>(
    me: Key,
    mut list: Vec<NodeDescriptor<A>>,
    bound: usize,
    dist: impl Fn(Key, &NodeDescriptor<A>) -> u128,
) -> Vec<NodeDescriptor<A>> {
    list.sort_by(|a, b| {
        dist(me, a)
            .cmp(&dist(me, b))
            .then_with(|| a.addr.cmp(&b.addr))
    });
    list.truncate(bound);
    list
}

/// Merge incoming descriptors into `existing`, keeping the newer version
/// whenever an address is already present, dropping any descriptor for
/// `me` itself.
fn merge_unique<A: ProcessAddress>(
    me: A,
    mut existing: Vec<NodeDescriptor<A>>,
    incoming: impl IntoIterator<Item = NodeDescriptor<A>>,
) -> Vec<NodeDescriptor<A>> {
    for inc in incoming {
        if inc.addr == me {
            continue;
        }
        if let Some(slot) = existing.iter_mut().find(|e| e.addr == inc.addr) {
            if inc.supersedes(slot) {
                *slot = inc;
            }
        } else {
            existing.push(inc);
        }
    }
    existing
}

/// A node's ordered local view of its neighbors.
#[derive(Debug, Clone)]
pub struct Neighborhood<A: ProcessAddress> {
    pub me: NodeDescriptor<A>,
    pred_bound: usize,
    succ_bound: usize,
    preds: Vec<NodeDescriptor<A>>,
    succs: Vec<NodeDescriptor<A>>,
}

impl<A: ProcessAddress> Neighborhood<A> {
    /// Initial two-element neighborhood: a single predecessor and
    /// successor, typically both `me` until real peers are admitted.
    pub fn new(
        pred: NodeDescriptor<A>,
        me: NodeDescriptor<A>,
        succ: NodeDescriptor<A>,
        pred_bound: usize,
        succ_bound: usize,
    ) -> Self {
        let mut nbh = Neighborhood {
            me,
            pred_bound,
            succ_bound,
            preds: Vec::new(),
            succs: Vec::new(),
        };
        nbh.preds = merge_unique(me.addr, Vec::new(), [pred]);
        nbh.succs = merge_unique(me.addr, Vec::new(), [succ]);
        nbh.preds = sort_and_truncate(me.id, nbh.preds.clone(), pred_bound, pred_distance);
        nbh.succs = sort_and_truncate(me.id, nbh.succs.clone(), succ_bound, succ_distance);
        nbh
    }

    pub fn preds(&self) -> &[NodeDescriptor<A>] {
        &self.preds
    }

    pub fn succs(&self) -> &[NodeDescriptor<A>] {
        &self.succs
    }

    pub fn pred_bound(&self) -> usize {
        self.pred_bound
    }

    pub fn succ_bound(&self) -> usize {
        self.succ_bound
    }

    /// Insert each of `nodes` into both sides' candidate pools, re-sort,
    /// and truncate each side to its bound, dropping the farthest entries.
    pub fn add(&mut self, nodes: impl IntoIterator<Item = NodeDescriptor<A>> + Clone) {
        let preds = merge_unique(self.me.addr, self.preds.clone(), nodes.clone());
        let succs = merge_unique(self.me.addr, self.succs.clone(), nodes);
        self.preds = sort_and_truncate(self.me.id, preds, self.pred_bound, pred_distance);
        self.succs = sort_and_truncate(self.me.id, succs, self.succ_bound, succ_distance);
    }

    /// For processes already present in either list, adopt the incoming
    /// descriptor if its version is higher. Never introduces new peers.
    pub fn update_ids(&mut self, nodes: &[NodeDescriptor<A>]) {
        for inc in nodes {
            for slot in self.preds.iter_mut().chain(self.succs.iter_mut()) {
                if slot.addr == inc.addr && inc.supersedes(slot) {
                    *slot = *inc;
                }
            }
        }
    }

    /// Drop entries failing `keep`; `on_remove` is invoked once per
    /// dropped entry (e.g. to feed a dead-node suspicion cache).
    pub fn filter(&mut self, mut keep: impl FnMut(&NodeDescriptor<A>) -> bool, mut on_remove: impl FnMut(&NodeDescriptor<A>)) {
        self.preds.retain(|d| {
            let keep = keep(d);
            if !keep {
                on_remove(d);
            }
            keep
        });
        self.succs.retain(|d| {
            let keep = keep(d);
            if !keep {
                on_remove(d);
            }
            keep
        });
    }

    /// Union `self` and `other` by address, keeping newer versions, then
    /// truncate both sides to `self`'s bounds.
    pub fn merge(&self, other: &Neighborhood<A>) -> Neighborhood<A> {
        let mut out = self.clone();
        let incoming: Vec<_> = other
            .preds
            .iter()
            .chain(other.succs.iter())
            .chain(std::iter::once(&other.me))
            .copied()
            .collect();
        out.add(incoming);
        out
    }

    /// Whether the first predecessor is a real process (not `me`).
    pub fn has_real_pred(&self) -> bool {
        self.preds.first().is_some_and(|d| d.addr != self.me.addr)
    }

    /// Whether the first successor is a real process (not `me`).
    pub fn has_real_succ(&self) -> bool {
        self.succs.first().is_some_and(|d| d.addr != self.me.addr)
    }

    pub fn immediate_pred(&self) -> Option<&NodeDescriptor<A>> {
        self.preds.first()
    }

    pub fn immediate_succ(&self) -> Option<&NodeDescriptor<A>> {
        self.succs.first()
    }

    /// A flat, bound-agnostic snapshot suitable for putting on the wire.
    pub fn view(&self) -> NeighborhoodView<A> {
        NeighborhoodView {
            me: self.me,
            preds: self.preds.clone(),
            succs: self.succs.clone(),
        }
    }
}

/// A wire-shaped neighborhood snapshot: no bounds, just the three parts a
/// gossip peer needs to merge against its own view.
#[derive(Debug, Clone)]
pub struct NeighborhoodView<A: ProcessAddress> {
    pub me: NodeDescriptor<A>,
    pub preds: Vec<NodeDescriptor<A>>,
    pub succs: Vec<NodeDescriptor<A>>,
}

impl<A: ProcessAddress> NeighborhoodView<A> {
    pub fn all_descriptors(&self) -> Vec<NodeDescriptor<A>> {
        let mut v = self.preds.clone();
        v.extend(self.succs.clone());
        v.push(self.me);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Addr = u32;

    fn desc(addr: Addr, id: u128, version: u64) -> NodeDescriptor<Addr> {
        NodeDescriptor::new(addr, Key(id), version, 0)
    }

    #[test]
    fn new_builds_two_element_neighborhood() {
        let me = desc(1, 100, 0);
        let nbh = Neighborhood::new(desc(2, 50, 0), me, desc(3, 150, 0), 4, 4);
        assert_eq!(nbh.preds().len(), 1);
        assert_eq!(nbh.succs().len(), 1);
    }

    #[test]
    fn add_truncates_to_bound_keeping_closest() {
        let me = desc(0, 0, 0);
        let mut nbh = Neighborhood::new(desc(0, 0, 0), me, desc(0, 0, 0), 2, 2);
        nbh.add(vec![desc(1, 10, 0), desc(2, 20, 0), desc(3, 30, 0)]);
        assert_eq!(nbh.succs().len(), 2);
        assert_eq!(nbh.succs()[0].addr, 1);
        assert_eq!(nbh.succs()[1].addr, 2);
    }

    #[test]
    fn add_keeps_newer_version_on_duplicate_address() {
        let me = desc(0, 0, 0);
        let mut nbh = Neighborhood::new(desc(0, 0, 0), me, desc(0, 0, 0), 4, 4);
        nbh.add(vec![desc(1, 10, 1)]);
        nbh.add(vec![desc(1, 10, 0)]);
        assert_eq!(nbh.succs()[0].version, 1);
    }

    #[test]
    fn update_ids_never_introduces_new_peers() {
        let me = desc(0, 0, 0);
        let mut nbh = Neighborhood::new(desc(0, 0, 0), me, desc(0, 0, 0), 4, 4);
        nbh.update_ids(&[desc(99, 5, 5)]);
        assert!(!nbh.preds().iter().any(|d| d.addr == 99));
        assert!(!nbh.succs().iter().any(|d| d.addr == 99));
    }

    #[test]
    fn filter_invokes_on_remove_per_dropped_entry() {
        let me = desc(0, 0, 0);
        let mut nbh = Neighborhood::new(desc(0, 0, 0), me, desc(0, 0, 0), 4, 4);
        nbh.add(vec![desc(1, 10, 0), desc(2, 20, 0)]);
        let mut removed = Vec::new();
        nbh.filter(|d| d.addr != 1, |d| removed.push(d.addr));
        assert_eq!(removed, vec![1]);
        assert!(!nbh.succs().iter().any(|d| d.addr == 1));
    }

    #[test]
    fn has_real_succ_false_when_alone() {
        let me = desc(0, 0, 0);
        let nbh = Neighborhood::new(me, me, me, 4, 4);
        assert!(!nbh.has_real_pred());
        assert!(!nbh.has_real_succ());
    }

    #[test]
    fn has_real_succ_true_after_admitting_peer() {
        let me = desc(0, 0, 0);
        let mut nbh = Neighborhood::new(me, me, me, 4, 4);
        nbh.add(vec![desc(1, 10, 0)]);
        assert!(nbh.has_real_succ());
    }

    #[test]
    fn merge_unions_and_truncates_to_self_bounds() {
        let me = desc(0, 0, 0);
        let mut a = Neighborhood::new(me, me, me, 2, 2);
        a.add(vec![desc(1, 10, 0)]);
        let mut b = Neighborhood::new(me, me, me, 2, 2);
        b.add(vec![desc(2, 20, 0), desc(3, 30, 0)]);

        let merged = a.merge(&b);
        assert_eq!(merged.succs().len(), 2);
    }
}
