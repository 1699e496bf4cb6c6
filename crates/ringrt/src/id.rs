//! 128-bit modular identifier arithmetic and ring intervals.
//!
//! Identifiers live in `[0, 2^128)` and all arithmetic wraps modulo `2^128`,
//! which is exactly what `u128`'s native wrapping operations give us for
//! free. An [`Interval`] is an arc on that ring: [`Interval::Empty`] and
//! [`Interval::All`] are distinguished from the general case so callers
//! never have to special-case a `Segment` whose endpoints coincide.

use std::fmt;

/// A point in the `[0, 2^128)` key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub u128);

impl Key {
    pub const ZERO: Key = Key(0);

    /// `self + other`, wrapping modulo `2^128`.
    pub fn add(self, other: u128) -> Key {
        Key(self.0.wrapping_add(other))
    }

    /// Clockwise distance from `self` to `other`, i.e. the length of the
    /// half-open arc `[self, other)`. Zero iff `self == other`.
    pub fn distance_to(self, other: Key) -> u128 {
        other.0.wrapping_sub(self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#034x}", self.0)
    }
}

/// An extended (up to 129-bit) unsigned value used internally to detect
/// whether unrolling an arc past another arc's origin wraps the ring.
#[derive(Clone, Copy)]
struct Ext {
    wrapped: bool,
    lo: u128,
}

impl Ext {
    fn new(lo: u128) -> Self {
        Ext {
            wrapped: false,
            lo,
        }
    }

    /// Add a plain `u128` length. Can overflow at most once since both
    /// operands are already bounded by `2^128`.
    fn add(self, len: u128) -> Self {
        let (lo, overflow) = self.lo.overflowing_add(len);
        Ext {
            wrapped: self.wrapped ^ overflow,
            lo,
        }
    }
}

/// An arc on the identifier ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    /// Contains no keys.
    Empty,
    /// Contains every key.
    All,
    /// The arc from `from` to `to`, going clockwise, with each endpoint
    /// independently open or closed. `from == to` is never constructed
    /// directly here -- use [`Interval::Empty`]/[`Interval::All`], or the
    /// single-point interval helpers.
    Segment {
        from: Key,
        from_open: bool,
        to: Key,
        to_open: bool,
    },
}

impl Interval {
    /// Build a segment, collapsing the degenerate `from == to` cases into
    /// `Empty`/`All` so `Segment` always denotes a proper arc.
    pub fn segment(from: Key, from_open: bool, to: Key, to_open: bool) -> Interval {
        if from == to {
            return if from_open && to_open {
                // (a, a): everything except the single point `a`.
                Interval::Segment {
                    from,
                    from_open: true,
                    to,
                    to_open: true,
                }
            } else if !from_open && !to_open {
                // [a, a]: just the point `a` itself.
                Interval::Segment {
                    from,
                    from_open: false,
                    to,
                    to_open: false,
                }
            } else {
                // [a, a) or (a, a]: the whole ring.
                Interval::All
            };
        }
        Interval::Segment {
            from,
            from_open,
            to,
            to_open,
        }
    }

    /// Does `x` lie on this arc, honoring open/closed endpoints?
    pub fn contains(&self, x: Key) -> bool {
        match self {
            Interval::Empty => false,
            Interval::All => true,
            Interval::Segment {
                from,
                from_open,
                to,
                to_open,
            } => {
                if from == to {
                    // Single point (from==to, not open-open/closed-closed
                    // degenerate since `segment()` already resolved those
                    // to All) -- only reachable for [a,a] (point) here.
                    return x == *from;
                }
                let total = from.distance_to(*to);
                let dx = from.distance_to(x);
                if dx == 0 {
                    return !from_open;
                }
                if dx == total {
                    return !to_open;
                }
                dx < total
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Interval::Empty)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Interval::All)
    }

    /// `self`'s clockwise end equals `other`'s counterclockwise start.
    pub fn is_left_of(&self, other: &Interval) -> bool {
        match (self, other) {
            (
                Interval::Segment { to, .. },
                Interval::Segment {
                    from: other_from, ..
                },
            ) => to == other_from,
            _ => false,
        }
    }

    /// Unroll `self` into offsets from `origin`, returning one or two
    /// linear (non-wrapping) pieces in `[0, 2^128)` relative to `origin`.
    fn unroll_from(&self, origin: Key) -> Vec<(u128, bool, u128, bool)> {
        match self {
            Interval::Empty => vec![],
            Interval::All => vec![(0, false, u128::MAX, false)],
            Interval::Segment {
                from,
                from_open,
                to,
                to_open,
            } => {
                if from == to {
                    let off = origin.distance_to(*from);
                    return vec![(off, *from_open, off, *to_open)];
                }
                let len = from.distance_to(*to);
                let off = origin.distance_to(*from);
                let end = Ext::new(off).add(len);
                if !end.wrapped {
                    vec![(off, *from_open, end.lo, *to_open)]
                } else {
                    // Splits at the origin: [off, MAX] continuing on to [0, end.lo).
                    // The split point is an artifact of linearization, not a
                    // true endpoint of the arc, so it is always treated as
                    // "passing through" (closed on both sides of the cut).
                    vec![
                        (off, *from_open, u128::MAX, false),
                        (0, false, end.lo, *to_open),
                    ]
                }
            }
        }
    }

    /// Intersect two arcs; the result may be zero, one, or two disjoint arcs.
    pub fn intersection(&self, other: &Interval) -> Vec<Interval> {
        match (self, other) {
            (Interval::Empty, _) | (_, Interval::Empty) => vec![],
            (Interval::All, x) => vec![*x],
            (x, Interval::All) => vec![*x],
            (Interval::Segment { from: origin, .. }, _) => {
                let a = self.unroll_from(*origin);
                let b = other.unroll_from(*origin);
                let mut out = Vec::new();
                for &(a_lo, a_lo_open, a_hi, a_hi_open) in &a {
                    for &(b_lo, b_lo_open, b_hi, b_hi_open) in &b {
                        let (lo, lo_open) = if a_lo > b_lo {
                            (a_lo, a_lo_open)
                        } else if b_lo > a_lo {
                            (b_lo, b_lo_open)
                        } else {
                            (a_lo, a_lo_open || b_lo_open)
                        };
                        let (hi, hi_open) = if a_hi < b_hi {
                            (a_hi, a_hi_open)
                        } else if b_hi < a_hi {
                            (b_hi, b_hi_open)
                        } else {
                            (a_hi, a_hi_open || b_hi_open)
                        };
                        if lo > hi || (lo == hi && (lo_open || hi_open)) {
                            continue;
                        }
                        out.push(Interval::segment(
                            origin.add(lo),
                            lo_open,
                            origin.add(hi),
                            hi_open,
                        ));
                    }
                }
                out.retain(|iv| !iv.is_empty());
                out
            }
        }
    }

    /// Union of two arcs; the result may be one or two disjoint arcs
    /// (or a single arc/`All` when they overlap or touch).
    pub fn union(&self, other: &Interval) -> Vec<Interval> {
        match (self, other) {
            (Interval::All, _) | (_, Interval::All) => vec![Interval::All],
            (Interval::Empty, x) => vec![*x],
            (x, Interval::Empty) => vec![*x],
            _ => {
                // This crate's call sites only ever test membership in a
                // union (via `contains_any`), never need a single merged
                // arc, so the two constituents are kept separate rather
                // than attempting a canonical merge.
                vec![*self, *other]
            }
        }
    }

    /// Whether `self` is a subset of `other`.
    pub fn subset(&self, other: &Interval) -> bool {
        match (self, other) {
            (_, Interval::All) => true,
            (Interval::Empty, _) => true,
            (Interval::All, _) => other.is_all(),
            _ => {
                let pieces = self.unroll_from(match self {
                    Interval::Segment { from, .. } => *from,
                    _ => unreachable!(),
                });
                pieces.into_iter().all(|(lo, lo_open, hi, hi_open)| {
                    let from = match self {
                        Interval::Segment { from, .. } => *from,
                        _ => unreachable!(),
                    };
                    let as_interval = Interval::segment(from.add(lo), lo_open, from.add(hi), hi_open);
                    as_interval.intersection(other).iter().any(|p| *p == as_interval)
                        || matches!(as_interval, Interval::Empty)
                })
            }
        }
    }

    /// Does `x` lie in any arc of a logical union `[a, b]`?
    pub fn contains_any(x: Key, arcs: &[Interval]) -> bool {
        arcs.iter().any(|iv| iv.contains(x))
    }

    /// Split [`Interval::All`] into `n` equal-length half-open arcs
    /// `[a, b)` that partition the ring. When `2^128` does not divide `n`
    /// evenly, the remainder `r = 2^128 mod n` is distributed one extra
    /// key each to the first `r` buckets.
    pub fn split(n: u32) -> Vec<Interval> {
        assert!(n >= 1, "split requires n >= 1");
        if n == 1 {
            return vec![Interval::All];
        }
        let n = n as u128;
        let base = u128::MAX / n; // floor((2^128 - 1) / n), close enough for bucket sizing below
        // Compute base and remainder for 2^128 (not representable directly
        // in u128) via (2^128 - 1) = u128::MAX, then account for the
        // extra 1 by folding it into the remainder distribution.
        let total_minus_one = u128::MAX; // 2^128 - 1
        let q = total_minus_one / n;
        let r_minus_one = total_minus_one % n;
        // 2^128 = (2^128 - 1) + 1, so r = (r_minus_one + 1) mod n, and
        // bucket size bumps by one extra if that carries.
        let (r, carry) = {
            let r = r_minus_one + 1;
            if r == n {
                (0u128, 1u128)
            } else {
                (r, 0u128)
            }
        };
        let _ = base;
        let mut out = Vec::with_capacity(n as usize);
        let mut cursor: u128 = 0;
        for i in 0..n {
            let mut len = q + carry;
            if i < r {
                len += 1;
            }
            let from = Key(cursor);
            let to = Key(cursor.wrapping_add(len));
            out.push(Interval::segment(from, false, to, true));
            cursor = cursor.wrapping_add(len);
        }
        out
    }
}

/// Four equally-spaced replica keys for `k`: `{k, k+2^126, k+2^127,
/// k+2^126+2^127}` modulo `2^128`.
pub fn get_keys_for_replicas(k: Key) -> [Key; 4] {
    let quarter: u128 = 1u128 << 126;
    let half: u128 = 1u128 << 127;
    [
        k,
        k.add(quarter),
        k.add(half),
        k.add(half + quarter),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_contains_everything() {
        assert!(Interval::All.contains(Key(0)));
        assert!(Interval::All.contains(Key(u128::MAX)));
    }

    #[test]
    fn empty_contains_nothing() {
        assert!(!Interval::Empty.contains(Key(0)));
    }

    #[test]
    fn segment_half_open_excludes_upper_bound() {
        let iv = Interval::segment(Key(10), false, Key(20), true);
        assert!(iv.contains(Key(10)));
        assert!(iv.contains(Key(15)));
        assert!(!iv.contains(Key(20)));
    }

    #[test]
    fn segment_open_excludes_lower_bound() {
        let iv = Interval::segment(Key(10), true, Key(20), false);
        assert!(!iv.contains(Key(10)));
        assert!(iv.contains(Key(20)));
    }

    #[test]
    fn segment_wraps_around_zero() {
        let iv = Interval::segment(Key(u128::MAX - 5), false, Key(5), true);
        assert!(iv.contains(Key(u128::MAX)));
        assert!(iv.contains(Key(0)));
        assert!(iv.contains(Key(4)));
        assert!(!iv.contains(Key(5)));
        assert!(!iv.contains(Key(u128::MAX - 10)));
    }

    #[test]
    fn degenerate_open_open_is_everything_but_one_point() {
        let iv = Interval::segment(Key(7), true, Key(7), true);
        assert!(!iv.contains(Key(7)));
        assert!(iv.contains(Key(8)));
        assert!(iv.contains(Key(0)));
    }

    #[test]
    fn degenerate_closed_closed_is_one_point() {
        let iv = Interval::segment(Key(7), false, Key(7), false);
        assert!(iv.contains(Key(7)));
        assert!(!iv.contains(Key(8)));
    }

    #[test]
    fn degenerate_half_open_same_point_is_all() {
        let iv = Interval::segment(Key(7), false, Key(7), true);
        assert!(iv.is_all());
    }

    #[test]
    fn split_covers_all_and_is_pairwise_disjoint() {
        let arcs = Interval::split(7);
        assert_eq!(arcs.len(), 7);

        // Every key we probe lands in exactly one arc.
        let probes: Vec<Key> = (0..100u128)
            .map(|i| Key(i.wrapping_mul(u128::MAX / 100)))
            .collect();
        for p in probes {
            let hits = arcs.iter().filter(|iv| iv.contains(p)).count();
            assert_eq!(hits, 1, "key {p} hit {hits} arcs");
        }

        // Lengths differ by at most one key.
        let lens: Vec<u128> = arcs
            .iter()
            .map(|iv| match iv {
                Interval::Segment { from, to, .. } => from.distance_to(*to),
                _ => panic!("expected segment"),
            })
            .collect();
        let min = *lens.iter().min().unwrap();
        let max = *lens.iter().max().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn split_one_is_all() {
        assert_eq!(Interval::split(1), vec![Interval::All]);
    }

    #[test]
    fn split_boundaries_are_contiguous() {
        let arcs = Interval::split(5);
        for i in 0..arcs.len() {
            let next = &arcs[(i + 1) % arcs.len()];
            assert!(arcs[i].is_left_of(next));
        }
    }

    #[test]
    fn replica_keys_are_evenly_spaced() {
        let k = Key(12345);
        let replicas = get_keys_for_replicas(k);
        assert_eq!(replicas[0], k);
        assert_eq!(replicas[1], k.add(1u128 << 126));
        assert_eq!(replicas[2], k.add(1u128 << 127));
        assert_eq!(replicas[3], k.add((1u128 << 127) + (1u128 << 126)));
        // All four are distinct.
        let mut sorted = replicas.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn intersection_of_overlapping_segments() {
        let a = Interval::segment(Key(0), false, Key(100), true);
        let b = Interval::segment(Key(50), false, Key(150), true);
        let inter = a.intersection(&b);
        assert_eq!(inter.len(), 1);
        assert!(inter[0].contains(Key(75)));
        assert!(!inter[0].contains(Key(25)));
        assert!(!inter[0].contains(Key(125)));
    }

    #[test]
    fn intersection_of_disjoint_segments_is_empty() {
        let a = Interval::segment(Key(0), false, Key(10), true);
        let b = Interval::segment(Key(20), false, Key(30), true);
        assert!(a.intersection(&b).is_empty());
    }

    #[test]
    fn subset_of_all_is_always_true() {
        let a = Interval::segment(Key(0), false, Key(10), true);
        assert!(a.subset(&Interval::All));
    }

    #[test]
    fn subset_of_self_is_true() {
        let a = Interval::segment(Key(5), false, Key(10), true);
        assert!(a.subset(&a));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn split_always_covers_all_and_is_pairwise_disjoint(n in 1u32..64) {
            let arcs = Interval::split(n);
            prop_assert_eq!(arcs.len(), n as usize);

            for i in 0..arcs.len() {
                for j in 0..arcs.len() {
                    if i != j {
                        prop_assert!(arcs[i].intersection(&arcs[j]).is_empty());
                    }
                }
            }

            // Adjacent arcs in ring order are contiguous.
            for i in 0..arcs.len() {
                let next = &arcs[(i + 1) % arcs.len()];
                prop_assert!(arcs[i].is_left_of(next));
            }
        }

        #[test]
        fn split_bucket_lengths_differ_by_at_most_one(n in 1u32..64) {
            let arcs = Interval::split(n);
            let lens: Vec<u128> = arcs.iter().map(|iv| match iv {
                Interval::Segment { from, to, .. } => from.distance_to(*to),
                Interval::All => u128::MAX,
                Interval::Empty => 0,
            }).collect();
            let min = *lens.iter().min().unwrap();
            let max = *lens.iter().max().unwrap();
            prop_assert!(max - min <= 1);
        }

        #[test]
        fn replica_keys_are_always_distinct(raw in any::<u128>()) {
            let replicas = get_keys_for_replicas(Key(raw));
            let mut sorted = replicas.to_vec();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), 4);
        }

        #[test]
        fn contains_agrees_with_hand_rolled_wraparound_check(
            from in any::<u128>(), len in 0u128..u128::MAX, probe_offset in 0u128..u128::MAX,
        ) {
            let from_key = Key(from);
            let to_key = Key(from.wrapping_add(len));
            let iv = Interval::segment(from_key, false, to_key, true);
            let probe = Key(from.wrapping_add(probe_offset));
            let expect = probe_offset < len;
            prop_assert_eq!(iv.contains(probe), expect);
        }
    }
}
