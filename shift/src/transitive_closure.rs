//! Bit-packed all-pairs reachability over a DAG.
//!
//! Two square bit matrices are stored, one row per Op:
//!
//! ```text
//!          from                      X0
//!        01234                      /  \
//!      0 00000                    X1    X2
//!      1 10000      fwd             \  /
//!  to  2 10000                       X3
//!      3 11100                         \
//!      4 11110                          X4
//! ```
//!
//! Row `to` of the forward matrix has bit `from` set iff `from` precedes `to`
//! in every valid schedule. The backward matrix is its transpose; storing it
//! as well makes the "always after" queries a single row scan.
//!
//! Construction visits Ops in a Kahn order and ORs the rows of each Op's
//! predecessors into its own row, skipping predecessors already implied by
//! another predecessor.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::graph::{Edges, OpAddress};
use crate::{Result, ShiftError};

const WORD_BITS: usize = 64;

/// Relative position of an Op with respect to a reference Op (in a
/// [`Filter`]) or to the other Ops of a subset (in extremum queries).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IsFirst {
    No,
    Maybe,
    Yes,
}

/// Whether an Op is the last of a subset, in every / some / no schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IsFinal {
    No,
    Maybe,
    Yes,
}

/// `(Yes, op)` selects the Ops always before `op`, `(No, op)` those always
/// after it and `(Maybe, op)` those which can go either side of it.
pub type Filter = (IsFirst, OpAddress);

/// Bounds on how many schedule positions a set of Ops spans, from its first
/// to its last Op inclusive: `low <= span < high` in every valid schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DurationBound {
    pub low: usize,
    pub high: usize,
}

/// Reachability oracle for a fixed DAG.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitiveClosure {
    n_ops: usize,
    n_words: usize,
    fwd: Vec<u64>,
    bwd: Vec<u64>,
}

fn words_per_op(n_ops: usize) -> usize {
    n_ops.div_ceil(WORD_BITS).max(1)
}

fn check_edges(edges: &[Vec<OpAddress>], n_ops: usize) -> Result<()> {
    for &to in edges.iter().flatten() {
        if to >= n_ops {
            return Err(ShiftError::OpOutOfRange { address: to, n_ops });
        }
    }
    if edges.len() > n_ops {
        return Err(ShiftError::LengthMismatch {
            context: "transitive closure edges",
            left: edges.len(),
            right: n_ops,
        });
    }
    Ok(())
}

fn reverse(edges: &[Vec<OpAddress>]) -> Edges {
    let mut rev = vec![Vec::new(); edges.len()];
    for (from, outs) in edges.iter().enumerate() {
        for &to in outs {
            rev[to].push(from);
        }
    }
    rev
}

/// Fill `bits` (row per Op) so that row `b` holds every Op reaching `b`
/// through `fwd`. `bwd` is the reverse of `fwd`.
fn propagate(
    fwd: &[Vec<OpAddress>],
    bwd: &[Vec<OpAddress>],
    n_words: usize,
    bits: &mut [u64],
) -> Result<()> {
    let n_ops = fwd.len();
    let is_recorded = |bits: &[u64], from: OpAddress, to: OpAddress| {
        bits[to * n_words + from / WORD_BITS] >> (from % WORD_BITS) & 1 == 1
    };

    let mut outstanding: Vec<usize> = bwd.iter().map(|ins| ins.len()).collect();
    let mut ready: Vec<OpAddress> = (0..n_ops).filter(|&i| outstanding[i] == 0).collect();
    let mut n_scheduled = 0;
    let mut redundant: Vec<bool> = Vec::new();

    while let Some(b) = ready.pop() {
        for &c in &fwd[b] {
            outstanding[c] -= 1;
            if outstanding[c] == 0 {
                ready.push(c);
            }
        }

        // a predecessor already recorded as preceding another predecessor
        // contributes nothing new
        let preds = &bwd[b];
        redundant.clear();
        redundant.resize(preds.len(), false);
        for i in 0..preds.len() {
            for j in 0..preds.len() {
                if i != j && !redundant[j] && is_recorded(bits, preds[i], preds[j]) {
                    redundant[i] = true;
                    break;
                }
            }
        }

        for (i, &a) in preds.iter().enumerate() {
            if redundant[i] {
                continue;
            }
            bits[b * n_words + a / WORD_BITS] |= 1 << (a % WORD_BITS);
            for w in 0..n_words {
                let row_a = bits[a * n_words + w];
                bits[b * n_words + w] |= row_a;
            }
        }
        n_scheduled += 1;
    }

    if n_scheduled != n_ops {
        return Err(ShiftError::Cycle {
            scheduled: n_scheduled,
            total: n_ops,
        });
    }
    Ok(())
}

impl TransitiveClosure {
    /// Build from forward edges, `edges[i]` being the direct successors of
    /// Op `i`. Fails on out-of-range edge ends and on cycles.
    pub fn new(edges: &[Vec<OpAddress>]) -> Result<Self> {
        let n_ops = edges.len();
        check_edges(edges, n_ops)?;
        let n_words = words_per_op(n_ops);
        let mut fwd = vec![0u64; n_ops * n_words];
        let mut bwd = vec![0u64; n_ops * n_words];
        let rev = reverse(edges);
        propagate(edges, &rev, n_words, &mut fwd)?;
        propagate(&rev, edges, n_words, &mut bwd)?;
        Ok(Self {
            n_ops,
            n_words,
            fwd,
            bwd,
        })
    }

    pub fn n_ops(&self) -> usize {
        self.n_ops
    }

    fn bit(bits: &[u64], n_words: usize, row: OpAddress, col: OpAddress) -> bool {
        bits[row * n_words + col / WORD_BITS] >> (col % WORD_BITS) & 1 == 1
    }

    fn row<'a>(&self, bits: &'a [u64], op: OpAddress) -> &'a [u64] {
        &bits[op * self.n_words..(op + 1) * self.n_words]
    }

    /// True iff `from` is before `to` in every valid schedule.
    pub fn constrained(&self, from: OpAddress, to: OpAddress) -> bool {
        debug_assert!(from < self.n_ops && to < self.n_ops);
        Self::bit(&self.fwd, self.n_words, to, from)
    }

    /// True iff `a` and `b` can appear in either order.
    pub fn unconstrained_in_both_directions(&self, a: OpAddress, b: OpAddress) -> bool {
        !self.constrained(a, b) && !self.constrained(b, a)
    }

    /// Mask with a bit set for every valid Op.
    fn full_mask(&self) -> Vec<u64> {
        let mut mask = vec![u64::MAX; self.n_words];
        let tail = self.n_ops % WORD_BITS;
        if tail != 0 {
            mask[self.n_words - 1] = (1u64 << tail) - 1;
        }
        if self.n_ops == 0 {
            mask[0] = 0;
        }
        mask
    }

    /// The set selected by one filter, as a bit row.
    fn filter_bits(&self, (is_first, op): Filter) -> Vec<u64> {
        match is_first {
            IsFirst::Yes => self.row(&self.fwd, op).to_vec(),
            IsFirst::No => self.row(&self.bwd, op).to_vec(),
            IsFirst::Maybe => {
                let mut neither: Vec<u64> = self
                    .row(&self.fwd, op)
                    .iter()
                    .zip(self.row(&self.bwd, op))
                    .zip(self.full_mask())
                    .map(|((f, b), m)| !(f | b) & m)
                    .collect();
                neither[op / WORD_BITS] &= !(1u64 << (op % WORD_BITS));
                neither
            }
        }
    }

    /// Filters in a shuffled order. The order has no effect on results, only
    /// on how soon an early exit is found.
    fn shuffled(filters: &[Filter]) -> Vec<Filter> {
        let seed = filters
            .iter()
            .fold(filters.len() as u64, |acc, &(_, op)| {
                acc.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(op as u64)
            });
        let mut order = filters.to_vec();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        order
    }

    fn intersection_bits(&self, filters: &[Filter]) -> Vec<u64> {
        let mut soln = self.full_mask();
        for filter in Self::shuffled(filters) {
            for (s, f) in soln.iter_mut().zip(self.filter_bits(filter)) {
                *s &= f;
            }
            if soln.iter().all(|w| *w == 0) {
                break;
            }
        }
        soln
    }

    fn union_bits(&self, filters: &[Filter]) -> Vec<u64> {
        let full = self.full_mask();
        let mut soln = vec![0u64; self.n_words];
        for filter in Self::shuffled(filters) {
            for (s, f) in soln.iter_mut().zip(self.filter_bits(filter)) {
                *s |= f;
            }
            if soln == full {
                break;
            }
        }
        soln
    }

    fn to_ids(bits: &[u64]) -> Vec<OpAddress> {
        let mut ids = Vec::new();
        for (w, &word) in bits.iter().enumerate() {
            let mut rest = word;
            while rest != 0 {
                let shift = rest.trailing_zeros() as usize;
                ids.push(w * WORD_BITS + shift);
                rest &= rest - 1;
            }
        }
        ids
    }

    fn count(bits: &[u64]) -> usize {
        bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Ops satisfying every filter. No filters selects every Op.
    pub fn op_intersection(&self, filters: &[Filter]) -> Vec<OpAddress> {
        Self::to_ids(&self.intersection_bits(filters))
    }

    /// Ops satisfying at least one filter.
    pub fn op_union(&self, filters: &[Filter]) -> Vec<OpAddress> {
        Self::to_ids(&self.union_bits(filters))
    }

    /// Number of Ops satisfying every filter.
    pub fn n(&self, filters: &[Filter]) -> usize {
        Self::count(&self.intersection_bits(filters))
    }

    /// True iff all `ids` select the same set under `is_first`.
    pub fn same(&self, is_first: IsFirst, ids: &[OpAddress]) -> bool {
        match ids.split_first() {
            None => true,
            Some((&first, rest)) => {
                let reference = self.filter_bits((is_first, first));
                rest.iter()
                    .all(|&id| self.filter_bits((is_first, id)) == reference)
            }
        }
    }

    /// Number of Ops always before `op`, which is the earliest schedule index
    /// `op` can take.
    pub fn earliest(&self, op: OpAddress) -> usize {
        Self::count(self.row(&self.fwd, op))
    }

    /// The latest schedule index `op` can take.
    pub fn latest(&self, op: OpAddress) -> usize {
        self.n_ops - Self::count(self.row(&self.bwd, op)) - 1
    }

    /// Can `a` be the first and/or last of `subset` across valid schedules?
    pub fn get_extremum_status(&self, a: OpAddress, subset: &[OpAddress]) -> (IsFirst, IsFinal) {
        let mut is_first = IsFirst::Yes;
        for &b in subset.iter().filter(|&&b| b != a) {
            if !self.constrained(a, b) {
                is_first = IsFirst::Maybe;
            }
            if self.constrained(b, a) {
                is_first = IsFirst::No;
                break;
            }
        }

        let mut is_final = IsFinal::Yes;
        for &b in subset.iter().filter(|&&b| b != a) {
            if !self.constrained(b, a) {
                is_final = IsFinal::Maybe;
            }
            if self.constrained(a, b) {
                is_final = IsFinal::No;
                break;
            }
        }
        (is_first, is_final)
    }

    /// [`TransitiveClosure::get_extremum_status`] for every Op of `ids`.
    pub fn get_extremum_statuses(&self, ids: &[OpAddress]) -> Vec<(IsFirst, IsFinal)> {
        ids.iter()
            .map(|&id| self.get_extremum_status(id, ids))
            .collect()
    }

    /// Bounds on the span of `ids` over all valid schedules, without
    /// enumerating schedules.
    ///
    /// The lower bound counts `ids` plus every Op which is always after one
    /// of them and always before another. The upper bound counts `ids` plus
    /// every Op which can be after some member and before a different one.
    pub fn get_duration_bound(&self, ids: &[OpAddress]) -> DurationBound {
        let mut members = ids.to_vec();
        members.sort_unstable();
        members.dedup();
        if members.is_empty() {
            return DurationBound { low: 0, high: 1 };
        }

        let mut member_bits = vec![0u64; self.n_words];
        let mut after_some = vec![0u64; self.n_words];
        let mut before_some = vec![0u64; self.n_words];
        for &id in &members {
            member_bits[id / WORD_BITS] |= 1 << (id % WORD_BITS);
            for w in 0..self.n_words {
                after_some[w] |= self.bwd[id * self.n_words + w];
                before_some[w] |= self.fwd[id * self.n_words + w];
            }
        }
        let n_between: usize = (0..self.n_words)
            .map(|w| (after_some[w] & before_some[w] & !member_bits[w]).count_ones() as usize)
            .sum();

        let mut n_possible = 0;
        for x in 0..self.n_ops {
            if member_bits[x / WORD_BITS] >> (x % WORD_BITS) & 1 == 1 {
                continue;
            }
            // members x can follow, and members x can precede
            let mut can_follow = members.iter().filter(|&&a| !self.constrained(x, a));
            let mut can_precede = members.iter().filter(|&&b| !self.constrained(b, x));
            let (Some(&a0), Some(&b0)) = (can_follow.next(), can_precede.next()) else {
                continue;
            };
            let more = can_follow.next().is_some() || can_precede.next().is_some();
            if more || a0 != b0 {
                n_possible += 1;
            }
        }

        DurationBound {
            low: members.len() + n_between,
            high: members.len() + n_possible + 1,
        }
    }

    /// Edges of `edges` implied by other paths in this closure. `edges`
    /// must be over the same Ops.
    pub fn redundants(&self, edges: &[Vec<OpAddress>]) -> Edges {
        let rev = reverse(edges);
        edges
            .iter()
            .enumerate()
            .map(|(from, outs)| {
                outs.iter()
                    .copied()
                    .filter(|&to| rev[to].iter().any(|&other| self.constrained(from, other)))
                    .collect()
            })
            .collect()
    }

    /// [`TransitiveClosure::redundants`] as `(from, to)` pairs.
    pub fn flattened_redundants(&self, edges: &[Vec<OpAddress>]) -> Vec<(OpAddress, OpAddress)> {
        self.redundants(edges)
            .into_iter()
            .enumerate()
            .flat_map(|(from, outs)| outs.into_iter().map(move |to| (from, to)))
            .collect()
    }

    /// Insert `new_edges` and propagate their implications.
    ///
    /// Each new edge costs O(n_ops * n_ops / 64), so when many edges are added
    /// together, building a fresh closure is faster. On error (an out-of-range
    /// Op or an edge closing a cycle) the closure is unchanged.
    pub fn update(&mut self, new_edges: &[Vec<OpAddress>]) -> Result<()> {
        check_edges(new_edges, self.n_ops)?;
        let mut fwd = self.fwd.clone();
        let mut bwd = self.bwd.clone();
        for (from, outs) in new_edges.iter().enumerate() {
            for &to in outs {
                if from == to || Self::bit(&fwd, self.n_words, from, to) {
                    return Err(ShiftError::Cycle {
                        scheduled: 0,
                        total: self.n_ops,
                    });
                }
                self.insert_constraint(from, to, &mut fwd);
                self.insert_constraint(to, from, &mut bwd);
            }
        }
        self.fwd = fwd;
        self.bwd = bwd;
        Ok(())
    }

    fn insert_constraint(&self, from: OpAddress, to: OpAddress, bits: &mut [u64]) {
        let n_words = self.n_words;
        let record = |bits: &mut [u64], f: OpAddress, t: OpAddress| {
            bits[t * n_words + f / WORD_BITS] |= 1 << (f % WORD_BITS);
            for w in 0..n_words {
                let row_f = bits[f * n_words + w];
                bits[t * n_words + w] |= row_f;
            }
        };
        if Self::bit(bits, n_words, to, from) {
            return;
        }
        record(bits, from, to);
        for post in 0..self.n_ops {
            if Self::bit(bits, n_words, post, to) && !Self::bit(bits, n_words, post, from) {
                record(bits, from, post);
            }
        }
    }
}
