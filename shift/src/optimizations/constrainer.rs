//! Passes which add constraints and links using the transitive closure and
//! the per-Op bounds on liveness change.

use rustc_hash::FxHashSet;

use crate::graph::{Graph, OpAddress};
use crate::log_checks;
use crate::transitive_closure::TransitiveClosure;
use crate::{AllocWeight, Result};

use super::update_from_first_final;

pub(super) struct Constrainer<'a> {
    pub(super) graph: &'a mut Graph,
    pub(super) closure: &'a TransitiveClosure,
    pub(super) lower: &'a [AllocWeight],
    pub(super) upper: &'a [AllocWeight],
    pub(super) verbosity: u8,
}

impl Constrainer<'_> {
    /// Move constraints into a link chain onto its head, and constraints
    /// out of it onto its tail. The chain is contiguous in every schedule, so
    /// this changes nothing but gives the closure more to work with.
    pub(super) fn slide_links(&mut self) -> Result<bool> {
        let mut changed = false;
        for chain in self.graph.link_chains() {
            let members: FxHashSet<OpAddress> = chain.iter().copied().collect();
            let (head, tail) = (chain[0], chain[chain.len() - 1]);
            for (i, &id) in chain.iter().enumerate() {
                if i + 1 != chain.len() {
                    let link = self.graph.op(id).fwd_link();
                    let outs = self.graph.op(id).outs().to_vec();
                    for out in outs {
                        if Some(out) != link && !members.contains(&out) {
                            self.graph.remove_constraint(id, out)?;
                            self.graph.insert_constraint(tail, out)?;
                            changed = true;
                        }
                    }
                }
                if i != 0 {
                    let link = self.graph.op(id).bwd_link();
                    let ins = self.graph.op(id).ins().to_vec();
                    for input in ins {
                        if Some(input) != link && !members.contains(&input) {
                            self.graph.remove_constraint(input, id)?;
                            self.graph.insert_constraint(input, head)?;
                            changed = true;
                        }
                    }
                }
            }
        }
        Ok(changed)
    }

    /// Link each tight pair `(a, b)` where scheduling `b` lowers liveness at
    /// least as much as scheduling `a` can raise it. Running `b` straight
    /// after `a` is then never worse.
    pub(super) fn link_tight_drops(&mut self) -> Result<bool> {
        let new_links: Vec<(OpAddress, OpAddress)> = self
            .graph
            .tight_pairs()
            .into_iter()
            .filter(|&(a, b)| {
                self.upper[b] <= self.lower[a]
                    && !self.graph.op(a).has_fwd_link()
                    && !self.graph.op(b).has_bwd_link()
            })
            .collect();
        let n_inserted = self.insert_links(&new_links)?;
        log_checks!(self.verbosity, "link_tight_drops inserted {} links", n_inserted);
        Ok(n_inserted > 0)
    }

    /// Link each tight pair whose liveness change interval overlaps that of
    /// no Op unordered with the pair's first Op.
    pub(super) fn link_close_tight_pairs(&mut self) -> Result<bool> {
        let n_ops = self.graph.n_ops();
        let mut new_links = Vec::new();
        for (before, after) in self.graph.tight_pairs() {
            if self.graph.op(before).has_fwd_link() || self.graph.op(after).has_bwd_link() {
                continue;
            }
            let low = self.lower[before].min(self.lower[after]);
            let upp = self.upper[before].max(self.upper[after]);
            //      low   upp
            //  ....xxxxxxx..  the pair
            //  ..xxxxx......  another Op
            //    l   u
            // they intersect if low < u and l < upp
            let overlaps = (0..n_ops).any(|id| {
                id != before
                    && self.closure.unconstrained_in_both_directions(id, before)
                    && low < self.upper[id]
                    && self.lower[id] < upp
            });
            if !overlaps {
                new_links.push((before, after));
            }
        }
        let n_inserted = self.insert_links(&new_links)?;
        log_checks!(
            self.verbosity,
            "link_close_tight_pairs inserted {} links",
            n_inserted
        );
        Ok(n_inserted > 0)
    }

    /// Insert each link which keeps the graph schedulable. A tight pair
    /// whose chains are joined by another path through a third Op cannot be
    /// made adjacent.
    fn insert_links(&mut self, links: &[(OpAddress, OpAddress)]) -> Result<usize> {
        let mut n_inserted = 0;
        for &(a, b) in links {
            if self.graph.can_link(a, b) {
                self.graph.insert_link(a, b)?;
                n_inserted += 1;
            }
        }
        Ok(n_inserted)
    }

    /// For two tight chains with the same inputs and the same outputs, if
    /// running a prefix of one always costs no more than the same-length
    /// prefix of the other, the cheaper chain goes first, Op by Op.
    ///
    /// Chains with linked Ops are left alone: a constraint onto an Op with a
    /// backward link would have to fit inside the link.
    pub(super) fn constrain_parallel_chains(&mut self) -> Result<bool> {
        let mut new_constraints = Vec::new();
        for a in 0..self.graph.n_ops() {
            let identical = self.graph.identical_ins(a);
            if identical.len() <= 1 {
                continue;
            }
            let a_chain = self.graph.tight_chain_from(a);
            if self.has_links(&a_chain) {
                continue;
            }
            let a_end = a_chain[a_chain.len() - 1];
            for &b in identical.iter().filter(|&&b| b != a) {
                let b_chain = self.graph.tight_chain_from(b);
                let b_end = b_chain[b_chain.len() - 1];
                if a_chain.len() < b_chain.len()
                    || self.has_links(&b_chain)
                    || self.graph.op(a_end).outs() != self.graph.op(b_end).outs()
                {
                    continue;
                }
                if self.a_chain_first(&a_chain, &b_chain) {
                    for (&x, &y) in a_chain.iter().zip(&b_chain) {
                        if !self.graph.op(x).has_out(y) {
                            new_constraints.push((x, y));
                        }
                    }
                }
            }
        }

        new_constraints.sort_unstable();
        new_constraints.dedup();
        let mut n_inserted = 0;
        for &(x, y) in &new_constraints {
            // a pair of chains which are both cheaper than each other at every
            // prefix would otherwise be constrained both ways
            if self.graph.op(y).has_out(x) || self.closure.constrained(y, x) {
                continue;
            }
            self.graph.insert_constraint(x, y)?;
            if self.graph.is_schedulable() {
                n_inserted += 1;
            } else {
                self.graph.remove_constraint(x, y)?;
            }
        }
        log_checks!(
            self.verbosity,
            "constrain_parallel_chains inserted {} constraints",
            n_inserted
        );
        Ok(n_inserted > 0)
    }

    fn has_links(&self, chain: &[OpAddress]) -> bool {
        chain.iter().any(|&op| {
            let op = self.graph.op(op);
            op.has_fwd_link() || op.has_bwd_link()
        })
    }

    /// True if, at every prefix length of `b_chain`, the most the `a_chain`
    /// prefix can raise liveness is below the least the `b_chain` prefix can.
    /// Allocs shared by both chains at the same position are left out.
    fn a_chain_first(&self, a_chain: &[OpAddress], b_chain: &[OpAddress]) -> bool {
        let mut running_upp = AllocWeight::zero();
        let mut running_low = AllocWeight::zero();
        for (&x, &y) in a_chain.iter().zip(b_chain) {
            let mut upp_a = self.upper[x];
            let mut low_b = self.lower[y];
            for &alloc in self.graph.op(y).allocs() {
                if !self.graph.op(x).has_alloc(alloc) {
                    continue;
                }
                let shared = self.graph.alloc(alloc);
                let neg_w = -shared.weight();
                let mut ignored = AllocWeight::zero();
                let status = self.closure.get_extremum_status(x, shared.ops());
                update_from_first_final(&mut ignored, &mut upp_a, neg_w, status);
                let status = self.closure.get_extremum_status(y, shared.ops());
                update_from_first_final(&mut low_b, &mut ignored, neg_w, status);
            }
            running_upp += upp_a;
            running_low += low_b;
            if !(running_upp < running_low || (running_upp == running_low && x < y)) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizations::Optimizer;

    fn with_constrainer<T>(g: &mut Graph, f: impl FnOnce(&mut Constrainer<'_>) -> T) -> T {
        let mut opt = Optimizer::new(g, 0).unwrap();
        let mut c = opt.constrainer();
        f(&mut c)
    }

    #[test]
    fn test_slide_links_moves_edges_to_chain_ends() {
        // 0 -> 1 => 2 => 3 -> 4 with side edges 5 -> 2 and 2 -> 6
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c", "d", "e", "f", "g"]);
        g.insert_constraints(&[(0, 1), (3, 4), (5, 2), (2, 6)]).unwrap();
        g.insert_link(1, 2).unwrap();
        g.insert_link(2, 3).unwrap();
        assert!(with_constrainer(&mut g, |c| c.slide_links().unwrap()));
        assert!(g.op(5).has_out(1) && !g.op(5).has_out(2));
        assert!(g.op(3).has_out(6) && !g.op(2).has_out(6));
        assert_eq!(g.op(2).fwd_link(), Some(3));
        assert!(!with_constrainer(&mut g, |c| c.slide_links().unwrap()));
    }

    #[test]
    fn test_link_tight_drops() {
        // b frees the big Alloc that a creates
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c"]);
        g.insert_constraints(&[(0, 1), (2, 1)]).unwrap();
        let mut g2 = g.clone();

        let big = g.insert_alloc(AllocWeight::from(5.0));
        g.insert_op_allocs(&[0], big).unwrap();
        // 0 -> 1 is not tight since 1 has two inputs
        assert!(!with_constrainer(&mut g, |c| c.link_tight_drops().unwrap()));

        g2.remove_constraint(2, 1).unwrap();
        g2.insert_constraint(1, 2).unwrap();
        let big = g2.insert_alloc(AllocWeight::from(5.0));
        g2.insert_op_allocs(&[0, 1], big).unwrap();
        assert!(with_constrainer(&mut g2, |c| c.link_tight_drops().unwrap()));
        assert_eq!(g2.op(0).fwd_link(), Some(1));
    }

    /// 0 => 1, 2 => 3, with the tight pair 1 -> 2 and 0 -> 4 -> 3 around it.
    /// Linking 1 => 2 would leave 4 nowhere to go.
    fn tight_pair_around_op() -> Graph {
        let mut g = Graph::new();
        g.insert_ops(&["p", "a", "b", "r", "c"]);
        g.insert_link(0, 1).unwrap();
        g.insert_link(2, 3).unwrap();
        g.insert_constraints(&[(1, 2), (0, 4), (4, 3)]).unwrap();
        g
    }

    #[test]
    fn test_tight_pair_links_keep_graph_schedulable() {
        let mut g = tight_pair_around_op();
        assert_eq!(g.tight_pairs(), vec![(1, 2)]);
        assert!(!with_constrainer(&mut g, |c| c.link_tight_drops().unwrap()));
        assert!(!with_constrainer(&mut g, |c| c.link_close_tight_pairs().unwrap()));
        assert_eq!(g.op(1).fwd_link(), None);
        assert!(g.is_schedulable());
    }

    #[test]
    fn test_link_close_tight_pairs() {
        // tight pair 0 -> 1, with 2 unordered and a big Alloc change
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c"]);
        g.insert_constraint(0, 1).unwrap();
        let mut quiet = g.clone();
        let alloc = g.insert_alloc(AllocWeight::from(3.0));
        g.insert_op_allocs(&[2], alloc).unwrap();
        let pair = g.insert_alloc(AllocWeight::from(1.0));
        g.insert_op_allocs(&[0, 1], pair).unwrap();
        // Op 2 can run alongside, and its interval [0, 0] is inside [-1, 1]
        assert!(!with_constrainer(&mut g, |c| c.link_close_tight_pairs().unwrap()));

        // nothing else can run alongside the pair
        quiet.insert_constraint(1, 2).unwrap();
        assert!(with_constrainer(&mut quiet, |c| c.link_close_tight_pairs().unwrap()));
        assert_eq!(quiet.op(0).fwd_link(), Some(1));
    }

    #[test]
    fn test_constrain_parallel_chains_orders_cheaper_first() {
        // 0 -> {1 -> 2, 3 -> 4} -> 5; chain 1-2 frees memory, 3-4 holds it
        let mut g = Graph::new();
        g.insert_ops(&["in", "a0", "a1", "b0", "b1", "out"]);
        g.insert_constraints(&[(0, 1), (1, 2), (2, 5), (0, 3), (3, 4), (4, 5)])
            .unwrap();
        let from_input = g.insert_alloc(AllocWeight::from(4.0));
        g.insert_op_allocs(&[0, 1], from_input).unwrap();
        let b_out = g.insert_alloc(AllocWeight::from(2.0));
        g.insert_op_allocs(&[3, 4, 5], b_out).unwrap();

        assert!(with_constrainer(&mut g, |c| c.constrain_parallel_chains().unwrap()));
        assert!(g.op(1).has_out(3));
        assert!(g.op(2).has_out(4));
        assert!(g.is_schedulable());
    }

    #[test]
    fn test_constrain_parallel_chains_skips_linked_chains() {
        // 0 => 2 and 0 -> 1, both into 3. Op 2 creates a big Alloc, so Op 1
        // is cheaper, but 1 cannot go between 0 and 2
        let mut g = Graph::new();
        g.insert_ops(&["a", "x", "y", "out"]);
        g.insert_link(0, 2).unwrap();
        g.insert_constraints(&[(0, 1), (1, 3), (2, 3)]).unwrap();
        let big = g.insert_alloc(AllocWeight::from(5.0));
        g.insert_op_allocs(&[2, 3], big).unwrap();
        assert_eq!(g.identical_ins(1), vec![1, 2]);

        assert!(!with_constrainer(&mut g, |c| c.constrain_parallel_chains().unwrap()));
        assert!(!g.op(1).has_out(2));
        assert!(g.is_schedulable());
    }
}
