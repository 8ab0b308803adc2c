//! Chain detection and graph contraction.
//!
//! A chain of Ops which will always be scheduled contiguously can be replaced
//! by a single Op carrying the union of the chain's constraints and Allocs.
//! Scheduling the smaller graph and expanding the result gives a schedule of
//! the original graph.

use super::{Graph, OpAddress};
use crate::{Result, ShiftError};

/// A contracted graph and the map back to the graph it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedGraph {
    /// The contracted graph.
    pub child: Graph,
    /// `parents[c]` lists the parent Ops of child Op `c`, in chain order.
    pub parents: Vec<Vec<OpAddress>>,
}

impl MergedGraph {
    /// Expand a schedule of the child graph into one of the parent graph.
    pub fn expand_schedule(&self, child_schedule: &[OpAddress]) -> Vec<OpAddress> {
        child_schedule
            .iter()
            .flat_map(|&c| self.parents[c].iter().copied())
            .collect()
    }
}

impl Graph {
    /// Pairs `(a, b)` where `b` is the only output of `a` and `a` is the only
    /// input of `b`.
    pub fn tight_pairs(&self) -> Vec<(OpAddress, OpAddress)> {
        self.ops
            .iter()
            .filter_map(|op| self.tight_next(op.address()).map(|b| (op.address(), b)))
            .collect()
    }

    fn tight_next(&self, a: OpAddress) -> Option<OpAddress> {
        match self.ops[a].outs() {
            [b] if self.ops[*b].n_ins() == 1 => Some(*b),
            _ => None,
        }
    }

    /// The longest tight chain starting at `a` (always contains `a`).
    pub fn tight_chain_from(&self, a: OpAddress) -> Vec<OpAddress> {
        let mut chain = vec![a];
        let mut current = a;
        while let Some(next) = self.tight_next(current) {
            chain.push(next);
            current = next;
        }
        chain
    }

    /// All maximal tight chains of length at least 2, ordered by first Op.
    pub fn tight_chains(&self) -> Vec<Vec<OpAddress>> {
        let mut next: Vec<Option<OpAddress>> = vec![None; self.n_ops()];
        let mut has_prev = vec![false; self.n_ops()];
        for op in &self.ops {
            if let Some(b) = self.tight_next(op.address()) {
                next[op.address()] = Some(b);
                has_prev[b] = true;
            }
        }

        let mut chains = Vec::new();
        for start in 0..self.n_ops() {
            if next[start].is_some() && !has_prev[start] {
                let mut chain = vec![start];
                let mut current = start;
                while let Some(b) = next[current] {
                    chain.push(b);
                    current = b;
                }
                chains.push(chain);
            }
        }
        chains
    }

    pub fn ops_with_fwd_links(&self) -> Vec<OpAddress> {
        self.ops
            .iter()
            .filter(|op| op.has_fwd_link())
            .map(|op| op.address())
            .collect()
    }

    /// Chains of linked Ops, each from an Op with no backward link to an Op
    /// with no forward link.
    pub fn link_chains(&self) -> Vec<Vec<OpAddress>> {
        let mut chains = Vec::new();
        for head in self.ops_with_fwd_links() {
            if self.ops[head].has_bwd_link() {
                continue;
            }
            let mut chain = vec![head];
            let mut current = head;
            while let Some(next) = self.ops[current].fwd_link() {
                chain.push(next);
                current = next;
            }
            chains.push(chain);
        }
        chains
    }

    /// Contract each chain into a single Op.
    ///
    /// Child Ops from chains get the lowest addresses, in the order of
    /// `chains`; the remaining Ops follow in address order. A child Op is
    /// named `(a b c)` after its parents, requires every Alloc of its parents
    /// and inherits every constraint leaving the chain. Allocs keep their
    /// addresses and weights. Links are not carried over.
    ///
    /// A constraint from a chain Op to an earlier Op of the same chain
    /// cannot be honoured and is a [`ShiftError::ChainCycle`].
    pub fn get_merged(&self, chains: &[Vec<OpAddress>]) -> Result<MergedGraph> {
        let mut parent_to_child: Vec<Option<OpAddress>> = vec![None; self.n_ops()];
        let mut position = vec![0; self.n_ops()];
        for (child, chain) in chains.iter().enumerate() {
            for (i, &op) in chain.iter().enumerate() {
                self.check_op(op)?;
                if parent_to_child[op].is_some() {
                    return Err(ShiftError::DuplicateOp(op));
                }
                parent_to_child[op] = Some(child);
                position[op] = i;
            }
        }
        for chain in chains {
            for &from in chain {
                let backwards = self.ops[from].outs().iter().find(|&&to| {
                    parent_to_child[to] == parent_to_child[from] && position[to] < position[from]
                });
                if let Some(&to) = backwards {
                    return Err(ShiftError::ChainCycle { from, to });
                }
            }
        }

        let mut parents: Vec<Vec<OpAddress>> = chains.to_vec();
        for op in 0..self.n_ops() {
            if parent_to_child[op].is_none() {
                parent_to_child[op] = Some(parents.len());
                parents.push(vec![op]);
            }
        }
        let parent_to_child: Vec<OpAddress> = parent_to_child.into_iter().flatten().collect();

        let mut child = Graph::new();
        for alloc in &self.allocs {
            child.insert_alloc(alloc.weight());
        }
        for members in &parents {
            let names: Vec<&str> = members
                .iter()
                .map(|&p| self.ops[p].debug_string())
                .collect();
            child.insert_op(format!("({})", names.join(" ")));
        }

        for (c, members) in parents.iter().enumerate() {
            for &p in members {
                let parent = &self.ops[p];
                for &alloc in parent.allocs() {
                    child.connect_alloc(c, alloc);
                }
                for &out in parent.outs() {
                    let out_child = parent_to_child[out];
                    if out_child != c {
                        child.connect(c, out_child);
                    }
                }
            }
        }

        Ok(MergedGraph { child, parents })
    }

    pub fn get_link_merged(&self) -> Result<MergedGraph> {
        self.get_merged(&self.link_chains())
    }

    pub fn get_tight_merged(&self) -> Result<MergedGraph> {
        self.get_merged(&self.tight_chains())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AllocWeight;

    /// a -> b -> c -> d, with a also feeding e, and e -> d.
    fn sample() -> Graph {
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c", "d", "e"]);
        g.insert_constraints(&[(0, 1), (1, 2), (2, 3), (0, 4), (4, 3)])
            .unwrap();
        g
    }

    #[test]
    fn test_tight_pairs_and_chains() {
        let g = sample();
        assert_eq!(g.tight_pairs(), vec![(1, 2)]);
        assert_eq!(g.tight_chains(), vec![vec![1, 2]]);
        assert_eq!(g.tight_chain_from(1), vec![1, 2]);
        assert_eq!(g.tight_chain_from(0), vec![0]);
    }

    #[test]
    fn test_link_chains() {
        let mut g = sample();
        g.insert_link(1, 2).unwrap();
        g.insert_link(0, 1).unwrap();
        assert_eq!(g.link_chains(), vec![vec![0, 1, 2]]);
        assert_eq!(g.ops_with_fwd_links(), vec![0, 1]);
    }

    #[test]
    fn test_merged_graph() {
        let mut g = sample();
        let alloc = g.insert_alloc(AllocWeight::from(3.0));
        g.insert_op_allocs(&[2, 4], alloc).unwrap();
        let merged = g.get_merged(&[vec![1, 2]]).unwrap();
        let child = &merged.child;
        assert_eq!(child.n_ops(), 4);
        assert_eq!(merged.parents, vec![vec![1, 2], vec![0], vec![3], vec![4]]);
        assert_eq!(child.op(0).debug_string(), "(b c)");
        assert_eq!(child.op(1).debug_string(), "(a)");
        // (b c) -> d, a -> (b c), a -> e, e -> d
        assert_eq!(child.op(0).outs(), &[2]);
        assert_eq!(child.op(1).outs(), &[0, 3]);
        assert_eq!(child.op(3).outs(), &[2]);
        assert_eq!(child.alloc(alloc).ops(), &[0, 3]);
        assert_eq!(merged.expand_schedule(&[1, 3, 0, 2]), vec![0, 4, 1, 2, 3]);
    }

    #[test]
    fn test_merged_rejects_overlapping_chains() {
        let g = sample();
        assert!(matches!(
            g.get_merged(&[vec![0, 1], vec![1, 2]]),
            Err(ShiftError::DuplicateOp(1))
        ));
        assert!(g.get_merged(&[vec![0, 9]]).is_err());
    }

    #[test]
    fn test_merged_rejects_constraint_back_along_chain() {
        let mut g = sample();
        g.insert_constraint(3, 0).unwrap();
        assert!(matches!(
            g.get_merged(&[vec![0, 1, 2, 3]]),
            Err(ShiftError::ChainCycle { from: 3, to: 0 })
        ));
        // a forward skip within the chain is fine
        let merged = sample().get_merged(&[vec![0, 1, 2, 3]]).unwrap();
        assert_eq!(merged.child.n_ops(), 2);
    }

    #[test]
    fn test_tight_merged() {
        let g = sample();
        let merged = g.get_tight_merged().unwrap();
        assert_eq!(merged.child.n_ops(), 4);
        assert!(merged.child.is_schedulable());
    }
}
