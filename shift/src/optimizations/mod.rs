//! Transitive-closure optimizations: graph rewrites run before scheduling.
//!
//! Each pass adds constraints or links, or detaches Allocs, in ways which
//! cannot make the best reachable schedule worse. Passes run in rounds. The
//! closure is refreshed at the start of every round, and a pass which changed
//! nothing is skipped in the next round.

mod alloc_simplifier;
mod constrainer;

use crate::config::{Tco, TransitiveClosureOptimizations};
use crate::graph::{Edges, Graph};
use crate::log_checks;
use crate::transitive_closure::{IsFinal, IsFirst, TransitiveClosure};
use crate::{AllocWeight, Result, ShiftError};

use constrainer::Constrainer;

/// Widen `[lower, upper]` by the liveness change an Op contributes to an
/// Alloc of weight `w`, given whether the Op is the Alloc's first and final
/// Op. Being first makes the Alloc live (`+w`), being final frees it (`-w`).
pub(crate) fn update_from_first_final(
    lower: &mut AllocWeight,
    upper: &mut AllocWeight,
    w: AllocWeight,
    status: (IsFirst, IsFinal),
) {
    let zero = AllocWeight::zero();
    let starts = match status.0 {
        IsFirst::Yes => (w, w),
        IsFirst::No => (zero, zero),
        IsFirst::Maybe => (w.min(zero), w.max(zero)),
    };
    let ends = match status.1 {
        IsFinal::Yes => (-w, -w),
        IsFinal::No => (zero, zero),
        IsFinal::Maybe => ((-w).min(zero), (-w).max(zero)),
    };
    *lower += starts.0 + ends.0;
    *upper += starts.1 + ends.1;
}

struct Optimizer<'a> {
    graph: &'a mut Graph,
    closure: TransitiveClosure,
    // bounds on the liveness change of scheduling each Op
    lower: Vec<AllocWeight>,
    upper: Vec<AllocWeight>,
    verbosity: u8,
}

impl<'a> Optimizer<'a> {
    fn new(graph: &'a mut Graph, verbosity: u8) -> Result<Self> {
        let closure = TransitiveClosure::new(&graph.fwd_edges())?;
        let mut optimizer = Self {
            graph,
            closure,
            lower: Vec::new(),
            upper: Vec::new(),
            verbosity,
        };
        optimizer.finalize()?;
        Ok(optimizer)
    }

    fn rebuild(&mut self) -> Result<()> {
        self.closure = TransitiveClosure::new(&self.graph.fwd_edges())?;
        self.finalize()
    }

    fn update(&mut self, new_edges: &Edges) -> Result<()> {
        self.closure.update(new_edges)?;
        self.finalize()
    }

    /// Drop constraints implied by others, and recompute the bounds.
    fn finalize(&mut self) -> Result<()> {
        let redundants = self.closure.flattened_redundants(&self.graph.fwd_edges());
        log_checks!(
            self.verbosity,
            "Removing {} redundant constraints",
            redundants.len()
        );
        for (from, to) in redundants {
            // a link's constraint is needed for the link
            if self.graph.op(from).fwd_link() != Some(to) {
                self.graph.remove_constraint(from, to)?;
            }
        }

        let n_ops = self.graph.n_ops();
        self.lower = vec![AllocWeight::zero(); n_ops];
        self.upper = vec![AllocWeight::zero(); n_ops];
        for alloc in self.graph.allocs() {
            let statuses = self.closure.get_extremum_statuses(alloc.ops());
            for (&op, &status) in alloc.ops().iter().zip(&statuses) {
                update_from_first_final(
                    &mut self.lower[op],
                    &mut self.upper[op],
                    alloc.weight(),
                    status,
                );
            }
        }
        Ok(())
    }

    fn run(&mut self, tco: Tco) -> Result<bool> {
        match tco {
            Tco::SlideLinks => self.constrainer().slide_links(),
            Tco::LinkTightDrops => self.constrainer().link_tight_drops(),
            Tco::LinkCloseTightPairs => self.constrainer().link_close_tight_pairs(),
            Tco::ConstrainParallelChains => self.constrainer().constrain_parallel_chains(),
            Tco::DisconnectAllocsWithZeroWeight => {
                alloc_simplifier::disconnect_allocs_with_zero_weight(self.graph)
            }
            Tco::DisconnectAllocsWithOneOp => {
                alloc_simplifier::disconnect_allocs_with_one_op(self.graph)
            }
            Tco::DisconnectInbetweenerAllocs => {
                alloc_simplifier::disconnect_inbetweener_allocs(self.graph, &self.closure)
            }
            Tco::DisconnectFixedDurationAllocs => {
                alloc_simplifier::disconnect_fixed_duration_allocs(self.graph, &self.closure)
            }
            Tco::CombineAllocsWithCommonOps => {
                alloc_simplifier::combine_allocs_with_common_ops(self.graph)
            }
        }
    }

    fn constrainer(&mut self) -> Constrainer<'_> {
        Constrainer {
            graph: &mut *self.graph,
            closure: &self.closure,
            lower: &self.lower,
            upper: &self.upper,
            verbosity: self.verbosity,
        }
    }
}

/// Run the passes enabled in `tcos` on `graph`, for at most
/// `tcos.max_iterations` rounds.
pub(crate) fn apply(
    tcos: &TransitiveClosureOptimizations,
    graph: &mut Graph,
    verbosity: u8,
) -> Result<()> {
    let all = tcos.enabled();
    if all.is_empty() {
        return Ok(());
    }

    graph.check_schedulable()?;
    log_checks!(verbosity, "Building transitive closure");
    let mut opt = Optimizer::new(graph, verbosity)?;
    let mut next_round = all.clone();
    let mut prev_edges = Edges::new();
    let mut iteration = 0;
    let mut changed_last_round = true;

    while changed_last_round && iteration < tcos.max_iterations {
        if iteration > 0 {
            let diff = opt.graph.constraint_diff_edges(&prev_edges)?;
            let n_new: usize = diff.iter().map(|outs| outs.len()).sum();
            // updating costs O(n_ops^2 / 64) per edge
            if n_new < opt.graph.n_ops() / 10 {
                log_checks!(
                    verbosity,
                    "Updating transitive closure with {} constraints, round {}",
                    n_new,
                    iteration
                );
                opt.update(&diff)?;
            } else {
                log_checks!(verbosity, "Rebuilding transitive closure, round {}", iteration);
                opt.rebuild()?;
            }
        }

        let this_round = std::mem::take(&mut next_round);
        prev_edges = opt.graph.fwd_edges();
        for &tco in &this_round {
            let changed = opt.run(tco)?;
            log_checks!(verbosity, "{} changed the graph: {}", tco, changed);
            if changed {
                opt.graph.check_schedulable().map_err(|e| {
                    ShiftError::Correctness(format!("{} left the graph unschedulable: {}", tco, e))
                })?;
            }
            if changed {
                next_round.push(tco);
            }
        }

        // a quiet round ends things only if every pass was tried in it
        if next_round.is_empty() {
            if this_round.len() == all.len() {
                changed_last_round = false;
            } else {
                next_round = all.clone();
            }
        }
        // one pass changing alone is unlikely to change again by itself
        if next_round.len() == 1 {
            next_round = all.clone();
        }
        iteration += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DebugMode, RotationAlgo, Settings};
    use crate::{ErrorKind, ScheduledGraph};
    use proptest::prelude::*;

    #[test]
    fn test_update_from_first_final() {
        let w = AllocWeight::from(3.0);
        let mut lower = AllocWeight::zero();
        let mut upper = AllocWeight::zero();
        update_from_first_final(&mut lower, &mut upper, w, (IsFirst::Yes, IsFinal::No));
        assert_eq!((lower, upper), (w, w));

        let (mut lower, mut upper) = (AllocWeight::zero(), AllocWeight::zero());
        update_from_first_final(&mut lower, &mut upper, w, (IsFirst::Maybe, IsFinal::Maybe));
        assert_eq!((lower, upper), (-w, w));

        let (mut lower, mut upper) = (AllocWeight::zero(), AllocWeight::zero());
        update_from_first_final(&mut lower, &mut upper, w, (IsFirst::Yes, IsFinal::Yes));
        assert_eq!((lower, upper), (AllocWeight::zero(), AllocWeight::zero()));

        // negative weights swap the roles of the bounds
        let (mut lower, mut upper) = (AllocWeight::zero(), AllocWeight::zero());
        update_from_first_final(&mut lower, &mut upper, -w, (IsFirst::No, IsFinal::Maybe));
        assert_eq!((lower, upper), (AllocWeight::zero(), w));
    }

    #[test]
    fn test_redundant_edges_removed() {
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c"]);
        g.insert_constraints(&[(0, 1), (1, 2), (0, 2)]).unwrap();
        let tcos = TransitiveClosureOptimizations::all_off().with_slide_links(true);
        apply(&tcos, &mut g, 0).unwrap();
        assert_eq!(g.op(0).outs(), &[1]);
        assert_eq!(g.op(1).outs(), &[2]);
    }

    #[test]
    fn test_nothing_enabled_is_a_no_op() {
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c"]);
        g.insert_constraints(&[(0, 1), (1, 2), (0, 2)]).unwrap();
        let before = g.clone();
        apply(&TransitiveClosureOptimizations::all_off(), &mut g, 0).unwrap();
        assert_eq!(g, before);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut g = Graph::new();
        g.insert_ops(&["a", "b"]);
        g.insert_constraints(&[(0, 1), (1, 0)]).unwrap();
        let err = apply(&TransitiveClosureOptimizations::all_on(), &mut g, 0).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cycle);
    }

    /// Grid of small attention-like blocks: each block reads a shared input,
    /// makes two parallel tight chains, and joins them.
    fn blocks(n_blocks: usize) -> Graph {
        let mut g = Graph::new();
        let mut prev = g.insert_op("input");
        for b in 0..n_blocks {
            let x0 = g.insert_op(format!("x0_{}", b));
            let x1 = g.insert_op(format!("x1_{}", b));
            let y0 = g.insert_op(format!("y0_{}", b));
            let y1 = g.insert_op(format!("y1_{}", b));
            let join = g.insert_op(format!("join_{}", b));
            g.insert_constraints(&[
                (prev, x0),
                (x0, x1),
                (prev, y0),
                (y0, y1),
                (x1, join),
                (y1, join),
            ])
            .unwrap();
            let big = g.insert_alloc(AllocWeight::from(4.0));
            g.insert_op_allocs(&[x0, x1, join], big).unwrap();
            let small = g.insert_alloc(AllocWeight::from(1.0));
            g.insert_op_allocs(&[y0, y1, join], small).unwrap();
            let lone = g.insert_alloc(AllocWeight::from(2.0));
            g.insert_op_alloc(x0, lone).unwrap();
            let nothing = g.insert_alloc(AllocWeight::zero());
            g.insert_op_allocs(&[x1, y1], nothing).unwrap();
            prev = join;
        }
        g
    }

    #[test]
    fn test_all_on_keeps_schedule_valid() {
        let g = blocks(4);
        let plain = ScheduledGraph::new(g.clone(), &Settings::default()).unwrap();
        let optimized = ScheduledGraph::new(
            g.clone(),
            &Settings::default().with_tcos(TransitiveClosureOptimizations::all_on()),
        )
        .unwrap();

        let edges = g.fwd_edges();
        for (from, outs) in edges.iter().enumerate() {
            for &to in outs {
                assert!(optimized.op_to_schedule(from) < optimized.op_to_schedule(to));
            }
        }

        for op in optimized.graph().ops() {
            if let Some(next) = op.fwd_link() {
                assert_eq!(
                    optimized.op_to_schedule(next),
                    optimized.op_to_schedule(op.address()) + 1
                );
            }
        }
        assert_eq!(optimized.n_ops(), plain.n_ops());
        assert!(optimized.sum_liveness() <= optimized.stats().initial_sum_liveness);
    }

    /// Random DAG over `n` Ops with edges from lower to higher addresses,
    /// links between any such pairs, and Allocs with small weights. Some
    /// graphs have Ops trapped inside a link and cannot be scheduled.
    fn linked_graph_strategy() -> impl Strategy<Value = Graph> {
        (2usize..13).prop_flat_map(|n| {
            (
                proptest::collection::vec((0..n, 0..n), 0..(2 * n)),
                proptest::collection::vec((0..n, 0..n), 0..4),
                proptest::collection::vec(
                    (proptest::collection::vec(0..n, 1..4), 0u8..5),
                    0..n,
                ),
            )
                .prop_map(move |(edges, links, allocs)| {
                    let mut g = Graph::new();
                    for i in 0..n {
                        g.insert_op(format!("op{}", i));
                    }
                    for (a, b) in edges {
                        if a < b {
                            g.insert_constraint(a, b).unwrap();
                        }
                    }
                    for (a, b) in links {
                        if a < b && !g.op(a).has_fwd_link() && !g.op(b).has_bwd_link() {
                            g.insert_link(a, b).unwrap();
                        }
                    }
                    for (ops, w) in allocs {
                        let alloc = g.insert_alloc(AllocWeight::from(w as f64));
                        g.insert_op_allocs(&ops, alloc).unwrap();
                    }
                    g
                })
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_tcos_keep_constraints_and_links(
            g in linked_graph_strategy(),
            on in proptest::collection::vec(any::<bool>(), Tco::ALL.len()),
            algo in prop_oneof![Just(RotationAlgo::Simple), Just(RotationAlgo::Ripple)]
        ) {
            let tcos = Tco::ALL
                .iter()
                .zip(&on)
                .fold(TransitiveClosureOptimizations::all_off(), |t, (&tco, &o)| {
                    t.with(tco, o)
                });
            let settings = Settings::default()
                .with_tcos(tcos)
                .with_rotation_algo(algo)
                .with_debug_mode(DebugMode::On);
            let result = ScheduledGraph::new(g.clone(), &settings);
            if !g.is_schedulable() {
                prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::Cycle);
                return Ok(());
            }

            let sg = result.unwrap();
            prop_assert_eq!(sg.n_ops(), g.n_ops());
            for (from, outs) in g.fwd_edges().iter().enumerate() {
                for &to in outs {
                    prop_assert!(sg.op_to_schedule(from) < sg.op_to_schedule(to));
                }
            }
            for op in g.ops() {
                if let Some(next) = op.fwd_link() {
                    prop_assert_eq!(
                        sg.op_to_schedule(next),
                        sg.op_to_schedule(op.address()) + 1
                    );
                }
            }
        }
    }
}
