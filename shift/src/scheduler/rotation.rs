//! Greedy rotation: scan windows of the schedule, move each to its cheapest
//! legal position, and grow the window when nothing improves.
//!
//! Window size starts at 1. A round visits every Op (in a seeded shuffled
//! order) and considers the window starting at it. After a round with no
//! change the window grows by one, and after a round with changes that
//! follows unchanged rounds it drops back to 1. Rotation stops when no
//! window of the current size could move at all, or the budget is spent.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::{DebugMode, RotationAlgo, Settings};
use crate::graph::{AllocAddress, OpAddress};
use crate::{log_changes, log_debug};
use crate::{AllocWeight, Result, ShiftError};

use super::change::{ScheduleChange, ShiftAndCost};
use super::core::{RotationStats, ScheduledGraph, Termination};
use super::ripple::RippleScratch;

/// Relative tolerance when comparing costs from the two algorithms, and
/// when checking accumulated improvements against recomputed liveness.
const COST_TOLERANCE: f64 = 1e-5;

fn sorted_unique(mut v: Vec<usize>) -> Vec<usize> {
    v.sort_unstable();
    v.dedup();
    v
}

impl ScheduledGraph {
    pub(super) fn allocs_in_range(&self, start: usize, end: usize) -> Vec<AllocAddress> {
        sorted_unique(
            self.sch_to_allocs[start..end]
                .iter()
                .flatten()
                .copied()
                .collect(),
        )
    }

    fn ins_in_range(&self, start: usize, end: usize) -> Vec<OpAddress> {
        sorted_unique(
            self.sch_to_op[start..end]
                .iter()
                .flat_map(|&op| self.graph.op(op).ins().iter().copied())
                .collect(),
        )
    }

    fn outs_in_range(&self, start: usize, end: usize) -> Vec<OpAddress> {
        sorted_unique(
            self.sch_to_op[start..end]
                .iter()
                .flat_map(|&op| self.graph.op(op).outs().iter().copied())
                .collect(),
        )
    }

    /// Earliest schedule index at or after `start + n` of a consumer of the
    /// window `[start, start + n)`, or `n_ops` if there is none.
    pub(super) fn get_first_consumer(&self, start: usize, n: usize) -> usize {
        let end = start + n;
        self.sch_to_op[start..end]
            .iter()
            .filter_map(|&op| {
                let outs = &self.op_to_out_sch[op];
                outs.get(outs.partition_point(|&s| s < end)).copied()
            })
            .min()
            .unwrap_or(self.n_ops())
    }

    /// Latest schedule index before `start` of a producer of the window
    /// `[start, start + n)`.
    pub(super) fn get_last_producer(&self, start: usize, n: usize) -> Option<usize> {
        self.sch_to_op[start..start + n]
            .iter()
            .filter_map(|&op| {
                let ins = &self.op_to_in_sch[op];
                match ins.partition_point(|&s| s < start) {
                    0 => None,
                    p => Some(ins[p - 1]),
                }
            })
            .max()
    }

    fn n_can_bwd_at(&self, start: usize, n: usize) -> usize {
        match self.get_last_producer(start, n) {
            Some(p) => start - p - 1,
            None => start,
        }
    }

    fn n_can_fwd_at(&self, start: usize, n: usize) -> usize {
        self.get_first_consumer(start, n) - start - n
    }

    /// Number of windows of size `n`.
    fn n_windows(&self, n: usize) -> usize {
        (self.n_ops() + 1).saturating_sub(n)
    }

    pub(super) fn set_can_can(&mut self, n: usize) {
        let n_windows = self.n_windows(n);
        self.n_can_bwd = (0..n_windows).map(|i| self.n_can_bwd_at(i, n)).collect();
        self.n_can_fwd = (0..n_windows).map(|i| self.n_can_fwd_at(i, n)).collect();
    }

    /// Move the window-size dependent bounds from `old_n` to `new_n`.
    pub(super) fn update_can_can(&mut self, old_n: usize, new_n: usize) {
        if new_n != old_n + 1 {
            self.set_can_can(new_n);
            return;
        }

        // growing by one: window [i, i + new_n) is window [i, i + old_n) plus
        // the Op at i + old_n, and is also the Op at i plus window
        // [i + 1, i + 1 + old_n)
        self.n_can_fwd.pop();
        self.n_can_bwd.pop();
        let n_windows = self.n_windows(new_n);
        for i in 0..n_windows {
            let final_op = self.sch_to_op[i + new_n - 1];
            let ins = &self.op_to_in_sch[final_op];
            let p = ins.partition_point(|&s| s < i);
            if p > 0 {
                self.n_can_bwd[i] = self.n_can_bwd[i].min(i - 1 - ins[p - 1]);
            }

            if i + 1 == n_windows {
                self.n_can_fwd[i] = 0;
            } else {
                let mut can_fwd = self.n_can_fwd[i + 1];
                let outs = &self.op_to_out_sch[self.sch_to_op[i]];
                if let Some(&c) = outs.get(outs.partition_point(|&s| s < i + new_n)) {
                    can_fwd = can_fwd.min(c - (i + new_n));
                }
                self.n_can_fwd[i] = can_fwd;
            }
        }
    }

    /// True if moving `[start0, start0 + n)` to start at `start1 > start0`
    /// breaks no link at the edges of the moved blocks.
    pub(super) fn is_link_preserving(&self, start0: usize, start1: usize, n: usize) -> bool {
        let x0 = start0;
        let o0 = start0 + n;
        let o1 = start1 + n;
        let op = |i: usize| self.graph.op(self.sch_to_op[i]);
        !(op(x0).has_bwd_link()
            || op(o0 - 1).has_fwd_link()
            || op(o0).has_bwd_link()
            || op(o1 - 1).has_fwd_link())
    }

    /// Sum over Allocs of weight times span, for a map from Op to schedule
    /// index.
    fn total_liveness(&self, op_to_sch: &[usize]) -> AllocWeight {
        self.graph
            .allocs()
            .iter()
            .filter(|alloc| alloc.n_ops() > 0)
            .map(|alloc| {
                let (lo, hi) = alloc
                    .ops()
                    .iter()
                    .map(|&op| op_to_sch[op])
                    .fold((usize::MAX, 0), |(lo, hi), s| (lo.min(s), hi.max(s)));
                alloc.weight() * ((hi - lo + 1) as f64)
            })
            .sum()
    }

    /// Best move of the window at `start0` by recomputing the total cost of
    /// every candidate from scratch.
    pub(crate) fn get_best_shift_simple(&self, start0: usize, n: usize) -> Result<ShiftAndCost> {
        let can_bwd = self.n_can_bwd_at(start0, n);
        let can_fwd = self.n_can_fwd_at(start0, n);
        if can_bwd != self.n_can_bwd[start0] || can_fwd != self.n_can_fwd[start0] {
            return Err(ShiftError::Correctness(format!(
                "stale bounds for window ({}, {}): back {} vs {}, forward {} vs {}",
                start0, n, self.n_can_bwd[start0], can_bwd, self.n_can_fwd[start0], can_fwd
            )));
        }

        // a move smaller than n is the move of the skipped block by n, which
        // is considered with that block as the window
        let s0 = if can_bwd < n { start0 } else { start0 - can_bwd };
        let s1 = if can_fwd < n { start0 } else { start0 + can_fwd + 1 };

        let current = self.total_liveness(&self.op_to_sch);
        let mut best = ShiftAndCost {
            shift: 0,
            cost: current,
        };
        let mut candidate = self.sch_to_op.clone();
        let mut op_to_sch = self.op_to_sch.clone();
        for start1 in s0..s1 {
            if start1 == start0 {
                continue;
            }
            let (a, b, c) = if start0 < start1 {
                (start0, start0 + n, start1 + n)
            } else {
                (start1, start0, start0 + n)
            };
            candidate.copy_from_slice(&self.sch_to_op);
            candidate[a..c].rotate_left(b - a);
            for (i, &op) in candidate.iter().enumerate().take(c).skip(a) {
                op_to_sch[op] = i;
            }
            let total = self.total_liveness(&op_to_sch);
            for (i, &op) in self.sch_to_op.iter().enumerate().take(c).skip(a) {
                op_to_sch[op] = i;
            }

            let preserving = if start0 < start1 {
                self.is_link_preserving(start0, start1, n)
            } else {
                self.is_link_preserving(start1, start1 + n, start0 - start1)
            };
            if total < best.cost && preserving {
                best = ShiftAndCost {
                    shift: start1 as i64 - start0 as i64,
                    cost: total,
                };
            }
        }
        best.cost -= current;
        Ok(best)
    }

    /// Best move of the window at `start`, with the selected algorithm. In
    /// debug mode the result is checked against the simple algorithm.
    fn get_best_shift(
        &self,
        settings: &Settings,
        scratch: &mut RippleScratch,
        start: usize,
        n: usize,
    ) -> Result<ShiftAndCost> {
        let found = match settings.rotation_algo {
            RotationAlgo::Ripple => self.get_best_shift_ripple(scratch, start, n),
            RotationAlgo::Simple => self.get_best_shift_simple(start, n)?,
        };
        if settings.debug_mode == DebugMode::On {
            let reference = self.get_best_shift_simple(start, n)?;
            if !found.agrees_with(&reference, COST_TOLERANCE) {
                return Err(ShiftError::RippleMismatch {
                    start,
                    n_to_shift: n,
                    details: format!(
                        "{} suggests {}, Simple suggests {}\n{}",
                        settings.rotation_algo,
                        found,
                        reference,
                        self.liveness_string()
                    ),
                });
            }
        }
        Ok(found)
    }

    fn update_susceptible(&mut self, a: usize, b: usize) {
        for i in a..b {
            let op = self.sch_to_op[i];
            for &input in self.graph.op(op).ins() {
                if self.op_to_sch[input] < a {
                    self.susceptible[input] = true;
                    self.susceptible[op] = true;
                }
            }
            for &output in self.graph.op(op).outs() {
                if self.op_to_sch[output] >= b {
                    self.susceptible[output] = true;
                    self.susceptible[op] = true;
                }
            }
        }
    }

    /// Apply `change` and update every derived array.
    pub(crate) fn apply_change(&mut self, change: &ScheduleChange) {
        let n = change.n_to_shift;
        let (x0, o0, o1) = change.bounds();
        let touched_allocs = self.allocs_in_range(x0, o1);

        self.update_susceptible(x0, o0);
        self.update_susceptible(o0, o1);

        self.sch_to_op[x0..o1].rotate_left(o0 - x0);
        for i in x0..o1 {
            self.op_to_sch[self.sch_to_op[i]] = i;
        }
        for alloc in touched_allocs {
            self.set_alloc_to_sch(alloc);
        }
        self.sch_to_allocs[x0..o1].rotate_left(o0 - x0);

        let consumers = self.outs_in_range(x0, o1);
        let producers = self.ins_in_range(x0, o1);
        for &c in &consumers {
            self.set_op_to_in_sch(c);
        }
        for &p in &producers {
            self.set_op_to_out_sch(p);
        }

        let n_windows = self.n_windows(n);

        let fwd_start = producers
            .iter()
            .map(|&p| self.op_to_sch[p])
            .fold(x0, usize::min)
            .saturating_sub(n + 1);
        let fwd_end = o1.min(n_windows);
        for i in fwd_start..fwd_end {
            self.n_can_fwd[i] = self.n_can_fwd_at(i, n);
        }

        let bwd_start = x0.saturating_sub(n + 1);
        let bwd_end = consumers
            .iter()
            .map(|&c| self.op_to_sch[c] + 1)
            .fold(o1, usize::max)
            .min(n_windows);
        for i in bwd_start..bwd_end {
            self.n_can_bwd[i] = self.n_can_bwd_at(i, n);
        }
    }

    /// Improve the schedule with rotation moves until convergence or until
    /// the budget in `settings` is spent.
    pub(super) fn greedy_rotate(&mut self, settings: &Settings) -> Result<()> {
        let verbosity = self.verbosity;
        let budget = settings.rotation_termination;
        let n_ops = self.n_ops();
        let started = Instant::now();

        let mut rng = StdRng::seed_from_u64(settings.seed);
        let mut order: Vec<OpAddress> = (0..n_ops).collect();
        order.shuffle(&mut rng);
        let mut scratch = RippleScratch::new(self.n_allocs());

        let initial_sum = self.sum_liveness();
        let initial_max = self.max_liveness();
        let mut accumulated = AllocWeight::zero();
        self.stats = RotationStats {
            initial_sum_liveness: initial_sum,
            final_sum_liveness: initial_sum,
            ..Default::default()
        };

        let mut n_to_shift = 1;
        if self.n_can_fwd.len() != self.n_windows(n_to_shift) {
            self.set_can_can(n_to_shift);
        }
        let mut no_change_since_start = true;
        let mut keep_going = !budget.is_exhausted();
        self.termination = if keep_going {
            Termination::Converged
        } else if budget.time_limit_seconds <= 0.0 {
            Termination::TimeLimited
        } else {
            Termination::SwapLimited
        };
        self.susceptible = vec![true; n_ops];

        while keep_going {
            self.stats.rounds += 1;
            let current = std::mem::replace(&mut self.susceptible, vec![false; n_ops]);
            let mut n_changes_round: u64 = 0;
            let mut delta_round = AllocWeight::zero();

            for &op0 in &order {
                let start0 = self.op_to_sch[op0];
                if start0 + n_to_shift > n_ops {
                    continue;
                }
                // a window whose first Op is linked backward, or whose last Op
                // is linked forward, cannot move
                let op1 = self.sch_to_op[start0 + n_to_shift - 1];
                if self.graph.op(op0).has_bwd_link() || self.graph.op(op1).has_fwd_link() {
                    continue;
                }
                if settings.filter_susceptible
                    && self.sch_to_op[start0..start0 + n_to_shift]
                        .iter()
                        .all(|&op| !current[op])
                {
                    continue;
                }

                let best = self.get_best_shift(settings, &mut scratch, start0, n_to_shift)?;
                if best.cost < AllocWeight::zero() {
                    let start1 = (start0 as i64 + best.shift) as usize;
                    let change = ScheduleChange::new(start0, start1, n_to_shift);
                    self.apply_change(&change);
                    log_debug!(verbosity, "Applied {} with cost {}", change, best.cost);
                    if settings.debug_mode == DebugMode::On {
                        self.assert_correctness()?;
                    }
                    n_changes_round += 1;
                    delta_round += best.cost;
                    accumulated += best.cost;
                }
            }

            self.stats.changes += n_changes_round;
            no_change_since_start = no_change_since_start && n_changes_round == 0;

            let mut out_of_budget = None;
            if started.elapsed().as_secs_f64() > budget.time_limit_seconds {
                out_of_budget = Some(Termination::TimeLimited);
            }
            if self.stats.changes >= budget.swap_limit_count.max(0) as u64 {
                out_of_budget = Some(Termination::SwapLimited);
            }

            let old_n = n_to_shift;
            if no_change_since_start {
                n_to_shift += 1;
                self.susceptible.fill(true);
            } else if n_changes_round == 0 {
                n_to_shift = 1;
                no_change_since_start = true;
                self.stats.resets_to_one += 1;
                self.susceptible.fill(true);
            }
            log_changes!(
                verbosity,
                "Round {}: {} changes (delta {}), window size {} -> {}",
                self.stats.rounds,
                n_changes_round,
                delta_round,
                old_n,
                n_to_shift
            );
            if old_n != n_to_shift {
                self.update_can_can(old_n, n_to_shift);
            }

            // stop once no window of the next size can move past a neighbour
            // block at least as large as itself
            let converged = no_change_since_start
                && !self
                    .n_can_fwd
                    .iter()
                    .zip(&self.n_can_bwd)
                    .any(|(&f, &b)| f > n_to_shift || b > n_to_shift);

            if converged {
                self.termination = Termination::Converged;
                keep_going = false;
            } else if let Some(reason) = out_of_budget {
                self.termination = reason;
                keep_going = false;
            }
        }

        self.set_sch_to_liveness();
        let final_sum = self.sum_liveness();
        self.stats.final_sum_liveness = final_sum;
        let observed = final_sum - initial_sum;
        if observed.max_relative_error(&accumulated) > COST_TOLERANCE {
            return Err(ShiftError::LivenessDrift {
                accumulated: accumulated.to_string(),
                observed: observed.to_string(),
            });
        }

        log_changes!(
            verbosity,
            "Rotation finished ({}) after {} rounds and {} changes: sum liveness {} -> {}, max liveness {} -> {}",
            self.termination,
            self.stats.rounds,
            self.stats.changes,
            initial_sum,
            final_sum,
            initial_max,
            self.max_liveness()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    /// Isolated Ops `0..n` scheduled in address order, and Allocs over the
    /// given Op sets.
    fn scheduled(n: usize, allocs: &[&[OpAddress]]) -> ScheduledGraph {
        let mut g = Graph::new();
        for i in 0..n {
            g.insert_op(format!("op{}", i));
        }
        for ops in allocs {
            let a = g.insert_alloc(AllocWeight::from(1.0));
            g.insert_op_allocs(ops, a).unwrap();
        }
        ScheduledGraph::with_schedule(g, (0..n).collect(), 0)
    }

    #[test]
    fn test_first_consumer_and_last_producer() {
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c", "d", "e"]);
        g.insert_constraints(&[(0, 2), (1, 2), (2, 4), (3, 4)]).unwrap();
        let sg = ScheduledGraph::with_schedule(g, vec![0, 1, 2, 3, 4], 0);
        assert_eq!(sg.get_last_producer(2, 1), Some(1));
        assert_eq!(sg.get_last_producer(0, 2), None);
        assert_eq!(sg.get_first_consumer(2, 1), 4);
        assert_eq!(sg.get_first_consumer(2, 3), 5);
        assert_eq!(sg.n_can_bwd(), &[0, 1, 0, 3, 0]);
        assert_eq!(sg.n_can_fwd(), &[1, 0, 1, 0, 0]);
    }

    #[test]
    fn test_update_can_can_matches_recompute() {
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c", "d", "e", "f", "g"]);
        g.insert_constraints(&[(0, 3), (1, 4), (2, 6), (3, 5), (4, 6)])
            .unwrap();
        let mut sg = ScheduledGraph::with_schedule(g, (0..7).collect(), 0);
        for n in 1..8 {
            sg.update_can_can(n, n + 1);
            let (fwd, bwd) = (sg.n_can_fwd.clone(), sg.n_can_bwd.clone());
            sg.set_can_can(n + 1);
            assert_eq!(fwd, sg.n_can_fwd, "forward, window {}", n + 1);
            assert_eq!(bwd, sg.n_can_bwd, "backward, window {}", n + 1);
        }
    }

    #[test]
    fn test_simple_finds_best_move() {
        // Alloc over Ops 0 and 3: moving Op 3 to the front or to index 1
        // shrinks its span from 4 to 2, the earliest such move wins
        let sg = scheduled(4, &[&[0, 3]]);
        let best = sg.get_best_shift_simple(3, 1).unwrap();
        assert_eq!(best.shift, -3);
        assert_eq!(best.cost, AllocWeight::from(-2.0));
    }

    #[test]
    fn test_simple_respects_links() {
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c", "d", "e"]);
        g.insert_constraint(0, 4).unwrap();
        g.insert_link(1, 2).unwrap();
        let a = g.insert_alloc(AllocWeight::from(1.0));
        g.insert_op_allocs(&[2, 4], a).unwrap();
        let sg = ScheduledGraph::with_schedule(g, vec![0, 1, 2, 3, 4], 0);
        // putting Op 4 between the linked Ops 1 and 2 would be cheapest
        assert!(!sg.is_link_preserving(2, 3, 2));
        let best = sg.get_best_shift_simple(4, 1).unwrap();
        assert_eq!(best.shift, -1);
        assert_eq!(best.cost, AllocWeight::from(-1.0));
    }

    #[test]
    fn test_apply_change_keeps_state_consistent() {
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c", "d", "e", "f"]);
        g.insert_constraints(&[(0, 1), (2, 5), (3, 4)]).unwrap();
        let a = g.insert_alloc(AllocWeight::from(2.0));
        g.insert_op_allocs(&[0, 4], a).unwrap();
        let mut sg = ScheduledGraph::with_schedule(g, (0..6).collect(), 0);
        sg.apply_change(&ScheduleChange::new(2, 3, 1));
        assert_eq!(sg.schedule(), &[0, 1, 3, 2, 4, 5]);
        sg.assert_correctness().unwrap();
        sg.apply_change(&ScheduleChange::new(3, 0, 2));
        assert_eq!(sg.schedule(), &[2, 4, 0, 1, 3, 5]);
        assert!(sg.assert_correctness().is_err());

        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c", "d", "e", "f"]);
        g.insert_constraints(&[(0, 1), (1, 5), (2, 3)]).unwrap();
        let mut sg = ScheduledGraph::with_schedule(g, (0..6).collect(), 0);
        sg.set_can_can(2);
        sg.apply_change(&ScheduleChange::new(2, 3, 2));
        assert_eq!(sg.schedule(), &[0, 1, 4, 2, 3, 5]);
        sg.assert_correctness().unwrap();
        let (fwd, bwd) = (sg.n_can_fwd.clone(), sg.n_can_bwd.clone());
        sg.set_can_can(2);
        assert_eq!(fwd, sg.n_can_fwd);
        assert_eq!(bwd, sg.n_can_bwd);
    }

    #[test]
    fn test_susceptible_marks_neighbours() {
        let mut g = Graph::new();
        g.insert_ops(&["a", "b", "c", "d"]);
        g.insert_constraints(&[(0, 2), (2, 3)]).unwrap();
        let mut sg = ScheduledGraph::with_schedule(g, vec![0, 1, 2, 3], 0);
        sg.susceptible.fill(false);
        sg.apply_change(&ScheduleChange::new(2, 1, 1));
        assert_eq!(sg.schedule(), &[0, 2, 1, 3]);
        assert_eq!(sg.susceptible, vec![true, false, true, true]);
    }
}
