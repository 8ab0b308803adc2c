//! Initial schedule: Kahn's algorithm over link-merged scheduling units.
//!
//! Linked Ops are contracted into one unit first, so the topological order
//! keeps them adjacent by construction. Among the ready units, only those of
//! the highest priority are candidates, and the tie-breaker picks one:
//!
//! - `Random`: uniformly, from the seeded generator.
//! - `Greedy`: the unit whose scheduling lowers current liveness the most
//!   (Allocs it finishes minus Allocs it starts). Later-ready units win ties.
//! - `Fifo`: the unit which became ready most recently.

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::{KahnDecider, KahnTieBreaker};
use crate::graph::{Graph, OpAddress};
use crate::{AllocWeight, Result, ShiftError};

/// A valid schedule of `graph` chosen by `decider`.
pub(crate) fn kahn_schedule(
    graph: &Graph,
    decider: &KahnDecider,
    rng: &mut StdRng,
) -> Result<Vec<OpAddress>> {
    let mut parent_priority = vec![0.0; graph.n_ops()];
    for &(op, priority) in &decider.priorities {
        graph.check_op(op)?;
        parent_priority[op] = priority;
    }

    let merged = graph.get_link_merged()?;
    let unit_priority: Vec<f64> = merged
        .parents
        .iter()
        .map(|members| {
            members
                .iter()
                .map(|&p| parent_priority[p])
                .fold(f64::NEG_INFINITY, f64::max)
        })
        .collect();

    let unit_schedule = kahn(&merged.child, decider.tie_breaker, &unit_priority, rng);
    let schedule = merged.expand_schedule(&unit_schedule);
    if schedule.len() != graph.n_ops() {
        return Err(ShiftError::Cycle {
            scheduled: schedule.len(),
            total: graph.n_ops(),
        });
    }
    Ok(schedule)
}

/// Indices into `ready` of the highest-priority units.
fn candidates(ready: &[OpAddress], priority: &[f64]) -> Vec<usize> {
    let top = ready
        .iter()
        .map(|&u| priority[u])
        .fold(f64::NEG_INFINITY, f64::max);
    (0..ready.len())
        .filter(|&i| priority[ready[i]] >= top)
        .collect()
}

struct GreedyState {
    // number of unscheduled Ops still requiring each Alloc
    outstanding: Vec<usize>,
    live: Vec<bool>,
}

impl GreedyState {
    fn new(graph: &Graph) -> Self {
        Self {
            outstanding: graph.allocs().iter().map(|a| a.n_ops()).collect(),
            live: vec![false; graph.n_allocs()],
        }
    }

    /// Change in liveness from scheduling `unit` now.
    fn delta(&self, graph: &Graph, unit: OpAddress) -> AllocWeight {
        let mut delta = AllocWeight::zero();
        for &a in graph.op(unit).allocs() {
            let w = graph.alloc(a).weight();
            if self.outstanding[a] == 1 {
                delta -= w;
            }
            if !self.live[a] {
                delta += w;
            }
        }
        delta
    }

    fn schedule(&mut self, graph: &Graph, unit: OpAddress) {
        for &a in graph.op(unit).allocs() {
            self.live[a] = true;
            self.outstanding[a] -= 1;
        }
    }
}

fn kahn(
    graph: &Graph,
    tie_breaker: KahnTieBreaker,
    priority: &[f64],
    rng: &mut StdRng,
) -> Vec<OpAddress> {
    let n = graph.n_ops();
    let mut n_waiting: Vec<usize> = graph.ops().iter().map(|op| op.n_ins()).collect();
    let mut ready: Vec<OpAddress> = (0..n).filter(|&u| n_waiting[u] == 0).collect();
    let mut greedy = GreedyState::new(graph);
    let mut schedule = Vec::with_capacity(n);

    while !ready.is_empty() {
        let options = candidates(&ready, priority);
        let chosen = match tie_breaker {
            KahnTieBreaker::Random => options[rng.random_range(0..options.len())],
            KahnTieBreaker::Fifo => options[options.len() - 1],
            KahnTieBreaker::Greedy => {
                let mut best = options[0];
                let mut best_delta = greedy.delta(graph, ready[best]);
                for &i in &options[1..] {
                    let d = greedy.delta(graph, ready[i]);
                    if d <= best_delta {
                        best = i;
                        best_delta = d;
                    }
                }
                best
            }
        };

        let unit = ready.remove(chosen);
        greedy.schedule(graph, unit);
        schedule.push(unit);
        for &out in graph.op(unit).outs() {
            n_waiting[out] -= 1;
            if n_waiting[out] == 0 {
                ready.push(out);
            }
        }
    }

    schedule
}
