//! Passes which detach or merge Allocs without changing which schedules are
//! optimal.

use rustc_hash::FxHashMap;

use crate::graph::{AllocAddress, Graph, OpAddress};
use crate::transitive_closure::{IsFinal, IsFirst, TransitiveClosure};
use crate::{AllocWeight, Result};

/// Allocs with the same Ops are merged into the lowest-addressed one, which
/// takes the summed weight. The others are left with no Ops.
pub(super) fn combine_allocs_with_common_ops(graph: &mut Graph) -> Result<bool> {
    let mut groups: FxHashMap<Vec<OpAddress>, Vec<AllocAddress>> = FxHashMap::default();
    for alloc in graph.allocs().iter().filter(|a| a.n_ops() > 0) {
        groups
            .entry(alloc.ops().to_vec())
            .or_default()
            .push(alloc.address());
    }

    let mut merges: Vec<Vec<AllocAddress>> =
        groups.into_values().filter(|g| g.len() > 1).collect();
    merges.sort_unstable();
    for group in &merges {
        let mut combined = graph.alloc(group[0]).weight();
        for &other in &group[1..] {
            combined += graph.alloc(other).weight();
            graph.disconnect_alloc(other)?;
        }
        graph.update_weight(group[0], combined)?;
    }
    Ok(!merges.is_empty())
}

/// An Alloc with a single Op costs its weight in every schedule.
pub(super) fn disconnect_allocs_with_one_op(graph: &mut Graph) -> Result<bool> {
    let single: Vec<AllocAddress> = graph
        .allocs()
        .iter()
        .filter(|a| a.n_ops() == 1)
        .map(|a| a.address())
        .collect();
    for &alloc in &single {
        graph.disconnect_alloc(alloc)?;
    }
    Ok(!single.is_empty())
}

pub(super) fn disconnect_allocs_with_zero_weight(graph: &mut Graph) -> Result<bool> {
    let weightless: Vec<AllocAddress> = graph
        .allocs()
        .iter()
        .filter(|a| a.n_ops() > 0 && a.weight() == AllocWeight::zero())
        .map(|a| a.address())
        .collect();
    for &alloc in &weightless {
        graph.disconnect_alloc(alloc)?;
    }
    Ok(!weightless.is_empty())
}

/// Detach each Op which can be neither first nor last of its Alloc: it is
/// always strictly inside the Alloc's span.
pub(super) fn disconnect_inbetweener_allocs(
    graph: &mut Graph,
    closure: &TransitiveClosure,
) -> Result<bool> {
    let mut inbetweeners = Vec::new();
    for alloc in graph.allocs() {
        let statuses = closure.get_extremum_statuses(alloc.ops());
        for (&op, status) in alloc.ops().iter().zip(statuses) {
            if status == (IsFirst::No, IsFinal::No) {
                inbetweeners.push((op, alloc.address()));
            }
        }
    }
    for &(op, alloc) in &inbetweeners {
        graph.disconnect_op_alloc(op, alloc)?;
    }
    Ok(!inbetweeners.is_empty())
}

/// An Alloc whose span is the same in every schedule adds a constant.
pub(super) fn disconnect_fixed_duration_allocs(
    graph: &mut Graph,
    closure: &TransitiveClosure,
) -> Result<bool> {
    let fixed: Vec<AllocAddress> = graph
        .allocs()
        .iter()
        .filter(|a| a.n_ops() > 0)
        .filter(|a| {
            let bound = closure.get_duration_bound(a.ops());
            bound.high == bound.low + 1
        })
        .map(|a| a.address())
        .collect();
    for &alloc in &fixed {
        graph.disconnect_alloc(alloc)?;
    }
    Ok(!fixed.is_empty())
}
