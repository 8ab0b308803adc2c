//! The constraint and liveness graph to be scheduled.
//!
//! A [`Graph`] owns every [`Op`] and [`Alloc`] in dense vectors; addresses
//! are indices into them, assigned in insertion order and never reused.
//! Every mutating method validates its arguments before touching any state,
//! so a call that returns an error leaves the graph unchanged.

mod alloc;
mod merge;
mod op;
mod serialization;

use std::fmt;

use crate::{AllocWeight, Result, ShiftError};

pub use alloc::Alloc;
pub use merge::MergedGraph;
pub use op::Op;

/// Index of an Op in its Graph.
pub type OpAddress = usize;

/// Index of an Alloc in its Graph.
pub type AllocAddress = usize;

/// Forward edges: `edges[i]` lists the direct successors of Op `i`.
pub type Edges = Vec<Vec<OpAddress>>;

/// Ops, Allocs, constraints and links to be scheduled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    ops: Vec<Op>,
    allocs: Vec<Alloc>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn n_allocs(&self) -> usize {
        self.allocs.len()
    }

    /// Total number of constraints (links included).
    pub fn n_constraints(&self) -> usize {
        self.ops.iter().map(|op| op.n_ins()).sum()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn allocs(&self) -> &[Alloc] {
        &self.allocs
    }

    /// # Panics
    /// If `address` is out of range.
    pub fn op(&self, address: OpAddress) -> &Op {
        &self.ops[address]
    }

    /// # Panics
    /// If `address` is out of range.
    pub fn alloc(&self, address: AllocAddress) -> &Alloc {
        &self.allocs[address]
    }

    pub(crate) fn check_op(&self, address: OpAddress) -> Result<()> {
        if address < self.n_ops() {
            Ok(())
        } else {
            Err(ShiftError::OpOutOfRange {
                address,
                n_ops: self.n_ops(),
            })
        }
    }

    pub(crate) fn check_alloc(&self, address: AllocAddress) -> Result<()> {
        if address < self.n_allocs() {
            Ok(())
        } else {
            Err(ShiftError::AllocOutOfRange {
                address,
                n_allocs: self.n_allocs(),
            })
        }
    }

    fn check_constraint(&self, before: OpAddress, after: OpAddress) -> Result<()> {
        self.check_op(before)?;
        self.check_op(after)?;
        if before == after {
            return Err(ShiftError::SelfConstraint(before));
        }
        Ok(())
    }

    pub fn insert_op(&mut self, name: impl Into<String>) -> OpAddress {
        let address = self.n_ops();
        self.ops.push(Op::new(address, name.into()));
        address
    }

    pub fn insert_ops<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<OpAddress> {
        names
            .iter()
            .map(|name| self.insert_op(name.as_ref()))
            .collect()
    }

    /// Insert an Op constrained after each of `ins` and requiring `allocs`.
    pub fn insert_op_with(
        &mut self,
        ins: &[OpAddress],
        allocs: &[AllocAddress],
        name: impl Into<String>,
    ) -> Result<OpAddress> {
        for &op in ins {
            self.check_op(op)?;
        }
        for &alloc in allocs {
            self.check_alloc(alloc)?;
        }
        let address = self.insert_op(name);
        for &op in ins {
            self.connect(op, address);
        }
        for &alloc in allocs {
            self.connect_alloc(address, alloc);
        }
        Ok(address)
    }

    /// Add an Alloc. Its weight should be finite: a graph with a NaN or
    /// infinite weight cannot be serialized, and scheduling it is
    /// meaningless. [`AllocWeight::try_new`] checks this.
    pub fn insert_alloc(&mut self, weight: AllocWeight) -> AllocAddress {
        let address = self.n_allocs();
        self.allocs.push(Alloc::new(address, weight));
        address
    }

    /// Register that `alloc` must be live when `op` is scheduled.
    pub fn insert_op_alloc(&mut self, op: OpAddress, alloc: AllocAddress) -> Result<()> {
        self.check_op(op)?;
        self.check_alloc(alloc)?;
        self.connect_alloc(op, alloc);
        Ok(())
    }

    pub fn insert_op_allocs(&mut self, ops: &[OpAddress], alloc: AllocAddress) -> Result<()> {
        for &op in ops {
            self.check_op(op)?;
        }
        self.check_alloc(alloc)?;
        for &op in ops {
            self.connect_alloc(op, alloc);
        }
        Ok(())
    }

    fn connect_alloc(&mut self, op: OpAddress, alloc: AllocAddress) {
        self.allocs[alloc].insert_op(op);
        self.ops[op].insert_alloc(alloc);
    }

    fn connect(&mut self, before: OpAddress, after: OpAddress) {
        if self.ops[before].insert_out(after) {
            self.ops[after].insert_in(before);
        }
    }

    /// Constrain `before` to be scheduled before `after`. Inserting an
    /// existing constraint is a no-op.
    pub fn insert_constraint(&mut self, before: OpAddress, after: OpAddress) -> Result<()> {
        self.check_constraint(before, after)?;
        self.connect(before, after);
        Ok(())
    }

    pub fn insert_constraints(&mut self, constraints: &[(OpAddress, OpAddress)]) -> Result<()> {
        for &(before, after) in constraints {
            self.check_constraint(before, after)?;
        }
        for &(before, after) in constraints {
            self.connect(before, after);
        }
        Ok(())
    }

    /// Remove a constraint if present. Links are not touched.
    pub fn remove_constraint(&mut self, before: OpAddress, after: OpAddress) -> Result<()> {
        self.check_op(before)?;
        self.check_op(after)?;
        self.ops[before].remove_out(after);
        self.ops[after].remove_in(before);
        Ok(())
    }

    /// Require `after` to be scheduled immediately after `before`.
    ///
    /// Each Op has at most one forward and one backward link. Re-inserting an
    /// existing link is a no-op.
    pub fn insert_link(&mut self, before: OpAddress, after: OpAddress) -> Result<()> {
        self.check_constraint(before, after)?;
        if let Some(existing) = self.ops[before].fwd_link() {
            if existing != after {
                return Err(ShiftError::LinkConflict {
                    before,
                    after,
                    existing_owner: before,
                    existing,
                    direction: "forward",
                });
            }
        }
        if let Some(existing) = self.ops[after].bwd_link() {
            if existing != before {
                return Err(ShiftError::LinkConflict {
                    before,
                    after,
                    existing_owner: after,
                    existing,
                    direction: "backward",
                });
            }
        }
        self.connect(before, after);
        self.ops[before].set_fwd_link(after);
        self.ops[after].set_bwd_link(before);
        Ok(())
    }

    /// Order `bins` group by group, using one synthetic bottleneck Op between
    /// each pair of adjacent bins instead of all pairwise constraints.
    ///
    /// The bottleneck between bin `i` and bin `i + 1` is named
    /// `{prefix}{i}`, and is also constrained after the previous bottleneck so
    /// that empty bins still partition the schedule. Returns the new Ops.
    pub fn insert_bin_constraints(
        &mut self,
        bins: &[Vec<OpAddress>],
        prefix: &str,
    ) -> Result<Vec<OpAddress>> {
        for &op in bins.iter().flatten() {
            self.check_op(op)?;
        }
        let mut bottlenecks: Vec<OpAddress> = Vec::with_capacity(bins.len().saturating_sub(1));
        for (i, pair) in bins.windows(2).enumerate() {
            let bottleneck = self.insert_op(format!("{}{}", prefix, i));
            for &op in &pair[0] {
                self.connect(op, bottleneck);
            }
            for &op in &pair[1] {
                self.connect(bottleneck, op);
            }
            if let Some(&prev) = bottlenecks.last() {
                self.connect(prev, bottleneck);
            }
            bottlenecks.push(bottleneck);
        }
        Ok(bottlenecks)
    }

    /// For each pair, add a fresh Alloc of weight `weight` required by both
    /// Ops, so that the optimizer is rewarded for scheduling them close
    /// together. Returns the new Allocs.
    pub fn insert_attractions(
        &mut self,
        pairs: &[(OpAddress, OpAddress)],
        weight: AllocWeight,
    ) -> Result<Vec<AllocAddress>> {
        for &(a, b) in pairs {
            self.check_op(a)?;
            self.check_op(b)?;
        }
        let mut allocs = Vec::with_capacity(pairs.len());
        for &(a, b) in pairs {
            let alloc = self.insert_alloc(weight);
            self.connect_alloc(a, alloc);
            self.connect_alloc(b, alloc);
            allocs.push(alloc);
        }
        Ok(allocs)
    }

    /// Bias `ops` towards the start of the schedule according to
    /// `priorities`.
    ///
    /// Distinct priorities are ranked; the Op at rank `r` gets an Alloc of
    /// weight `step_size * r` on `tier`, shared with a synthetic attractor Op.
    /// The attractors are chained and the last one is constrained before
    /// every Op which currently has no inputs, so a higher priority Op pays
    /// more for every position it sits away from the start. The lowest rank
    /// gets weight zero and no attractor; if all priorities are equal nothing
    /// is inserted. Returns the attractor Ops.
    pub fn insert_start_attractors(
        &mut self,
        ops: &[OpAddress],
        priorities: &[f64],
        tier: i64,
        step_size: f64,
    ) -> Result<Vec<OpAddress>> {
        if ops.len() != priorities.len() {
            return Err(ShiftError::LengthMismatch {
                context: "insert_start_attractors",
                left: ops.len(),
                right: priorities.len(),
            });
        }
        if !AllocWeight::is_valid_tier(tier) {
            return Err(ShiftError::InvalidTier(tier));
        }
        for &op in ops {
            self.check_op(op)?;
        }

        let inputs = self.input_ops();

        let mut unique: Vec<f64> = priorities.to_vec();
        unique.sort_by(f64::total_cmp);
        unique.dedup();
        if unique.len() <= 1 {
            return Ok(Vec::new());
        }

        let mut attractors = Vec::new();
        for (&op, &priority) in ops.iter().zip(priorities) {
            let rank = unique
                .binary_search_by(|p| p.total_cmp(&priority))
                .unwrap_or(0);
            let weight = AllocWeight::new(step_size * rank as f64, tier);
            if weight.is_zero() {
                continue;
            }
            let alloc = self.insert_alloc(weight);
            let name = format!(
                "priorityAttractor_{}_{}",
                self.ops[op].debug_string(),
                weight
            );
            let attractor = self.insert_op(name);
            self.connect_alloc(attractor, alloc);
            self.connect_alloc(op, alloc);
            attractors.push(attractor);
        }

        for pair in attractors.windows(2) {
            self.connect(pair[0], pair[1]);
        }
        if let Some(&last) = attractors.last() {
            for input in inputs {
                self.connect(last, input);
            }
        }
        Ok(attractors)
    }

    /// Detach `alloc` from all of its Ops. The Alloc itself stays, with no
    /// Ops, so addresses are unchanged.
    pub fn disconnect_alloc(&mut self, alloc: AllocAddress) -> Result<()> {
        self.check_alloc(alloc)?;
        for op in self.allocs[alloc].take_ops() {
            self.ops[op].remove_alloc(alloc);
        }
        Ok(())
    }

    pub fn disconnect_op_alloc(&mut self, op: OpAddress, alloc: AllocAddress) -> Result<()> {
        self.check_op(op)?;
        self.check_alloc(alloc)?;
        self.ops[op].remove_alloc(alloc);
        self.allocs[alloc].remove_op(op);
        Ok(())
    }

    /// Replace the weight of `alloc`. The weight must be finite.
    pub fn update_weight(&mut self, alloc: AllocAddress, weight: AllocWeight) -> Result<()> {
        self.check_alloc(alloc)?;
        if let Some(&bad) = weight.tiers().iter().find(|x| !x.is_finite()) {
            return Err(ShiftError::NonFiniteWeight(bad));
        }
        self.allocs[alloc].set_weight(weight);
        Ok(())
    }

    /// Ops with no inputs.
    pub fn input_ops(&self) -> Vec<OpAddress> {
        self.ops
            .iter()
            .filter(|op| op.n_ins() == 0)
            .map(|op| op.address())
            .collect()
    }

    /// All Ops with exactly the same inputs as `op` (`op` included). If `op`
    /// has no inputs, this is all input Ops.
    pub fn identical_ins(&self, op: OpAddress) -> Vec<OpAddress> {
        let ins = self.ops[op].ins();
        match ins.first() {
            None => self.input_ops(),
            Some(&in0) => self.ops[in0]
                .outs()
                .iter()
                .copied()
                .filter(|&out| self.ops[out].ins() == ins)
                .collect(),
        }
    }

    pub fn fwd_edges(&self) -> Edges {
        self.ops.iter().map(|op| op.outs().to_vec()).collect()
    }

    /// False iff the constraints (links included) contain a cycle.
    pub fn is_schedulable(&self) -> bool {
        self.check_schedulable().is_ok()
    }

    /// Whether `before => after` can be linked with the graph staying
    /// schedulable. A link merges two chains, and any Op which must run
    /// between them makes that impossible.
    pub fn can_link(&self, before: OpAddress, after: OpAddress) -> bool {
        let mut trial = self.clone();
        trial.insert_link(before, after).is_ok() && trial.is_schedulable()
    }

    /// Ok if some schedule satisfies every constraint and keeps every link
    /// adjacent. Linked Ops are contracted first, so Ops which would have to
    /// sit inside a link are found as a cycle of the contracted graph.
    pub fn check_schedulable(&self) -> Result<()> {
        let merged = self.get_link_merged()?;
        let order = topological_order(&merged.child.fwd_edges());
        if order.len() == merged.child.n_ops() {
            return Ok(());
        }
        Err(ShiftError::Cycle {
            scheduled: order.iter().map(|&c| merged.parents[c].len()).sum(),
            total: self.n_ops(),
        })
    }

    /// Constraints of this graph which are absent from `other`.
    pub fn constraint_diff(&self, other: &Graph) -> Result<Edges> {
        self.constraint_diff_edges(&other.fwd_edges())
    }

    /// Constraints of this graph absent from `rhs`, which must be over the
    /// same number of Ops. `result[from]` is sorted.
    pub fn constraint_diff_edges(&self, rhs: &[Vec<OpAddress>]) -> Result<Edges> {
        if rhs.len() != self.n_ops() {
            return Err(ShiftError::LengthMismatch {
                context: "constraint_diff",
                left: self.n_ops(),
                right: rhs.len(),
            });
        }
        Ok(self
            .ops
            .iter()
            .zip(rhs)
            .map(|(op, other)| {
                op.outs()
                    .iter()
                    .copied()
                    .filter(|out| !other.contains(out))
                    .collect()
            })
            .collect())
    }
}

/// Kahn's algorithm over `edges`. False iff they contain a cycle.
/// Out-of-range edge ends count as unschedulable.
pub fn is_schedulable(edges: &[Vec<OpAddress>]) -> bool {
    edges.iter().flatten().all(|&to| to < edges.len())
        && topological_order(edges).len() == edges.len()
}

/// The Ops of `edges` which Kahn's algorithm reaches, in the order reached.
/// Edge ends must be in range.
fn topological_order(edges: &[Vec<OpAddress>]) -> Vec<OpAddress> {
    let mut n_ins = vec![0usize; edges.len()];
    for &to in edges.iter().flatten() {
        n_ins[to] += 1;
    }
    let mut ready: Vec<OpAddress> = (0..edges.len()).filter(|&i| n_ins[i] == 0).collect();
    let mut order = Vec::with_capacity(edges.len());
    while let Some(op) = ready.pop() {
        order.push(op);
        for &out in &edges[op] {
            n_ins[out] -= 1;
            if n_ins[out] == 0 {
                ready.push(out);
            }
        }
    }
    order
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            write!(f, "\n{}   <-  [", op.debug_string())?;
            for &input in op.ins() {
                write!(f, " {} ", self.ops[input].debug_string())?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
