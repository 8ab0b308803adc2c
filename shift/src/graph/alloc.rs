//! A liveness requirement shared by a set of Ops.

use super::op::{insert_sorted, remove_sorted};
use super::{AllocAddress, OpAddress};
use crate::AllocWeight;

/// Memory which must be live from the first to the last of its Ops.
#[derive(Clone, Debug, PartialEq)]
pub struct Alloc {
    address: AllocAddress,
    weight: AllocWeight,
    ops: Vec<OpAddress>,
}

impl Alloc {
    pub(crate) fn new(address: AllocAddress, weight: AllocWeight) -> Self {
        Self {
            address,
            weight,
            ops: Vec::new(),
        }
    }

    pub fn address(&self) -> AllocAddress {
        self.address
    }

    pub fn weight(&self) -> AllocWeight {
        self.weight
    }

    /// The Ops requiring this Alloc, sorted.
    pub fn ops(&self) -> &[OpAddress] {
        &self.ops
    }

    pub fn n_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn has_op(&self, op: OpAddress) -> bool {
        self.ops.binary_search(&op).is_ok()
    }

    pub(crate) fn insert_op(&mut self, op: OpAddress) -> bool {
        insert_sorted(&mut self.ops, op)
    }

    pub(crate) fn remove_op(&mut self, op: OpAddress) -> bool {
        remove_sorted(&mut self.ops, op)
    }

    pub(crate) fn take_ops(&mut self) -> Vec<OpAddress> {
        std::mem::take(&mut self.ops)
    }

    pub(crate) fn set_weight(&mut self, weight: AllocWeight) {
        self.weight = weight;
    }
}
