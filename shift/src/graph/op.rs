//! The scheduling vertex.

use super::{AllocAddress, OpAddress};

/// Insert `x` into the sorted vector `v`. Returns false if already present.
pub(crate) fn insert_sorted(v: &mut Vec<usize>, x: usize) -> bool {
    match v.binary_search(&x) {
        Ok(_) => false,
        Err(pos) => {
            v.insert(pos, x);
            true
        }
    }
}

/// Remove `x` from the sorted vector `v`. Returns false if absent.
pub(crate) fn remove_sorted(v: &mut Vec<usize>, x: usize) -> bool {
    match v.binary_search(&x) {
        Ok(pos) => {
            v.remove(pos);
            true
        }
        Err(_) => false,
    }
}

/// An operation to be scheduled.
///
/// Edge and alloc lists are kept sorted and free of duplicates.
#[derive(Clone, Debug, PartialEq)]
pub struct Op {
    address: OpAddress,
    debug_string: String,
    ins: Vec<OpAddress>,
    outs: Vec<OpAddress>,
    allocs: Vec<AllocAddress>,
    fwd_link: Option<OpAddress>,
    bwd_link: Option<OpAddress>,
}

impl Op {
    pub(crate) fn new(address: OpAddress, debug_string: String) -> Self {
        Self {
            address,
            debug_string,
            ins: Vec::new(),
            outs: Vec::new(),
            allocs: Vec::new(),
            fwd_link: None,
            bwd_link: None,
        }
    }

    pub fn address(&self) -> OpAddress {
        self.address
    }

    pub fn debug_string(&self) -> &str {
        &self.debug_string
    }

    /// Ops which must be scheduled before this one.
    pub fn ins(&self) -> &[OpAddress] {
        &self.ins
    }

    /// Ops which must be scheduled after this one.
    pub fn outs(&self) -> &[OpAddress] {
        &self.outs
    }

    /// Allocs which must be live when this Op is scheduled.
    pub fn allocs(&self) -> &[AllocAddress] {
        &self.allocs
    }

    pub fn n_ins(&self) -> usize {
        self.ins.len()
    }

    pub fn n_outs(&self) -> usize {
        self.outs.len()
    }

    pub fn n_allocs(&self) -> usize {
        self.allocs.len()
    }

    pub fn has_in(&self, op: OpAddress) -> bool {
        self.ins.binary_search(&op).is_ok()
    }

    pub fn has_out(&self, op: OpAddress) -> bool {
        self.outs.binary_search(&op).is_ok()
    }

    pub fn has_alloc(&self, alloc: AllocAddress) -> bool {
        self.allocs.binary_search(&alloc).is_ok()
    }

    /// The Op scheduled immediately after this one, if linked.
    pub fn fwd_link(&self) -> Option<OpAddress> {
        self.fwd_link
    }

    /// The Op scheduled immediately before this one, if linked.
    pub fn bwd_link(&self) -> Option<OpAddress> {
        self.bwd_link
    }

    pub fn has_fwd_link(&self) -> bool {
        self.fwd_link.is_some()
    }

    pub fn has_bwd_link(&self) -> bool {
        self.bwd_link.is_some()
    }

    pub(crate) fn insert_in(&mut self, op: OpAddress) -> bool {
        insert_sorted(&mut self.ins, op)
    }

    pub(crate) fn insert_out(&mut self, op: OpAddress) -> bool {
        insert_sorted(&mut self.outs, op)
    }

    pub(crate) fn remove_in(&mut self, op: OpAddress) -> bool {
        remove_sorted(&mut self.ins, op)
    }

    pub(crate) fn remove_out(&mut self, op: OpAddress) -> bool {
        remove_sorted(&mut self.outs, op)
    }

    pub(crate) fn insert_alloc(&mut self, alloc: AllocAddress) -> bool {
        insert_sorted(&mut self.allocs, alloc)
    }

    pub(crate) fn remove_alloc(&mut self, alloc: AllocAddress) -> bool {
        remove_sorted(&mut self.allocs, alloc)
    }

    pub(crate) fn set_fwd_link(&mut self, op: OpAddress) {
        self.fwd_link = Some(op);
    }

    pub(crate) fn set_bwd_link(&mut self, op: OpAddress) {
        self.bwd_link = Some(op);
    }
}
