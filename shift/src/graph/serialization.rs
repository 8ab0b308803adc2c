//! JSON round trip for graphs, used to persist and replay problem instances.
//!
//! Format:
//! ```text
//! {"ops":[{"address":0,"debugString":"a","outs":[1],"allocs":[0],"fwdLink":-1}, ...],
//!  "allocs":[{"address":0,"weight":[0,0,0,1.5,0,0,0]}, ...]}
//! ```
//! `weight` lists the per-tier magnitudes from the highest tier down.

use serde::{Deserialize, Serialize};

use super::{AllocAddress, Graph, OpAddress};
use crate::alloc_weight::N_TIERS;
use crate::{AllocWeight, Result, ShiftError};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerialOp {
    address: OpAddress,
    debug_string: String,
    outs: Vec<OpAddress>,
    allocs: Vec<AllocAddress>,
    fwd_link: i64,
}

#[derive(Serialize, Deserialize)]
struct SerialAlloc {
    address: AllocAddress,
    weight: [f64; N_TIERS],
}

#[derive(Serialize, Deserialize)]
struct SerialGraph {
    ops: Vec<SerialOp>,
    allocs: Vec<SerialAlloc>,
}

/// Check that `addresses` is a permutation of `0..n`, returning the order
/// which sorts them.
fn dense_order(addresses: &[usize], what: &str) -> Result<Vec<usize>> {
    let n = addresses.len();
    let mut order: Vec<Option<usize>> = vec![None; n];
    for (index, &address) in addresses.iter().enumerate() {
        if address >= n {
            return Err(ShiftError::MalformedGraph(format!(
                "{} address {} is not below the number of {}s, {}",
                what, address, what, n
            )));
        }
        if order[address].replace(index).is_some() {
            return Err(ShiftError::MalformedGraph(format!(
                "{} address {} appears more than once",
                what, address
            )));
        }
    }
    Ok(order.into_iter().flatten().collect())
}

impl Graph {
    /// Serialize to the JSON format described in this module. JSON has no
    /// NaN or infinity, so a non-finite weight is an error.
    pub fn serialization_string(&self) -> Result<String> {
        if let Some(alloc) = self.allocs.iter().find(|a| !a.weight().is_finite()) {
            let bad = alloc.weight().tiers().into_iter().find(|x| !x.is_finite());
            return Err(ShiftError::NonFiniteWeight(bad.unwrap_or(f64::NAN)));
        }
        let serial = SerialGraph {
            ops: self
                .ops
                .iter()
                .map(|op| SerialOp {
                    address: op.address(),
                    debug_string: op.debug_string().to_string(),
                    outs: op.outs().to_vec(),
                    allocs: op.allocs().to_vec(),
                    fwd_link: op.fwd_link().map_or(-1, |l| l as i64),
                })
                .collect(),
            allocs: self
                .allocs
                .iter()
                .map(|alloc| SerialAlloc {
                    address: alloc.address(),
                    weight: alloc.weight().tiers(),
                })
                .collect(),
        };
        Ok(serde_json::to_string(&serial)?)
    }

    /// Rebuild a graph from [`Graph::serialization_string`] output.
    pub fn from_serialization_string(s: &str) -> Result<Graph> {
        let serial: SerialGraph = serde_json::from_str(s)?;

        let op_order = dense_order(
            &serial.ops.iter().map(|op| op.address).collect::<Vec<_>>(),
            "Op",
        )?;
        let alloc_order = dense_order(
            &serial.allocs.iter().map(|a| a.address).collect::<Vec<_>>(),
            "Alloc",
        )?;

        let mut g = Graph::new();
        for &i in &op_order {
            g.insert_op(serial.ops[i].debug_string.clone());
        }
        for &i in &alloc_order {
            g.insert_alloc(AllocWeight::from_tiers(serial.allocs[i].weight));
        }

        for op in &serial.ops {
            for &out in &op.outs {
                g.insert_constraint(op.address, out)?;
            }
            for &alloc in &op.allocs {
                g.insert_op_alloc(op.address, alloc)?;
            }
            match op.fwd_link {
                -1 => {}
                l if l >= 0 => g.insert_link(op.address, l as OpAddress)?,
                l => {
                    return Err(ShiftError::MalformedGraph(format!(
                        "invalid fwdLink {} for Op {}",
                        l, op.address
                    )))
                }
            }
        }
        Ok(g)
    }
}
