//! Liveness-minimizing scheduling of Ops under constraints and links.
//!
//! A [`Graph`] holds Ops, ordering constraints between them, links (a
//! constraint which also forces adjacency), and Allocs: weighted resources
//! which are live from the first to the last Op requiring them. A
//! [`ScheduledGraph`] finds a total order of the Ops which respects every
//! constraint and link, and which has low sum liveness (the sum over Allocs
//! of weight times span).
//!
//! ```
//! use shift_schedule::{AllocWeight, Graph, ScheduledGraph, Settings};
//!
//! let mut g = Graph::new();
//! let ops = g.insert_ops(&["load", "other", "use"]);
//! g.insert_constraint(ops[0], ops[2]).unwrap();
//! let buffer = g.insert_alloc(AllocWeight::from(10.0));
//! g.insert_op_allocs(&[ops[0], ops[2]], buffer).unwrap();
//!
//! let sg = ScheduledGraph::new(g, &Settings::default()).unwrap();
//! let (load, use_) = (sg.op_to_schedule(ops[0]), sg.op_to_schedule(ops[2]));
//! assert_eq!(use_, load + 1);
//! ```

mod alloc_weight;
pub mod config;
mod error;
pub mod graph;
pub mod logging;
mod optimizations;
pub mod scheduler;
pub mod transitive_closure;

#[cfg(feature = "python")]
mod python;

pub use alloc_weight::{AllocWeight, MAX_TIER, N_TIERS};
pub use config::{
    DebugMode, KahnDecider, KahnTieBreaker, RotationAlgo, RotationTermination, Settings, Tco,
    TransitiveClosureOptimizations,
};
pub use error::{ErrorKind, Result, ShiftError};
pub use graph::{Alloc, AllocAddress, Graph, MergedGraph, Op, OpAddress};
pub use scheduler::{RotationStats, ScheduleChange, ScheduledGraph, ShiftAndCost, Termination};
pub use transitive_closure::{DurationBound, IsFinal, IsFirst, TransitiveClosure};
