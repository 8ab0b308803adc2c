//! Python bindings.
//!
//! Built with the `python` feature. Errors surface as `ValueError`.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::{
    DebugMode, KahnTieBreaker, RotationAlgo, RotationTermination, Settings,
    TransitiveClosureOptimizations,
};
use crate::graph::{AllocAddress, Graph, OpAddress};
use crate::scheduler::ScheduledGraph;
use crate::{AllocWeight, ShiftError};

fn to_py_err(e: ShiftError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Ops, Allocs, constraints and links, built incrementally.
#[pyclass(name = "Graph")]
#[derive(Clone, Debug, Default)]
pub struct PyGraph {
    inner: Graph,
}

#[pymethods]
impl PyGraph {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    #[staticmethod]
    fn from_serialization_string(s: &str) -> PyResult<Self> {
        Graph::from_serialization_string(s)
            .map(|inner| Self { inner })
            .map_err(to_py_err)
    }

    fn serialization_string(&self) -> PyResult<String> {
        self.inner.serialization_string().map_err(to_py_err)
    }

    fn insert_op(&mut self, name: String) -> OpAddress {
        self.inner.insert_op(name)
    }

    fn insert_ops(&mut self, names: Vec<String>) -> Vec<OpAddress> {
        self.inner.insert_ops(&names)
    }

    #[pyo3(signature = (weight, tier=0))]
    fn insert_alloc(&mut self, weight: f64, tier: i64) -> PyResult<AllocAddress> {
        let w = AllocWeight::try_new(weight, tier).map_err(to_py_err)?;
        Ok(self.inner.insert_alloc(w))
    }

    fn insert_op_alloc(&mut self, op: OpAddress, alloc: AllocAddress) -> PyResult<()> {
        self.inner.insert_op_alloc(op, alloc).map_err(to_py_err)
    }

    fn insert_op_allocs(&mut self, ops: Vec<OpAddress>, alloc: AllocAddress) -> PyResult<()> {
        self.inner.insert_op_allocs(&ops, alloc).map_err(to_py_err)
    }

    fn insert_constraint(&mut self, before: OpAddress, after: OpAddress) -> PyResult<()> {
        self.inner.insert_constraint(before, after).map_err(to_py_err)
    }

    fn insert_link(&mut self, before: OpAddress, after: OpAddress) -> PyResult<()> {
        self.inner.insert_link(before, after).map_err(to_py_err)
    }

    #[pyo3(signature = (bins, prefix="bin"))]
    fn insert_bin_constraints(
        &mut self,
        bins: Vec<Vec<OpAddress>>,
        prefix: &str,
    ) -> PyResult<Vec<OpAddress>> {
        self.inner
            .insert_bin_constraints(&bins, prefix)
            .map_err(to_py_err)
    }

    fn insert_attractions(
        &mut self,
        pairs: Vec<(OpAddress, OpAddress)>,
        weight: f64,
    ) -> PyResult<Vec<AllocAddress>> {
        let w = AllocWeight::try_new(weight, 0).map_err(to_py_err)?;
        self.inner.insert_attractions(&pairs, w).map_err(to_py_err)
    }

    fn n_ops(&self) -> usize {
        self.inner.n_ops()
    }

    fn n_allocs(&self) -> usize {
        self.inner.n_allocs()
    }

    fn is_schedulable(&self) -> bool {
        self.inner.is_schedulable()
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }

    fn __repr__(&self) -> String {
        format!(
            "Graph(n_ops={}, n_allocs={})",
            self.inner.n_ops(),
            self.inner.n_allocs()
        )
    }
}

/// Scheduler settings. Names follow the Rust [`Settings`] fields.
#[pyclass(name = "Settings")]
#[derive(Clone, Debug)]
pub struct PySettings {
    inner: Settings,
}

#[pymethods]
impl PySettings {
    #[new]
    #[pyo3(signature = (
        tie_breaker="greedy",
        rotation_algo="ripple",
        time_limit_seconds=None,
        swap_limit_count=None,
        seed=1011,
        debug=false,
        filter_susceptible=true,
        all_tcos=false,
        verbosity=0
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        tie_breaker: &str,
        rotation_algo: &str,
        time_limit_seconds: Option<f64>,
        swap_limit_count: Option<i64>,
        seed: u64,
        debug: bool,
        filter_susceptible: bool,
        all_tcos: bool,
        verbosity: u8,
    ) -> PyResult<Self> {
        let unbounded = RotationTermination::unbounded();
        let termination = RotationTermination::new(
            time_limit_seconds.unwrap_or(unbounded.time_limit_seconds),
            swap_limit_count.unwrap_or(unbounded.swap_limit_count),
        );
        let tcos = if all_tcos {
            TransitiveClosureOptimizations::all_on()
        } else {
            TransitiveClosureOptimizations::all_off()
        };
        let inner = Settings::default()
            .with_tie_breaker(tie_breaker.parse::<KahnTieBreaker>().map_err(to_py_err)?)
            .with_rotation_algo(rotation_algo.parse::<RotationAlgo>().map_err(to_py_err)?)
            .with_termination(termination)
            .with_seed(seed)
            .with_debug_mode(if debug { DebugMode::On } else { DebugMode::Off })
            .with_filter_susceptible(filter_susceptible)
            .with_tcos(tcos)
            .with_verbosity(verbosity);
        Ok(Self { inner })
    }

    fn __repr__(&self) -> String {
        format!(
            "Settings(tie_breaker={}, rotation_algo={}, seed={})",
            self.inner.kahn_decider.tie_breaker, self.inner.rotation_algo, self.inner.seed
        )
    }
}

/// A graph and its optimized schedule.
#[pyclass(name = "ScheduledGraph")]
#[derive(Clone, Debug)]
pub struct PyScheduledGraph {
    inner: ScheduledGraph,
}

#[pymethods]
impl PyScheduledGraph {
    #[new]
    #[pyo3(signature = (graph, settings=None))]
    fn new(graph: &PyGraph, settings: Option<&PySettings>) -> PyResult<Self> {
        let settings = settings.map(|s| s.inner.clone()).unwrap_or_default();
        ScheduledGraph::new(graph.inner.clone(), &settings)
            .map(|inner| Self { inner })
            .map_err(to_py_err)
    }

    fn schedule(&self) -> Vec<OpAddress> {
        self.inner.schedule().to_vec()
    }

    fn op_to_schedule(&self, op: OpAddress) -> PyResult<usize> {
        self.inner.graph().check_op(op).map_err(to_py_err)?;
        Ok(self.inner.op_to_schedule(op))
    }

    fn get_sub_schedule(&self, ops: Vec<OpAddress>) -> PyResult<Vec<OpAddress>> {
        self.inner.get_sub_schedule(&ops).map_err(to_py_err)
    }

    /// Sum liveness of ordinary (tier 0) weights.
    fn sum_liveness(&self) -> f64 {
        self.inner.sum_liveness().get(0)
    }

    /// Max liveness of ordinary (tier 0) weights.
    fn max_liveness(&self) -> f64 {
        self.inner.max_liveness().get(0)
    }

    fn termination(&self) -> String {
        self.inner.termination().to_string()
    }

    fn liveness_string(&self) -> String {
        self.inner.liveness_string()
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }
}

#[pymodule]
fn shift_schedule(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyGraph>()?;
    m.add_class::<PySettings>()?;
    m.add_class::<PyScheduledGraph>()?;
    Ok(())
}
