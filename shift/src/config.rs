//! Configuration types for scheduling.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::graph::OpAddress;
use crate::logging::VERBOSITY_SILENT;
use crate::{Result, ShiftError};

/// How Kahn's algorithm chooses among ready Ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KahnTieBreaker {
    /// Uniformly at random, from the seeded generator.
    Random,
    /// The Op whose scheduling lowers the current liveness the most.
    Greedy,
    /// The Op which became ready most recently.
    Fifo,
}

impl fmt::Display for KahnTieBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KahnTieBreaker::Random => "Random",
            KahnTieBreaker::Greedy => "Greedy",
            KahnTieBreaker::Fifo => "Fifo",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for KahnTieBreaker {
    type Err = ShiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(KahnTieBreaker::Random),
            "greedy" => Ok(KahnTieBreaker::Greedy),
            "fifo" => Ok(KahnTieBreaker::Fifo),
            _ => Err(ShiftError::InvalidSetting(format!(
                "unknown Kahn tie-breaker {:?}, expected Random, Greedy or Fifo",
                s
            ))),
        }
    }
}

/// Kahn tie-breaker plus optional per-Op priorities.
#[derive(Clone, Debug, PartialEq)]
pub struct KahnDecider {
    pub tie_breaker: KahnTieBreaker,
    /// Ops not listed have priority 0.0. Only ready Ops of the highest
    /// priority are offered to the tie-breaker.
    pub priorities: Vec<(OpAddress, f64)>,
}

impl KahnDecider {
    pub fn new(tie_breaker: KahnTieBreaker) -> Self {
        Self {
            tie_breaker,
            priorities: Vec::new(),
        }
    }

    pub fn with_priorities(mut self, priorities: Vec<(OpAddress, f64)>) -> Self {
        self.priorities = priorities;
        self
    }
}

impl Default for KahnDecider {
    fn default() -> Self {
        Self::new(KahnTieBreaker::Greedy)
    }
}

/// Cost evaluation used by the rotation optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RotationAlgo {
    Simple,
    Ripple,
}

impl fmt::Display for RotationAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationAlgo::Simple => write!(f, "Simple"),
            RotationAlgo::Ripple => write!(f, "Ripple"),
        }
    }
}

impl FromStr for RotationAlgo {
    type Err = ShiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(RotationAlgo::Simple),
            "ripple" => Ok(RotationAlgo::Ripple),
            _ => Err(ShiftError::InvalidSetting(format!(
                "unknown rotation algorithm {:?}, expected Simple or Ripple",
                s
            ))),
        }
    }
}

/// Budget for the rotation phase. Exhausting it is a normal way to stop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotationTermination {
    pub time_limit_seconds: f64,
    pub swap_limit_count: i64,
}

impl RotationTermination {
    pub fn new(time_limit_seconds: f64, swap_limit_count: i64) -> Self {
        Self {
            time_limit_seconds,
            swap_limit_count,
        }
    }

    /// A zero budget: the Kahn schedule is kept as is.
    pub fn pre_start() -> Self {
        Self::new(0.0, 0)
    }

    pub fn unbounded() -> Self {
        Self::new(f64::MAX, i64::MAX)
    }

    /// True if the budget allows no rotation at all.
    pub fn is_exhausted(&self) -> bool {
        self.time_limit_seconds <= 0.0 || self.swap_limit_count <= 0
    }
}

impl Default for RotationTermination {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// In debug mode every RIPPLE cost is cross-checked against SIMPLE and the
/// schedule state is re-derived after each accepted change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DebugMode {
    #[default]
    Off,
    On,
}

/// Pre-processing passes run on the graph before Kahn's algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tco {
    SlideLinks,
    LinkTightDrops,
    LinkCloseTightPairs,
    ConstrainParallelChains,
    DisconnectAllocsWithZeroWeight,
    DisconnectAllocsWithOneOp,
    DisconnectInbetweenerAllocs,
    DisconnectFixedDurationAllocs,
    CombineAllocsWithCommonOps,
}

impl Tco {
    pub const ALL: [Tco; 9] = [
        Tco::SlideLinks,
        Tco::LinkTightDrops,
        Tco::LinkCloseTightPairs,
        Tco::ConstrainParallelChains,
        Tco::DisconnectAllocsWithZeroWeight,
        Tco::DisconnectAllocsWithOneOp,
        Tco::DisconnectInbetweenerAllocs,
        Tco::DisconnectFixedDurationAllocs,
        Tco::CombineAllocsWithCommonOps,
    ];
}

impl fmt::Display for Tco {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which [`Tco`] passes are enabled, and how many rounds they may run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitiveClosureOptimizations {
    enabled: [bool; Tco::ALL.len()],
    pub max_iterations: usize,
}

impl Default for TransitiveClosureOptimizations {
    fn default() -> Self {
        Self::all_off()
    }
}

impl TransitiveClosureOptimizations {
    pub fn all_off() -> Self {
        Self {
            enabled: [false; Tco::ALL.len()],
            max_iterations: 4,
        }
    }

    pub fn all_on() -> Self {
        Self {
            enabled: [true; Tco::ALL.len()],
            max_iterations: 4,
        }
    }

    pub fn is_on(&self, tco: Tco) -> bool {
        self.enabled[tco as usize]
    }

    pub fn any_on(&self) -> bool {
        self.enabled.iter().any(|x| *x)
    }

    pub fn enabled(&self) -> Vec<Tco> {
        Tco::ALL.into_iter().filter(|t| self.is_on(*t)).collect()
    }

    pub fn with(mut self, tco: Tco, on: bool) -> Self {
        self.enabled[tco as usize] = on;
        self
    }

    pub fn with_slide_links(self, on: bool) -> Self {
        self.with(Tco::SlideLinks, on)
    }

    pub fn with_link_tight_drops(self, on: bool) -> Self {
        self.with(Tco::LinkTightDrops, on)
    }

    pub fn with_link_close_tight_pairs(self, on: bool) -> Self {
        self.with(Tco::LinkCloseTightPairs, on)
    }

    pub fn with_constrain_parallel_chains(self, on: bool) -> Self {
        self.with(Tco::ConstrainParallelChains, on)
    }

    pub fn with_disconnect_allocs_with_zero_weight(self, on: bool) -> Self {
        self.with(Tco::DisconnectAllocsWithZeroWeight, on)
    }

    pub fn with_disconnect_allocs_with_one_op(self, on: bool) -> Self {
        self.with(Tco::DisconnectAllocsWithOneOp, on)
    }

    pub fn with_disconnect_inbetweener_allocs(self, on: bool) -> Self {
        self.with(Tco::DisconnectInbetweenerAllocs, on)
    }

    pub fn with_disconnect_fixed_duration_allocs(self, on: bool) -> Self {
        self.with(Tco::DisconnectFixedDurationAllocs, on)
    }

    pub fn with_combine_allocs_with_common_ops(self, on: bool) -> Self {
        self.with(Tco::CombineAllocsWithCommonOps, on)
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Everything that controls how a [`crate::ScheduledGraph`] is built.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub kahn_decider: KahnDecider,
    pub rotation_algo: RotationAlgo,
    pub rotation_termination: RotationTermination,
    /// Seeds Kahn's Random tie-breaker and the window visiting order.
    pub seed: u64,
    pub debug_mode: DebugMode,
    /// Only evaluate windows containing an Op touched by a change in the
    /// previous round.
    pub filter_susceptible: bool,
    pub tcos: TransitiveClosureOptimizations,
    pub verbosity: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kahn_decider: KahnDecider::default(),
            rotation_algo: RotationAlgo::Ripple,
            rotation_termination: RotationTermination::unbounded(),
            seed: 1011,
            debug_mode: DebugMode::Off,
            filter_susceptible: true,
            tcos: TransitiveClosureOptimizations::all_off(),
            verbosity: VERBOSITY_SILENT,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ShiftError::InvalidSetting(format!("invalid value {:?} for {}", value, key)))
}

impl Settings {
    pub fn with_tie_breaker(mut self, tie_breaker: KahnTieBreaker) -> Self {
        self.kahn_decider.tie_breaker = tie_breaker;
        self
    }

    pub fn with_rotation_algo(mut self, rotation_algo: RotationAlgo) -> Self {
        self.rotation_algo = rotation_algo;
        self
    }

    pub fn with_termination(mut self, termination: RotationTermination) -> Self {
        self.rotation_termination = termination;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_debug_mode(mut self, debug_mode: DebugMode) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn with_filter_susceptible(mut self, filter_susceptible: bool) -> Self {
        self.filter_susceptible = filter_susceptible;
        self
    }

    pub fn with_tcos(mut self, tcos: TransitiveClosureOptimizations) -> Self {
        self.tcos = tcos;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Build settings from string pairs, starting from the defaults.
    ///
    /// Recognised keys: `kahnTieBreaker`, `seed`, `timeLimitSeconds`,
    /// `swapLimitCount`, `rotationAlgo`, `debug`, `filterSusceptible`,
    /// `allTCOs`. Any other key is rejected.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "kahnTieBreaker" => settings.kahn_decider.tie_breaker = value.parse()?,
                "seed" => settings.seed = parse_value(key, value)?,
                "timeLimitSeconds" => {
                    settings.rotation_termination.time_limit_seconds = parse_value(key, value)?
                }
                "swapLimitCount" => {
                    settings.rotation_termination.swap_limit_count = parse_value(key, value)?
                }
                "rotationAlgo" => settings.rotation_algo = value.parse()?,
                "debug" => {
                    settings.debug_mode = if parse_value::<bool>(key, value)? {
                        DebugMode::On
                    } else {
                        DebugMode::Off
                    }
                }
                "filterSusceptible" => settings.filter_susceptible = parse_value(key, value)?,
                "allTCOs" => {
                    settings.tcos = if parse_value::<bool>(key, value)? {
                        TransitiveClosureOptimizations::all_on()
                    } else {
                        TransitiveClosureOptimizations::all_off()
                    }
                }
                _ => {
                    return Err(ShiftError::InvalidSetting(format!(
                        "unrecognised setting {:?}",
                        key
                    )))
                }
            }
        }
        Ok(settings)
    }
}
