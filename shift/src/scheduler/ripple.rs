//! Incremental cost evaluation of every legal destination of one window.
//!
//! Moving a window one step further in a direction jumps it over exactly one
//! more Op. Only the Allocs of that Op, and the Allocs of the window whose
//! span keeps growing or shrinking linearly, change cost. So the cost of all
//! destinations is found in one sweep, rather than by re-summing every
//! Alloc's span per destination.

use crate::graph::AllocAddress;
use crate::AllocWeight;

use super::change::ShiftAndCost;
use super::core::ScheduledGraph;

#[derive(Clone, Copy, Debug)]
pub(super) struct RippleRecord {
    // step at which the Alloc's cost was last entered
    entry_time: i64,
    entry_weight: AllocWeight,
    // cost added per further step
    incr_weight: AllocWeight,
}

/// Per-Alloc records reused across sweeps.
#[derive(Clone, Debug)]
pub(super) struct RippleScratch {
    records: Vec<Option<RippleRecord>>,
    touched: Vec<AllocAddress>,
}

impl RippleScratch {
    pub(super) fn new(n_allocs: usize) -> Self {
        Self {
            records: vec![None; n_allocs],
            touched: Vec::new(),
        }
    }

    fn enter(&mut self, alloc: AllocAddress, record: RippleRecord) {
        if self.records[alloc].is_none() {
            self.touched.push(alloc);
        }
        self.records[alloc] = Some(record);
    }

    fn get(&self, alloc: AllocAddress) -> Option<RippleRecord> {
        self.records[alloc]
    }

    fn clear(&mut self) {
        for a in self.touched.drain(..) {
            self.records[a] = None;
        }
    }
}

impl ScheduledGraph {
    /// Best move of the window `[start, start + n)`, evaluated with one
    /// sweep per direction.
    pub(crate) fn get_best_shift_ripple(
        &self,
        scratch: &mut RippleScratch,
        start: usize,
        n: usize,
    ) -> ShiftAndCost {
        let mut best = ShiftAndCost::none();

        let can_bwd = self.n_can_bwd[start];
        if can_bwd >= n {
            let costs = self.ripple_costs(scratch, start, n, -1, can_bwd, 0);
            for proposed in (start - can_bwd)..start {
                let cost = costs[start - 1 - proposed];
                if cost < best.cost
                    && self.is_link_preserving(proposed, proposed + n, start - proposed)
                {
                    best = ShiftAndCost {
                        shift: proposed as i64 - start as i64,
                        cost,
                    };
                }
            }
        }

        let can_fwd = self.n_can_fwd[start];
        if can_fwd >= n {
            let costs = self.ripple_costs(scratch, start, n, 1, can_fwd, n as i64 - 1);
            for (i, &cost) in costs.iter().enumerate() {
                let shift = i + 1;
                if cost < best.cost && self.is_link_preserving(start, start + shift, n) {
                    best = ShiftAndCost {
                        shift: shift as i64,
                        cost,
                    };
                }
            }
        }

        best
    }

    /// Cost of moving `[start0, start0 + n)` by 1, 2, ... `n_costs` steps in
    /// direction `sign`. The Op jumped over at each step is at
    /// `start1 + dir_offset`.
    fn ripple_costs(
        &self,
        scratch: &mut RippleScratch,
        start0: usize,
        n: usize,
        sign: i64,
        n_costs: usize,
        dir_offset: i64,
    ) -> Vec<AllocWeight> {
        let x0 = start0;
        let o0 = start0 + n;
        let bound_end = n_costs as i64 + sign * start0 as i64 + 1;

        let mut costs = Vec::with_capacity(n_costs);
        let mut w = AllocWeight::zero();
        let mut to_increment = AllocWeight::zero();

        // Allocs of the window with Ops on one side only grow or shrink by
        // their weight per step
        for alloc in self.allocs_in_range(x0, o0) {
            let sched = &self.alloc_to_sch[alloc];
            let is_pre = sched.partition_point(|&s| s < x0) != 0;
            let is_post = sched.partition_point(|&s| s < o0) != sched.len();
            let side = is_pre as i64 - is_post as i64;
            let incr = self.graph.alloc(alloc).weight() * (sign * side);
            scratch.enter(
                alloc,
                RippleRecord {
                    entry_time: start0 as i64,
                    entry_weight: AllocWeight::zero(),
                    incr_weight: incr,
                },
            );
            to_increment += incr;
        }

        let mut start1 = start0 as i64 + sign;
        while sign * start1 < bound_end {
            let at = (start1 + dir_offset) as usize;
            let jumped = &self.sch_to_allocs[at];

            for &alloc in jumped {
                if let Some(record) = scratch.get(alloc) {
                    w -= record.entry_weight;
                    w -= record.incr_weight * (sign * (start1 - record.entry_time) - 1);
                    to_increment -= record.incr_weight;
                }
            }
            w += to_increment;

            for &alloc in jumped {
                let weight = self.graph.alloc(alloc).weight();
                let part = self.get_shift_cost(start0, start1 as usize, n, alloc);
                let sched = &self.alloc_to_sch[alloc];
                let extremum = if sign < 0 {
                    sched[0]
                } else {
                    sched[sched.len() - 1]
                };
                let post0 = sched.partition_point(|&s| s < start0);
                let in_window = post0 < sched.len() && sched[post0] - start0 < n;
                let incr = if in_window && extremum == at {
                    weight
                } else {
                    AllocWeight::zero()
                };
                scratch.enter(
                    alloc,
                    RippleRecord {
                        entry_time: start1,
                        entry_weight: part,
                        incr_weight: incr,
                    },
                );
                w += part;
                to_increment += incr;
            }

            costs.push(w);
            start1 += sign;
        }

        scratch.clear();
        costs
    }

    /// Change in the cost of `alloc` when `[start0, start0 + n)` moves to
    /// start at `start1`.
    pub(super) fn get_shift_cost(
        &self,
        start0: usize,
        start1: usize,
        n: usize,
        alloc: AllocAddress,
    ) -> AllocWeight {
        let (start0, start1, n) = if start1 < start0 {
            (start1 as i64, (start1 + n) as i64, (start0 - start1) as i64)
        } else {
            (start0 as i64, start1 as i64, n as i64)
        };

        // after canonicalization, X = [x0, o0) moves forward by `fwd` and
        // O = [o0, o1) moves back by `bwd`
        let x0 = start0;
        let o0 = x0 + n;
        let o1 = start1 + n;
        let fwd = start1 - start0;
        let bwd = n;

        let w = self.graph.alloc(alloc).weight();
        let sched = &self.alloc_to_sch[alloc];
        let a0 = sched.first().map_or(0, |&s| s as i64);
        let a1 = sched.last().map_or(0, |&s| s as i64);

        // untouched, or spanning the whole of X and O
        if a1 < x0 || o1 <= a0 || (a0 < x0 && o1 <= a1) {
            return AllocWeight::zero();
        }
        // contained in X or in O
        if (x0 <= a0 && a1 < o0) || (o0 <= a0 && a1 < o1) {
            return AllocWeight::zero();
        }
        if a0 < x0 && x0 <= a1 && a1 < o0 {
            return w * fwd;
        }
        if o0 <= a0 && a0 < o1 && o1 <= a1 {
            return w * bwd;
        }

        let p = sched.partition_point(|&s| (s as i64) < o0);
        let first_post_x = sched[p] as i64;
        let last_pre_o = sched[p - 1] as i64;

        if a0 < x0 {
            if last_pre_o < x0 {
                w * (-bwd)
            } else {
                w * ((last_pre_o - x0 + o1 - o0) - (a1 - o0 + o0 - x0))
            }
        } else if a1 < o1 {
            w * ((o1 - x0 - (first_post_x - last_pre_o) + 1) - (a1 - a0 + 1))
        } else if first_post_x < o1 {
            w * ((a0 - x0) - (first_post_x - o0))
        } else {
            w * (-fwd)
        }
    }
}
