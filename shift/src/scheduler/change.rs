//! Rotation moves and their evaluated cost.

use std::fmt;

use crate::AllocWeight;

/// Move the `n_to_shift` Ops starting at schedule index `start0` so that they
/// start at `start1`. The Ops they jump over move the other way.
///
/// ```text
///   start0 = 4, start1 = 7, n_to_shift = 5
///
///   . . . . x x x x x o o o , , ,
///   . . . . o o o x x x x x , , ,
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScheduleChange {
    pub start0: usize,
    pub start1: usize,
    pub n_to_shift: usize,
}

impl ScheduleChange {
    pub fn new(start0: usize, start1: usize, n_to_shift: usize) -> Self {
        Self {
            start0,
            start1,
            n_to_shift,
        }
    }

    /// The equivalent change which moves Ops forward. A backward move of
    /// `[start0, start0 + n)` to `start1` is the forward move of
    /// `[start1, start0)` by `n`.
    pub fn canonical(&self) -> Self {
        if self.start1 < self.start0 {
            Self::new(
                self.start1,
                self.start1 + self.n_to_shift,
                self.start0 - self.start1,
            )
        } else {
            *self
        }
    }

    /// Bounds `(x0, o0, o1)` of a forward move: `[x0, o0)` is moved behind
    /// `[o0, o1)`.
    pub(crate) fn bounds(&self) -> (usize, usize, usize) {
        let c = self.canonical();
        (c.start0, c.start0 + c.n_to_shift, c.start1 + c.n_to_shift)
    }
}

impl fmt::Display for ScheduleChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(start0={}, start1={}, nToShift={})",
            self.start0, self.start1, self.n_to_shift
        )
    }
}

/// The best shift found for a window, and the change in sum liveness it
/// causes. A shift of 0 with zero cost means no improving move exists.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShiftAndCost {
    pub shift: i64,
    pub cost: AllocWeight,
}

impl ShiftAndCost {
    pub fn none() -> Self {
        Self {
            shift: 0,
            cost: AllocWeight::zero(),
        }
    }

    /// Same shift and a cost within relative tolerance `tol` on every tier.
    pub fn agrees_with(&self, other: &ShiftAndCost, tol: f64) -> bool {
        self.shift == other.shift && self.cost.max_relative_error(&other.cost) <= tol
    }
}

impl fmt::Display for ShiftAndCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(shift={}, cost={})", self.shift, self.cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_forward_is_unchanged() {
        let c = ScheduleChange::new(4, 7, 5);
        assert_eq!(c.canonical(), c);
        assert_eq!(c.bounds(), (4, 9, 12));
    }

    #[test]
    fn test_canonical_backward() {
        // moving [7, 12) back to 4 is moving [4, 7) forward by 5
        let c = ScheduleChange::new(7, 4, 5);
        assert_eq!(c.canonical(), ScheduleChange::new(4, 9, 3));
        assert_eq!(c.bounds(), (4, 7, 12));
    }

    #[test]
    fn test_shift_and_cost_agreement() {
        let a = ShiftAndCost {
            shift: -2,
            cost: AllocWeight::from(-3.0),
        };
        let b = ShiftAndCost {
            shift: -2,
            cost: AllocWeight::from(-3.0 + 1e-9),
        };
        assert!(a.agrees_with(&b, 1e-6));
        assert!(!a.agrees_with(&ShiftAndCost::none(), 1e-6));
        assert_eq!(a.to_string(), "(shift=-2, cost=-3)");
    }
}
