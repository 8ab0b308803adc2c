//! Lexicographic liveness cost.
//!
//! An `AllocWeight` is a magnitude on one of seven tiers. Tiers are compared
//! from the highest down, so any non-zero value on a higher tier outranks
//! everything on the tiers below it, whatever the floating magnitudes are.
//! Arithmetic is done tier by tier, which keeps sums of mixed-tier weights
//! exact and reversible.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Number of tiers.
pub const N_TIERS: usize = 7;

/// Largest supported tier. The smallest is `-MAX_TIER`.
pub const MAX_TIER: i64 = 3;

/// Two-level cost: a magnitude on a tier.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllocWeight {
    // index 0 holds the highest tier
    v: [f64; N_TIERS],
}

fn tier_index(tier: i64) -> usize {
    (MAX_TIER - tier) as usize
}

/// Compare f64 values. NaN sorts above every number and equals itself;
/// `-0.0` equals `0.0`.
fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

impl AllocWeight {
    /// Create a weight of `magnitude` on `tier`.
    ///
    /// # Panics
    /// If `tier` is outside `[-MAX_TIER, MAX_TIER]`. Use [`AllocWeight::try_new`]
    /// for unchecked input.
    pub fn new(magnitude: f64, tier: i64) -> Self {
        assert!(
            Self::is_valid_tier(tier),
            "tier {} outside [-{}, {}]",
            tier,
            MAX_TIER,
            MAX_TIER
        );
        let mut v = [0.0; N_TIERS];
        v[tier_index(tier)] = magnitude;
        Self { v }
    }

    /// Create a weight, rejecting an out-of-range tier or a magnitude which
    /// is NaN or infinite.
    pub fn try_new(magnitude: f64, tier: i64) -> crate::Result<Self> {
        if !magnitude.is_finite() {
            Err(crate::ShiftError::NonFiniteWeight(magnitude))
        } else if Self::is_valid_tier(tier) {
            Ok(Self::new(magnitude, tier))
        } else {
            Err(crate::ShiftError::InvalidTier(tier))
        }
    }

    pub fn is_finite(&self) -> bool {
        self.v.iter().all(|x| x.is_finite())
    }

    pub fn is_valid_tier(tier: i64) -> bool {
        (-MAX_TIER..=MAX_TIER).contains(&tier)
    }

    /// Build from raw per-tier values, highest tier first.
    pub fn from_tiers(v: [f64; N_TIERS]) -> Self {
        Self { v }
    }

    /// Raw per-tier values, highest tier first.
    pub fn tiers(&self) -> [f64; N_TIERS] {
        self.v
    }

    /// The magnitude on `tier`.
    pub fn get(&self, tier: i64) -> f64 {
        if Self::is_valid_tier(tier) {
            self.v[tier_index(tier)]
        } else {
            0.0
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn negative_one() -> Self {
        Self::new(-1.0, 0)
    }

    pub fn is_zero(&self) -> bool {
        self.v.iter().all(|x| *x == 0.0)
    }

    /// Tier-wise absolute value.
    pub fn abs(&self) -> Self {
        let mut out = *self;
        for x in out.v.iter_mut() {
            *x = x.abs();
        }
        out
    }

    /// Sum of absolute magnitudes over all tiers.
    pub fn l1(&self) -> f64 {
        self.v.iter().map(|x| x.abs()).sum()
    }

    /// Largest relative error between `self` and `other`, per tier,
    /// `|a - b| / (1 + |b|)`.
    pub fn max_relative_error(&self, other: &AllocWeight) -> f64 {
        self.v
            .iter()
            .zip(other.v.iter())
            .map(|(a, b)| (a - b).abs() / (1.0 + b.abs()))
            .fold(0.0, f64::max)
    }
}

impl From<f64> for AllocWeight {
    fn from(magnitude: f64) -> Self {
        Self::new(magnitude, 0)
    }
}

impl PartialEq for AllocWeight {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AllocWeight {}

impl Ord for AllocWeight {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.v.iter().zip(other.v.iter()) {
            let ord = cmp_f64(*a, *b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for AllocWeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl AddAssign for AllocWeight {
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.v.iter_mut().zip(rhs.v.iter()) {
            *a += b;
        }
    }
}

impl SubAssign for AllocWeight {
    fn sub_assign(&mut self, rhs: Self) {
        for (a, b) in self.v.iter_mut().zip(rhs.v.iter()) {
            *a -= b;
        }
    }
}

impl Add for AllocWeight {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sub for AllocWeight {
    type Output = Self;
    fn sub(mut self, rhs: Self) -> Self {
        self -= rhs;
        self
    }
}

impl Neg for AllocWeight {
    type Output = Self;
    fn neg(self) -> Self {
        self * -1.0
    }
}

impl Mul<f64> for AllocWeight {
    type Output = Self;
    fn mul(mut self, rhs: f64) -> Self {
        for x in self.v.iter_mut() {
            *x *= rhs;
        }
        self
    }
}

impl Mul<AllocWeight> for f64 {
    type Output = AllocWeight;
    fn mul(self, rhs: AllocWeight) -> AllocWeight {
        rhs * self
    }
}

impl Mul<i64> for AllocWeight {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        self * rhs as f64
    }
}

impl Mul<AllocWeight> for i64 {
    type Output = AllocWeight;
    fn mul(self, rhs: AllocWeight) -> AllocWeight {
        rhs * self as f64
    }
}

impl Sum for AllocWeight {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, w| acc + w)
    }
}

impl fmt::Display for AllocWeight {
    /// Only non-zero tiers are shown, as `magnitude@tier`. Zero prints as `0`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .v
            .iter()
            .enumerate()
            .filter(|(_, x)| **x != 0.0)
            .map(|(i, x)| {
                let tier = MAX_TIER - i as i64;
                if tier == 0 {
                    format!("{}", x)
                } else {
                    format!("{}@{}", x, tier)
                }
            })
            .collect();
        if parts.is_empty() {
            write!(f, "0")
        } else {
            write!(f, "{}", parts.join("+"))
        }
    }
}
