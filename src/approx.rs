//! Utilities to approximate equality of floating point values.
//!
//! Forward and backward passes reduce with a parallel dot product, so results
//! are compared against reference values with a tolerance instead of `==`.

use crate::num::Float;
use crate::tensors::Tensor;

/// The max epsilon accepted on `f32`s.
pub const F32_MAX_ERROR: f32 = 1e-3;

/// The expected minimum epsilon accepted on `f32`s.
pub const F32_AVG_ERROR: f32 = 1e-5;

/// The best expected epsilon accepted on `f32`s.
pub const F32_MIN_ERROR: f32 = 1e-6;

/// The max epsilon accepted on `f64`s.
pub const F64_MAX_ERROR: f64 = 1e-3;

/// The expected minimum epsilon accepted on `f64`s.
pub const F64_AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon accepted on `f64`s.
pub const F64_MIN_ERROR: f64 = 1e-13;

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Very strong epsilon.
    Precise = 0,

    /// Good epsilon.
    Partial = 1,

    /// Acceptable epsilon.
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

/// Checks the relative distance based off epsilon.
pub trait RelativeEq<Rhs: ?Sized> {
    /// Enumerates the equality of `self`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

macro_rules! impl_relative_eq {
    ($t:ty, $min:expr, $avg:expr, $max:expr) => {
        impl RelativeEq<Self> for $t {
            fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
                if self == rhs {
                    // covers equal infinities
                    return ApproxEquality::Precise;
                }
                let scale = self.abs().max(rhs.abs()).max(1.0);
                let dif = (self - rhs).abs() / scale;

                if dif < $min {
                    ApproxEquality::Precise
                } else if dif < $avg {
                    ApproxEquality::Partial
                } else if dif < $max {
                    ApproxEquality::Relative
                } else {
                    // also NaN
                    ApproxEquality::Scarce
                }
            }
        }
    };
}

impl_relative_eq!(f32, F32_MIN_ERROR, F32_AVG_ERROR, F32_MAX_ERROR);
impl_relative_eq!(f64, F64_MIN_ERROR, F64_AVG_ERROR, F64_MAX_ERROR);

impl<T: RelativeEq<U>, U> RelativeEq<[U]> for [T] {
    fn approx_eq(&self, rhs: &[U]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        self.iter()
            .zip(rhs)
            .map(|(t, u)| t.approx_eq(u))
            .max()
            .unwrap_or(ApproxEquality::Precise)
    }
}

impl<T: Float + RelativeEq<T>> RelativeEq<Self> for Tensor<T> {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.shape != rhs.shape {
            return ApproxEquality::Scarce;
        }
        self.data[..].approx_eq(&rhs.data[..])
    }
}

/// True when `a` and `b` agree to at least [`ApproxEquality::Partial`].
///
/// # Example
/// ```rust
/// use blob_layers::approx::approx_eq;
/// assert!(approx_eq(&0.1_f64, &(0.3 - 0.2)));
/// assert!(!approx_eq(&1.0_f32, &1.1));
/// ```
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) <= ApproxEquality::Partial
}
