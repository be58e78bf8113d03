//! Floating point element types accepted by the layers.
//!
//! Every layer and kernel is generic over [`Float`], which is implemented for
//! `f32` and `f64`. The host picks the precision once when it instantiates a
//! layer, e.g. `SmoothL1Loss::<f32>::new(1.0)`.

use core::fmt::{Debug, Display};
use core::iter::Sum;
use core::ops::{Add, Div, Mul, MulAssign, Neg, Sub};

/// Conversions between primitive floats.
pub trait IntermediateFp {
    /// Convert to `f32`.
    fn into_f32(self) -> f32;
    /// Convert from `f32`.
    fn from_f32(x: f32) -> Self;

    /// Convert to `f64`.
    fn into_f64(self) -> f64;
    /// Convert from `f64`.
    fn from_f64(x: f64) -> Self;
}

impl IntermediateFp for f32 {
    fn from_f32(x: Self) -> Self {
        x
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_f64(x: f64) -> Self {
        x as Self
    }

    fn into_f32(self) -> Self {
        self
    }

    fn into_f64(self) -> f64 {
        f64::from(self)
    }
}

impl IntermediateFp for f64 {
    fn from_f32(x: f32) -> Self {
        Self::from(x)
    }

    fn from_f64(x: Self) -> Self {
        x
    }

    #[allow(clippy::cast_possible_truncation)]
    fn into_f32(self) -> f32 {
        self as f32
    }

    fn into_f64(self) -> Self {
        self
    }
}

/// Element type of a blob.
///
/// Bundles the arithmetic the CPU kernels need with the thread-safety bounds
/// `rayon` requires for parallel loops and reductions.
pub trait Float:
    IntermediateFp
    + Copy
    + Default
    + Debug
    + Display
    + PartialOrd
    + Send
    + Sync
    + Sum
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + MulAssign
    + 'static
{
    /// Additive identity.
    const ZERO: Self;
    /// Multiplicative identity.
    const ONE: Self;
    /// One half.
    const HALF: Self;

    /// Absolute value.
    fn abs(self) -> Self;

    /// Rounds to the nearest integer, resolving exact halves to the even neighbour.
    fn rint(self) -> Self;

    /// `(0 < x) - (x < 0)`: `1`, `-1`, or `0` for zero and NaN.
    fn sign(self) -> Self;

    /// Whether the value is neither infinite nor NaN.
    fn is_finite(self) -> bool;

    /// Converts a `usize` dimension into this float type.
    #[allow(clippy::cast_precision_loss)]
    fn from_usize(n: usize) -> Self {
        Self::from_f64(n as f64)
    }
}

macro_rules! impl_float {
    ($t:ty) => {
        impl Float for $t {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            const HALF: Self = 0.5;

            #[inline]
            fn abs(self) -> Self {
                <$t>::abs(self)
            }

            #[inline]
            fn rint(self) -> Self {
                <$t>::round_ties_even(self)
            }

            #[inline]
            fn sign(self) -> Self {
                Self::from(u8::from(0.0 < self)) - Self::from(u8::from(self < 0.0))
            }

            #[inline]
            fn is_finite(self) -> bool {
                <$t>::is_finite(self)
            }
        }
    };
}

impl_float!(f32);
impl_float!(f64);
