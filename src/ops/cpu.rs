//! Parallel CPU backend kernels
//!
//! # CPU Backend
//!
//! Flat-slice kernels behind every layer operation. Each one is a single
//! elementwise pass (or a reduction) with no state, so `rayon` splits the
//! work freely: every index writes only its own output slot.
//!
//! These CPU functions are the default target of `ops::dispatch`, and the only
//! one as long as no GPU kernels exist.
//!
//! ## Implemented Kernels
//!
//! - `round` / `round_in_place`: nearest integer, ties to even
//! - `sub`, `mul_assign`, `scale`, `fill`: elementwise arithmetic
//! - `dot`: parallel reduction
//! - `smooth_l1_errors`, `smooth_l1_grad`: the smoothed-L1 function and its derivative
//!
//! ## Panics
//!
//! Kernels assert that their slices have equal lengths. Layers check shapes
//! before calling in, so a panic here means a layer bug, not a caller bug.

use rayon::prelude::*;

use crate::num::Float;

/// Smoothed-L1 of a single difference.
///
/// `0.5 * x² * sigma2` while `|x| < 1 / sigma2`, `|x| - 0.5 / sigma2` beyond.
/// Both branches equal `0.5 / sigma2` at the knee.
#[inline]
pub fn smooth_l1<T: Float>(x: T, sigma2: T) -> T {
    let abs = x.abs();
    if abs < T::ONE / sigma2 {
        T::HALF * x * x * sigma2
    } else {
        abs - T::HALF / sigma2
    }
}

/// Derivative of [`smooth_l1`] with respect to `x`.
///
/// `sigma2 * x` inside the knee, `sign(x)` outside, with `sign(0) = 0`.
#[inline]
pub fn smooth_l1_derivative<T: Float>(x: T, sigma2: T) -> T {
    if x.abs() < T::ONE / sigma2 {
        sigma2 * x
    } else {
        x.sign()
    }
}

/// `output[i] = rint(input[i])`.
///
/// # Example
/// ```rust
/// use blob_layers::ops::cpu::round;
/// let mut out = [0.0; 4];
/// round(&[2.5, 3.5, -2.5, 0.7], &mut out);
/// assert_eq!(out, [2.0, 4.0, -2.0, 1.0]);
/// ```
pub fn round<T: Float>(input: &[T], output: &mut [T]) {
    assert_eq!(input.len(), output.len(), "round length mismatch");
    output
        .par_iter_mut()
        .zip(input.par_iter())
        .for_each(|(y, &x)| *y = x.rint());
}

/// `data[i] = rint(data[i])`.
pub fn round_in_place<T: Float>(data: &mut [T]) {
    data.par_iter_mut().for_each(|x| *x = x.rint());
}

/// `out[i] = a[i] - b[i]`.
pub fn sub<T: Float>(a: &[T], b: &[T], out: &mut [T]) {
    assert_eq!(a.len(), out.len(), "sub length mismatch");
    assert_eq!(b.len(), out.len(), "sub length mismatch");
    out.par_iter_mut()
        .zip(a.par_iter().zip(b.par_iter()))
        .for_each(|(y, (&x, &z))| *y = x - z);
}

/// `y[i] *= w[i]`.
pub fn mul_assign<T: Float>(y: &mut [T], w: &[T]) {
    assert_eq!(y.len(), w.len(), "mul length mismatch");
    y.par_iter_mut()
        .zip(w.par_iter())
        .for_each(|(y, &w)| *y *= w);
}

/// `y[i] = alpha * x[i]`, overwriting `y`.
pub fn scale<T: Float>(alpha: T, x: &[T], y: &mut [T]) {
    assert_eq!(x.len(), y.len(), "scale length mismatch");
    y.par_iter_mut()
        .zip(x.par_iter())
        .for_each(|(y, &x)| *y = alpha * x);
}

/// `y[i] = value`.
pub fn fill<T: Float>(y: &mut [T], value: T) {
    y.par_iter_mut().for_each(|y| *y = value);
}

/// `sum(a[i] * b[i])`.
///
/// The reduction order depends on how `rayon` splits the work, so results may
/// differ from a sequential sum in the last bits.
pub fn dot<T: Float>(a: &[T], b: &[T]) -> T {
    assert_eq!(a.len(), b.len(), "dot length mismatch");
    a.par_iter().zip(b.par_iter()).map(|(&x, &y)| x * y).sum()
}

/// `errors[i] = smooth_l1(diff[i], sigma2)`.
pub fn smooth_l1_errors<T: Float>(diff: &[T], errors: &mut [T], sigma2: T) {
    assert_eq!(diff.len(), errors.len(), "smooth_l1 length mismatch");
    errors
        .par_iter_mut()
        .zip(diff.par_iter())
        .for_each(|(e, &d)| *e = smooth_l1(d, sigma2));
}

/// Replaces every `diff[i]` with `smooth_l1_derivative(diff[i], sigma2)`.
pub fn smooth_l1_grad<T: Float>(diff: &mut [T], sigma2: T) {
    diff.par_iter_mut()
        .for_each(|d| *d = smooth_l1_derivative(*d, sigma2));
}
