//! Differentiable operations in closure form.
//!
//! # Closure API
//!
//! The same math as the layers, for callers that do not want to manage blobs
//! and scratch. Each operation follows one pattern:
//! 1. **Inputs** are borrowed tensors or blobs.
//! 2. **Forward** runs immediately and returns its output.
//! 3. **Backward** is a returned closure that maps the upstream gradient to
//!    input gradients. It captures only what it needs and may be called
//!    repeatedly.
//!
//! ## Usage Guidelines
//!
//! - These functions **panic** on shape mismatches. The layers in
//!   [`crate::layers`] return errors instead.
//! - Inputs to `smooth_l1_loss` must share their full shape. The layer is more
//!   permissive about the batch axis.

use crate::num::Float;
use crate::ops::dispatch;
use crate::tensors::{Blob, Tensor};

/// Backward closure of [`round`].
pub type RoundBack<T> = dyn Fn(&Tensor<T>) -> Tensor<T>;

/// Backward closure of [`smooth_l1_loss`], returning `(d_prediction, d_target)`.
pub type SmoothL1Back<'a, T> = dyn Fn(T) -> (Tensor<T>, Tensor<T>) + 'a;

/// Rounds every element to the nearest integer, ties to even.
///
/// # Returns
/// - `out`: rounded tensor of the input's shape.
/// - `back`: closure returning a zero gradient of the input's shape, since
///   rounding is flat almost everywhere.
///
/// # Example
/// ```rust
/// use blob_layers::backprop::round;
/// use blob_layers::tensors::Blob;
///
/// let input = Blob::from_data(vec![3], vec![0.5_f64, 1.5, 2.5]);
/// let (out, back) = round(&input);
/// assert_eq!(out.data, vec![0.0, 2.0, 2.0]);
/// assert!(back(&out).data.iter().all(|&g| g == 0.0));
/// ```
pub fn round<T: Float>(input: &Blob<T>) -> (Tensor<T>, Box<RoundBack<T>>) {
    let mut out = Tensor::zeros(input.shape().to_vec());
    dispatch::round(&input.value.data, &mut out.data);

    let shape = input.shape().to_vec();
    let back = move |_grad_output: &Tensor<T>| Tensor::zeros(shape.clone());

    (out, Box::new(back))
}

/// Computes the smoothed-L1 loss of `prediction` against `target`.
///
/// `weights` holds zero, one (inside), or two (inside, outside) weight tensors.
///
/// # Formula
/// `$$ L = \frac{1}{num} \sum_i w_{out,i} \cdot f_\sigma(w_{in,i} (p_i - t_i)) $$`
///
/// # Returns
/// - Scalar loss
/// - Closure mapping `dL/dloss` to `(dL/dprediction, dL/dtarget)`
///
/// # Panics
/// Panics if any shape differs from the prediction's, or if more than two
/// weight tensors are given.
///
/// # Example
/// ```rust
/// use blob_layers::backprop::smooth_l1_loss;
/// use blob_layers::tensors::{Blob, Tensor};
///
/// let prediction = Blob::from_data(vec![1, 2], vec![5.0_f64, 0.5]);
/// let target = Tensor::new(vec![1, 2], vec![0.0, 0.0]);
/// let (loss, back) = smooth_l1_loss(&prediction, &target, &[], 1.0);
/// assert_eq!(loss, 4.5 + 0.125);
///
/// let (d_pred, d_target) = back(1.0);
/// assert_eq!(d_pred.data, vec![1.0, 0.5]);
/// assert_eq!(d_target.data, vec![-1.0, -0.5]);
/// ```
pub fn smooth_l1_loss<'a, T: Float>(
    prediction: &'a Blob<T>,
    target: &'a Tensor<T>,
    weights: &[&'a Tensor<T>],
    sigma: T,
) -> (T, Box<SmoothL1Back<'a, T>>) {
    let shape = prediction.shape();
    assert_eq!(shape, target.shape.as_slice(), "smooth_l1_loss shape mismatch");
    assert!(weights.len() <= 2, "smooth_l1_loss takes at most inside and outside weights");
    for w in weights {
        assert_eq!(shape, w.shape.as_slice(), "smooth_l1_loss weight shape mismatch");
    }

    let inside = weights.first().copied();
    let outside = weights.get(1).copied();
    let sigma2 = sigma * sigma;
    let num = T::from_usize(prediction.num());
    let count = prediction.count();

    let mut diff = vec![T::ZERO; count];
    dispatch::sub(&prediction.value.data, &target.data, &mut diff);
    if let Some(w) = inside {
        dispatch::mul_assign(&mut diff, &w.data);
    }

    let mut errors = vec![T::ZERO; count];
    dispatch::smooth_l1_errors(&diff, &mut errors, sigma2);
    if let Some(w) = outside {
        dispatch::mul_assign(&mut errors, &w.data);
    }
    let loss = errors.iter().copied().sum::<T>() / num;

    dispatch::smooth_l1_grad(&mut diff, sigma2);
    let shape = shape.to_vec();

    let back = move |grad_output: T| {
        let mut d_prediction = vec![T::ZERO; count];
        dispatch::scale(grad_output / num, &diff, &mut d_prediction);
        if let Some(w) = inside {
            dispatch::mul_assign(&mut d_prediction, &w.data);
        }
        if let Some(w) = outside {
            dispatch::mul_assign(&mut d_prediction, &w.data);
        }
        let d_target = d_prediction.iter().map(|&g| -g).collect();

        (
            Tensor::new(shape.clone(), d_prediction),
            Tensor::new(shape.clone(), d_target),
        )
    };

    (loss, Box::new(back))
}
