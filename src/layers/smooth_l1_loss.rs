//! Smoothed-L1 (Huber-like) loss with optional inside and outside weights.
//!
//! # Blobs
//!
//! | bottom | role | gradient |
//! |---|---|---|
//! | 0 | prediction | yes |
//! | 1 | target | yes (negated) |
//! | 2 | inside weights, scale `prediction - target` | never |
//! | 3 | outside weights, scale the per-element loss | never |
//!
//! The single top is a scalar: the summed per-element loss divided by the
//! batch size (`num`) of the prediction.
//!
//! # Formula
//!
//! With `d = w_in * (p - t)` and `s = sigma²`:
//!
//! `$$ f(d) = 0.5 \cdot d^2 \cdot s \text{ if } |d| < 1/s \text{ else } |d| - 0.5/s $$`
//!
//! `$$ L = \frac{1}{num} \sum_i w_{out,i} \cdot f(d_i) $$`
//!
//! The knee sits at `1 / sigma²`, not at `1`, so a larger `sigma` makes the
//! quadratic region narrower.

use briny::prelude::Validate;
use serde::{Deserialize, Serialize};

use super::Layer;
use crate::error::LayerError;
use crate::num::Float;
use crate::ops::dispatch;
use crate::tensors::{Blob, Tensor};

/// Which optional weight blobs follow the prediction and target.
///
/// Outside weights are only ever used together with inside weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMode {
    /// Two bottoms: prediction and target.
    #[default]
    Unweighted,
    /// Three bottoms: inside weights added.
    Inside,
    /// Four bottoms: inside and outside weights.
    InsideOutside,
}

impl WeightMode {
    /// The mode implied by a bottom count, if the count is valid.
    pub fn from_bottom_count(count: usize) -> Option<Self> {
        match count {
            2 => Some(Self::Unweighted),
            3 => Some(Self::Inside),
            4 => Some(Self::InsideOutside),
            _ => None,
        }
    }

    /// Number of bottom blobs this mode expects.
    pub fn bottom_count(self) -> usize {
        match self {
            Self::Unweighted => 2,
            Self::Inside => 3,
            Self::InsideOutside => 4,
        }
    }

    /// Whether `prediction - target` is scaled by inside weights.
    pub fn has_weights(self) -> bool {
        self != Self::Unweighted
    }

    /// Whether the per-element loss is scaled by outside weights.
    pub fn has_outside_weights(self) -> bool {
        self == Self::InsideOutside
    }
}

/// What the `diff` scratch currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scratch {
    /// Nothing usable: fresh from a reshape.
    Stale,
    /// `w_in * (p - t)` from the last forward.
    Difference,
    /// The elementwise derivative, after a backward.
    Gradient,
}

/// The smoothed-L1 loss layer.
///
/// # Example
/// ```rust
/// use blob_layers::layers::{Layer, SmoothL1Loss};
/// use blob_layers::tensors::Blob;
///
/// let mut layer = SmoothL1Loss::<f64>::new(1.0).unwrap();
/// let mut bottom = vec![
///     Blob::from_data(vec![1, 1], vec![5.0]),
///     Blob::from_data(vec![1, 1], vec![0.0]),
/// ];
/// let mut top = vec![Blob::zeros(Vec::new())];
///
/// layer.setup(&bottom, &mut top).unwrap();
/// let loss = layer.forward(&bottom, &mut top).unwrap();
/// assert_eq!(loss, 4.5);
///
/// layer.backward(&top, &[true, true], &mut bottom).unwrap();
/// assert_eq!(bottom[0].grad.data, vec![1.0]);
/// assert_eq!(bottom[1].grad.data, vec![-1.0]);
/// ```
#[derive(Debug, Clone)]
pub struct SmoothL1Loss<T: Float> {
    sigma: T,
    sigma2: T,
    loss_weight: T,
    configured_mode: Option<WeightMode>,
    mode: WeightMode,
    diff: Tensor<T>,
    errors: Tensor<T>,
    ones: Tensor<T>,
    scratch: Scratch,
}

impl<T: Float> SmoothL1Loss<T> {
    /// Registered type name.
    pub const TYPE: &'static str = "SmoothL1Loss";

    /// Creates the layer, caching `sigma²`. The loss weight defaults to `1`.
    ///
    /// # Errors
    /// Returns [`LayerError::InvalidParameter`] unless `sigma` is finite and positive.
    pub fn new(sigma: T) -> Result<Self, LayerError> {
        if !(sigma.is_finite() && sigma > T::ZERO) {
            return Err(LayerError::InvalidParameter(format!(
                "{} sigma must be finite and positive, got {sigma}",
                Self::TYPE
            )));
        }
        Ok(Self {
            sigma,
            sigma2: sigma * sigma,
            loss_weight: T::ONE,
            configured_mode: None,
            mode: WeightMode::Unweighted,
            diff: Tensor::zeros(vec![0]),
            errors: Tensor::zeros(vec![0]),
            ones: Tensor::zeros(vec![0]),
            scratch: Scratch::Stale,
        })
    }

    /// Pins the weight mode instead of inferring it from the bottom count.
    ///
    /// Setup then fails unless exactly `mode.bottom_count()` bottoms are given.
    #[must_use]
    pub fn with_weight_mode(mut self, mode: WeightMode) -> Self {
        self.configured_mode = Some(mode);
        self
    }

    /// Sets the loss weight seeded into the top gradient by [`Layer::setup`].
    #[must_use]
    pub fn with_loss_weight(mut self, weight: T) -> Self {
        self.loss_weight = weight;
        self
    }

    /// The configured `sigma`.
    pub fn sigma(&self) -> T {
        self.sigma
    }

    /// The cached `sigma²`.
    pub fn sigma2(&self) -> T {
        self.sigma2
    }

    /// The weight mode in effect since the last reshape.
    pub fn weight_mode(&self) -> WeightMode {
        self.mode
    }

    /// Per-element loss from the last forward, after outside weighting.
    pub fn errors(&self) -> &Tensor<T> {
        &self.errors
    }

    fn resolve_weight_mode(&self, bottom: usize) -> Result<WeightMode, LayerError> {
        match self.configured_mode {
            Some(mode) if mode.bottom_count() == bottom => Ok(mode),
            Some(mode) => Err(LayerError::InvalidParameter(format!(
                "{} configured for {mode:?} weights needs {} bottoms, got {bottom}",
                Self::TYPE,
                mode.bottom_count()
            ))),
            None => WeightMode::from_bottom_count(bottom).ok_or_else(|| LayerError::BlobCount {
                layer: Self::TYPE,
                role: "bottom",
                expected: "2 to 4".to_string(),
                actual: bottom,
            }),
        }
    }

    /// Verifies the blobs still match what the last reshape prepared for.
    fn check_reshaped(&self, bottom: &[Blob<T>], top: &[Blob<T>]) -> Result<usize, LayerError> {
        self.check_blob_counts(bottom.len(), top.len())?;
        if bottom.len() != self.mode.bottom_count() {
            return Err(LayerError::BlobCount {
                layer: Self::TYPE,
                role: "bottom",
                expected: self.mode.bottom_count().to_string(),
                actual: bottom.len(),
            });
        }

        let count = self.diff.data.len();
        if bottom[0].value.data.len() != count {
            return Err(LayerError::NotReshaped {
                layer: Self::TYPE,
                expected: count,
                actual: bottom[0].value.data.len(),
            });
        }
        if let Some((index, blob)) = bottom
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, blob)| blob.value.data.len() < count)
        {
            return Err(LayerError::CountMismatch {
                layer: Self::TYPE,
                what: format!("bottom[{index}]"),
                expected: count,
                actual: blob.value.data.len(),
            });
        }
        if top[0].value.data.is_empty() {
            return Err(LayerError::NotReshaped {
                layer: Self::TYPE,
                expected: 1,
                actual: 0,
            });
        }
        Ok(count)
    }
}

/// Compares every non-batch axis of `other` against `reference`.
///
/// Axes missing from the shorter shape count as `1`.
fn check_non_batch_axes<T>(
    reference: &Tensor<T>,
    other: &Tensor<T>,
    index: usize,
) -> Result<(), LayerError> {
    const AXES: [&str; 3] = ["channels", "height", "width"];

    let rank = reference.shape.len().max(other.shape.len()).max(4);
    for axis in 1..rank {
        let expected = reference.legacy_dim(axis);
        let actual = other.legacy_dim(axis);
        if expected != actual {
            return Err(LayerError::ShapeMismatch {
                layer: "SmoothL1Loss",
                index,
                axis: AXES.get(axis - 1).copied().unwrap_or("trailing axis"),
                expected,
                actual,
            });
        }
    }
    Ok(())
}

impl<T: Float> Layer<T> for SmoothL1Loss<T> {
    fn layer_type(&self) -> &'static str {
        Self::TYPE
    }

    fn min_bottom_blobs(&self) -> Option<usize> {
        Some(2)
    }

    fn max_bottom_blobs(&self) -> Option<usize> {
        Some(4)
    }

    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
    }

    fn loss_weight(&self, top_index: usize) -> T {
        if top_index == 0 { self.loss_weight } else { T::ZERO }
    }

    fn layer_setup(&mut self, bottom: &[Blob<T>], _top: &mut [Blob<T>]) -> Result<(), LayerError> {
        self.mode = self.resolve_weight_mode(bottom.len())?;
        log::debug!(
            "{} sigma={} sigma2={} weights={:?}",
            Self::TYPE,
            self.sigma,
            self.sigma2,
            self.mode
        );
        Ok(())
    }

    fn reshape(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError> {
        self.check_blob_counts(bottom.len(), top.len())?;
        let mode = self.resolve_weight_mode(bottom.len())?;
        for blob in bottom {
            blob.value.validate()?;
        }

        let reference = &bottom[0].value;
        let count = reference.count();
        for (index, blob) in bottom.iter().enumerate().skip(1) {
            check_non_batch_axes(reference, &blob.value, index)?;
            // the batch size may differ; only the leading `count` elements are read
            if blob.count() < count {
                return Err(LayerError::CountMismatch {
                    layer: Self::TYPE,
                    what: format!("bottom[{index}]"),
                    expected: count,
                    actual: blob.count(),
                });
            }
        }

        // same shapes keep the scratch, so a backward may still follow
        let unchanged = self.mode == mode && self.diff.shape == reference.shape;

        self.mode = mode;
        top[0].reshape(&[]);
        if !unchanged {
            self.diff.reshape(&reference.shape);
            self.errors.reshape(&reference.shape);
            self.ones.reshape(&reference.shape);
            dispatch::fill(&mut self.ones.data, T::ONE);
            self.scratch = Scratch::Stale;
        }

        log::debug!(
            "{} reshaped to {:?} ({count} elements, num={})",
            Self::TYPE,
            reference.shape,
            reference.num()
        );
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<T, LayerError> {
        let count = self.check_reshaped(bottom, top)?;

        let diff = &mut self.diff.data;
        dispatch::sub(&bottom[0].value.data, &bottom[1].value.data[..count], diff);
        if self.mode.has_weights() {
            // d := w_in * (p - t)
            dispatch::mul_assign(diff, &bottom[2].value.data[..count]);
        }

        dispatch::smooth_l1_errors(diff, &mut self.errors.data, self.sigma2);
        if self.mode.has_outside_weights() {
            dispatch::mul_assign(&mut self.errors.data, &bottom[3].value.data[..count]);
        }
        self.scratch = Scratch::Difference;

        let loss = dispatch::dot(&self.ones.data, &self.errors.data) / T::from_usize(bottom[0].num());
        top[0].value.data[0] = loss;

        log::trace!("{} forward: loss={loss}", Self::TYPE);
        Ok(self.loss_weight * loss)
    }

    fn backward(
        &mut self,
        top: &[Blob<T>],
        propagate_down: &[bool],
        bottom: &mut [Blob<T>],
    ) -> Result<(), LayerError> {
        if propagate_down.len() != bottom.len() {
            return Err(LayerError::BlobCount {
                layer: Self::TYPE,
                role: "propagate_down flag",
                expected: bottom.len().to_string(),
                actual: propagate_down.len(),
            });
        }
        let count = self.check_reshaped(bottom, top)?;
        let top_grad = *top[0].grad.data.first().ok_or_else(|| LayerError::CountMismatch {
            layer: Self::TYPE,
            what: "top[0] gradient".to_string(),
            expected: 1,
            actual: 0,
        })?;

        // every target is checked before any gradient is written
        if let Some((index, blob)) = bottom
            .iter()
            .enumerate()
            .take(2)
            .find(|(index, blob)| propagate_down[*index] && blob.grad.data.len() < count)
        {
            return Err(LayerError::CountMismatch {
                layer: Self::TYPE,
                what: format!("bottom[{index}] gradient"),
                expected: count,
                actual: blob.grad.data.len(),
            });
        }

        match self.scratch {
            Scratch::Stale => {
                return Err(LayerError::BackwardBeforeForward { layer: Self::TYPE });
            }
            Scratch::Difference => {
                dispatch::smooth_l1_grad(&mut self.diff.data, self.sigma2);
                self.scratch = Scratch::Gradient;
            }
            Scratch::Gradient => {}
        }

        if propagate_down.iter().skip(2).any(|&p| p) {
            log::trace!("{} never propagates to weight bottoms", Self::TYPE);
        }

        let (inputs, weights) = bottom.split_at_mut(2);
        for (index, blob) in inputs.iter_mut().enumerate() {
            if !propagate_down[index] {
                continue;
            }
            let sign = if index == 0 { T::ONE } else { -T::ONE };
            let alpha = sign * top_grad / T::from_usize(blob.num());
            let grad = &mut blob.grad.data[..count];
            dispatch::scale(alpha, &self.diff.data, grad);
            if self.mode.has_weights() {
                dispatch::mul_assign(grad, &weights[0].value.data[..count]);
            }
            if self.mode.has_outside_weights() {
                dispatch::mul_assign(grad, &weights[1].value.data[..count]);
            }
        }

        log::trace!("{} backward: top_grad={top_grad}", Self::TYPE);
        Ok(())
    }
}
