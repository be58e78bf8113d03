//! Layers the host engine drives through forward and backward passes.
//!
//! # Execution Contract
//!
//! The host owns every [`Blob`] and calls, per layer:
//!
//! 1. [`Layer::setup`] once, which checks blob counts, runs
//!    [`Layer::layer_setup`], the first [`Layer::reshape`], and seeds loss
//!    weights into the top gradients.
//! 2. [`Layer::reshape`] again whenever an input shape changes.
//! 3. [`Layer::forward`] and, when training, [`Layer::backward`] per step.
//!
//! A layer reshapes only its top blobs and its own scratch, never a bottom blob.
//! Every mutating call takes `&mut self`, so a single instance cannot be
//! reshaped while a forward or backward pass is running on it.
//!
//! # Layer Types
//!
//! | type | bottoms | tops | loss |
//! |---|---|---|---|
//! | [`Round`] | 1 | 1 | no |
//! | [`SmoothL1Loss`] | 2 to 4 | 1 | yes |
//!
//! [`create_layer`] builds either one from a [`LayerParameter`].

use crate::config::{LayerKind, LayerParameter};
use crate::error::LayerError;
use crate::num::Float;
use crate::ops::dispatch;
use crate::tensors::Blob;

mod round;
pub use self::round::Round;

mod smooth_l1_loss;
pub use self::smooth_l1_loss::{SmoothL1Loss, WeightMode};

/// Names accepted by [`create_layer`].
pub const LAYER_TYPES: &[&str] = &[Round::<f32>::TYPE, SmoothL1Loss::<f32>::TYPE];

/// A computation unit with a fixed blob contract.
pub trait Layer<T: Float>: Send {
    /// The registered type name, e.g. `"SmoothL1Loss"`.
    fn layer_type(&self) -> &'static str;

    /// Exact number of bottom blobs, if fixed.
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        None
    }

    /// Minimum number of bottom blobs, if bounded.
    fn min_bottom_blobs(&self) -> Option<usize> {
        None
    }

    /// Maximum number of bottom blobs, if bounded.
    fn max_bottom_blobs(&self) -> Option<usize> {
        None
    }

    /// Exact number of top blobs, if fixed.
    fn exact_num_top_blobs(&self) -> Option<usize> {
        None
    }

    /// Whether the host may force a gradient into `bottom[bottom_index]`.
    fn allow_force_backward(&self, _bottom_index: usize) -> bool {
        true
    }

    /// Loss weight of `top[top_index]`; zero for tops that are not a loss.
    fn loss_weight(&self, _top_index: usize) -> T {
        T::ZERO
    }

    /// One-time setup that depends on the blobs (not on their shapes).
    ///
    /// # Errors
    /// Returns an error if the blobs are inconsistent with the layer's configuration.
    fn layer_setup(&mut self, _bottom: &[Blob<T>], _top: &mut [Blob<T>]) -> Result<(), LayerError> {
        Ok(())
    }

    /// Shapes the top blobs and internal scratch for the current bottom shapes.
    ///
    /// Idempotent for unchanged input shapes.
    ///
    /// # Errors
    /// Returns a shape-contract error if the bottoms disagree; nothing is resized then.
    fn reshape(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError>;

    /// Computes the top values and returns the weighted loss (zero for non-loss layers).
    ///
    /// # Errors
    /// Returns [`LayerError::NotReshaped`] if the blobs changed since the last reshape.
    fn forward(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<T, LayerError>;

    /// Writes `bottom[i].grad` for every `i` with `propagate_down[i]`, from the top gradients.
    ///
    /// # Errors
    /// Returns an error if the blobs changed since the last reshape, or if
    /// `propagate_down` does not have one flag per bottom.
    fn backward(
        &mut self,
        top: &[Blob<T>],
        propagate_down: &[bool],
        bottom: &mut [Blob<T>],
    ) -> Result<(), LayerError>;

    /// Checks the number of bottom and top blobs against the layer's contract.
    ///
    /// # Errors
    /// Returns [`LayerError::BlobCount`] naming the violated bound.
    fn check_blob_counts(&self, bottom: usize, top: usize) -> Result<(), LayerError> {
        let layer = self.layer_type();
        let bottom_error = |expected: String| LayerError::BlobCount {
            layer,
            role: "bottom",
            expected,
            actual: bottom,
        };

        if let Some(exact) = self.exact_num_bottom_blobs() {
            if bottom != exact {
                return Err(bottom_error(exact.to_string()));
            }
        }
        if let Some(min) = self.min_bottom_blobs() {
            if bottom < min {
                return Err(bottom_error(format!("at least {min}")));
            }
        }
        if let Some(max) = self.max_bottom_blobs() {
            if bottom > max {
                return Err(bottom_error(format!("at most {max}")));
            }
        }
        if let Some(exact) = self.exact_num_top_blobs() {
            if top != exact {
                return Err(LayerError::BlobCount {
                    layer,
                    role: "top",
                    expected: exact.to_string(),
                    actual: top,
                });
            }
        }
        Ok(())
    }

    /// Seeds each top gradient with its loss weight.
    ///
    /// The seeded value is the upstream gradient `backward` scales by.
    fn set_loss_weights(&self, top: &mut [Blob<T>]) {
        for (index, blob) in top.iter_mut().enumerate() {
            let weight = self.loss_weight(index);
            if weight != T::ZERO {
                dispatch::fill(&mut blob.grad.data, weight);
            }
        }
    }

    /// Full initialisation: counts, layer setup, first reshape, loss weights.
    ///
    /// # Errors
    /// Propagates the first failing step; later steps are not run.
    fn setup(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError> {
        log::debug!(
            "setting up {} layer with {} bottom and {} top blob(s)",
            self.layer_type(),
            bottom.len(),
            top.len()
        );
        self.check_blob_counts(bottom.len(), top.len())?;
        self.layer_setup(bottom, top)?;
        self.reshape(bottom, top)?;
        self.set_loss_weights(top);
        Ok(())
    }
}

/// Builds a layer from its description.
///
/// # Errors
/// - [`LayerError::InvalidParameter`] if a parameter is out of range, e.g. a
///   non-positive `sigma`, or a loss weight on a layer that produces no loss.
///
/// # Example
/// ```rust
/// use blob_layers::config::LayerParameter;
/// use blob_layers::layers::{create_layer, Layer};
///
/// let param = LayerParameter::from_json(
///     r#"{ "name": "loss_bbox", "type": "SmoothL1Loss", "smooth_l1_loss_param": { "sigma": 3.0 } }"#,
/// ).unwrap();
/// let layer = create_layer::<f32>(&param).unwrap();
/// assert_eq!(layer.layer_type(), "SmoothL1Loss");
/// assert_eq!(layer.loss_weight(0), 1.0);
/// ```
pub fn create_layer<T: Float>(param: &LayerParameter) -> Result<Box<dyn Layer<T>>, LayerError> {
    if param.loss_weight.len() > 1 {
        return Err(LayerError::InvalidParameter(format!(
            "layer `{}` has one top but {} loss weights",
            param.name,
            param.loss_weight.len()
        )));
    }
    let loss_weight = param.loss_weight.first().copied();

    let layer: Box<dyn Layer<T>> = match &param.kind {
        LayerKind::Round => {
            if loss_weight.is_some_and(|w| w != 0.0) {
                return Err(LayerError::InvalidParameter(format!(
                    "layer `{}` of type Round produces no loss and cannot carry a loss weight",
                    param.name
                )));
            }
            Box::new(Round::new())
        }
        LayerKind::SmoothL1Loss {
            smooth_l1_loss_param,
        } => {
            let mut layer = SmoothL1Loss::new(T::from_f64(smooth_l1_loss_param.sigma))?;
            if let Some(mode) = smooth_l1_loss_param.weights {
                layer = layer.with_weight_mode(mode);
            }
            if let Some(weight) = loss_weight {
                layer = layer.with_loss_weight(T::from_f64(weight));
            }
            Box::new(layer)
        }
    };

    log::debug!("created {} layer `{}`", layer.layer_type(), param.name);
    Ok(layer)
}
