//! Elementwise rounding to the nearest integer.
//!
//! Exact halves go to the even neighbour (`2.5 -> 2`, `3.5 -> 4`,
//! `-2.5 -> -2`), the IEEE default rounding mode.
//!
//! Rounding is piecewise constant, so its derivative is zero wherever it is
//! defined. Backward therefore writes zeros into the bottom gradient when
//! asked to propagate, and does nothing otherwise.

use core::marker::PhantomData;

use briny::prelude::Validate;

use super::Layer;
use crate::error::LayerError;
use crate::num::Float;
use crate::ops::dispatch;
use crate::tensors::Blob;

/// The rounding layer. Stateless apart from its element type.
///
/// # Example
/// ```rust
/// use blob_layers::layers::{Layer, Round};
/// use blob_layers::tensors::Blob;
///
/// let mut layer = Round::<f32>::new();
/// let bottom = vec![Blob::from_data(vec![2, 2], vec![2.5, 3.5, -2.5, 0.6])];
/// let mut top = vec![Blob::zeros(Vec::new())];
///
/// layer.setup(&bottom, &mut top).unwrap();
/// layer.forward(&bottom, &mut top).unwrap();
/// assert_eq!(top[0].shape(), &[2, 2]);
/// assert_eq!(top[0].value.data, vec![2.0, 4.0, -2.0, 1.0]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Round<T> {
    _marker: PhantomData<T>,
}

impl<T: Float> Round<T> {
    /// Registered type name.
    pub const TYPE: &'static str = "Round";

    /// Creates the layer.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Rounds a blob's values in place.
    ///
    /// Safe because every output element depends only on the input element at
    /// the same index. The gradient view is left untouched.
    pub fn forward_in_place(&self, blob: &mut Blob<T>) {
        log::trace!("{} forward in place over {} elements", Self::TYPE, blob.count());
        dispatch::round_in_place(&mut blob.value.data);
    }
}

impl<T: Float> Layer<T> for Round<T> {
    fn layer_type(&self) -> &'static str {
        Self::TYPE
    }

    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(1)
    }

    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
    }

    fn reshape(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<(), LayerError> {
        self.check_blob_counts(bottom.len(), top.len())?;
        bottom[0].value.validate()?;

        top[0].reshape_like(&bottom[0]);
        let count = bottom[0].count();
        if top[0].value.data.len() != count {
            return Err(LayerError::CountMismatch {
                layer: Self::TYPE,
                what: "top[0]".to_string(),
                expected: count,
                actual: top[0].value.data.len(),
            });
        }

        log::debug!("{} reshaped to {:?}", Self::TYPE, bottom[0].shape());
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<T, LayerError> {
        self.check_blob_counts(bottom.len(), top.len())?;
        let count = top[0].value.data.len();
        if bottom[0].value.data.len() != count {
            return Err(LayerError::NotReshaped {
                layer: Self::TYPE,
                expected: count,
                actual: bottom[0].value.data.len(),
            });
        }

        dispatch::round(&bottom[0].value.data, &mut top[0].value.data);
        log::trace!("{} forward over {count} elements", Self::TYPE);
        Ok(T::ZERO)
    }

    fn backward(
        &mut self,
        top: &[Blob<T>],
        propagate_down: &[bool],
        bottom: &mut [Blob<T>],
    ) -> Result<(), LayerError> {
        self.check_blob_counts(bottom.len(), top.len())?;
        match propagate_down {
            [false] => {}
            [true] => dispatch::fill(&mut bottom[0].grad.data, T::ZERO),
            _ => {
                return Err(LayerError::BlobCount {
                    layer: Self::TYPE,
                    role: "propagate_down flag",
                    expected: "1".to_string(),
                    actual: propagate_down.len(),
                });
            }
        }
        Ok(())
    }
}
