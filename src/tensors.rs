//! Core tensor and blob data structures.
//!
//! # Tensors and Blobs
//!
//! A [`Tensor`] is a shape plus a flat row-major buffer. A [`Blob`] pairs a
//! value tensor with a gradient tensor of the same shape and is the unit the
//! host engine hands to a layer: the layer reads `value` during forward and
//! writes `grad` during backward.
//!
//! ## Design Highlights
//! - Tensors are generic over the element type (`f32` or `f64` in practice)
//! - Shape is stored as a `Vec<usize>` and enforced at runtime
//! - An empty shape is a scalar holding exactly one element
//! - The legacy `num`/`channels`/`height`/`width` accessors read axes 0..3 and
//!   report `1` for axes the tensor does not have
//!
//! ## Ownership
//! Blobs belong to the host. Layers only reshape the top blobs and the scratch
//! blobs they own, never a bottom blob.
//!
//! ## Example
//!
//! ```rust
//! use blob_layers::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! assert_eq!(t.num(), 2);
//! assert_eq!(t.width(), 1);
//! ```

use briny::prelude::*;

use crate::num::Float;

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - `shape` defines the structure, e.g., `[2, 3]` for a 2x3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Number of elements, the product of all dimensions.
    pub fn count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of `axis`, or `1` when the tensor has fewer axes.
    pub fn legacy_dim(&self, axis: usize) -> usize {
        self.shape.get(axis).copied().unwrap_or(1)
    }

    /// Batch dimension (axis 0).
    pub fn num(&self) -> usize {
        self.legacy_dim(0)
    }

    /// Channel dimension (axis 1).
    pub fn channels(&self) -> usize {
        self.legacy_dim(1)
    }

    /// Height dimension (axis 2).
    pub fn height(&self) -> usize {
        self.legacy_dim(2)
    }

    /// Width dimension (axis 3).
    pub fn width(&self) -> usize {
        self.legacy_dim(3)
    }
}

impl<T: Float> Tensor<T> {
    /// A tensor of the given shape filled with zeros.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        Self::filled(shape, T::ZERO)
    }

    /// A tensor of the given shape with every element set to `value`.
    pub fn filled(shape: impl Into<Vec<usize>>, value: T) -> Self {
        let shape = shape.into();
        let data = vec![value; shape.iter().product()];
        Self { shape, data }
    }

    /// Changes the shape, growing or truncating the buffer to the new count.
    ///
    /// Newly exposed elements are zero. Existing elements keep their flat
    /// position, so the contents are only meaningful again after the next write.
    pub fn reshape(&mut self, shape: &[usize]) {
        self.shape.clear();
        self.shape.extend_from_slice(shape);
        self.data.resize(self.count(), T::ZERO);
    }
}

impl<T> Validate for Tensor<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.data.len() != self.shape.iter().product::<usize>() {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// A container pairing a value with its gradient.
///
/// Used as [`Blob`] (`WithGrad<Tensor<T>>`) for layer inputs and outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct WithGrad<T> {
    pub value: T,
    pub grad: T,
}

/// A shape-tagged buffer with separate value and gradient views.
pub type Blob<T> = WithGrad<Tensor<T>>;

impl<T: Float> WithGrad<Tensor<T>> {
    /// Wraps `value` with a zeroed gradient of the same shape.
    pub fn new(value: Tensor<T>) -> Self {
        let grad = Tensor::zeros(value.shape.clone());
        Self { value, grad }
    }

    /// An all-zero blob of the given shape.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        Self::new(Tensor::zeros(shape))
    }

    /// Builds a blob from a shape and flat values.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    ///
    /// # Example
    /// ```rust
    /// use blob_layers::tensors::Blob;
    /// let b = Blob::from_data(vec![1, 2], vec![0.5_f32, 1.5]);
    /// assert_eq!(b.grad.data, vec![0.0, 0.0]);
    /// ```
    pub fn from_data(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        Self::new(Tensor::new(shape, data))
    }

    /// The blob's shape (value and gradient always agree).
    pub fn shape(&self) -> &[usize] {
        &self.value.shape
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        self.value.count()
    }

    /// Batch dimension (axis 0).
    pub fn num(&self) -> usize {
        self.value.num()
    }

    /// Channel dimension (axis 1).
    pub fn channels(&self) -> usize {
        self.value.channels()
    }

    /// Height dimension (axis 2).
    pub fn height(&self) -> usize {
        self.value.height()
    }

    /// Width dimension (axis 3).
    pub fn width(&self) -> usize {
        self.value.width()
    }

    /// Reshapes both the value and the gradient.
    pub fn reshape(&mut self, shape: &[usize]) {
        self.value.reshape(shape);
        self.grad.reshape(shape);
    }

    /// Reshapes this blob to the shape of `other`.
    pub fn reshape_like(&mut self, other: &Self) {
        self.reshape(other.shape());
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use blob_layers::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
