//! blob_layers: rounding and smoothed-L1 loss layers for a host execution engine.
//!
//! The host engine owns the graph, the blobs, and the schedule. This crate
//! supplies two leaf layers it can drive through reshape, forward, and
//! backward calls:
//!
//! - [`layers::Round`]: elementwise round-to-nearest, ties to even.
//! - [`layers::SmoothL1Loss`]: Huber-like loss with a `sigma`-controlled knee,
//!   optional inside/outside weights, and its gradient.
//!
//! # Modules
//!
//! - [`tensors`]: `Tensor`, `WithGrad`, and the `Blob` alias the layers operate on.
//! - [`layers`]: the `Layer` contract, both layers, and the `create_layer` factory.
//! - [`config`]: JSON layer descriptions (`LayerParameter`).
//! - [`backprop`]: the same math as `(output, backward closure)` pairs.
//! - [`ops`]: rayon-parallel CPU kernels behind a backend dispatch layer.
//! - [`backend`]: global backend selection.
//! - [`approx`]: tolerance comparisons for floating point results.
//!
//! # Logging
//!
//! Setup and reshape events are logged at `debug`, and per-step forward and
//! backward at `trace`, through the `log` facade. The crate installs no logger.
//!
//! # Example
//!
//! ```rust
//! use blob_layers::layers::{create_layer, Layer};
//! use blob_layers::config::LayerParameter;
//! use blob_layers::tensors::Blob;
//!
//! let param = LayerParameter::from_json(r#"{ "type": "SmoothL1Loss" }"#).unwrap();
//! let mut loss = create_layer::<f64>(&param).unwrap();
//!
//! let mut bottom = vec![
//!     Blob::from_data(vec![2, 1], vec![0.5, 3.0]),
//!     Blob::from_data(vec![2, 1], vec![0.0, 0.0]),
//! ];
//! let mut top = vec![Blob::zeros(Vec::new())];
//!
//! loss.setup(&bottom, &mut top).unwrap();
//! let value = loss.forward(&bottom, &mut top).unwrap();
//! assert_eq!(value, (0.125 + 2.5) / 2.0);
//!
//! loss.backward(&top, &[true, false], &mut bottom).unwrap();
//! assert_eq!(bottom[0].grad.data, vec![0.25, 0.5]);
//! ```

pub mod approx;
pub mod backend;
pub mod backprop;
pub mod config;
pub mod error;
pub mod layers;
pub mod num;
pub mod ops;
pub mod tensors;

pub use error::LayerError;
pub use num::Float;
pub use tensors::{Blob, Tensor, WithGrad};
