//! # Operation Dispatch Layer
//!
//! Kernels behind the layers, split by backend.
//!
//! ## Submodules
//!
//! - [`cpu`]: multi-threaded CPU kernels (the only implemented backend)
//! - [`dispatch`]: runtime backend selection with CPU fallback
//!
//! ## Extending the Backend
//!
//! To add a kernel:
//!
//! 1. Implement it in `cpu` (and later in a GPU module)
//! 2. Add it to `dispatch` for unified access
//! 3. Keep shape checks in the layers, not in the kernels
//!
//! ## Example
//! ```rust
//! use blob_layers::ops::dispatch;
//!
//! let mut diff = [0.0_f32; 2];
//! dispatch::sub(&[5.0, 0.5], &[0.0, 0.0], &mut diff);
//! let mut errors = [0.0_f32; 2];
//! dispatch::smooth_l1_errors(&diff, &mut errors, 1.0);
//! assert_eq!(errors, [4.5, 0.125]);
//! ```

pub mod cpu;
pub mod dispatch;
