//! Backend selection module.
//!
//! This module defines the available computation backends and provides
//! functions to set and get the current backend.
//!
//! # Supported Backends
//!
//! - `Cpu`: pure Rust kernels parallelised with `rayon` (default).
//! - `Wgpu`: reserved; no kernels exist, calls fall back to `Cpu`.
//! - `Cuda`: reserved; no kernels exist, calls fall back to `Cpu`.
//!
//! The backend is stored globally using an `AtomicU8`, so every layer
//! instance in the process sees the same choice.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of supported computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Backend {
    /// Pure CPU-based backend (default).
    #[default]
    Cpu = 0,
    /// GPU backend; currently a stub.
    Wgpu,
    /// CUDA backend; currently a stub.
    Cuda,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            2 => Ok(Self::Cuda),
            _ => Err(()),
        }
    }
}

/// Internal global state for the active backend.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the active backend to use for layer computation.
///
/// # Example
///
/// ```
/// use blob_layers::backend::{get_backend, set_backend, Backend};
/// set_backend(Backend::Cpu);
/// assert_eq!(get_backend(), Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    log::debug!("switching compute backend to {b:?}");
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the currently active computation backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}
