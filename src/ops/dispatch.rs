//! Operation Dispatch Layer
//!
//! This module selects the backend for each kernel at runtime, based on the
//! global [`Backend`].
//!
//! Only the CPU backend has kernels. When `Wgpu` or `Cuda` is selected the
//! call is logged and served by [`super::cpu`], so selecting a GPU backend
//! never changes results.

use crate::backend::{get_backend, Backend};
use crate::num::Float;

use super::cpu;

/// Logs the fallback when a non-CPU backend is active.
#[inline]
fn route(op: &'static str) {
    match get_backend() {
        Backend::Cpu => {}
        backend @ (Backend::Wgpu | Backend::Cuda) => {
            log::debug!("no {backend:?} kernel for `{op}`; running on cpu");
        }
    }
}

/// Dispatches [`cpu::round`].
pub fn round<T: Float>(input: &[T], output: &mut [T]) {
    route("round");
    cpu::round(input, output);
}

/// Dispatches [`cpu::round_in_place`].
pub fn round_in_place<T: Float>(data: &mut [T]) {
    route("round_in_place");
    cpu::round_in_place(data);
}

/// Dispatches [`cpu::sub`].
pub fn sub<T: Float>(a: &[T], b: &[T], out: &mut [T]) {
    route("sub");
    cpu::sub(a, b, out);
}

/// Dispatches [`cpu::mul_assign`].
pub fn mul_assign<T: Float>(y: &mut [T], w: &[T]) {
    route("mul");
    cpu::mul_assign(y, w);
}

/// Dispatches [`cpu::scale`].
pub fn scale<T: Float>(alpha: T, x: &[T], y: &mut [T]) {
    route("scale");
    cpu::scale(alpha, x, y);
}

/// Dispatches [`cpu::fill`].
pub fn fill<T: Float>(y: &mut [T], value: T) {
    route("fill");
    cpu::fill(y, value);
}

/// Dispatches [`cpu::dot`].
pub fn dot<T: Float>(a: &[T], b: &[T]) -> T {
    route("dot");
    cpu::dot(a, b)
}

/// Dispatches [`cpu::smooth_l1_errors`].
pub fn smooth_l1_errors<T: Float>(diff: &[T], errors: &mut [T], sigma2: T) {
    route("smooth_l1_errors");
    cpu::smooth_l1_errors(diff, errors, sigma2);
}

/// Dispatches [`cpu::smooth_l1_grad`].
pub fn smooth_l1_grad<T: Float>(diff: &mut [T], sigma2: T) {
    route("smooth_l1_grad");
    cpu::smooth_l1_grad(diff, sigma2);
}
