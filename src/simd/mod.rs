//! SIMD-friendly numeric kernels shared by scoring and vector distance code.

pub mod operation;

pub use operation::SimdOps;

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    SimdOps::dot_product(a, b)
}
