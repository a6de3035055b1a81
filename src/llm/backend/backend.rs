use std::fmt::Debug;
use std::sync::Arc;

use super::cpu::CpuBackend;
use crate::error::Result;

/// A trait for tensor operation backends
///
/// Kernels work on flat row-major slices; callers pass the logical dimensions.
/// Implementations must not retain references to the buffers they are given.
pub trait Backend: Send + Sync + Debug {
    /// Perform matrix multiplication C = A * B
    ///
    /// # Parameters
    /// * `a` - Input matrix A with shape (m, k), stored as (k, m) when `transpose_a`
    /// * `b` - Input matrix B with shape (k, n), stored as (n, k) when `transpose_b`
    /// * `c` - Output matrix C with shape (m, n)
    /// * `m` - Number of rows in A and C
    /// * `n` - Number of columns in B and C
    /// * `k` - Number of columns in A and rows in B
    /// * `transpose_a` - Whether to transpose matrix A
    /// * `transpose_b` - Whether to transpose matrix B
    #[allow(clippy::too_many_arguments)]
    fn matmul(
        &self,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
        m: usize,
        n: usize,
        k: usize,
        transpose_a: bool,
        transpose_b: bool,
    ) -> Result<()>;

    /// Performs batched matrix multiplication: C[i] = A[i] @ B[i]
    /// Expects A shape [batch, m, k], B shape [batch, k, n] (or [batch, n, k] if transpose_b)
    /// and writes C shape [batch, m, n]
    #[allow(clippy::too_many_arguments)]
    fn bmm(
        &self,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
        batch: usize,
        m: usize,
        n: usize,
        k: usize,
        transpose_b: bool,
    ) -> Result<()>;

    /// Perform element-wise addition C = A + B
    fn add(&self, a: &[f32], b: &[f32], c: &mut [f32]) -> Result<()>;

    /// Adds `bias` to every row of `x` in place. Row width is `bias.len()`.
    fn add_bias(&self, x: &mut [f32], bias: &[f32]) -> Result<()>;

    /// Scales all elements by a given factor, in place.
    fn scale(&self, x: &mut [f32], factor: f32);

    /// Rectified linear unit, in place.
    fn relu(&self, x: &mut [f32]);

    /// Apply softmax in place along rows of width `cols`.
    ///
    /// A row whose entries are all negative infinity becomes a row of zeros.
    fn softmax(&self, x: &mut [f32], cols: usize) -> Result<()>;

    /// Layer normalization over rows of width `hidden_size`:
    /// `(x - mean) / sqrt(var + eps) * gamma + beta`
    fn layer_norm(
        &self,
        x: &[f32],
        gamma: &[f32],
        beta: &[f32],
        output: &mut [f32],
        hidden_size: usize,
        eps: f32,
    ) -> Result<()>;

    /// Applies a causal mask to attention scores in place.
    /// Assumes scores shape: [batch, seq_len, seq_len]; entries above the
    /// diagonal become negative infinity.
    fn apply_causal_mask(&self, scores: &mut [f32], seq_len: usize) -> Result<()>;

    /// Permutes the axes of a tensor's data, returning the data laid out
    /// row-major in the new axis order.
    fn permute(
        &self,
        data: &[f32],
        current_shape: &[usize],
        new_axes: &[usize],
    ) -> Result<Vec<f32>>;
}

// Factory function to create a backend based on available hardware
pub fn create_backend() -> Arc<dyn Backend> {
    // Only the CPU backend exists for now
    Arc::new(CpuBackend::new())
}
