use std::fmt;

use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewD, ArrayViewMut2, IxDyn};
use rayon::prelude::*;

use super::super::Backend;
use crate::error::{FormerError, Result};

/// CPU backend implementation using ndarray
///
/// Batched kernels fan out over the leading (batch or row) dimension with rayon.
#[derive(Clone, Default)]
pub struct CpuBackend {}

impl CpuBackend {
    /// Create a new CPU backend instance.
    pub fn new() -> Self {
        Self {}
    }
}

impl fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuBackend").finish()
    }
}

/// Checks that `len` splits into whole rows of width `cols`.
fn rows_of(len: usize, cols: usize, context: &str) -> Result<usize> {
    if cols == 0 || len % cols != 0 {
        return Err(FormerError::shape(context, &[cols], &[len]));
    }
    Ok(len / cols)
}

impl Backend for CpuBackend {
    /// Performs matrix multiplication C = A * B using ndarray.
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
    ) -> Result<()> {
        // Transposed operands are stored in their transposed layout, so the view
        // is built on the stored shape and then its axes are swapped
        let a_view = if transpose_a {
            ArrayView2::from_shape((k, m), a)?.reversed_axes()
        } else {
            ArrayView2::from_shape((m, k), a)?
        };
        let b_view = if transpose_b {
            ArrayView2::from_shape((n, k), b)?.reversed_axes()
        } else {
            ArrayView2::from_shape((k, n), b)?
        };
        let mut c_view = ArrayViewMut2::from_shape((m, n), c)?;

        // Writes straight into the output buffer (BLAS-style, beta = 0)
        general_mat_mul(1.0, &a_view, &b_view, 0.0, &mut c_view);

        Ok(())
    }

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
    ) -> Result<()> {
        if batch == 0 || m == 0 || n == 0 || k == 0 {
            return Err(FormerError::EmptyInput(format!(
                "bmm with batch={}, m={}, n={}, k={}",
                batch, m, n, k
            )));
        }

        let (a_stride, b_stride, c_stride) = (m * k, k * n, m * n);
        if a.len() != batch * a_stride {
            return Err(FormerError::shape("bmm lhs", &[batch, m, k], &[a.len()]));
        }
        if b.len() != batch * b_stride {
            let expected = if transpose_b { [batch, n, k] } else { [batch, k, n] };
            return Err(FormerError::shape("bmm rhs", &expected, &[b.len()]));
        }
        if c.len() != batch * c_stride {
            return Err(FormerError::shape("bmm output", &[batch, m, n], &[c.len()]));
        }

        // One independent product per batch slice
        c.par_chunks_mut(c_stride)
            .zip(a.par_chunks(a_stride))
            .zip(b.par_chunks(b_stride))
            .try_for_each(|((c_i, a_i), b_i)| {
                self.matmul(a_i, b_i, c_i, m, n, k, false, transpose_b)
            })
    }

    /// Performs element-wise addition C = A + B.
    fn add(&self, a: &[f32], b: &[f32], c: &mut [f32]) -> Result<()> {
        if a.len() != b.len() || a.len() != c.len() {
            return Err(FormerError::shape("add", &[a.len()], &[b.len(), c.len()]));
        }

        for ((out, &x), &y) in c.iter_mut().zip(a).zip(b) {
            *out = x + y;
        }

        Ok(())
    }

    fn add_bias(&self, x: &mut [f32], bias: &[f32]) -> Result<()> {
        rows_of(x.len(), bias.len(), "bias add")?;

        x.par_chunks_mut(bias.len()).for_each(|row| {
            for (v, &b) in row.iter_mut().zip(bias) {
                *v += b;
            }
        });

        Ok(())
    }

    fn scale(&self, x: &mut [f32], factor: f32) {
        x.iter_mut().for_each(|v| *v *= factor);
    }

    fn relu(&self, x: &mut [f32]) {
        x.iter_mut().for_each(|v| *v = v.max(0.0));
    }

    /// Applies softmax row by row.
    ///
    /// The row maximum is subtracted before exponentiation for numerical stability.
    fn softmax(&self, x: &mut [f32], cols: usize) -> Result<()> {
        rows_of(x.len(), cols, "softmax")?;

        x.par_chunks_mut(cols).for_each(|row| {
            let max_val = row.iter().fold(f32::NEG_INFINITY, |max, &val| max.max(val));

            // Nothing visible in this row
            if max_val == f32::NEG_INFINITY {
                row.fill(0.0);
                return;
            }

            let mut sum = 0.0;
            for v in row.iter_mut() {
                *v = (*v - max_val).exp();
                sum += *v;
            }
            for v in row.iter_mut() {
                *v /= sum;
            }
        });

        Ok(())
    }

    /// Applies layer normalization to each row of width `hidden_size`.
    fn layer_norm(
        &self,
        x: &[f32],
        gamma: &[f32],
        beta: &[f32],
        output: &mut [f32],
        hidden_size: usize,
        eps: f32,
    ) -> Result<()> {
        rows_of(x.len(), hidden_size, "layer norm input")?;
        if gamma.len() != hidden_size || beta.len() != hidden_size {
            return Err(FormerError::shape(
                "layer norm parameters",
                &[hidden_size],
                &[gamma.len(), beta.len()],
            ));
        }
        if output.len() != x.len() {
            return Err(FormerError::shape("layer norm output", &[x.len()], &[output.len()]));
        }

        let n = hidden_size as f32;
        output
            .par_chunks_mut(hidden_size)
            .zip(x.par_chunks(hidden_size))
            .for_each(|(out_row, in_row)| {
                let mean = in_row.iter().sum::<f32>() / n;
                // Biased variance
                let var = in_row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n;
                let inv_std = 1.0 / (var + eps).sqrt();

                for j in 0..hidden_size {
                    out_row[j] = (in_row[j] - mean) * inv_std * gamma[j] + beta[j];
                }
            });

        Ok(())
    }

    fn apply_causal_mask(&self, scores: &mut [f32], seq_len: usize) -> Result<()> {
        rows_of(scores.len(), seq_len * seq_len, "causal mask")?;

        scores.par_chunks_mut(seq_len * seq_len).for_each(|matrix| {
            for i in 0..seq_len {
                // Diagonal stays visible
                for j in (i + 1)..seq_len {
                    matrix[i * seq_len + j] = f32::NEG_INFINITY;
                }
            }
        });

        Ok(())
    }

    fn permute(
        &self,
        data: &[f32],
        current_shape: &[usize],
        new_axes: &[usize],
    ) -> Result<Vec<f32>> {
        let rank = current_shape.len();
        let mut seen = vec![false; rank];
        let valid = new_axes.len() == rank
            && new_axes
                .iter()
                .all(|&axis| axis < rank && !std::mem::replace(&mut seen[axis], true));
        if !valid {
            return Err(FormerError::shape("permute axes", current_shape, new_axes));
        }

        let view = ArrayViewD::from_shape(IxDyn(current_shape), data)?;
        let permuted = view.permuted_axes(IxDyn(new_axes));

        // Logical-order iteration yields the row-major layout of the permuted view
        Ok(permuted.iter().copied().collect())
    }
}
