use std::sync::Arc;

use super::Tensor;
use crate::error::{FormerError, Result};

/// Matrix multiplication of a tensor with a weight matrix
///
/// # Arguments
/// * `a` - Tensor with shape [..., k]; leading dimensions are treated as rows
/// * `b` - Matrix with shape [k, n]
///
/// # Returns
/// * Result tensor with shape [..., n]
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    if a.rank() < 1 || b.rank() != 2 {
        return Err(FormerError::shape("matmul operands", &[2], &[a.rank(), b.rank()]));
    }

    let k = a.shape()[a.rank() - 1];
    let (b_rows, n) = (b.shape()[0], b.shape()[1]);
    if k != b_rows {
        return Err(FormerError::shape("matmul inner dimension", &[k], &[b_rows]));
    }
    let m = if k == 0 { 0 } else { a.size() / k };

    let mut result_shape = a.shape().to_vec();
    let last_idx = result_shape.len() - 1;
    result_shape[last_idx] = n;
    let mut result = Tensor::zeros(result_shape, Arc::clone(a.backend()));

    a.backend()
        .matmul(a.data(), b.data(), result.data_mut(), m, n, k, false, false)?;

    Ok(result)
}

/// Batched matrix multiplication of two rank-3 tensors
///
/// # Arguments
/// * `a` - Tensor with shape [batch, m, k]
/// * `b` - Tensor with shape [batch, k, n], or [batch, n, k] when `transpose_b`
///
/// # Returns
/// * Result tensor with shape [batch, m, n]
pub fn bmm(a: &Tensor, b: &Tensor, transpose_b: bool) -> Result<Tensor> {
    let (batch, m, k) = a.dims3("bmm lhs")?;
    let (b_batch, b1, b2) = b.dims3("bmm rhs")?;
    let (b_k, n) = if transpose_b { (b2, b1) } else { (b1, b2) };

    if batch != b_batch || k != b_k {
        return Err(FormerError::shape("bmm operands", a.shape(), b.shape()));
    }

    let mut result = Tensor::zeros(vec![batch, m, n], Arc::clone(a.backend()));
    a.backend()
        .bmm(a.data(), b.data(), result.data_mut(), batch, m, n, k, transpose_b)?;

    Ok(result)
}

/// Add two tensors element-wise
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    if a.shape() != b.shape() {
        return Err(FormerError::shape("add", a.shape(), b.shape()));
    }

    let mut result = Tensor::zeros(a.shape().to_vec(), Arc::clone(a.backend()));
    a.backend().add(a.data(), b.data(), result.data_mut())?;

    Ok(result)
}

/// Multiply every element by `factor`
pub fn scale(mut tensor: Tensor, factor: f32) -> Tensor {
    let backend = Arc::clone(tensor.backend());
    backend.scale(tensor.data_mut(), factor);
    tensor
}

/// Rectified linear unit
pub fn relu(mut tensor: Tensor) -> Tensor {
    let backend = Arc::clone(tensor.backend());
    backend.relu(tensor.data_mut());
    tensor
}

/// Softmax along the last axis
pub fn softmax(mut tensor: Tensor) -> Result<Tensor> {
    let cols = tensor.shape().last().copied().unwrap_or(0);
    let backend = Arc::clone(tensor.backend());
    backend.softmax(tensor.data_mut(), cols)?;
    Ok(tensor)
}

/// Reorders the axes of `tensor`; `axes[i]` names the source axis placed at position `i`.
pub fn permute(tensor: &Tensor, axes: &[usize]) -> Result<Tensor> {
    let data = tensor.backend().permute(tensor.data(), tensor.shape(), axes)?;
    let shape = axes
        .iter()
        .map(|&axis| tensor.shape()[axis])
        .collect::<Vec<_>>();

    Tensor::new(data, shape, Arc::clone(tensor.backend()))
}
