use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::{FormerError, Result};
use crate::llm::backend::Backend;

/// A tensor representing a multi-dimensional array
#[derive(Clone)]
pub struct Tensor {
    /// The raw data as a contiguous array of f32 values
    data: Vec<f32>,
    /// The shape of the tensor (e.g., [batch_size, seq_len, hidden_size])
    shape: Vec<usize>,
    /// The backend used for operations on this tensor
    backend: Arc<dyn Backend>,
}

impl Tensor {
    /// Create a new tensor with the given data and shape
    pub fn new(data: Vec<f32>, shape: Vec<usize>, backend: Arc<dyn Backend>) -> Result<Self> {
        let total_elements: usize = shape.iter().product();
        if data.len() != total_elements {
            return Err(FormerError::shape("tensor data", &shape, &[data.len()]));
        }

        Ok(Self { data, shape, backend })
    }

    /// Create a new tensor filled with zeros
    pub fn zeros(shape: Vec<usize>, backend: Arc<dyn Backend>) -> Self {
        Self::full(shape, 0.0, backend)
    }

    /// Create a new tensor filled with ones
    pub fn ones(shape: Vec<usize>, backend: Arc<dyn Backend>) -> Self {
        Self::full(shape, 1.0, backend)
    }

    /// Create a new tensor with every element set to `value`
    pub fn full(shape: Vec<usize>, value: f32, backend: Arc<dyn Backend>) -> Self {
        let size: usize = shape.iter().product();
        Self {
            data: vec![value; size],
            shape,
            backend,
        }
    }

    /// Get a reference to the tensor's raw data
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Get a mutable reference to the tensor's raw data
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume the tensor, returning its storage
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Get the shape of the tensor
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the size (total number of elements) in the tensor
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Reshape the tensor to a new shape with the same total number of elements.
    /// The storage is moved, not copied.
    pub fn reshape(self, new_shape: Vec<usize>) -> Result<Self> {
        let new_size: usize = new_shape.iter().product();
        if new_size != self.size() {
            return Err(FormerError::shape("reshape", &new_shape, &self.shape));
        }

        Ok(Self {
            data: self.data,
            shape: new_shape,
            backend: self.backend,
        })
    }

    /// Splits a rank-3 shape into `(batch, seq_len, features)`.
    pub fn dims3(&self, context: &str) -> Result<(usize, usize, usize)> {
        match self.shape[..] {
            [b, t, e] => Ok((b, t, e)),
            _ => Err(FormerError::ShapeMismatch {
                context: format!("{} (expected rank 3)", context),
                expected: vec![],
                got: self.shape.clone(),
            }),
        }
    }

    /// True when no element is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Get a reference to the tensor's backend
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

impl Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor {{ shape: {:?}, data: truncated }}", self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::backend::create_backend;

    #[test]
    fn test_new_rejects_mismatched_data() {
        let result = Tensor::new(vec![1.0; 5], vec![2, 3], create_backend());
        assert!(matches!(result, Err(FormerError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_reshape_keeps_data() {
        let t =
            Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3], create_backend()).unwrap();

        let r = t.reshape(vec![3, 2]).unwrap();

        assert_eq!(r.shape(), &[3, 2]);
        assert_eq!(r.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_reshape_rejects_size_change() {
        let t = Tensor::zeros(vec![2, 3], create_backend());
        assert!(t.reshape(vec![4, 2]).is_err());
    }

    #[test]
    fn test_dims3() {
        let t = Tensor::zeros(vec![2, 5, 8], create_backend());
        assert_eq!(t.dims3("test").unwrap(), (2, 5, 8));

        let flat = Tensor::zeros(vec![10], create_backend());
        assert!(flat.dims3("test").is_err());
    }
}
