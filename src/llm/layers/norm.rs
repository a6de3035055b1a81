use std::sync::Arc;

use crate::error::{FormerError, Result};
use crate::llm::backend::Backend;
use crate::llm::inference::WeightStore;
use crate::llm::tensor::Tensor;

/// Epsilon added to the variance before the square root
pub const LAYER_NORM_EPS: f32 = 1e-5;

/// Layer normalization over the last axis.
///
/// Formula: `y = (x - mean) / sqrt(var + eps) * gamma + beta`, with the biased
/// variance computed per position.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f32,
}

impl LayerNorm {
    /// Unit scale, zero shift
    pub fn new(width: usize, backend: Arc<dyn Backend>) -> Self {
        Self {
            weight: Tensor::ones(vec![width], Arc::clone(&backend)),
            bias: Tensor::zeros(vec![width], backend),
            eps: LAYER_NORM_EPS,
        }
    }

    pub fn from_parts(weight: Tensor, bias: Tensor) -> Result<Self> {
        if weight.rank() != 1 || weight.shape() != bias.shape() {
            return Err(FormerError::shape("layer norm parameters", weight.shape(), bias.shape()));
        }
        Ok(Self {
            weight,
            bias,
            eps: LAYER_NORM_EPS,
        })
    }

    pub fn from_store(store: &WeightStore, prefix: &str, width: usize) -> Result<Self> {
        Self::from_parts(
            store.get_shaped(&format!("{}.weight", prefix), &[width])?,
            store.get_shaped(&format!("{}.bias", prefix), &[width])?,
        )
    }

    pub fn export(&self, store: &mut WeightStore, prefix: &str) {
        store.insert(format!("{}.weight", prefix), self.weight.clone());
        store.insert(format!("{}.bias", prefix), self.bias.clone());
    }

    pub fn width(&self) -> usize {
        self.weight.size()
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let features = x.shape().last().copied().unwrap_or(0);
        if features != self.width() {
            return Err(FormerError::shape("layer norm input", &[self.width()], &[features]));
        }

        let mut out = Tensor::zeros(x.shape().to_vec(), Arc::clone(x.backend()));
        x.backend().layer_norm(
            x.data(),
            self.weight.data(),
            self.bias.data(),
            out.data_mut(),
            features,
            self.eps,
        )?;

        Ok(out)
    }
}
