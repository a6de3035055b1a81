use crate::error::{FormerError, Result};
use crate::llm::inference::WeightStore;
use crate::llm::tensor::{matmul, Tensor};

use super::Initializer;

/// Linear projection `y = xW + b`
///
/// - `weight`: `[in_features, out_features]`
/// - `bias`: `[out_features]`, optional
///
/// Applied independently to every position: any tensor whose last dimension is
/// `in_features` is accepted and the leading dimensions are preserved.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Creates a layer from explicit weights
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let (_, out_features) = match weight.shape() {
            &[i, o] => (i, o),
            other => return Err(FormerError::shape("linear weight (expected rank 2)", &[], other)),
        };

        if let Some(bias) = &bias {
            if bias.shape() != [out_features] {
                return Err(FormerError::shape("linear bias", &[out_features], bias.shape()));
            }
        }

        Ok(Self { weight, bias })
    }

    /// Creates a freshly initialized layer
    pub fn init(
        in_features: usize,
        out_features: usize,
        with_bias: bool,
        init: &mut Initializer,
    ) -> Self {
        let weight = init.uniform(vec![in_features, out_features], in_features);
        let bias = with_bias.then(|| init.uniform(vec![out_features], in_features));
        Self { weight, bias }
    }

    /// Rebuilds a layer from `{prefix}.weight` and `{prefix}.bias`
    pub fn from_store(
        store: &WeightStore,
        prefix: &str,
        in_features: usize,
        out_features: usize,
        with_bias: bool,
    ) -> Result<Self> {
        let weight = store.get_shaped(&format!("{}.weight", prefix), &[in_features, out_features])?;
        let bias = if with_bias {
            Some(store.get_shaped(&format!("{}.bias", prefix), &[out_features])?)
        } else {
            None
        };
        Self::new(weight, bias)
    }

    pub fn export(&self, store: &mut WeightStore, prefix: &str) {
        store.insert(format!("{}.weight", prefix), self.weight.clone());
        if let Some(bias) = &self.bias {
            store.insert(format!("{}.bias", prefix), bias.clone());
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let features = x.shape().last().copied().unwrap_or(0);
        if features != self.in_features() {
            return Err(FormerError::shape("linear input", &[self.in_features()], &[features]));
        }

        let mut out = matmul(x, &self.weight)?;
        if let Some(bias) = &self.bias {
            let backend = std::sync::Arc::clone(out.backend());
            backend.add_bias(out.data_mut(), bias.data())?;
        }

        Ok(out)
    }
}
