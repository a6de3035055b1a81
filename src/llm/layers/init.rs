use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::llm::backend::Backend;
use crate::llm::tensor::Tensor;

/// Seeded source of initial weights.
///
/// Weights and biases are drawn from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
/// Two initializers built from the same seed produce identical layers.
pub struct Initializer {
    rng: StdRng,
    backend: Arc<dyn Backend>,
}

impl Initializer {
    pub fn new(seed: u64, backend: Arc<dyn Backend>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            backend,
        }
    }

    /// Draws a tensor of `shape` for a layer with `fan_in` inputs
    pub fn uniform(&mut self, shape: Vec<usize>, fan_in: usize) -> Tensor {
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        let mut tensor = Tensor::zeros(shape, Arc::clone(&self.backend));
        for v in tensor.data_mut() {
            *v = self.rng.random_range(-bound..bound);
        }
        tensor
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}
