use rand::{Rng, RngCore};

use crate::error::{FormerError, Result};
use crate::llm::tensor::Tensor;

/// Inverted dropout.
///
/// Without a random source (inference) the input passes through untouched.
/// With one, each element is zeroed with probability `p` and the survivors are
/// scaled by `1 / (1 - p)` so the expected value is preserved.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(FormerError::Config(format!(
                "dropout probability must be in [0, 1), got {}",
                p
            )));
        }
        Ok(Self { p })
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn forward(&self, mut x: Tensor, rng: Option<&mut (dyn RngCore + '_)>) -> Tensor {
        let rng = match rng {
            Some(rng) if self.p > 0.0 => rng,
            _ => return x,
        };

        let keep_scale = 1.0 / (1.0 - self.p);
        for v in x.data_mut() {
            if rng.random::<f32>() < self.p {
                *v = 0.0;
            } else {
                *v *= keep_scale;
            }
        }
        x
    }
}
