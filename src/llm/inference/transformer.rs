use rand::RngCore;
use tracing::debug;

use super::block::TransformerBlock;
use super::tensors::WeightStore;
use crate::config::ModelConfig;
use crate::error::{FormerError, Result};
use crate::llm::layers::Initializer;
use crate::llm::tensor::Tensor;

/// Represents the stack of transformer blocks shared by every model variant.
///
/// Blocks run in order, each consuming the previous block's output. The stack
/// also owns the maximum sequence length that upstream positional encodings
/// were built for.
#[derive(Debug, Clone)]
pub struct Transformer {
    /// Blocks in execution order
    blocks: Vec<TransformerBlock>,
    /// Dimension of the hidden state
    embedding_width: usize,
    /// Longest accepted sequence
    seq_length: usize,
}

impl Transformer {
    /// Creates `config.depth` freshly initialized blocks
    pub fn new(config: &ModelConfig, init: &mut Initializer) -> Result<Self> {
        config.validate()?;

        let blocks = (0..config.depth)
            .map(|_| TransformerBlock::new(config, init))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            blocks,
            embedding_width: config.embedding_width,
            seq_length: config.seq_length,
        })
    }

    /// Rebuilds the stack from tensors named `blk.{i}.*`
    pub fn from_store(store: &WeightStore, config: &ModelConfig) -> Result<Self> {
        config.validate()?;

        let blocks = (0..config.depth)
            .map(|block_idx| {
                TransformerBlock::from_store(store, &format!("blk.{}", block_idx), config)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            blocks,
            embedding_width: config.embedding_width,
            seq_length: config.seq_length,
        })
    }

    pub fn export(&self, store: &mut WeightStore) {
        for (block_idx, block) in self.blocks.iter().enumerate() {
            block.export(store, &format!("blk.{}", block_idx));
        }
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[TransformerBlock] {
        &self.blocks
    }

    pub fn embedding_width(&self) -> usize {
        self.embedding_width
    }

    pub fn seq_length(&self) -> usize {
        self.seq_length
    }

    /// Process a batch through all transformer blocks
    ///
    /// # Arguments
    /// * `x` - Embedded, position-encoded input with shape [batch, seq_len, embedding_width]
    ///
    /// # Returns
    /// * Hidden states with the same shape
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.run(x, None)
    }

    /// Same as [`Transformer::forward`] with training-mode dropout drawing from `rng`
    pub fn forward_train(&self, x: &Tensor, rng: &mut dyn RngCore) -> Result<Tensor> {
        self.run(x, Some(rng))
    }

    fn run(&self, x: &Tensor, mut rng: Option<&mut (dyn RngCore + '_)>) -> Result<Tensor> {
        self.check_input(x)?;

        let mut current: Option<Tensor> = None;
        for (block_idx, block) in self.blocks.iter().enumerate() {
            // The first block reads the caller's tensor directly
            let input = current.as_ref().unwrap_or(x);
            let output = block.run(input, rng.as_deref_mut())?;
            current = Some(output);
            debug!("Processed block {}/{}", block_idx + 1, self.blocks.len());
        }

        current.ok_or_else(|| FormerError::Config("transformer has no blocks".to_string()))
    }

    fn check_input(&self, x: &Tensor) -> Result<()> {
        let (b, t, e) = x.dims3("transformer input")?;

        if e != self.embedding_width {
            return Err(FormerError::shape(
                "transformer input features",
                &[self.embedding_width],
                &[e],
            ));
        }
        if b == 0 || t == 0 {
            return Err(FormerError::EmptyInput(format!(
                "transformer input has shape {:?}",
                x.shape()
            )));
        }
        if t > self.seq_length {
            return Err(FormerError::SequenceTooLong {
                got: t,
                max: self.seq_length,
            });
        }

        Ok(())
    }
}
