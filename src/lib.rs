//! Multi-head self-attention and post-norm transformer blocks on a CPU tensor backend.
//!
//! The crate covers the stack of identical blocks that sits between an
//! embedding step and an output head. Inputs are `(batch, seq_len, embedding_width)`
//! tensors and every layer returns a tensor of the same shape.

pub mod config;
pub mod error;
pub mod llm;

pub use config::{ModelConfig, Settings};
pub use error::{FormerError, Result};
pub use llm::backend::{create_backend, Backend};
pub use llm::inference::{
    MaskPolicy, MultiHeadAttention, Transformer, TransformerBlock, WeightStore,
};
pub use llm::layers::Initializer;
pub use llm::tensor::Tensor;
