// Declare submodules
pub mod backend;
pub mod inference;
pub mod layers;
pub mod tensor;

// Re-export types for external use
pub use inference::{MaskPolicy, MultiHeadAttention, Transformer, TransformerBlock, WeightStore};
pub use tensor::Tensor;
