mod attention;
mod block;
mod tensors;
mod transformer;

pub use attention::{AttentionProjections, MaskPolicy, MultiHeadAttention};
pub use block::TransformerBlock;
pub use tensors::{scoped, WeightStore};
pub use transformer::Transformer;
