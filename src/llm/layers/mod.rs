//! Position-wise building blocks shared by the attention and block layers.

pub mod dropout;
pub mod init;
pub mod linear;
pub mod norm;

pub use dropout::Dropout;
pub use init::Initializer;
pub use linear::Linear;
pub use norm::{LayerNorm, LAYER_NORM_EPS};
