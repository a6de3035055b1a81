pub mod ops;
pub mod tensor;

// Re-export the Tensor struct and related items for easy access
pub use ops::{add, bmm, matmul, permute, relu, scale, softmax};
pub use tensor::Tensor;
