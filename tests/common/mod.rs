#![allow(dead_code)]

use former::{create_backend, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Tensor with entries drawn uniformly from [-1, 1)
pub fn random_tensor(shape: Vec<usize>, seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let size: usize = shape.iter().product();
    let data: Vec<f32> = (0..size).map(|_| rng.random_range(-1.0..1.0)).collect();
    Tensor::new(data, shape, create_backend()).unwrap()
}

pub fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {} differs: {} vs {} (tolerance {})",
            i,
            a,
            e,
            tolerance
        );
    }
}

/// Reorders the sequence axis of a (B, T, E) tensor.
///
/// Output position `t` takes input position `perm[t]`.
pub fn permute_positions(x: &Tensor, perm: &[usize]) -> Tensor {
    let (b, t, e) = x.dims3("test input").unwrap();
    assert_eq!(perm.len(), t);

    let mut data = Vec::with_capacity(x.size());
    for bi in 0..b {
        for &src in perm {
            let start = (bi * t + src) * e;
            data.extend_from_slice(&x.data()[start..start + e]);
        }
    }
    Tensor::new(data, x.shape().to_vec(), create_backend()).unwrap()
}
