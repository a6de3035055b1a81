mod common;

use std::sync::Arc;

use common::{assert_close, permute_positions, random_tensor};
use former::llm::inference::AttentionProjections;
use former::llm::layers::Linear;
use former::llm::tensor::{bmm, scale, softmax};
use former::{
    create_backend, FormerError, Initializer, MaskPolicy, MultiHeadAttention, Tensor, WeightStore,
};

fn seeded_attention(e: usize, h: usize, mask: MaskPolicy, seed: u64) -> MultiHeadAttention {
    let mut init = Initializer::new(seed, create_backend());
    MultiHeadAttention::new(e, h, mask, &mut init).unwrap()
}

fn identity(n: usize) -> Tensor {
    let mut data = vec![0.0; n * n];
    for i in 0..n {
        data[i * n + i] = 1.0;
    }
    Tensor::new(data, vec![n, n], create_backend()).unwrap()
}

/// Single head whose key, query, value and unify projections are all the identity
fn identity_attention(e: usize, mask: MaskPolicy) -> MultiHeadAttention {
    let projections = AttentionProjections {
        to_keys: Linear::new(identity(e), None).unwrap(),
        to_queries: Linear::new(identity(e), None).unwrap(),
        to_values: Linear::new(identity(e), None).unwrap(),
        unify_heads: Linear::new(identity(e), Some(Tensor::zeros(vec![e], create_backend())))
            .unwrap(),
    };
    MultiHeadAttention::from_parts(mask, projections).unwrap()
}

/// Attention computed one head at a time with plain loops over the exported weights
fn per_head_reference(attention: &MultiHeadAttention, x: &Tensor) -> Vec<f32> {
    let mut store = WeightStore::new();
    attention.export(&mut store, "attention");
    let weight = |name: &str| store.get(&format!("attention.{}", name)).unwrap().data().to_vec();

    let (b, t, e) = x.dims3("reference input").unwrap();
    let h = attention.heads();
    let width = h * e;
    let causal = attention.mask() == MaskPolicy::Causal;

    // Row-major [in, out] weights applied to every position
    let project = |w: &[f32], input: &[f32], in_features: usize, out_features: usize| {
        let mut out = vec![0.0f32; b * t * out_features];
        for pos in 0..b * t {
            for o in 0..out_features {
                out[pos * out_features + o] = (0..in_features)
                    .map(|i| input[pos * in_features + i] * w[i * out_features + o])
                    .sum();
            }
        }
        out
    };

    let q = project(&weight("to_queries.weight"), x.data(), e, width);
    let k = project(&weight("to_keys.weight"), x.data(), e, width);
    let v = project(&weight("to_values.weight"), x.data(), e, width);

    // Heads concatenated in head order: feature `hi * E + d` belongs to head `hi`
    let mut heads = vec![0.0f32; b * t * width];
    for bi in 0..b {
        for hi in 0..h {
            let at = |pos: usize, d: usize| (bi * t + pos) * width + hi * e + d;
            for i in 0..t {
                let visible = if causal { i + 1 } else { t };
                let scores: Vec<f32> = (0..visible)
                    .map(|j| {
                        let dot: f32 = (0..e).map(|d| q[at(i, d)] * k[at(j, d)]).sum();
                        dot / (e as f32).sqrt()
                    })
                    .collect();
                let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
                let total: f32 = exps.iter().sum();

                for d in 0..e {
                    heads[at(i, d)] = (0..visible).map(|j| exps[j] / total * v[at(j, d)]).sum();
                }
            }
        }
    }

    let mut out = project(&weight("unify_heads.weight"), &heads, width, e);
    let bias = weight("unify_heads.bias");
    for (idx, value) in out.iter_mut().enumerate() {
        *value += bias[idx % e];
    }
    out
}

/// Unify-heads projection that copies head `head` to the output and drops the others
fn select_head(head: usize, e: usize, h: usize) -> Linear {
    let mut data = vec![0.0; h * e * e];
    for d in 0..e {
        data[(head * e + d) * e + d] = 1.0;
    }
    let weight = Tensor::new(data, vec![h * e, e], create_backend()).unwrap();
    Linear::new(weight, Some(Tensor::zeros(vec![e], create_backend()))).unwrap()
}

#[test]
fn test_output_shape_matches_input() {
    let cases = [(1, 1, 4, 1), (2, 5, 8, 2), (3, 4, 6, 3), (1, 7, 2, 4)];

    for (b, t, e, h) in cases {
        for mask in [MaskPolicy::None, MaskPolicy::Causal] {
            let attention = seeded_attention(e, h, mask, 11);
            let x = random_tensor(vec![b, t, e], 5);

            let y = attention.forward(&x).unwrap();

            assert_eq!(y.shape(), &[b, t, e], "case {:?} {:?}", (b, t, e, h), mask);
            assert!(y.is_finite());
        }
    }
}

#[test]
fn test_attention_rows_sum_to_one() {
    for mask in [MaskPolicy::None, MaskPolicy::Causal] {
        let attention = seeded_attention(8, 2, mask, 3);
        let x = random_tensor(vec![2, 5, 8], 9);

        let weights = attention.attention_weights(&x).unwrap();

        assert_eq!(weights.shape(), &[4, 5, 5]);
        for row in weights.data().chunks(5) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "row sums to {}", sum);
        }
    }
}

#[test]
fn test_causal_mask_hides_future_positions() {
    let attention = seeded_attention(8, 2, MaskPolicy::Causal, 21);
    let x = random_tensor(vec![2, 6, 8], 22);

    let weights = attention.attention_weights(&x).unwrap();
    let t = 6;

    for matrix in weights.data().chunks(t * t) {
        for i in 0..t {
            for j in (i + 1)..t {
                assert_eq!(matrix[i * t + j], 0.0, "query {} sees key {}", i, j);
            }
        }
        // The first position can only attend to itself
        assert!((matrix[0] - 1.0).abs() < 1e-6);
    }
}

#[test]
fn test_causal_output_ignores_later_positions() {
    let attention = seeded_attention(4, 2, MaskPolicy::Causal, 8);
    let x = random_tensor(vec![1, 4, 4], 1);

    // Change only the last position
    let mut changed = x.clone();
    for v in &mut changed.data_mut()[12..16] {
        *v += 3.0;
    }

    let y = attention.forward(&x).unwrap();
    let y_changed = attention.forward(&changed).unwrap();

    assert_close(&y.data()[..12], &y_changed.data()[..12], 1e-6);
    assert!(y.data()[12..]
        .iter()
        .zip(&y_changed.data()[12..])
        .any(|(a, b)| (a - b).abs() > 1e-4));
}

#[test]
fn test_unmasked_attention_is_permutation_equivariant() {
    let attention = seeded_attention(8, 3, MaskPolicy::None, 17);
    let x = random_tensor(vec![2, 5, 8], 18);
    let perm = [3, 0, 4, 1, 2];

    let y = attention.forward(&x).unwrap();
    let y_of_permuted = attention.forward(&permute_positions(&x, &perm)).unwrap();

    assert_close(y_of_permuted.data(), permute_positions(&y, &perm).data(), 1e-5);
}

#[test]
fn test_query_scaling_matches_symmetric_scaling() {
    let e = 8;
    let queries = random_tensor(vec![4, 5, e], 30);
    let keys = random_tensor(vec![4, 5, e], 31);

    let scaled = scale(queries.clone(), 1.0 / (e as f32).sqrt());
    let once = softmax(bmm(&scaled, &keys, true).unwrap()).unwrap();

    let quarter = (e as f32).powf(-0.25);
    let both =
        softmax(bmm(&scale(queries, quarter), &scale(keys, quarter), true).unwrap()).unwrap();

    assert_close(once.data(), both.data(), 1e-6);
}

#[test]
fn test_identity_projections_match_hand_computation() {
    let backend = create_backend();
    // Two orthogonal unit positions
    let x = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![1, 2, 2], Arc::clone(&backend)).unwrap();

    // Scores are x·xᵀ / sqrt(2): a on the diagonal, 0 elsewhere
    let a = 1.0f32 / 2.0f32.sqrt();
    let high = a.exp() / (a.exp() + 1.0);
    let low = 1.0 / (a.exp() + 1.0);

    let full = identity_attention(2, MaskPolicy::None).forward(&x).unwrap();
    assert_close(full.data(), &[high, low, low, high], 1e-6);

    let causal = identity_attention(2, MaskPolicy::Causal).forward(&x).unwrap();
    assert_close(causal.data(), &[1.0, 0.0, low, high], 1e-6);
}

#[test]
fn test_rejects_wrong_feature_width() {
    let attention = seeded_attention(8, 2, MaskPolicy::None, 0);
    let x = random_tensor(vec![1, 3, 6], 0);

    assert!(matches!(attention.forward(&x), Err(FormerError::ShapeMismatch { .. })));
}

#[test]
fn test_rejects_wrong_rank() {
    let attention = seeded_attention(4, 1, MaskPolicy::None, 0);
    let x = random_tensor(vec![3, 4], 0);

    assert!(matches!(attention.forward(&x), Err(FormerError::ShapeMismatch { .. })));
}

#[test]
fn test_rejects_empty_sequence() {
    let attention = seeded_attention(4, 1, MaskPolicy::Causal, 0);
    let x = Tensor::zeros(vec![1, 0, 4], create_backend());

    assert!(matches!(attention.forward(&x), Err(FormerError::EmptyInput(_))));
}

#[test]
fn test_rejects_zero_width() {
    let mut init = Initializer::new(0, create_backend());
    let result = MultiHeadAttention::new(0, 2, MaskPolicy::None, &mut init);

    assert!(matches!(result, Err(FormerError::Config(_))));
}

#[test]
fn test_heads_match_per_head_reference() {
    let (b, t, e, h) = (2, 4, 3, 3);

    for mask in [MaskPolicy::None, MaskPolicy::Causal] {
        let attention = seeded_attention(e, h, mask, 50);
        let x = random_tensor(vec![b, t, e], 51);

        let y = attention.forward(&x).unwrap();

        assert_close(y.data(), &per_head_reference(&attention, &x), 1e-5);
    }
}

#[test]
fn test_unify_heads_sees_heads_in_order() {
    let (b, t, e, h) = (2, 4, 3, 3);
    let mut init = Initializer::new(60, create_backend());
    let to_keys = Linear::init(e, h * e, false, &mut init);
    let to_queries = Linear::init(e, h * e, false, &mut init);
    let to_values = Linear::init(e, h * e, false, &mut init);
    let x = random_tensor(vec![b, t, e], 61);

    let outputs: Vec<Vec<f32>> = (0..h)
        .map(|head| {
            let projections = AttentionProjections {
                to_keys: to_keys.clone(),
                to_queries: to_queries.clone(),
                to_values: to_values.clone(),
                unify_heads: select_head(head, e, h),
            };
            let attention =
                MultiHeadAttention::from_parts(MaskPolicy::Causal, projections).unwrap();
            let y = attention.forward(&x).unwrap();

            assert_close(y.data(), &per_head_reference(&attention, &x), 1e-5);
            y.into_data()
        })
        .collect();

    // Each head attends differently, so selecting another head changes the output
    for (a, other) in [(0, 1), (1, 2), (0, 2)] {
        assert!(outputs[a]
            .iter()
            .zip(&outputs[other])
            .any(|(p, q)| (p - q).abs() > 1e-4));
    }
}
