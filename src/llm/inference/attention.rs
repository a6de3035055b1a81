use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::tensors::{scoped, WeightStore};
use crate::error::{FormerError, Result};
use crate::llm::layers::{Initializer, Linear};
use crate::llm::tensor::{bmm, permute, scale, softmax, Tensor};

/// Which key positions a query position may attend to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskPolicy {
    /// Every position sees every position
    #[default]
    None,
    /// Position `i` sees positions `0..=i`
    Causal,
}

/// The four projections owned by a [`MultiHeadAttention`]
#[derive(Debug, Clone)]
pub struct AttentionProjections {
    /// `E -> H·E`, no bias
    pub to_keys: Linear,
    /// `E -> H·E`, no bias
    pub to_queries: Linear,
    /// `E -> H·E`, no bias
    pub to_values: Linear,
    /// `H·E -> E`, with bias
    pub unify_heads: Linear,
}

/// Scaled dot-product self-attention over `H` parallel heads.
///
/// Each head projects the full embedding width `E`; heads are not slices of
/// `E`, so the key/query/value projections are `E -> H·E`. During the forward
/// pass the head axis is folded into the batch axis and all `B·H` attention
/// problems are solved by a single batched matrix product.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    embedding_width: usize,
    heads: usize,
    mask: MaskPolicy,
    projections: AttentionProjections,
}

fn check_dims(embedding_width: usize, heads: usize) -> Result<()> {
    if embedding_width == 0 || heads == 0 {
        return Err(FormerError::Config(format!(
            "embedding width and head count must be positive, got width={} heads={}",
            embedding_width, heads
        )));
    }
    Ok(())
}

impl MultiHeadAttention {
    /// Creates an attention layer with freshly initialized projections
    pub fn new(
        embedding_width: usize,
        heads: usize,
        mask: MaskPolicy,
        init: &mut Initializer,
    ) -> Result<Self> {
        check_dims(embedding_width, heads)?;
        let width = heads * embedding_width;

        debug!(
            "Creating attention layer: width={}, heads={}, mask={:?}",
            embedding_width, heads, mask
        );

        let projections = AttentionProjections {
            to_keys: Linear::init(embedding_width, width, false, init),
            to_queries: Linear::init(embedding_width, width, false, init),
            to_values: Linear::init(embedding_width, width, false, init),
            unify_heads: Linear::init(width, embedding_width, true, init),
        };

        Ok(Self {
            embedding_width,
            heads,
            mask,
            projections,
        })
    }

    /// Creates an attention layer from explicit projections.
    ///
    /// The embedding width and head count are read off `to_keys`; the other
    /// projections must agree with them.
    pub fn from_parts(mask: MaskPolicy, projections: AttentionProjections) -> Result<Self> {
        let embedding_width = projections.to_keys.in_features();
        let width = projections.to_keys.out_features();
        if embedding_width == 0 || width % embedding_width != 0 {
            return Err(FormerError::shape(
                "key projection (output must be a multiple of input)",
                &[embedding_width],
                &[width],
            ));
        }
        let heads = width / embedding_width;
        check_dims(embedding_width, heads)?;

        let checks = [
            ("query projection", &projections.to_queries, embedding_width, width),
            ("value projection", &projections.to_values, embedding_width, width),
            ("unify-heads projection", &projections.unify_heads, width, embedding_width),
        ];
        for (name, layer, in_features, out_features) in checks {
            if layer.in_features() != in_features || layer.out_features() != out_features {
                return Err(FormerError::shape(
                    name,
                    &[in_features, out_features],
                    &[layer.in_features(), layer.out_features()],
                ));
            }
        }

        Ok(Self {
            embedding_width,
            heads,
            mask,
            projections,
        })
    }

    pub fn from_store(
        store: &WeightStore,
        prefix: &str,
        embedding_width: usize,
        heads: usize,
        mask: MaskPolicy,
    ) -> Result<Self> {
        check_dims(embedding_width, heads)?;
        let width = heads * embedding_width;
        let head_projection = |name: &str| {
            Linear::from_store(store, &scoped(prefix, name), embedding_width, width, false)
        };

        let projections = AttentionProjections {
            to_keys: head_projection("to_keys")?,
            to_queries: head_projection("to_queries")?,
            to_values: head_projection("to_values")?,
            unify_heads: Linear::from_store(
                store,
                &scoped(prefix, "unify_heads"),
                width,
                embedding_width,
                true,
            )?,
        };

        Self::from_parts(mask, projections)
    }

    pub fn export(&self, store: &mut WeightStore, prefix: &str) {
        let p = &self.projections;
        p.to_keys.export(store, &scoped(prefix, "to_keys"));
        p.to_queries.export(store, &scoped(prefix, "to_queries"));
        p.to_values.export(store, &scoped(prefix, "to_values"));
        p.unify_heads.export(store, &scoped(prefix, "unify_heads"));
    }

    pub fn embedding_width(&self) -> usize {
        self.embedding_width
    }

    pub fn heads(&self) -> usize {
        self.heads
    }

    pub fn mask(&self) -> MaskPolicy {
        self.mask
    }

    /// Computes self-attention for `x` of shape `(B, T, E)`, returning `(B, T, E)`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t) = self.check_input(x)?;
        let (h, e) = (self.heads, self.embedding_width);

        let weights = self.weights(x, b, t)?;
        let values = self.fold_heads(self.projections.to_values.forward(x)?, b, t)?;

        // (B·H, T, T) x (B·H, T, E)
        let out = bmm(&weights, &values, false)?;
        trace!("attended values shape: {:?}", out.shape());

        // Unfold heads and swap them back behind the sequence axis
        let out = permute(&out.reshape(vec![b, h, t, e])?, &[0, 2, 1, 3])?
            .reshape(vec![b, t, h * e])?;

        self.projections.unify_heads.forward(&out)
    }

    /// Returns the row-normalized attention matrix of shape `(B·H, T, T)`.
    ///
    /// Slice `bi * H + hi` holds head `hi` of batch element `bi`; row `i` is the
    /// distribution of query position `i` over key positions.
    pub fn attention_weights(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t) = self.check_input(x)?;
        self.weights(x, b, t)
    }

    fn check_input(&self, x: &Tensor) -> Result<(usize, usize)> {
        let (b, t, e) = x.dims3("attention input")?;
        if e != self.embedding_width {
            return Err(FormerError::shape(
                "attention input features",
                &[self.embedding_width],
                &[e],
            ));
        }
        if b == 0 || t == 0 {
            return Err(FormerError::EmptyInput(format!(
                "attention input has shape {:?}",
                x.shape()
            )));
        }
        Ok((b, t))
    }

    /// `(B, T, H·E) -> (B, T, H, E) -> (B, H, T, E) -> (B·H, T, E)`
    fn fold_heads(&self, projected: Tensor, b: usize, t: usize) -> Result<Tensor> {
        let (h, e) = (self.heads, self.embedding_width);
        let split = projected.reshape(vec![b, t, h, e])?;
        permute(&split, &[0, 2, 1, 3])?.reshape(vec![b * h, t, e])
    }

    fn weights(&self, x: &Tensor, b: usize, t: usize) -> Result<Tensor> {
        let (h, e) = (self.heads, self.embedding_width);

        let keys = self.fold_heads(self.projections.to_keys.forward(x)?, b, t)?;
        let queries = self.fold_heads(self.projections.to_queries.forward(x)?, b, t)?;

        // One 1/sqrt(E) factor on the queries equals E^(-1/4) on both queries and keys
        let queries = scale(queries, 1.0 / (e as f32).sqrt());

        let mut scores = bmm(&queries, &keys, true)?;
        let expected = [b * h, t, t];
        if scores.shape() != expected {
            return Err(FormerError::shape("attention scores", &expected, scores.shape()));
        }

        if self.mask == MaskPolicy::Causal {
            let backend = Arc::clone(scores.backend());
            backend.apply_causal_mask(scores.data_mut(), t)?;
        }

        softmax(scores)
    }
}
