use std::sync::Arc;

use rand::RngCore;
use tracing::debug;

use super::attention::MultiHeadAttention;
use super::tensors::{scoped, WeightStore};
use crate::config::ModelConfig;
use crate::error::{FormerError, Result};
use crate::llm::layers::{Dropout, Initializer, LayerNorm, Linear};
use crate::llm::tensor::{add, relu, Tensor};

/// Self-attention followed by a position-wise feed-forward network.
///
/// Each sublayer's output is added back to its input and layer-normalized
/// (post-norm), then passed through dropout:
///
/// ```text
/// x1 = dropout(norm1(attention(x) + x))
/// x2 = dropout(norm2(ff(x1) + x1))
/// ```
#[derive(Debug, Clone)]
pub struct TransformerBlock {
    attention: MultiHeadAttention,
    norm1: LayerNorm,
    norm2: LayerNorm,
    /// `E -> mult·E`, with bias
    ff_expand: Linear,
    /// `mult·E -> E`, with bias
    ff_contract: Linear,
    dropout: Dropout,
}

impl TransformerBlock {
    /// Creates a block with freshly initialized weights
    pub fn new(config: &ModelConfig, init: &mut Initializer) -> Result<Self> {
        config.validate()?;
        let e = config.embedding_width;

        let attention = MultiHeadAttention::new(e, config.heads, config.mask, init)?;
        let backend = Arc::clone(init.backend());

        Self::from_parts(
            attention,
            LayerNorm::new(e, Arc::clone(&backend)),
            LayerNorm::new(e, backend),
            Linear::init(e, config.ff_hidden_width(), true, init),
            Linear::init(config.ff_hidden_width(), e, true, init),
            Dropout::new(config.dropout_p)?,
        )
    }

    /// Assembles a block from existing sublayers, checking that their widths line up
    pub fn from_parts(
        attention: MultiHeadAttention,
        norm1: LayerNorm,
        norm2: LayerNorm,
        ff_expand: Linear,
        ff_contract: Linear,
        dropout: Dropout,
    ) -> Result<Self> {
        let e = attention.embedding_width();

        if norm1.width() != e || norm2.width() != e {
            return Err(FormerError::shape("block norms", &[e, e], &[norm1.width(), norm2.width()]));
        }
        if ff_expand.in_features() != e
            || ff_contract.out_features() != e
            || ff_expand.out_features() != ff_contract.in_features()
        {
            return Err(FormerError::shape(
                "feed-forward projections",
                &[e, ff_expand.out_features(), e],
                &[ff_expand.in_features(), ff_contract.in_features(), ff_contract.out_features()],
            ));
        }

        debug!(
            "Created transformer block: width={}, heads={}, ff_hidden={}, dropout={}",
            e,
            attention.heads(),
            ff_expand.out_features(),
            dropout.p()
        );

        Ok(Self {
            attention,
            norm1,
            norm2,
            ff_expand,
            ff_contract,
            dropout,
        })
    }

    pub fn from_store(store: &WeightStore, prefix: &str, config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let e = config.embedding_width;
        let hidden = config.ff_hidden_width();

        Self::from_parts(
            MultiHeadAttention::from_store(
                store,
                &scoped(prefix, "attention"),
                e,
                config.heads,
                config.mask,
            )?,
            LayerNorm::from_store(store, &scoped(prefix, "norm1"), e)?,
            LayerNorm::from_store(store, &scoped(prefix, "norm2"), e)?,
            Linear::from_store(store, &scoped(prefix, "ff.0"), e, hidden, true)?,
            Linear::from_store(store, &scoped(prefix, "ff.2"), hidden, e, true)?,
            Dropout::new(config.dropout_p)?,
        )
    }

    pub fn export(&self, store: &mut WeightStore, prefix: &str) {
        self.attention.export(store, &scoped(prefix, "attention"));
        self.norm1.export(store, &scoped(prefix, "norm1"));
        self.norm2.export(store, &scoped(prefix, "norm2"));
        self.ff_expand.export(store, &scoped(prefix, "ff.0"));
        self.ff_contract.export(store, &scoped(prefix, "ff.2"));
    }

    pub fn attention(&self) -> &MultiHeadAttention {
        &self.attention
    }

    pub fn embedding_width(&self) -> usize {
        self.attention.embedding_width()
    }

    /// Inference forward pass; dropout is the identity
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.run(x, None)
    }

    /// Training-mode forward pass; dropout draws from `rng`
    pub fn forward_train(&self, x: &Tensor, rng: &mut dyn RngCore) -> Result<Tensor> {
        self.run(x, Some(rng))
    }

    pub(super) fn run(
        &self,
        x: &Tensor,
        mut rng: Option<&mut (dyn RngCore + '_)>,
    ) -> Result<Tensor> {
        let attended = self.attention.forward(x)?;

        let x1 = self.norm1.forward(&add(&attended, x)?)?;
        let x1 = self.dropout.forward(x1, rng.as_deref_mut());

        let hidden = relu(self.ff_expand.forward(&x1)?);
        let fed = self.ff_contract.forward(&hidden)?;

        let x2 = self.norm2.forward(&add(&fed, &x1)?)?;
        Ok(self.dropout.forward(x2, rng))
    }
}
