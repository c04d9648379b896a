//! Character-level embedding sub-network: embedding lookup, 1-D convolution
//! over each token's characters, max-pooling, and a highway gate.

use candle_core::Tensor;
use candle_nn::{Conv1d, Conv1dConfig, Embedding, Linear, Module, VarBuilder, VarMap, ops};

use crate::batch::NerBatch;
use crate::error::{NamaeError, Result};
use crate::features::{FeatureProducer, embedding_weight};
use crate::ops::variational_dropout;

/// Per-token character representation of width `char_emb_dim`.
pub struct CharCnnEmbedder {
    embedding: Embedding,
    conv: Conv1d,
    highway_transform: Linear,
    highway_gate: Linear,
    dim: usize,
    dropout: bool,
    dropout_rate: f64,
}

impl CharCnnEmbedder {
    pub fn new(
        varmap: &VarMap,
        vb: &VarBuilder,
        pretrained: Option<&Tensor>,
        vocab_size: usize,
        dim: usize,
        filter_width: usize,
        dropout: bool,
        dropout_rate: f64,
    ) -> Result<Self> {
        let weight = embedding_weight(
            varmap,
            vb,
            pretrained,
            vocab_size,
            dim,
            "embeddings.char.weight",
        )?;
        let conv_cfg = Conv1dConfig {
            padding: filter_width / 2,
            ..Default::default()
        };
        let conv = candle_nn::conv1d(dim, dim, filter_width, conv_cfg, vb.pp("char_cnn.conv"))?;
        let highway_transform = candle_nn::linear(dim, dim, vb.pp("char_cnn.highway_transform"))?;
        let highway_gate = candle_nn::linear(dim, dim, vb.pp("char_cnn.highway_gate"))?;
        Ok(Self {
            embedding: Embedding::new(weight, dim),
            conv,
            highway_transform,
            highway_gate,
            dim,
            dropout,
            dropout_rate,
        })
    }
}

impl FeatureProducer for CharCnnEmbedder {
    fn width(&self) -> usize {
        self.dim
    }

    fn produce(&self, batch: &NerBatch, train: bool) -> Result<Tensor> {
        let chars = batch
            .char_ids
            .as_ref()
            .ok_or(NamaeError::MissingFeature("char"))?;
        let (batch_size, len, word_len) = chars.dims3()?;

        // Fold tokens into the batch axis so the convolution runs per token.
        let flat = chars.reshape((batch_size * len, word_len))?;
        let emb = self.embedding.forward(&flat)?; // [b*l, w, dim]
        let conv_in = emb.transpose(1, 2)?; // [b*l, dim, w]
        let conv_out = self.conv.forward(&conv_in)?.relu()?;
        let pooled = conv_out.max(2)?; // [b*l, dim]

        let gate = ops::sigmoid(&self.highway_gate.forward(&pooled)?)?;
        let transform = self.highway_transform.forward(&pooled)?.relu()?;
        let carried = gate.affine(-1.0, 1.0)?.mul(&pooled)?;
        let highway = gate.mul(&transform)?.add(&carried)?;

        let out = highway.reshape((batch_size, len, self.dim))?;
        if self.dropout {
            variational_dropout(&out, self.dropout_rate, train)
        } else {
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn char_network_pools_to_one_vector_per_token() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let embedder = CharCnnEmbedder::new(&varmap, &vb, None, 30, 12, 3, false, 0.5).unwrap();

        let tokens = Tensor::zeros((2, 5), DType::U32, &dev).unwrap();
        let mask = Tensor::ones((2, 5), DType::F32, &dev).unwrap();
        let mut batch = NerBatch::new(tokens, mask);
        batch.char_ids = Some(Tensor::ones((2, 5, 7), DType::U32, &dev).unwrap());

        let out = embedder.produce(&batch, false).unwrap();
        assert_eq!(out.dims(), &[2, 5, 12]);
    }

    #[test]
    fn missing_char_ids_is_an_error() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let embedder = CharCnnEmbedder::new(&varmap, &vb, None, 30, 12, 3, false, 0.5).unwrap();

        let tokens = Tensor::zeros((1, 3), DType::U32, &dev).unwrap();
        let mask = Tensor::ones((1, 3), DType::F32, &dev).unwrap();
        let err = embedder
            .produce(&NerBatch::new(tokens, mask), false)
            .unwrap_err();
        assert!(matches!(err, NamaeError::MissingFeature("char")));
    }
}
