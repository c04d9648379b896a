//! # Input Feature Builders
//!
//! Each active input modality (tokens, characters, capitalization, POS) is
//! a [`FeatureProducer`] assembled from configuration at construction time.
//! The model concatenates the produced tensors along the feature axis, so
//! the aggregated width is exactly the sum of the producer widths.

pub mod char_cnn;

use candle_core::{D, DType, Tensor};
use candle_nn::{Embedding, Init, Module, VarBuilder, VarMap};

use crate::batch::NerBatch;
use crate::error::{NamaeError, Result};
use crate::ops::{register_var, variational_dropout};

pub use char_cnn::CharCnnEmbedder;

/// A builder for one dense per-token feature tensor of a fixed width.
pub trait FeatureProducer {
    /// Width of the produced feature axis.
    fn width(&self) -> usize;

    /// Build the `[batch, len, width]` feature tensor for this modality.
    fn produce(&self, batch: &NerBatch, train: bool) -> Result<Tensor>;
}

/// Token embedding lookup, optionally followed by variational dropout.
pub struct TokenEmbedder {
    embedding: Embedding,
    dim: usize,
    dropout: bool,
    dropout_rate: f64,
}

impl TokenEmbedder {
    /// Build the token embedder. A pretrained `[vocab, dim]` matrix is
    /// injected as a trainable variable when given; otherwise the matrix is
    /// learned from a uniform init.
    pub fn new(
        varmap: &VarMap,
        vb: &VarBuilder,
        pretrained: Option<&Tensor>,
        vocab_size: usize,
        dim: usize,
        dropout: bool,
        dropout_rate: f64,
    ) -> Result<Self> {
        let weight = embedding_weight(
            varmap,
            vb,
            pretrained,
            vocab_size,
            dim,
            "embeddings.token.weight",
        )?;
        Ok(Self {
            embedding: Embedding::new(weight, dim),
            dim,
            dropout,
            dropout_rate,
        })
    }
}

impl FeatureProducer for TokenEmbedder {
    fn width(&self) -> usize {
        self.dim
    }

    fn produce(&self, batch: &NerBatch, train: bool) -> Result<Tensor> {
        let emb = self.embedding.forward(&batch.token_ids)?;
        if self.dropout {
            variational_dropout(&emb, self.dropout_rate, train)
        } else {
            Ok(emb)
        }
    }
}

/// Pass-through of the dense capitalization flags.
pub struct CapitalizationFeature {
    dim: usize,
}

impl CapitalizationFeature {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl FeatureProducer for CapitalizationFeature {
    fn width(&self) -> usize {
        self.dim
    }

    fn produce(&self, batch: &NerBatch, _train: bool) -> Result<Tensor> {
        let caps = batch
            .capitalization
            .as_ref()
            .ok_or(NamaeError::MissingFeature("capitalization"))?;
        check_width(caps, self.dim, "capitalization")?;
        Ok(caps.to_dtype(DType::F32)?)
    }
}

/// Pass-through of the dense part-of-speech flags.
pub struct PosFeature {
    dim: usize,
}

impl PosFeature {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl FeatureProducer for PosFeature {
    fn width(&self) -> usize {
        self.dim
    }

    fn produce(&self, batch: &NerBatch, _train: bool) -> Result<Tensor> {
        let pos = batch
            .pos
            .as_ref()
            .ok_or(NamaeError::MissingFeature("pos"))?;
        check_width(pos, self.dim, "pos")?;
        Ok(pos.to_dtype(DType::F32)?)
    }
}

/// Concatenate the outputs of every active producer along the feature axis.
pub fn aggregate(
    producers: &[Box<dyn FeatureProducer>],
    batch: &NerBatch,
    train: bool,
) -> Result<Tensor> {
    let mut features = Vec::with_capacity(producers.len());
    for producer in producers {
        features.push(producer.produce(batch, train)?);
    }
    Ok(Tensor::cat(&features, D::Minus1)?)
}

pub(crate) fn embedding_weight(
    varmap: &VarMap,
    vb: &VarBuilder,
    pretrained: Option<&Tensor>,
    vocab_size: usize,
    dim: usize,
    name: &str,
) -> Result<Tensor> {
    match pretrained {
        Some(mat) => {
            let (_, mat_dim) = mat.dims2()?;
            if mat_dim != dim {
                return Err(NamaeError::Config(format!(
                    "{name}: pretrained matrix width {mat_dim} does not match configured dim {dim}"
                )));
            }
            register_var(varmap, name, mat.clone())
        }
        None => {
            if vocab_size == 0 {
                return Err(NamaeError::Config(format!(
                    "{name}: vocabulary size is required when no pretrained matrix is given"
                )));
            }
            let bound = (3.0 / dim as f64).sqrt();
            Ok(vb.get_with_hints(
                (vocab_size, dim),
                name,
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                },
            )?)
        }
    }
}

fn check_width(tensor: &Tensor, expected: usize, what: &str) -> Result<()> {
    let width = tensor.dim(D::Minus1)?;
    if width != expected {
        return Err(NamaeError::Config(format!(
            "{what} feature width {width} does not match configured dim {expected}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn setup() -> (VarMap, Device) {
        (VarMap::new(), Device::Cpu)
    }

    fn toy_batch(dev: &Device) -> NerBatch {
        let tokens = Tensor::from_vec(vec![1u32, 2, 3, 0, 4, 5, 0, 0], (2, 4), dev).unwrap();
        let mask = Tensor::from_vec(
            vec![1f32, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0],
            (2, 4),
            dev,
        )
        .unwrap();
        NerBatch::new(tokens, mask)
    }

    #[test]
    fn token_embedder_produces_batch_len_dim() {
        let (varmap, dev) = setup();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let emb = TokenEmbedder::new(&varmap, &vb, None, 10, 8, false, 0.5).unwrap();
        let out = emb.produce(&toy_batch(&dev), false).unwrap();
        assert_eq!(out.dims(), &[2, 4, 8]);
        assert_eq!(emb.width(), 8);
    }

    #[test]
    fn pretrained_matrix_width_is_validated() {
        let (varmap, dev) = setup();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let mat = Tensor::zeros((10, 6), DType::F32, &dev).unwrap();
        assert!(matches!(
            TokenEmbedder::new(&varmap, &vb, Some(&mat), 10, 8, false, 0.5),
            Err(NamaeError::Config(_))
        ));
    }

    #[test]
    fn missing_capitalization_tensor_is_an_error() {
        let dev = Device::Cpu;
        let cap = CapitalizationFeature::new(4);
        let err = cap.produce(&toy_batch(&dev), false).unwrap_err();
        assert!(matches!(err, NamaeError::MissingFeature("capitalization")));
    }

    #[test]
    fn aggregate_width_is_the_sum_of_active_widths() {
        let (varmap, dev) = setup();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let mut batch = toy_batch(&dev);
        batch.capitalization = Some(Tensor::zeros((2, 4, 3), DType::F32, &dev).unwrap());

        let producers: Vec<Box<dyn FeatureProducer>> = vec![
            Box::new(TokenEmbedder::new(&varmap, &vb, None, 10, 8, false, 0.5).unwrap()),
            Box::new(CapitalizationFeature::new(3)),
        ];
        let out = aggregate(&producers, &batch, false).unwrap();
        assert_eq!(out.dims(), &[2, 4, 11]);
    }
}
