//! Training objective and inference decoder, selected once at construction.

use candle_core::{D, Tensor};
use candle_nn::VarBuilder;
use candle_nn::ops::log_softmax;

use crate::crf::LinearChainCrf;
use crate::error::Result;
use crate::ops::one_hot;

/// CRF versus independent per-token softmax. Constructed once; no boolean
/// is threaded through the forward pass.
pub enum Objective {
    /// Global sequence likelihood with learned transition scores.
    Crf(LinearChainCrf),
    /// Independent masked softmax cross-entropy per position.
    Softmax { n_tags: usize },
}

impl Objective {
    pub fn new(vb: &VarBuilder, n_tags: usize, use_crf: bool) -> Result<Self> {
        if use_crf {
            Ok(Objective::Crf(LinearChainCrf::new(vb, n_tags)?))
        } else {
            Ok(Objective::Softmax { n_tags })
        }
    }

    /// Scalar training loss for a padded batch.
    pub fn loss(&self, logits: &Tensor, tags: &Tensor, mask: &Tensor) -> Result<Tensor> {
        match self {
            Objective::Crf(crf) => crf.neg_log_likelihood(logits, tags, mask),
            Objective::Softmax { n_tags } => {
                let hot = one_hot(tags, *n_tags)?;
                let log_p = log_softmax(logits, D::Minus1)?;
                let ce = hot.mul(&log_p)?.sum(D::Minus1)?.affine(-1.0, 0.0)?;
                // padded positions are zeroed, then everything is averaged
                Ok(ce.mul(mask)?.mean_all()?)
            }
        }
    }

    /// Per-example tag sequences truncated to the true lengths.
    pub fn decode(&self, logits: &Tensor, lengths: &[usize]) -> Result<Vec<Vec<u32>>> {
        match self {
            Objective::Crf(crf) => crf.decode(logits, lengths),
            Objective::Softmax { .. } => {
                let preds = logits.argmax(D::Minus1)?.to_vec2::<u32>()?;
                Ok(preds
                    .into_iter()
                    .zip(lengths)
                    .map(|(row, &len)| row[..len].to_vec())
                    .collect())
            }
        }
    }
}
