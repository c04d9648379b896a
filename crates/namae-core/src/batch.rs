//! Padded input batches.

use candle_core::Tensor;

use crate::error::Result;

/// One padded batch of token sequences and the per-modality feature tensors
/// the active feature builders consume.
///
/// Every tensor shares the leading `[batch, len]` shape. `mask` holds `1.0`
/// on real tokens and `0.0` on padding; sequence lengths are derived from it.
#[derive(Debug, Clone)]
pub struct NerBatch {
    /// Token ids, `[batch, len]`, u32.
    pub token_ids: Tensor,
    /// Validity mask, `[batch, len]`, f32.
    pub mask: Tensor,
    /// Character ids per token, `[batch, len, word_len]`, u32.
    pub char_ids: Option<Tensor>,
    /// Capitalization flags, `[batch, len, capitalization_dim]`, f32.
    pub capitalization: Option<Tensor>,
    /// Part-of-speech flags, `[batch, len, pos_features_dim]`, f32.
    pub pos: Option<Tensor>,
}

impl NerBatch {
    /// Batch with token ids and mask only.
    pub fn new(token_ids: Tensor, mask: Tensor) -> Self {
        Self {
            token_ids,
            mask,
            char_ids: None,
            capitalization: None,
            pos: None,
        }
    }

    /// Number of examples in the batch.
    pub fn batch_size(&self) -> Result<usize> {
        Ok(self.token_ids.dim(0)?)
    }

    /// Padded sequence length shared by the batch.
    pub fn padded_len(&self) -> Result<usize> {
        Ok(self.token_ids.dim(1)?)
    }

    /// True (unpadded) length of each example, the row-sum of the mask.
    pub fn sequence_lengths(&self) -> Result<Vec<usize>> {
        let sums = self.mask.sum(1)?.to_vec1::<f32>()?;
        Ok(sums.into_iter().map(|s| s.round() as usize).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn lengths_come_from_the_mask() {
        let dev = Device::Cpu;
        let tokens = Tensor::zeros((2, 4), candle_core::DType::U32, &dev).unwrap();
        let mask = Tensor::from_vec(
            vec![1f32, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0],
            (2, 4),
            &dev,
        )
        .unwrap();
        let batch = NerBatch::new(tokens, mask);
        assert_eq!(batch.sequence_lengths().unwrap(), vec![3, 2]);
        assert_eq!(batch.batch_size().unwrap(), 2);
        assert_eq!(batch.padded_len().unwrap(), 4);
    }
}
