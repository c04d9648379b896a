//! # Linear-Chain Conditional Random Field
//!
//! Scores whole tag sequences with per-position emission scores (the
//! network logits) plus a learned pairwise transition matrix. Training
//! maximizes sequence log-likelihood with a masked forward algorithm;
//! inference runs a per-example Viterbi decode.

pub mod viterbi;

use candle_core::{D, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::error::Result;
use crate::ops::{log_sum_exp, one_hot};

pub use viterbi::ViterbiDecoder;

/// CRF layer over `n_tags` labels. `transitions[i][j]` scores moving from
/// tag `i` to tag `j`.
pub struct LinearChainCrf {
    transitions: Tensor,
    n_tags: usize,
}

impl LinearChainCrf {
    pub fn new(vb: &VarBuilder, n_tags: usize) -> Result<Self> {
        let transitions = vb.get_with_hints((n_tags, n_tags), "crf.transitions", Init::Const(0.0))?;
        Ok(Self {
            transitions,
            n_tags,
        })
    }

    pub fn n_tags(&self) -> usize {
        self.n_tags
    }

    pub fn transitions(&self) -> &Tensor {
        &self.transitions
    }

    /// Mean negative log-likelihood of the gold tag sequences, restricted to
    /// each example's valid length. Always non-negative: the partition
    /// function dominates the score of any single path.
    pub fn neg_log_likelihood(
        &self,
        logits: &Tensor,
        tags: &Tensor,
        mask: &Tensor,
    ) -> Result<Tensor> {
        let log_z = self.partition(logits, mask)?;
        let gold = self.gold_score(logits, tags, mask)?;
        Ok(log_z.sub(&gold)?.mean_all()?)
    }

    /// Forward algorithm in log space. Padded steps leave the accumulator
    /// unchanged so `log Z` covers exactly the valid prefix.
    fn partition(&self, logits: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (_batch, len, _n) = logits.dims3()?;
        let mut alpha = logits.narrow(1, 0, 1)?.squeeze(1)?; // [b, n]
        for t in 1..len {
            let emit = logits.narrow(1, t, 1)?.squeeze(1)?; // [b, n]
            let mask_t = mask.narrow(1, t, 1)?; // [b, 1]
            let scores = alpha
                .unsqueeze(2)?
                .broadcast_add(&self.transitions.unsqueeze(0)?)?
                .broadcast_add(&emit.unsqueeze(1)?)?; // [b, n, n]
            let next = log_sum_exp(&scores, 1)?; // [b, n]
            let keep = mask_t.affine(-1.0, 1.0)?;
            alpha = next
                .broadcast_mul(&mask_t)?
                .add(&alpha.broadcast_mul(&keep)?)?;
        }
        log_sum_exp(&alpha, 1)
    }

    /// Score of the gold path: masked emission pickup plus masked pairwise
    /// transition pickup, both expressed through one-hot gold labels so the
    /// transition matrix receives gradients.
    fn gold_score(&self, logits: &Tensor, tags: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (_batch, len, n) = logits.dims3()?;
        let hot = one_hot(tags, n)?; // [b, l, n]
        let emit = logits
            .mul(&hot)?
            .sum(D::Minus1)?
            .mul(mask)?
            .sum(1)?; // [b]
        if len == 1 {
            return Ok(emit);
        }
        let prev = hot.narrow(1, 0, len - 1)?;
        let next = hot.narrow(1, 1, len - 1)?;
        let trans = prev
            .broadcast_matmul(&self.transitions.unsqueeze(0)?)? // [b, l-1, n]
            .mul(&next)?
            .sum(D::Minus1)? // [b, l-1]
            .mul(&mask.narrow(1, 1, len - 1)?)?
            .sum(1)?; // [b]
        Ok(emit.add(&trans)?)
    }

    /// Decode each example independently over its true length; no batching
    /// in the dynamic program, results are concatenated in batch order.
    pub fn decode(&self, logits: &Tensor, lengths: &[usize]) -> Result<Vec<Vec<u32>>> {
        let decoder = ViterbiDecoder::new(self.n_tags);
        let transitions = self.transitions.to_vec2::<f32>()?;
        let mut paths = Vec::with_capacity(lengths.len());
        for (i, &len) in lengths.iter().enumerate() {
            let emissions = logits.narrow(0, i, 1)?.squeeze(0)?.to_vec2::<f32>()?;
            let (path, _score) = decoder.decode(&emissions[..len], &transitions)?;
            paths.push(path.into_iter().map(|t| t as u32).collect());
        }
        Ok(paths)
    }
}
