//! # Viterbi Decoding
//!
//! Dynamic-programming search for the highest-scoring tag sequence given
//! per-position emission scores and a pairwise transition matrix.

use crate::error::{NamaeError, Result};

/// Viterbi decoder over a fixed tag set.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    n_tags: usize,
}

impl ViterbiDecoder {
    pub fn new(n_tags: usize) -> Self {
        Self { n_tags }
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emissions` - `[seq_len][n_tags]` emission scores
    /// * `transitions` - `[n_tags][n_tags]` scores, `transitions[i][j]` for
    ///   moving from tag `i` to tag `j`
    ///
    /// # Returns
    /// The best path as tag indices together with its total score. An empty
    /// emission sequence decodes to an empty path.
    pub fn decode(
        &self,
        emissions: &[Vec<f32>],
        transitions: &[Vec<f32>],
    ) -> Result<(Vec<usize>, f32)> {
        let seq_len = emissions.len();
        if seq_len == 0 {
            return Ok((Vec::new(), 0.0));
        }
        if emissions[0].len() != self.n_tags {
            return Err(NamaeError::Config(format!(
                "emission score width {} does not match {} tags",
                emissions[0].len(),
                self.n_tags
            )));
        }
        if transitions.len() != self.n_tags {
            return Err(NamaeError::Config(format!(
                "transition matrix has {} rows, expected {}",
                transitions.len(),
                self.n_tags
            )));
        }

        let mut scores: Vec<Vec<f32>> = vec![vec![f32::NEG_INFINITY; self.n_tags]; seq_len];
        let mut backptr: Vec<Vec<usize>> = vec![vec![0; self.n_tags]; seq_len];

        scores[0].copy_from_slice(&emissions[0]);

        for pos in 1..seq_len {
            for curr in 0..self.n_tags {
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = 0;
                for prev in 0..self.n_tags {
                    let score = scores[pos - 1][prev] + transitions[prev][curr];
                    if score > best_score {
                        best_score = score;
                        best_prev = prev;
                    }
                }
                scores[pos][curr] = best_score + emissions[pos][curr];
                backptr[pos][curr] = best_prev;
            }
        }

        let (mut curr, mut best_final) = (0, f32::NEG_INFINITY);
        for (tag, &score) in scores[seq_len - 1].iter().enumerate() {
            if score > best_final {
                best_final = score;
                curr = tag;
            }
        }

        let mut path = vec![curr];
        for pos in (1..seq_len).rev() {
            curr = backptr[pos][curr];
            path.push(curr);
        }
        path.reverse();

        Ok((path, best_final))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_follows_dominant_emissions() {
        let decoder = ViterbiDecoder::new(3);
        let emissions = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.0, 1.0, 0.0],
        ];
        let transitions = vec![vec![0.0; 3]; 3];
        let (path, score) = decoder.decode(&emissions, &transitions).unwrap();
        assert_eq!(path, vec![0, 2, 1]);
        assert!((score - 3.0).abs() < 1e-6);
    }

    #[test]
    fn strong_transitions_override_emissions() {
        let decoder = ViterbiDecoder::new(2);
        // emissions slightly prefer tag 1 at step 2, transitions forbid 0 -> 1
        let emissions = vec![vec![1.0, 0.0], vec![0.0, 0.2]];
        let transitions = vec![vec![0.0, -100.0], vec![0.0, 0.0]];
        let (path, _) = decoder.decode(&emissions, &transitions).unwrap();
        assert_eq!(path, vec![0, 0]);
    }

    #[test]
    fn empty_sequence_decodes_to_empty_path() {
        let decoder = ViterbiDecoder::new(4);
        let (path, score) = decoder.decode(&[], &vec![vec![0.0; 4]; 4]).unwrap();
        assert!(path.is_empty());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn mismatched_width_is_rejected() {
        let decoder = ViterbiDecoder::new(3);
        let emissions = vec![vec![0.0, 1.0]];
        let err = decoder
            .decode(&emissions, &vec![vec![0.0; 3]; 3])
            .unwrap_err();
        assert!(matches!(err, NamaeError::Config(_)));
    }
}
