//! Training data: BIO-format loading, vocabularies, padding into batches.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use candle_core::{Device, Tensor};
use namae_core::NerBatch;

/// A single training example: parallel token and label sequences.
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub tokens: Vec<String>,
    pub labels: Vec<String>,
}

impl TrainingExample {
    pub fn new(tokens: Vec<String>, labels: Vec<String>) -> Self {
        Self { tokens, labels }
    }
}

/// Load a dataset in BIO format: one `token<TAB>label` pair per line,
/// examples separated by blank lines, `#` comments ignored.
pub fn load_bio_dataset<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<TrainingExample>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut examples = Vec::new();
    let mut tokens = Vec::new();
    let mut labels = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            if !tokens.is_empty() {
                examples.push(TrainingExample::new(
                    std::mem::take(&mut tokens),
                    std::mem::take(&mut labels),
                ));
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        if let Some((token, label)) = line.split_once('\t') {
            tokens.push(token.to_string());
            labels.push(label.to_string());
        }
    }

    if !tokens.is_empty() {
        examples.push(TrainingExample::new(tokens, labels));
    }

    Ok(examples)
}

/// Token vocabulary. Id 0 is padding, id 1 is the unknown token.
pub struct Vocab {
    index: HashMap<String, u32>,
}

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;

impl Vocab {
    /// Build from a corpus, keeping every distinct token.
    pub fn fit(examples: &[TrainingExample]) -> Self {
        let mut index = HashMap::new();
        for example in examples {
            for token in &example.tokens {
                let next = index.len() as u32 + 2;
                index.entry(token.clone()).or_insert(next);
            }
        }
        Self { index }
    }

    pub fn encode(&self, token: &str) -> u32 {
        *self.index.get(token).unwrap_or(&UNK_ID)
    }

    pub fn size(&self) -> usize {
        self.index.len() + 2
    }
}

/// Label vocabulary, ids assigned in order of first appearance.
pub struct LabelVocab {
    index: HashMap<String, u32>,
    names: Vec<String>,
}

impl LabelVocab {
    pub fn fit(examples: &[TrainingExample]) -> Self {
        let mut index = HashMap::new();
        let mut names = Vec::new();
        for example in examples {
            for label in &example.labels {
                if !index.contains_key(label) {
                    index.insert(label.clone(), names.len() as u32);
                    names.push(label.clone());
                }
            }
        }
        Self { index, names }
    }

    pub fn encode(&self, label: &str) -> u32 {
        *self.index.get(label).unwrap_or(&0)
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }
}

/// Character vocabulary: padding plus printable ASCII.
pub struct CharVocab;

impl CharVocab {
    pub fn encode(&self, token: &str) -> Vec<u32> {
        token
            .chars()
            .map(|c| {
                let code = c as u32;
                if code < 128 { code + 1 } else { UNK_ID }
            })
            .collect()
    }

    pub fn size(&self) -> usize {
        129
    }
}

/// Longest token length the char tensor keeps; longer tokens are truncated.
pub const MAX_WORD_LEN: usize = 20;

/// Pad a slice of examples to a common length and build the input batch
/// plus the gold-label tensor.
pub fn pad_batch(
    examples: &[&TrainingExample],
    vocab: &Vocab,
    labels: &LabelVocab,
    char_vocab: Option<&CharVocab>,
    device: &Device,
) -> namae_core::Result<(NerBatch, Tensor)> {
    let batch_size = examples.len();
    let max_len = examples
        .iter()
        .map(|e| e.tokens.len())
        .max()
        .unwrap_or(1)
        .max(1);

    let mut token_ids = vec![PAD_ID; batch_size * max_len];
    let mut mask = vec![0f32; batch_size * max_len];
    let mut gold = vec![0u32; batch_size * max_len];

    for (i, example) in examples.iter().enumerate() {
        for (t, (token, label)) in example.tokens.iter().zip(&example.labels).enumerate() {
            token_ids[i * max_len + t] = vocab.encode(token);
            mask[i * max_len + t] = 1.0;
            gold[i * max_len + t] = labels.encode(label);
        }
    }

    let token_ids = Tensor::from_vec(token_ids, (batch_size, max_len), device)?;
    let mask = Tensor::from_vec(mask, (batch_size, max_len), device)?;
    let gold = Tensor::from_vec(gold, (batch_size, max_len), device)?;
    let mut batch = NerBatch::new(token_ids, mask);

    if let Some(chars) = char_vocab {
        let word_len = examples
            .iter()
            .flat_map(|e| e.tokens.iter())
            .map(|t| t.chars().count().min(MAX_WORD_LEN))
            .max()
            .unwrap_or(1)
            .max(1);
        let mut char_ids = vec![PAD_ID; batch_size * max_len * word_len];
        for (i, example) in examples.iter().enumerate() {
            for (t, token) in example.tokens.iter().enumerate() {
                for (k, id) in chars.encode(token).into_iter().take(word_len).enumerate() {
                    char_ids[(i * max_len + t) * word_len + k] = id;
                }
            }
        }
        batch.char_ids = Some(Tensor::from_vec(
            char_ids,
            (batch_size, max_len, word_len),
            device,
        )?);
    }

    Ok((batch, gold))
}

/// Deterministic corpus for smoke training. Sentences are filler words with
/// occasional two-token location phrases tagged `B-LOC I-LOC`.
pub fn synthetic_corpus(n_examples: usize, seed: u64) -> Vec<TrainingExample> {
    const FILLER: &[&str] = &["the", "train", "left", "from", "at", "noon", "today", "again"];
    const PLACES: &[(&str, &str)] = &[
        ("new", "york"),
        ("san", "francisco"),
        ("rio", "grande"),
        ("los", "angeles"),
    ];

    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
    let mut next = move |bound: usize| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) as usize) % bound
    };

    (0..n_examples)
        .map(|_| {
            let mut tokens = Vec::new();
            let mut labels = Vec::new();
            let len = 3 + next(5);
            for _ in 0..len {
                if next(4) == 0 {
                    let (first, second) = PLACES[next(PLACES.len())];
                    tokens.push(first.to_string());
                    labels.push("B-LOC".to_string());
                    tokens.push(second.to_string());
                    labels.push("I-LOC".to_string());
                } else {
                    tokens.push(FILLER[next(FILLER.len())].to_string());
                    labels.push("O".to_string());
                }
            }
            TrainingExample::new(tokens, labels)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_corpus_is_aligned_and_deterministic() {
        let a = synthetic_corpus(20, 7);
        let b = synthetic_corpus(20, 7);
        assert_eq!(a.len(), 20);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.tokens, y.tokens);
            assert_eq!(x.labels, y.labels);
            assert_eq!(x.tokens.len(), x.labels.len());
        }
    }

    #[test]
    fn pad_batch_builds_mask_and_gold() {
        let examples = vec![
            TrainingExample::new(
                vec!["new".into(), "york".into(), "today".into()],
                vec!["B-LOC".into(), "I-LOC".into(), "O".into()],
            ),
            TrainingExample::new(vec!["noon".into()], vec!["O".into()]),
        ];
        let vocab = Vocab::fit(&examples);
        let labels = LabelVocab::fit(&examples);
        let refs: Vec<&TrainingExample> = examples.iter().collect();
        let (batch, gold) =
            pad_batch(&refs, &vocab, &labels, Some(&CharVocab), &Device::Cpu).unwrap();

        assert_eq!(batch.sequence_lengths().unwrap(), vec![3, 1]);
        assert_eq!(gold.dims(), &[2, 3]);
        let chars = batch.char_ids.unwrap();
        assert_eq!(chars.dim(0).unwrap(), 2);
        assert_eq!(chars.dim(1).unwrap(), 3);
    }

    #[test]
    fn label_vocab_keeps_first_appearance_order() {
        let examples = synthetic_corpus(50, 3);
        let labels = LabelVocab::fit(&examples);
        assert_eq!(labels.size(), 3);
        assert_eq!(labels.encode("O"), labels.encode("O"));
        assert!(labels.name(labels.encode("B-LOC")).unwrap() == "B-LOC");
    }

    #[test]
    fn bio_loader_splits_on_blank_lines() {
        let dir = std::env::temp_dir().join(format!("namae-bio-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("toy.bio");
        std::fs::write(&path, "# comment\nnew\tB-LOC\nyork\tI-LOC\n\nnoon\tO\n").unwrap();

        let examples = load_bio_dataset(&path).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].tokens, vec!["new", "york"]);
        assert_eq!(examples[1].labels, vec!["O"]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
