//! Epoch-driven training loop over a [`NerNetwork`].

use std::path::Path;

use anyhow::Result;
use namae_core::NerNetwork;

use crate::data::{pad_batch, CharVocab, LabelVocab, TrainingExample, Vocab};

/// Training loop settings.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 16,
            learning_rate: 1e-3,
        }
    }
}

/// Binds a model to the vocabularies its inputs were encoded with.
pub struct Trainer {
    model: NerNetwork,
    vocab: Vocab,
    labels: LabelVocab,
    char_vocab: Option<CharVocab>,
}

impl Trainer {
    pub fn new(
        model: NerNetwork,
        vocab: Vocab,
        labels: LabelVocab,
        char_vocab: Option<CharVocab>,
    ) -> Self {
        Self {
            model,
            vocab,
            labels,
            char_vocab,
        }
    }

    pub fn model(&self) -> &NerNetwork {
        &self.model
    }

    /// Run the full training loop, reporting loss and token accuracy per epoch.
    pub fn fit(&mut self, examples: &[TrainingExample], options: &TrainOptions) -> Result<()> {
        if examples.is_empty() {
            anyhow::bail!("training set is empty");
        }
        let mut order: Vec<usize> = (0..examples.len()).collect();

        for epoch in 0..options.epochs {
            shuffle(&mut order, epoch as u64 + 1);

            let mut total_loss = 0f32;
            let mut batches = 0usize;
            for chunk in order.chunks(options.batch_size) {
                let batch: Vec<&TrainingExample> = chunk.iter().map(|&i| &examples[i]).collect();
                let (inputs, gold) = pad_batch(
                    &batch,
                    &self.vocab,
                    &self.labels,
                    self.char_vocab.as_ref(),
                    self.model.device(),
                )?;
                total_loss += self
                    .model
                    .train_on_batch(&inputs, &gold, options.learning_rate)?;
                batches += 1;
            }

            let accuracy = self.evaluate(examples, options.batch_size)?;
            tracing::info!(
                epoch = epoch + 1,
                loss = total_loss / batches as f32,
                accuracy,
                "epoch complete"
            );
        }
        Ok(())
    }

    /// Token-level accuracy over a dataset.
    pub fn evaluate(&self, examples: &[TrainingExample], batch_size: usize) -> Result<f32> {
        let mut correct = 0usize;
        let mut total = 0usize;

        for chunk in examples.chunks(batch_size) {
            let batch: Vec<&TrainingExample> = chunk.iter().collect();
            let (inputs, _) = pad_batch(
                &batch,
                &self.vocab,
                &self.labels,
                self.char_vocab.as_ref(),
                self.model.device(),
            )?;
            let predicted = self.model.predict(&inputs)?;

            for (example, tags) in chunk.iter().zip(&predicted) {
                for (label, &tag) in example.labels.iter().zip(tags) {
                    if self.labels.encode(label) == tag {
                        correct += 1;
                    }
                    total += 1;
                }
            }
        }

        Ok(if total == 0 {
            0.0
        } else {
            correct as f32 / total as f32
        })
    }

    /// Decode one example back to label names.
    pub fn tag(&self, example: &TrainingExample) -> Result<Vec<String>> {
        let (inputs, _) = pad_batch(
            &[example],
            &self.vocab,
            &self.labels,
            self.char_vocab.as_ref(),
            self.model.device(),
        )?;
        let predicted = self.model.predict(&inputs)?;
        Ok(predicted[0]
            .iter()
            .map(|&tag| self.labels.name(tag).unwrap_or("O").to_string())
            .collect())
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        self.model.save(dir)?;
        Ok(())
    }
}

/// Deterministic Fisher-Yates shuffle keyed by epoch.
fn shuffle(order: &mut [usize], seed: u64) {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
    for i in (1..order.len()).rev() {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = ((state >> 33) as usize) % (i + 1);
        order.swap(i, j);
    }
}
