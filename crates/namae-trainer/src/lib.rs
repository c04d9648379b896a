//! Training harness for namae sequence-tagging models: dataset loading,
//! vocabularies, batching, and the epoch loop.

pub mod data;
pub mod trainer;

pub use data::{load_bio_dataset, synthetic_corpus, CharVocab, LabelVocab, TrainingExample, Vocab};
pub use trainer::{TrainOptions, Trainer};
