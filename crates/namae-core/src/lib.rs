//! # Namae Core
//!
//! Neural sequence-tagging (NER-style) model: heterogeneous input features
//! (token, character, capitalization, POS), a configurable bidirectional
//! recurrent or convolutional encoder, and a CRF or independent-softmax
//! objective with Viterbi decoding, built on the candle tensor engine.
//!
//! ## Quick Start
//!
//! ```rust
//! use candle_core::Tensor;
//! use namae_core::{NerBatch, NerNetwork, NerNetworkConfig};
//!
//! let config = NerNetworkConfig {
//!     n_tags: 3,
//!     token_vocab_size: 100,
//!     token_emb_dim: 16,
//!     n_hidden_list: vec![16],
//!     ..Default::default()
//! };
//! let mut model = NerNetwork::new(config).unwrap();
//!
//! let dev = model.device().clone();
//! let tokens = Tensor::from_vec(vec![5u32, 9, 2, 0], (1, 4), &dev).unwrap();
//! let mask = Tensor::from_vec(vec![1f32, 1.0, 1.0, 0.0], (1, 4), &dev).unwrap();
//! let tags = Tensor::from_vec(vec![0u32, 1, 2, 0], (1, 4), &dev).unwrap();
//!
//! let batch = NerBatch::new(tokens, mask);
//! let loss = model.train_on_batch(&batch, &tags, 1e-3).unwrap();
//! assert!(loss.is_finite());
//! assert_eq!(model.predict(&batch).unwrap()[0].len(), 3);
//! ```

pub mod batch;
pub mod config;
pub mod crf;
pub mod encoder;
pub mod error;
pub mod features;
pub mod head;
pub mod model;
pub mod objective;
pub mod ops;

// Re-export primary API
pub use batch::NerBatch;
pub use config::{CellType, GraphParams, NerNetworkConfig, NetType};
pub use crf::{LinearChainCrf, ViterbiDecoder};
pub use error::{NamaeError, Result};
pub use model::NerNetwork;
pub use objective::Objective;
