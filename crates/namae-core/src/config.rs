//! Network configuration and the persisted topology descriptor.

use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::NamaeError;

/// Encoder architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetType {
    /// Stacked bidirectional recurrent layers.
    Rnn,
    /// Stacked same-length 1-D convolutions.
    Cnn,
}

impl FromStr for NetType {
    type Err = NamaeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rnn" => Ok(NetType::Rnn),
            "cnn" => Ok(NetType::Cnn),
            _ => Err(NamaeError::UnknownNetType(s.to_string())),
        }
    }
}

impl fmt::Display for NetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetType::Rnn => write!(f, "rnn"),
            NetType::Cnn => write!(f, "cnn"),
        }
    }
}

/// Recurrent cell flavor, used when [`NetType::Rnn`] is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Lstm,
    Gru,
}

impl FromStr for CellType {
    type Err = NamaeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lstm" => Ok(CellType::Lstm),
            "gru" => Ok(CellType::Gru),
            _ => Err(NamaeError::UnknownCellType(s.to_string())),
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellType::Lstm => write!(f, "lstm"),
            CellType::Gru => write!(f, "gru"),
        }
    }
}

/// Every option recognized by [`crate::NerNetwork::new`].
///
/// Feature toggles (`char_emb_dim`, `capitalization_dim`, `pos_features_dim`)
/// activate their input modality when `Some`; pretrained embedding matrices
/// may be injected and are trained further, otherwise the matrices are
/// learned from a random init.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NerNetworkConfig {
    /// Size of the output tag vocabulary. Required, must be positive.
    pub n_tags: usize,

    /// Token vocabulary size (ignored when `token_emb_mat` is given).
    pub token_vocab_size: usize,
    /// Width of the token embedding vectors.
    pub token_emb_dim: usize,

    /// Width of the character-level representation; `None` disables it.
    pub char_emb_dim: Option<usize>,
    /// Character vocabulary size (ignored when `char_emb_mat` is given).
    pub char_vocab_size: usize,
    /// Width of the capitalization flag vector; `None` disables it.
    pub capitalization_dim: Option<usize>,
    /// Width of the part-of-speech flag vector; `None` disables it.
    pub pos_features_dim: Option<usize>,

    /// Encoder architecture.
    pub net_type: NetType,
    /// Recurrent cell flavor (rnn only).
    pub cell_type: CellType,
    /// Request the fused recurrent execution path. Requires a CUDA device
    /// and is incompatible with `l2_reg > 0`.
    pub use_cudnn_rnn: bool,
    /// Insert an extra ReLU dense layer before the tag projection.
    pub two_dense_on_top: bool,
    /// Encoder width per layer; one encoder layer per entry.
    pub n_hidden_list: Vec<usize>,
    /// Convolution filter width (cnn only, must be odd).
    pub cnn_filter_width: usize,
    /// Filter width of the character convolution.
    pub char_filter_width: usize,
    /// Score tag sequences with a linear-chain CRF instead of independent
    /// per-token softmax.
    pub use_crf: bool,
    /// Batch-normalize convolution outputs (cnn only).
    pub use_batch_norm: bool,

    /// Apply variational dropout to the embedding features.
    pub embeddings_dropout: bool,
    /// Apply variational dropout before the output head.
    pub top_dropout: bool,
    /// Apply variational dropout between encoder layers (never after the
    /// last one).
    pub intra_layer_dropout: bool,
    /// Drop probability shared by every dropout site.
    pub dropout_rate: f64,

    /// Weight of the mean kernel L2 penalty; `0.0` disables it.
    pub l2_reg: f64,
    /// Maximum global gradient norm for the optimizer step.
    pub clip_grad_norm: f64,

    /// CUDA device index; `None` keeps the model on the CPU.
    pub gpu: Option<usize>,

    /// Pretrained token embedding matrix `[vocab, token_emb_dim]`.
    #[serde(skip)]
    pub token_emb_mat: Option<Tensor>,
    /// Pretrained character embedding matrix `[vocab, char_emb_dim]`.
    #[serde(skip)]
    pub char_emb_mat: Option<Tensor>,
}

impl Default for NerNetworkConfig {
    fn default() -> Self {
        Self {
            n_tags: 0,
            token_vocab_size: 0,
            token_emb_dim: 100,
            char_emb_dim: None,
            char_vocab_size: 0,
            capitalization_dim: None,
            pos_features_dim: None,
            net_type: NetType::Rnn,
            cell_type: CellType::Lstm,
            use_cudnn_rnn: false,
            two_dense_on_top: false,
            n_hidden_list: vec![128],
            cnn_filter_width: 7,
            char_filter_width: 3,
            use_crf: false,
            use_batch_norm: false,
            embeddings_dropout: false,
            top_dropout: false,
            intra_layer_dropout: false,
            dropout_rate: 0.5,
            l2_reg: 0.0,
            clip_grad_norm: 5.0,
            gpu: None,
            token_emb_mat: None,
            char_emb_mat: None,
        }
    }
}

/// The hyperparameters that determine network topology.
///
/// Persisted next to the trained weights; a checkpoint may only be restored
/// into a network whose descriptor is identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphParams {
    pub n_filters: Vec<usize>,
    pub filter_width: usize,
    pub token_embeddings_dim: usize,
    pub char_embeddings_dim: Option<usize>,
    pub use_char_embeddings: bool,
    pub use_batch_norm: bool,
    pub use_crf: bool,
    pub net_type: NetType,
    pub char_filter_width: usize,
    pub cell_type: CellType,
}

impl From<&NerNetworkConfig> for GraphParams {
    fn from(cfg: &NerNetworkConfig) -> Self {
        Self {
            n_filters: cfg.n_hidden_list.clone(),
            filter_width: cfg.cnn_filter_width,
            token_embeddings_dim: cfg.token_emb_dim,
            char_embeddings_dim: cfg.char_emb_dim,
            use_char_embeddings: cfg.char_emb_dim.is_some(),
            use_batch_norm: cfg.use_batch_norm,
            use_crf: cfg.use_crf,
            net_type: cfg.net_type,
            char_filter_width: cfg.char_filter_width,
            cell_type: cfg.cell_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_net_type_is_rejected() {
        let err = "transformer".parse::<NetType>().unwrap_err();
        assert!(matches!(err, NamaeError::UnknownNetType(_)));
        assert!("RNN".parse::<NetType>().is_ok());
    }

    #[test]
    fn unknown_cell_type_is_rejected() {
        let err = "elman".parse::<CellType>().unwrap_err();
        assert!(matches!(err, NamaeError::UnknownCellType(_)));
        assert_eq!("gru".parse::<CellType>().unwrap(), CellType::Gru);
    }

    #[test]
    fn graph_params_round_trip() {
        let cfg = NerNetworkConfig {
            n_tags: 5,
            char_emb_dim: Some(16),
            use_crf: true,
            n_hidden_list: vec![64, 32],
            ..Default::default()
        };
        let params = GraphParams::from(&cfg);
        let json = serde_json::to_string(&params).unwrap();
        let restored: GraphParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, restored);
        assert!(restored.use_char_embeddings);
        assert_eq!(restored.n_filters, vec![64, 32]);
    }
}
