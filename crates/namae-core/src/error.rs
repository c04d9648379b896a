use thiserror::Error;

/// Errors that can occur while building or running the tagging network.
#[derive(Debug, Error)]
pub enum NamaeError {
    /// The configuration is invalid (empty hidden list, zero tags, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The network type string is not one of the supported architectures.
    #[error("unrecognized net type {0:?}: expected \"rnn\" or \"cnn\"")]
    UnknownNetType(String),

    /// The recurrent cell type string is not supported.
    #[error("unrecognized cell type {0:?}: expected \"lstm\" or \"gru\"")]
    UnknownCellType(String),

    /// Fused RNN layers were requested without a CUDA device.
    #[error("fused RNN layers require a GPU along with the CUDA runtime")]
    GpuRequired,

    /// The requested GPU index could not be opened.
    #[error("GPU {0} is not available")]
    GpuUnavailable(usize),

    /// Fused RNN layers do not run the kernel L2 penalty terms.
    #[error("fused RNN layers are not l2 regularizable")]
    FusedRnnL2,

    /// The batch is missing a tensor an active feature producer needs.
    #[error("batch is missing the {0} feature tensor")]
    MissingFeature(&'static str),

    /// Persisted topology descriptors differ from the constructed network.
    #[error("saved graph params do not match the constructed network: {0}")]
    TopologyMismatch(String),

    /// Tensor engine error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Filesystem error while persisting or restoring the model.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error for the topology descriptor.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for namae operations.
pub type Result<T> = std::result::Result<T, NamaeError>;
