//! # Sequence Encoders
//!
//! Two interchangeable strategies turn the aggregated per-token features
//! into contextualized representations: stacked bidirectional recurrence or
//! stacked same-length convolutions. The variant is fixed at construction.

pub mod cnn;
pub mod rnn;

use candle_core::Tensor;

use crate::error::Result;

pub use cnn::CnnEncoder;
pub use rnn::BiRnnEncoder;

/// The configured encoder strategy.
pub enum Encoder {
    Rnn(BiRnnEncoder),
    Cnn(CnnEncoder),
}

impl Encoder {
    /// Contextualize a `[batch, len, in_width]` feature sequence.
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Encoder::Rnn(rnn) => rnn.forward(xs, train),
            Encoder::Cnn(cnn) => cnn.forward(xs, train),
        }
    }

    /// Width of the produced feature axis.
    pub fn output_width(&self) -> usize {
        match self {
            Encoder::Rnn(rnn) => rnn.output_width(),
            Encoder::Cnn(cnn) => cnn.output_width(),
        }
    }
}
