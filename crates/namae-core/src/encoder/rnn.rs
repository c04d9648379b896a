//! Stacked bidirectional recurrent encoder.

use candle_core::{D, Tensor};
use candle_nn::{GRU, GRUConfig, LSTM, LSTMConfig, RNN, VarBuilder};

use crate::config::CellType;
use crate::error::{NamaeError, Result};
use crate::ops::{reverse_time, variational_dropout};

/// One bidirectional layer: a forward and a backward cell whose outputs are
/// concatenated along the feature axis.
enum BiCell {
    Lstm { fwd: LSTM, bwd: LSTM },
    Gru { fwd: GRU, bwd: GRU },
}

impl BiCell {
    fn new(cell_type: CellType, in_dim: usize, hidden: usize, vb: &VarBuilder) -> Result<Self> {
        match cell_type {
            CellType::Lstm => Ok(BiCell::Lstm {
                fwd: candle_nn::lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("fwd"))?,
                bwd: candle_nn::lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("bwd"))?,
            }),
            CellType::Gru => Ok(BiCell::Gru {
                fwd: candle_nn::gru(in_dim, hidden, GRUConfig::default(), vb.pp("fwd"))?,
                bwd: candle_nn::gru(in_dim, hidden, GRUConfig::default(), vb.pp("bwd"))?,
            }),
        }
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (fwd_out, bwd_out) = match self {
            BiCell::Lstm { fwd, bwd } => (
                run_lstm(fwd, xs)?,
                reverse_time(&run_lstm(bwd, &reverse_time(xs)?)?)?,
            ),
            BiCell::Gru { fwd, bwd } => (
                run_gru(fwd, xs)?,
                reverse_time(&run_gru(bwd, &reverse_time(xs)?)?)?,
            ),
        };
        Ok(Tensor::cat(&[&fwd_out, &bwd_out], D::Minus1)?)
    }
}

fn run_lstm(cell: &LSTM, xs: &Tensor) -> Result<Tensor> {
    let states = cell.seq(xs)?;
    Ok(cell.states_to_tensor(&states)?)
}

/// `GRU::states_to_tensor` flattens the time axis into `[batch, len*hidden]`,
/// so the `[batch, len, hidden]` sequence is rebuilt by stacking the per-step
/// hidden states.
fn run_gru(cell: &GRU, xs: &Tensor) -> Result<Tensor> {
    let states = cell.seq(xs)?;
    let hs: Vec<Tensor> = states.iter().map(|s| s.h().clone()).collect();
    Ok(Tensor::stack(&hs, 1)?)
}

/// One bidirectional layer per entry of `n_hidden_list`; every entry is
/// processed in order, each layer consuming the previous layer's output.
/// Layer `k` produces a `2 * n_hidden_list[k]` wide representation.
pub struct BiRnnEncoder {
    layers: Vec<BiCell>,
    intra_layer_dropout: bool,
    dropout_rate: f64,
    output_width: usize,
}

impl BiRnnEncoder {
    pub fn new(
        vb: &VarBuilder,
        in_width: usize,
        n_hidden_list: &[usize],
        cell_type: CellType,
        intra_layer_dropout: bool,
        dropout_rate: f64,
    ) -> Result<Self> {
        if n_hidden_list.is_empty() {
            return Err(NamaeError::Config(
                "recurrent encoder needs at least one hidden width".into(),
            ));
        }
        let mut layers = Vec::with_capacity(n_hidden_list.len());
        let mut width = in_width;
        for (n, &hidden) in n_hidden_list.iter().enumerate() {
            let layer_vb = vb.pp(format!("encoder.layer_{n}"));
            layers.push(BiCell::new(cell_type, width, hidden, &layer_vb)?);
            width = 2 * hidden;
        }
        Ok(Self {
            layers,
            intra_layer_dropout,
            dropout_rate,
            output_width: width,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn output_width(&self) -> usize {
        self.output_width
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut units = xs.clone();
        for (n, layer) in self.layers.iter().enumerate() {
            units = layer.forward(&units)?;
            // intra-layer dropout sits between layers, never after the last
            if self.intra_layer_dropout && n != last {
                units = variational_dropout(&units, self.dropout_rate, train)?;
            }
        }
        Ok(units)
    }
}
