//! Stacked 1-D convolutional encoder with same-length padding.

use candle_core::Tensor;
use candle_nn::{BatchNorm, BatchNormConfig, Conv1d, Conv1dConfig, Module, ModuleT, VarBuilder};

use crate::error::Result;

struct ConvLayer {
    conv: Conv1d,
    batch_norm: Option<BatchNorm>,
}

/// One convolution per entry of `n_hidden_list`, each preserving the
/// temporal length (odd filter width, symmetric padding), with optional
/// batch normalization keyed on the train/eval flag and a ReLU.
pub struct CnnEncoder {
    layers: Vec<ConvLayer>,
    output_width: usize,
}

impl CnnEncoder {
    pub fn new(
        vb: &VarBuilder,
        in_width: usize,
        n_hidden_list: &[usize],
        filter_width: usize,
        use_batch_norm: bool,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(n_hidden_list.len());
        let mut width = in_width;
        for (n, &hidden) in n_hidden_list.iter().enumerate() {
            let conv_cfg = Conv1dConfig {
                padding: filter_width / 2,
                ..Default::default()
            };
            let conv = candle_nn::conv1d(
                width,
                hidden,
                filter_width,
                conv_cfg,
                vb.pp(format!("encoder.conv_{n}")),
            )?;
            let batch_norm = if use_batch_norm {
                Some(candle_nn::batch_norm(
                    hidden,
                    BatchNormConfig::default(),
                    vb.pp(format!("encoder.bn_{n}")),
                )?)
            } else {
                None
            };
            layers.push(ConvLayer { conv, batch_norm });
            width = hidden;
        }
        Ok(Self {
            layers,
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
        // conv1d wants [batch, channels, len]
        let mut units = xs.transpose(1, 2)?;
        for layer in &self.layers {
            units = layer.conv.forward(&units)?;
            if let Some(bn) = &layer.batch_norm {
                units = bn.forward_t(&units, train)?;
            }
            units = units.relu()?;
        }
        Ok(units.transpose(1, 2)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn convolution_stack_preserves_sequence_length() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = CnnEncoder::new(&vb, 8, &[16, 12], 3, false).unwrap();
        let xs = Tensor::randn(0f32, 1f32, (2, 9, 8), &dev).unwrap();
        let out = enc.forward(&xs, false).unwrap();
        assert_eq!(out.dims(), &[2, 9, 12]);
        assert_eq!(enc.num_layers(), 2);
        assert_eq!(enc.output_width(), 12);
    }

    #[test]
    fn batch_norm_path_keeps_the_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = CnnEncoder::new(&vb, 4, &[6], 5, true).unwrap();
        let xs = Tensor::randn(0f32, 1f32, (3, 7, 4), &dev).unwrap();
        let out = enc.forward(&xs, true).unwrap();
        assert_eq!(out.dims(), &[3, 7, 6]);
    }
}
