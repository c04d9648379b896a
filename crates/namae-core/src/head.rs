//! Output head: optional extra dense layer, then the tag-logit projection.

use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarMap};

use crate::error::Result;
use crate::ops::{orthogonal, register_var, variational_dropout};

/// Projects encoder output to `[batch, len, n_tags]` logits. Dense kernels
/// use orthogonal initialization and contribute an L2 penalty term each.
pub struct OutputHead {
    hidden: Option<Linear>,
    projection: Linear,
    top_dropout: bool,
    dropout_rate: f64,
}

impl OutputHead {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        varmap: &VarMap,
        device: &Device,
        in_width: usize,
        n_hidden: usize,
        n_tags: usize,
        two_dense_on_top: bool,
        top_dropout: bool,
        dropout_rate: f64,
        l2_kernels: &mut Vec<Tensor>,
    ) -> Result<Self> {
        let (hidden, projection_in) = if two_dense_on_top {
            let dense = ortho_dense(varmap, device, "head.hidden", in_width, n_hidden, l2_kernels)?;
            (Some(dense), n_hidden)
        } else {
            (None, in_width)
        };
        let projection = ortho_dense(
            varmap,
            device,
            "head.projection",
            projection_in,
            n_tags,
            l2_kernels,
        )?;
        Ok(Self {
            hidden,
            projection,
            top_dropout,
            dropout_rate,
        })
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut units = if self.top_dropout {
            variational_dropout(xs, self.dropout_rate, train)?
        } else {
            xs.clone()
        };
        if let Some(hidden) = &self.hidden {
            units = hidden.forward(&units)?.relu()?;
        }
        Ok(self.projection.forward(&units)?)
    }
}

/// Dense layer with an orthogonally initialized kernel; the kernel is added
/// to the collected L2 penalty terms.
fn ortho_dense(
    varmap: &VarMap,
    device: &Device,
    name: &str,
    in_dim: usize,
    out_dim: usize,
    l2_kernels: &mut Vec<Tensor>,
) -> Result<Linear> {
    let weight = register_var(
        varmap,
        &format!("{name}.weight"),
        orthogonal(out_dim, in_dim, device)?,
    )?;
    let bias = register_var(
        varmap,
        &format!("{name}.bias"),
        Tensor::zeros(out_dim, DType::F32, device)?,
    )?;
    l2_kernels.push(weight.clone());
    Ok(Linear::new(weight, Some(bias)))
}
