//! Tensor helpers shared by the feature builders, encoders and objectives.

use candle_core::backprop::GradStore;
use candle_core::{D, DType, Device, Tensor, Var};
use candle_nn::VarMap;

use crate::error::Result;

/// Dropout with one Bernoulli mask per example and sequence position,
/// broadcast across the embedding axis. Identity in eval mode.
///
/// `rate` is the probability of dropping a position; surviving positions are
/// rescaled by `1 / (1 - rate)` so activations keep their expected magnitude.
pub fn variational_dropout(xs: &Tensor, rate: f64, train: bool) -> Result<Tensor> {
    if !train || rate <= 0.0 {
        return Ok(xs.clone());
    }
    let (batch, len, _) = xs.dims3()?;
    let keep = 1.0 - rate;
    let uniform = Tensor::rand(0f32, 1f32, (batch, len, 1), xs.device())?;
    let threshold = Tensor::full(rate as f32, (batch, len, 1), xs.device())?;
    let mask = uniform
        .ge(&threshold)?
        .to_dtype(DType::F32)?
        .affine(1.0 / keep, 0.0)?;
    Ok(xs.broadcast_mul(&mask)?)
}

/// One-hot encode an integer tensor over `depth` classes, appending the class
/// axis last. Output is f32.
pub fn one_hot(indices: &Tensor, depth: usize) -> Result<Tensor> {
    let classes = Tensor::arange(0u32, depth as u32, indices.device())?;
    let hot = indices
        .to_dtype(DType::U32)?
        .unsqueeze(D::Minus1)?
        .broadcast_eq(&classes)?
        .to_dtype(DType::F32)?;
    Ok(hot)
}

/// Numerically stable `log(sum(exp(xs)))` along `dim`, removing that axis.
pub fn log_sum_exp(xs: &Tensor, dim: usize) -> Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let sum = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?;
    Ok(sum.log()?.add(&max)?.squeeze(dim)?)
}

/// Reverse a `[batch, len, ..]` tensor along the time axis.
pub fn reverse_time(xs: &Tensor) -> Result<Tensor> {
    let len = xs.dim(1)?;
    let indices: Vec<u32> = (0..len as u32).rev().collect();
    let indices = Tensor::from_vec(indices, len, xs.device())?;
    Ok(xs.index_select(&indices, 1)?)
}

/// Draw an `[out_dim, in_dim]` matrix with orthonormal rows or columns
/// (whichever dimension is smaller), from a Gaussian via modified
/// Gram-Schmidt on the host.
pub fn orthogonal(out_dim: usize, in_dim: usize, device: &Device) -> Result<Tensor> {
    let rows = out_dim.max(in_dim);
    let cols = out_dim.min(in_dim);
    let gauss = Tensor::randn(0f32, 1f32, (rows, cols), device)?.to_vec2::<f32>()?;

    // Orthonormalize the columns of the tall matrix.
    let mut basis: Vec<Vec<f32>> = Vec::with_capacity(cols);
    for j in 0..cols {
        let mut v: Vec<f32> = (0..rows).map(|i| gauss[i][j]).collect();
        for prev in &basis {
            let dot: f32 = prev.iter().zip(&v).map(|(p, x)| p * x).sum();
            for (x, p) in v.iter_mut().zip(prev) {
                *x -= dot * p;
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        basis.push(v);
    }

    let mut flat = vec![0f32; rows * cols];
    for (j, column) in basis.iter().enumerate() {
        for (i, x) in column.iter().enumerate() {
            flat[i * cols + j] = *x;
        }
    }
    let q = Tensor::from_vec(flat, (rows, cols), device)?;
    if out_dim >= in_dim { Ok(q) } else { Ok(q.t()?) }
}

/// Insert a pre-built tensor into the var map as a trainable variable and
/// return the tracked tensor handle.
pub fn register_var(varmap: &VarMap, name: &str, value: Tensor) -> Result<Tensor> {
    let var = Var::from_tensor(&value)?;
    let tensor = var.as_tensor().clone();
    varmap
        .data()
        .lock()
        .unwrap()
        .insert(name.to_string(), var);
    Ok(tensor)
}

/// Scale every gradient so the global gradient norm does not exceed
/// `max_norm`. Returns the pre-clipping norm.
pub fn clip_gradients(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let mut sum_sq = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            sum_sq += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = sum_sq.sqrt();
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                let _ = grads.insert(var.as_tensor(), grad.affine(scale, 0.0)?);
            }
        }
    }
    Ok(norm)
}
