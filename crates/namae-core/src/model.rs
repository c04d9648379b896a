//! # Sequence-Tagging Network
//!
//! Assembles the configured feature builders, encoder, output head and
//! objective into one model, and drives batch-level training and inference.
//! Parameters live in a single `VarMap`; save/load persists them together
//! with the topology descriptor and refuses mismatched topologies.

use std::fs;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};

use crate::batch::NerBatch;
use crate::config::{GraphParams, NerNetworkConfig, NetType};
use crate::encoder::{BiRnnEncoder, CnnEncoder, Encoder};
use crate::error::{NamaeError, Result};
use crate::features::{
    CapitalizationFeature, CharCnnEmbedder, FeatureProducer, PosFeature, TokenEmbedder, aggregate,
};
use crate::head::OutputHead;
use crate::objective::Objective;
use crate::ops::clip_gradients;

const GRAPH_PARAMS_FILE: &str = "graph_params.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// Neural sequence tagger mapping token sequences to tag sequences.
///
/// The computation context is fixed at construction: one device, one
/// parameter set, synchronous calls. Concurrent training and inference on
/// the same instance must be serialized by the caller.
pub struct NerNetwork {
    config: NerNetworkConfig,
    graph_params: GraphParams,
    device: Device,
    varmap: VarMap,
    vars: Vec<Var>,
    producers: Vec<Box<dyn FeatureProducer>>,
    encoder: Encoder,
    head: OutputHead,
    objective: Objective,
    l2_kernels: Vec<Tensor>,
    optimizer: AdamW,
    input_width: usize,
}

impl NerNetwork {
    pub fn new(config: NerNetworkConfig) -> Result<Self> {
        validate(&config)?;

        let device = match config.gpu {
            Some(index) => {
                Device::new_cuda(index).map_err(|_| NamaeError::GpuUnavailable(index))?
            }
            None => Device::Cpu,
        };
        if config.use_cudnn_rnn && !device.is_cuda() {
            return Err(NamaeError::GpuRequired);
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        // ---- input features --------------------------------------------
        let mut producers: Vec<Box<dyn FeatureProducer>> = Vec::new();
        let token_vocab = match &config.token_emb_mat {
            Some(mat) => mat.dims2()?.0,
            None => config.token_vocab_size,
        };
        producers.push(Box::new(TokenEmbedder::new(
            &varmap,
            &vb,
            config.token_emb_mat.as_ref(),
            token_vocab,
            config.token_emb_dim,
            config.embeddings_dropout,
            config.dropout_rate,
        )?));
        if let Some(char_dim) = config.char_emb_dim {
            let char_vocab = match &config.char_emb_mat {
                Some(mat) => mat.dims2()?.0,
                None => config.char_vocab_size,
            };
            producers.push(Box::new(CharCnnEmbedder::new(
                &varmap,
                &vb,
                config.char_emb_mat.as_ref(),
                char_vocab,
                char_dim,
                config.char_filter_width,
                config.embeddings_dropout,
                config.dropout_rate,
            )?));
        }
        if let Some(cap_dim) = config.capitalization_dim {
            producers.push(Box::new(CapitalizationFeature::new(cap_dim)));
        }
        if let Some(pos_dim) = config.pos_features_dim {
            producers.push(Box::new(PosFeature::new(pos_dim)));
        }
        let input_width: usize = producers.iter().map(|p| p.width()).sum();

        // ---- encoder ----------------------------------------------------
        let encoder = match config.net_type {
            NetType::Rnn => {
                if config.use_cudnn_rnn {
                    // the fused path shares the bidirectional stack; only the
                    // device and regularization contracts differ
                    tracing::debug!("fused recurrent path requested");
                }
                Encoder::Rnn(BiRnnEncoder::new(
                    &vb,
                    input_width,
                    &config.n_hidden_list,
                    config.cell_type,
                    config.intra_layer_dropout,
                    config.dropout_rate,
                )?)
            }
            NetType::Cnn => Encoder::Cnn(CnnEncoder::new(
                &vb,
                input_width,
                &config.n_hidden_list,
                config.cnn_filter_width,
                config.use_batch_norm,
            )?),
        };

        // ---- head and objective ----------------------------------------
        let mut l2_kernels = Vec::new();
        let last_hidden = *config
            .n_hidden_list
            .last()
            .expect("validated as non-empty");
        let head = OutputHead::new(
            &varmap,
            &device,
            encoder.output_width(),
            last_hidden,
            config.n_tags,
            config.two_dense_on_top,
            config.top_dropout,
            config.dropout_rate,
            &mut l2_kernels,
        )?;
        let objective = Objective::new(&vb, config.n_tags, config.use_crf)?;

        let vars = varmap.all_vars();
        let optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: 1e-3,
                ..Default::default()
            },
        )?;

        let graph_params = GraphParams::from(&config);
        tracing::debug!(
            input_width,
            encoder_width = encoder.output_width(),
            n_tags = config.n_tags,
            net_type = %config.net_type,
            "built tagging network"
        );

        Ok(Self {
            config,
            graph_params,
            device,
            varmap,
            vars,
            producers,
            encoder,
            head,
            objective,
            l2_kernels,
            optimizer,
            input_width,
        })
    }

    /// Width of the aggregated per-token input representation.
    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn config(&self) -> &NerNetworkConfig {
        &self.config
    }

    pub fn graph_params(&self) -> &GraphParams {
        &self.graph_params
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Tag logits for a batch, `[batch, len, n_tags]`.
    fn forward(&self, batch: &NerBatch, train: bool) -> Result<Tensor> {
        let features = aggregate(&self.producers, batch, train)?;
        let units = self.encoder.forward(&features, train)?;
        self.head.forward(&units, train)
    }

    /// Run one optimization step on a padded batch and return the scalar
    /// objective loss (before the L2 term).
    pub fn train_on_batch(
        &mut self,
        batch: &NerBatch,
        tags: &Tensor,
        learning_rate: f64,
    ) -> Result<f32> {
        let logits = self.forward(batch, true)?;
        let base = self.objective.loss(&logits, tags, &batch.mask)?;

        let total = if self.config.l2_reg > 0.0 && !self.l2_kernels.is_empty() {
            let mut acc = Tensor::zeros((), DType::F32, &self.device)?;
            for kernel in &self.l2_kernels {
                acc = acc.add(&kernel.sqr()?.sum_all()?.affine(0.5, 0.0)?)?;
            }
            let mean = acc.affine(1.0 / self.l2_kernels.len() as f64, 0.0)?;
            base.add(&mean.affine(self.config.l2_reg, 0.0)?)?
        } else {
            base.clone()
        };

        let mut grads = total.backward()?;
        clip_gradients(&self.vars, &mut grads, self.config.clip_grad_norm)?;
        self.optimizer.set_learning_rate(learning_rate);
        self.optimizer.step(&grads)?;

        Ok(base.to_scalar::<f32>()?)
    }

    /// Predicted tag indices per example, truncated to true lengths.
    pub fn predict(&self, batch: &NerBatch) -> Result<Vec<Vec<u32>>> {
        let logits = self.forward(batch, false)?;
        let lengths = batch.sequence_lengths()?;
        self.objective.decode(&logits, &lengths)
    }

    /// Persist all learned parameters plus the topology descriptor.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let file = fs::File::create(dir.join(GRAPH_PARAMS_FILE))?;
        serde_json::to_writer_pretty(file, &self.graph_params)?;
        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        tracing::info!(path = %dir.display(), "saved model");
        Ok(())
    }

    /// Restore parameters saved by [`NerNetwork::save`]. Fails without
    /// touching any weight when the persisted topology descriptor differs
    /// from this network's.
    pub fn load<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let file = fs::File::open(dir.join(GRAPH_PARAMS_FILE))?;
        let saved: GraphParams = serde_json::from_reader(file)?;
        if saved != self.graph_params {
            return Err(NamaeError::TopologyMismatch(format!(
                "saved {saved:?}, constructed {:?}",
                self.graph_params
            )));
        }
        self.varmap.load(dir.join(WEIGHTS_FILE))?;
        tracing::info!(path = %dir.display(), "restored model");
        Ok(())
    }
}

fn validate(cfg: &NerNetworkConfig) -> Result<()> {
    if cfg.n_tags == 0 {
        return Err(NamaeError::Config("n_tags must be positive".into()));
    }
    if cfg.n_hidden_list.is_empty() || cfg.n_hidden_list.iter().any(|&h| h == 0) {
        return Err(NamaeError::Config(
            "n_hidden_list must be a non-empty list of positive widths".into(),
        ));
    }
    if !(0.0..1.0).contains(&cfg.dropout_rate) {
        return Err(NamaeError::Config(format!(
            "dropout_rate {} must lie in [0, 1)",
            cfg.dropout_rate
        )));
    }
    if cfg.l2_reg < 0.0 {
        return Err(NamaeError::Config("l2_reg must be non-negative".into()));
    }
    if cfg.clip_grad_norm <= 0.0 {
        return Err(NamaeError::Config("clip_grad_norm must be positive".into()));
    }
    if cfg.use_cudnn_rnn && cfg.l2_reg > 0.0 {
        return Err(NamaeError::FusedRnnL2);
    }
    if cfg.net_type == NetType::Cnn && cfg.cnn_filter_width % 2 == 0 {
        return Err(NamaeError::Config(format!(
            "cnn_filter_width {} must be odd to preserve sequence length",
            cfg.cnn_filter_width
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CellType;

    fn base_config() -> NerNetworkConfig {
        NerNetworkConfig {
            n_tags: 3,
            token_vocab_size: 12,
            token_emb_dim: 8,
            n_hidden_list: vec![8],
            ..Default::default()
        }
    }

    fn toy_batch(dev: &Device) -> (NerBatch, Tensor) {
        let tokens = Tensor::from_vec(vec![1u32, 2, 3, 0, 4, 5, 0, 0], (2, 4), dev).unwrap();
        let mask = Tensor::from_vec(
            vec![1f32, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0],
            (2, 4),
            dev,
        )
        .unwrap();
        let tags = Tensor::from_vec(vec![0u32, 1, 2, 0, 2, 1, 0, 0], (2, 4), dev).unwrap();
        (NerBatch::new(tokens, mask), tags)
    }

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("namae-{tag}-{}", std::process::id()))
    }

    #[test]
    fn input_width_equals_token_dim_when_toggles_are_off() {
        let model = NerNetwork::new(base_config()).unwrap();
        assert_eq!(model.input_width(), 8);
    }

    #[test]
    fn predict_returns_true_lengths() {
        // batch_size=2, L=4, n_tags=3, use_crf=false, lengths 3 and 2
        let model = NerNetwork::new(base_config()).unwrap();
        let (batch, _) = toy_batch(model.device());
        let preds = model.predict(&batch).unwrap();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0].len(), 3);
        assert_eq!(preds[1].len(), 2);
        assert!(preds.iter().flatten().all(|&t| t < 3));
    }

    #[test]
    fn crf_loss_is_non_negative_and_decreases() {
        let config = NerNetworkConfig {
            use_crf: true,
            ..base_config()
        };
        let mut model = NerNetwork::new(config).unwrap();
        let (batch, tags) = toy_batch(&Device::Cpu);

        let mut losses = Vec::new();
        for _ in 0..30 {
            let loss = model.train_on_batch(&batch, &tags, 0.05).unwrap();
            assert!(loss >= -1e-4, "nll went negative: {loss}");
            losses.push(loss);
        }
        let head: f32 = losses[..5].iter().sum::<f32>() / 5.0;
        let tail: f32 = losses[losses.len() - 5..].iter().sum::<f32>() / 5.0;
        assert!(
            tail < head,
            "loss did not decrease: first {head}, last {tail}"
        );
    }

    #[test]
    fn softmax_training_also_converges_on_gold_tags() {
        let mut model = NerNetwork::new(base_config()).unwrap();
        let (batch, tags) = toy_batch(&Device::Cpu);
        for _ in 0..60 {
            model.train_on_batch(&batch, &tags, 0.05).unwrap();
        }
        let preds = model.predict(&batch).unwrap();
        assert_eq!(preds[0], vec![0, 1, 2]);
        assert_eq!(preds[1], vec![2, 1]);
    }

    #[test]
    fn full_feature_stack_trains_and_predicts() {
        let config = NerNetworkConfig {
            n_tags: 4,
            token_vocab_size: 20,
            token_emb_dim: 10,
            char_emb_dim: Some(6),
            char_vocab_size: 30,
            capitalization_dim: Some(3),
            pos_features_dim: Some(5),
            net_type: NetType::Cnn,
            n_hidden_list: vec![12, 8],
            cnn_filter_width: 3,
            use_batch_norm: true,
            two_dense_on_top: true,
            embeddings_dropout: true,
            top_dropout: true,
            use_crf: true,
            l2_reg: 0.01,
            ..Default::default()
        };
        let mut model = NerNetwork::new(config).unwrap();
        assert_eq!(model.input_width(), 10 + 6 + 3 + 5);

        let dev = Device::Cpu;
        let (mut batch, tags) = toy_batch(&dev);
        batch.char_ids = Some(Tensor::ones((2, 4, 5), DType::U32, &dev).unwrap());
        batch.capitalization = Some(Tensor::zeros((2, 4, 3), DType::F32, &dev).unwrap());
        batch.pos = Some(Tensor::zeros((2, 4, 5), DType::F32, &dev).unwrap());

        let loss = model.train_on_batch(&batch, &tags, 0.01).unwrap();
        assert!(loss.is_finite());
        let preds = model.predict(&batch).unwrap();
        assert_eq!(preds[0].len(), 3);
        assert_eq!(preds[1].len(), 2);
    }

    #[test]
    fn save_load_round_trip_reproduces_predictions() {
        let dir = temp_dir("round-trip");
        let model = NerNetwork::new(base_config()).unwrap();
        let (batch, _) = toy_batch(model.device());
        let expected = model.predict(&batch).unwrap();
        model.save(&dir).unwrap();

        // a freshly initialized network disagrees until weights are restored
        let mut restored = NerNetwork::new(base_config()).unwrap();
        restored.load(&dir).unwrap();
        assert_eq!(restored.predict(&batch).unwrap(), expected);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_rejects_a_differing_topology() {
        let dir = temp_dir("topology");
        let model = NerNetwork::new(base_config()).unwrap();
        model.save(&dir).unwrap();

        let other = NerNetworkConfig {
            n_hidden_list: vec![8, 8],
            ..base_config()
        };
        let mut other = NerNetwork::new(other).unwrap();
        let err = other.load(&dir).unwrap_err();
        assert!(matches!(err, NamaeError::TopologyMismatch(_)));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn fused_rnn_with_l2_fails_before_any_tensor_work() {
        let config = NerNetworkConfig {
            use_cudnn_rnn: true,
            l2_reg: 0.5,
            ..base_config()
        };
        assert!(matches!(
            NerNetwork::new(config),
            Err(NamaeError::FusedRnnL2)
        ));
    }

    #[test]
    fn fused_rnn_requires_a_gpu() {
        let config = NerNetworkConfig {
            use_cudnn_rnn: true,
            ..base_config()
        };
        assert!(matches!(
            NerNetwork::new(config),
            Err(NamaeError::GpuRequired)
        ));
    }

    #[test]
    fn even_cnn_filter_width_is_rejected() {
        let config = NerNetworkConfig {
            net_type: NetType::Cnn,
            cnn_filter_width: 4,
            ..base_config()
        };
        assert!(matches!(
            NerNetwork::new(config),
            Err(NamaeError::Config(_))
        ));
    }

    #[test]
    fn gru_encoder_builds_and_predicts() {
        let config = NerNetworkConfig {
            cell_type: CellType::Gru,
            n_hidden_list: vec![6, 4],
            ..base_config()
        };
        let model = NerNetwork::new(config).unwrap();
        let (batch, _) = toy_batch(model.device());
        let preds = model.predict(&batch).unwrap();
        assert_eq!(preds[0].len(), 3);
    }
}
