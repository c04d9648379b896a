//! Train a sequence-tagging model from a BIO-format dataset.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use namae_core::{CellType, NerNetwork, NerNetworkConfig, NetType};
use namae_trainer::{
    load_bio_dataset, synthetic_corpus, CharVocab, LabelVocab, TrainOptions, Trainer, Vocab,
};

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train a namae sequence-tagging model")]
struct Cli {
    /// BIO-format training data (token<TAB>label per line); a synthetic
    /// corpus is used when omitted
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Output directory for the trained model
    #[arg(short, long, default_value = "models/namae")]
    out: PathBuf,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 16)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    lr: f64,

    /// Encoder type: rnn or cnn
    #[arg(long, default_value = "rnn")]
    net: String,

    /// Recurrent cell: lstm or gru
    #[arg(long, default_value = "lstm")]
    cell: String,

    /// Hidden sizes, one per encoder layer
    #[arg(long, value_delimiter = ',', default_value = "64")]
    hidden: Vec<usize>,

    #[arg(long, default_value_t = 64)]
    token_dim: usize,

    /// Character embedding dimensionality; enables the char CNN when set
    #[arg(long)]
    char_dim: Option<usize>,

    /// Use a CRF output layer instead of independent softmax
    #[arg(long)]
    crf: bool,

    #[arg(long, default_value_t = 0.5)]
    dropout: f64,

    #[arg(long, default_value_t = 0.0)]
    l2: f64,

    /// Run the encoder on GPU 0
    #[arg(long)]
    gpu: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let examples = match &cli.data {
        Some(path) => load_bio_dataset(path)
            .with_context(|| format!("reading dataset {}", path.display()))?,
        None => {
            tracing::warn!("no dataset given, training on a synthetic corpus");
            synthetic_corpus(256, 42)
        }
    };
    tracing::info!(examples = examples.len(), "dataset loaded");

    let vocab = Vocab::fit(&examples);
    let labels = LabelVocab::fit(&examples);
    let char_vocab = cli.char_dim.map(|_| CharVocab);

    let config = NerNetworkConfig {
        n_tags: labels.size(),
        token_vocab_size: vocab.size(),
        token_emb_dim: cli.token_dim,
        char_vocab_size: char_vocab.as_ref().map(|v| v.size()).unwrap_or(0),
        char_emb_dim: cli.char_dim,
        net_type: cli.net.parse::<NetType>()?,
        cell_type: cli.cell.parse::<CellType>()?,
        n_hidden_list: cli.hidden.clone(),
        use_crf: cli.crf,
        dropout_rate: cli.dropout,
        embeddings_dropout: cli.dropout > 0.0,
        l2_reg: cli.l2,
        gpu: cli.gpu.then_some(0),
        ..Default::default()
    };

    let model = NerNetwork::new(config).context("building model")?;
    let mut trainer = Trainer::new(model, vocab, labels, char_vocab);

    let options = TrainOptions {
        epochs: cli.epochs,
        batch_size: cli.batch_size,
        learning_rate: cli.lr,
    };
    trainer.fit(&examples, &options)?;

    std::fs::create_dir_all(&cli.out)?;
    trainer.save(&cli.out)?;
    tracing::info!(out = %cli.out.display(), "model saved");

    Ok(())
}
