//! Training engine for sparse coders
//!
//! `TrainingConfig` carries every knob; [`run`] builds the configured coder,
//! trains it with Adam and returns the trained coder with per-epoch reports.
//! There is no process-wide state: everything flows through arguments.
//!
//! Each epoch reports the loss of its LAST batch, not an epoch average.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::coder::{CoderKind, SparseCoder};
use crate::dataset::ActivationDataset;
use crate::dense::{DenseL1Coder, DEFAULT_L1_PENALTY};
use crate::error::{check_sparsity, SaeError};
use crate::learned::LearnedDict;
use crate::topk::TopKCoder;

/// Numeric precision of parameters and activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F32,
    F64,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::F64 => DType::F64,
        }
    }
}

fn default_epochs() -> usize {
    10
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_batch_size() -> usize {
    32
}

fn default_l1_penalty() -> f64 {
    DEFAULT_L1_PENALTY
}

fn default_shuffle() -> bool {
    true
}

fn default_seed() -> u64 {
    42
}

/// Configuration for a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Dimension of each activation vector
    pub d_activation: usize,
    /// Number of dictionary features (should be much larger than d_activation)
    pub n_features: usize,
    /// Active features per example for the top-k coder
    pub sparsity: usize,
    /// Which coder to train
    #[serde(default)]
    pub coder: CoderKind,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Dense coder only: weight of the per-example L1 penalty
    #[serde(default = "default_l1_penalty")]
    pub l1_penalty_code: f64,
    /// Dense coder only: weight of the per-feature L1 penalty
    #[serde(default = "default_l1_penalty")]
    pub l1_penalty_feature: f64,
    #[serde(default)]
    pub precision: Precision,
    /// Reshuffle batches every epoch
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    /// Seed for dictionary initialization and shuffling
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            d_activation: 768,
            n_features: 768 * 8,
            sparsity: 32,
            coder: CoderKind::default(),
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            l1_penalty_code: DEFAULT_L1_PENALTY,
            l1_penalty_feature: DEFAULT_L1_PENALTY,
            precision: Precision::default(),
            shuffle: default_shuffle(),
            seed: default_seed(),
        }
    }
}

impl TrainingConfig {
    /// Load config from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Reject unusable settings before any tensor is allocated.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> anyhow::Error { SaeError::config(msg).into() };

        if self.d_activation == 0 || self.n_features == 0 {
            return Err(invalid(format!(
                "d_activation ({}) and n_features ({}) must be non-zero",
                self.d_activation, self.n_features
            )));
        }
        if self.coder == CoderKind::TopK {
            check_sparsity(self.sparsity, self.n_features)?;
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.l1_penalty_code < 0.0 || self.l1_penalty_feature < 0.0 {
            return Err(invalid("L1 penalties must be non-negative".to_string()));
        }
        if self.n_features <= self.d_activation {
            warn!(
                "n_features ({}) is not larger than d_activation ({}); dictionary is not overcomplete",
                self.n_features, self.d_activation
            );
        }
        Ok(())
    }
}

/// Loss summary for one epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    /// Total loss of the epoch's last batch
    pub loss: f32,
    /// Reconstruction MSE of the epoch's last batch
    pub reconstruction_loss: f32,
    pub n_batches: usize,
}

/// A coder after training, tagged by variant.
pub enum TrainedCoder {
    TopK(TopKCoder),
    Dense(DenseL1Coder),
}

impl TrainedCoder {
    pub fn as_coder(&self) -> &dyn SparseCoder {
        match self {
            Self::TopK(c) => c,
            Self::Dense(c) => c,
        }
    }

    /// Inference artifact; only the top-k coder has one.
    pub fn to_learned_dict(&self) -> Result<Option<LearnedDict>> {
        match self {
            Self::TopK(c) => c.to_learned_dict().map(Some),
            Self::Dense(_) => Ok(None),
        }
    }
}

/// Result of [`run`]
pub struct TrainingOutcome {
    pub coder: TrainedCoder,
    pub reports: Vec<EpochReport>,
}

/// Instantiate the coder selected by `config.coder`.
pub fn build_coder(config: &TrainingConfig, device: &Device) -> Result<TrainedCoder> {
    config.validate()?;
    let dtype = config.precision.dtype();
    Ok(match config.coder {
        CoderKind::TopK => TrainedCoder::TopK(TopKCoder::new(
            config.d_activation,
            config.n_features,
            config.sparsity,
            config.seed,
            dtype,
            device,
        )?),
        CoderKind::Dense => TrainedCoder::Dense(DenseL1Coder::new(
            config.d_activation,
            config.n_features,
            config.l1_penalty_code,
            config.l1_penalty_feature,
            dtype,
            device,
        )?),
    })
}

/// Optimize `coder` over `dataset` for `config.epochs` epochs.
///
/// Per batch: fresh gradients, loss, backward pass, one Adam step.
/// Non-finite losses are reported, not caught.
pub fn train_coder<C: SparseCoder + ?Sized>(
    coder: &C,
    dataset: &ActivationDataset,
    config: &TrainingConfig,
) -> Result<Vec<EpochReport>> {
    config.validate()?;
    if dataset.d_activation() != config.d_activation {
        return Err(SaeError::shape(
            "training dataset",
            format!("(n_samples, {})", config.d_activation),
            dataset.activations().dims(),
        )
        .into());
    }
    if dataset.is_empty() {
        return Err(SaeError::config("activation dataset is empty").into());
    }

    let params = ParamsAdamW {
        lr: config.learning_rate,
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(coder.vars(), params)?;

    info!(
        "Training {} coder: {} samples, {} epochs, batch size {}, lr {}",
        coder.name(),
        dataset.len(),
        config.epochs,
        config.batch_size,
        config.learning_rate
    );

    let mut reports = Vec::with_capacity(config.epochs);
    for epoch in 0..config.epochs {
        let shuffle_seed = config
            .shuffle
            .then(|| config.seed.wrapping_add(epoch as u64));
        let batches = dataset.batches(config.batch_size, shuffle_seed)?;

        let mut last = None;
        for (i, batch) in batches.iter().enumerate() {
            let output = coder.loss(batch)?;
            optimizer.backward_step(&output.loss)?;
            debug!("epoch {epoch} batch {i}: loss {:.6}", output.diagnostics.loss);
            last = Some(output.diagnostics);
        }

        // Non-empty dataset guarantees at least one batch
        let last = last.context("epoch produced no batches")?;
        if !last.loss.is_finite() {
            warn!("Epoch {epoch}: loss is not finite ({})", last.loss);
        }
        info!("Epoch {epoch}: loss {:.6}", last.loss);

        reports.push(EpochReport {
            epoch,
            loss: last.loss,
            reconstruction_loss: last.reconstruction_loss,
            n_batches: batches.len(),
        });
    }

    Ok(reports)
}

/// Build the configured coder and train it on `dataset`.
pub fn run(
    config: &TrainingConfig,
    dataset: &ActivationDataset,
    device: &Device,
) -> Result<TrainingOutcome> {
    info!("Config: {:?}", config);
    let coder = build_coder(config, device)?;
    let reports = train_coder(coder.as_coder(), dataset, config)?;
    Ok(TrainingOutcome { coder, reports })
}
