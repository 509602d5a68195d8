//! Shared interface for the sparse coder variants
//!
//! Each variant owns its trainable parameters and knows how to encode a
//! batch and compute its own training loss. The training engine only talks
//! to this trait; the variant is chosen by [`CoderKind`] in the config.

use anyhow::Result;
use candle_core::{Tensor, Var};
use serde::{Deserialize, Serialize};

/// Which sparse coder to train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoderKind {
    /// Normalized dictionary with hard top-k selection
    #[default]
    TopK,
    /// Dense linear encoder/decoder with L1 penalties
    Dense,
}

impl std::fmt::Display for CoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TopK => write!(f, "topk"),
            Self::Dense => write!(f, "dense"),
        }
    }
}

/// Loss values and the code matrix from one loss evaluation.
///
/// Detached from the autograd graph; for inspection only.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    /// Total scalar loss
    pub loss: f32,
    /// Mean squared reconstruction error
    pub reconstruction_loss: f32,
    /// Weighted per-example L1 penalty (0 for top-k)
    pub code_penalty: f32,
    /// Weighted per-feature L1 penalty (0 for top-k)
    pub feature_penalty: f32,
    /// Code matrix `[batch, n_features]`
    pub code: Tensor,
}

/// Differentiable loss plus its diagnostics.
#[derive(Debug)]
pub struct LossOutput {
    /// Scalar loss tensor still attached to the autograd graph
    pub loss: Tensor,
    pub diagnostics: Diagnostics,
}

/// A trainable sparse coder.
pub trait SparseCoder {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Trainable parameters handed to the optimizer.
    fn vars(&self) -> Vec<Var>;

    /// Encode `[batch, d_activation]` into `[batch, n_features]`.
    fn encode(&self, batch: &Tensor) -> Result<Tensor>;

    /// Reconstruction loss plus any sparsity penalties for one batch.
    fn loss(&self, batch: &Tensor) -> Result<LossOutput>;
}
