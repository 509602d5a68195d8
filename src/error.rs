//! Error kinds raised by the sparse coding core
//!
//! Everything in the crate returns `anyhow::Result`; these variants are
//! wrapped in the anyhow error so callers can tell them apart with
//! `err.downcast_ref::<SaeError>()`.

use thiserror::Error;

/// Typed failures of the sparse coding core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaeError {
    /// Input tensor shape does not match what the dictionary expects.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    Shape {
        /// Operation that rejected the input
        context: &'static str,
        /// Human-readable expected shape
        expected: String,
        /// Shape actually received
        actual: String,
    },

    /// Coder or training parameters are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl SaeError {
    pub(crate) fn shape(
        context: &'static str,
        expected: impl Into<String>,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::Shape {
            context,
            expected: expected.into(),
            actual: format!("{actual:?}"),
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

/// Check that `k` is a usable sparsity for a dictionary with `n_features` rows.
pub(crate) fn check_sparsity(k: usize, n_features: usize) -> anyhow::Result<()> {
    if k == 0 {
        return Err(SaeError::config("sparsity k must be at least 1").into());
    }
    if k > n_features {
        return Err(SaeError::config(format!(
            "sparsity k={k} exceeds n_features={n_features}"
        ))
        .into());
    }
    Ok(())
}
