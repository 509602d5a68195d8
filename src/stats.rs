//! Feature activation statistics
//!
//! Accumulates how often each dictionary feature fires across code
//! matrices, to spot dead features and measure realized sparsity.

use anyhow::Result;
use candle_core::{DType, Tensor};
use serde::Serialize;

use crate::coder::SparseCoder;
use crate::dataset::ActivationDataset;
use crate::error::SaeError;

/// Running per-feature firing counts.
#[derive(Debug, Clone)]
pub struct FeatureStats {
    fire_counts: Vec<u64>,
    n_examples: u64,
    total_active: u64,
}

/// Serializable summary of [`FeatureStats`].
#[derive(Debug, Clone, Serialize)]
pub struct FeatureSummary {
    pub n_features: usize,
    pub n_examples: u64,
    /// Mean number of active features per example
    pub mean_l0: f64,
    /// Features that never fired
    pub dead_features: usize,
    /// Firing frequency per feature, in `[0, 1]`
    pub frequencies: Vec<f64>,
}

impl FeatureStats {
    pub fn new(n_features: usize) -> Self {
        Self {
            fire_counts: vec![0; n_features],
            n_examples: 0,
            total_active: 0,
        }
    }

    /// Encode the whole dataset with `coder` and count firings.
    pub fn collect<C: SparseCoder + ?Sized>(
        coder: &C,
        n_features: usize,
        dataset: &ActivationDataset,
        batch_size: usize,
    ) -> Result<Self> {
        let mut stats = Self::new(n_features);
        for batch in dataset.batches(batch_size, None)? {
            stats.update(&coder.encode(&batch)?)?;
        }
        Ok(stats)
    }

    /// Count non-zero entries of a `[batch, n_features]` code matrix.
    pub fn update(&mut self, code: &Tensor) -> Result<()> {
        let n_features = self.fire_counts.len();
        match code.dims2() {
            Ok((_, n)) if n == n_features => {}
            _ => {
                return Err(
                    SaeError::shape("feature stats", format!("(batch, {n_features})"), code.dims())
                        .into(),
                )
            }
        }

        let rows: Vec<Vec<f32>> = code.to_dtype(DType::F32)?.to_vec2()?;
        for row in &rows {
            for (count, &v) in self.fire_counts.iter_mut().zip(row) {
                if v != 0.0 {
                    *count += 1;
                    self.total_active += 1;
                }
            }
        }
        self.n_examples += rows.len() as u64;
        Ok(())
    }

    pub fn n_examples(&self) -> u64 {
        self.n_examples
    }

    /// Fraction of examples on which each feature fired
    pub fn frequencies(&self) -> Vec<f64> {
        if self.n_examples == 0 {
            return vec![0.0; self.fire_counts.len()];
        }
        self.fire_counts
            .iter()
            .map(|&c| c as f64 / self.n_examples as f64)
            .collect()
    }

    /// Indices of features that never fired
    pub fn dead_features(&self) -> Vec<usize> {
        self.fire_counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Mean number of active features per example
    pub fn mean_l0(&self) -> f64 {
        if self.n_examples == 0 {
            0.0
        } else {
            self.total_active as f64 / self.n_examples as f64
        }
    }

    pub fn summary(&self) -> FeatureSummary {
        FeatureSummary {
            n_features: self.fire_counts.len(),
            n_examples: self.n_examples,
            mean_l0: self.mean_l0(),
            dead_features: self.dead_features().len(),
            frequencies: self.frequencies(),
        }
    }
}
