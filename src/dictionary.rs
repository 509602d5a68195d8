//! Dictionary store: the trainable overcomplete dictionary
//!
//! Holds the RAW dictionary `[n_features, d_activation]` as a candle `Var`
//! and derives the row-normalized dictionary on every call, so gradients
//! flow back through the normalization into the raw parameter.

use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::SaeError;

/// Floor applied to row norms before dividing.
///
/// A zero RAW row normalizes to a zero row instead of NaN.
pub const NORM_EPS: f64 = 1e-8;

/// Divide each row of a `[rows, cols]` matrix by its own L2 norm.
pub fn normalize_rows(matrix: &Tensor) -> Result<Tensor> {
    let norms = matrix.sqr()?.sum_keepdim(1)?.sqrt()?; // [rows, 1]
    let safe_norms = norms.maximum(NORM_EPS)?;
    Ok(matrix.broadcast_div(&safe_norms)?)
}

/// Trainable RAW dictionary.
#[derive(Debug)]
pub struct DictionaryStore {
    raw: Var,
    n_features: usize,
    d_activation: usize,
}

impl DictionaryStore {
    /// Draw every entry i.i.d. from N(0, 1) using a seeded RNG.
    pub fn random(
        n_features: usize,
        d_activation: usize,
        seed: u64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        if n_features == 0 || d_activation == 0 {
            return Err(SaeError::config(format!(
                "dictionary dimensions must be non-zero (n_features={n_features}, d_activation={d_activation})"
            ))
            .into());
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let data: Vec<f32> = (0..n_features * d_activation)
            .map(|_| StandardNormal.sample(&mut rng))
            .collect();
        let init = Tensor::from_vec(data, (n_features, d_activation), device)?.to_dtype(dtype)?;
        Self::from_tensor(&init)
    }

    /// Wrap an existing `[n_features, d_activation]` matrix as the RAW dictionary.
    ///
    /// The values are copied; later changes to `raw` do not reach the store.
    pub fn from_tensor(raw: &Tensor) -> Result<Self> {
        let (n_features, d_activation) = raw
            .dims2()
            .map_err(|_| SaeError::shape("dictionary", "(n_features, d_activation)", raw.dims()))?;
        Ok(Self {
            raw: Var::from_tensor(&raw.detach().copy()?)?,
            n_features,
            d_activation,
        })
    }

    /// Row-normalized dictionary, recomputed from RAW on each call.
    pub fn normalized(&self) -> Result<Tensor> {
        normalize_rows(self.raw.as_tensor())
    }

    /// RAW, unnormalized dictionary.
    pub fn raw(&self) -> &Tensor {
        self.raw.as_tensor()
    }

    /// Trainable handle for the optimizer.
    pub fn var(&self) -> &Var {
        &self.raw
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn d_activation(&self) -> usize {
        self.d_activation
    }
}
