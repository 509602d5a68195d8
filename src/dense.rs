//! Dense L1 sparse coder
//!
//! Linear-layer variant without hard selection:
//!
//! ```text
//! code  = W_enc @ x + b_enc                 [batch, n_features]
//! recon = ReLU(W_dec @ code + b_dec)        [batch, d_activation]
//! loss  = MSE(recon, x)
//!       + l1_code    * mean_batch(sum_features |code|)
//!       + l1_feature * mean_features(sum_batch |code|)
//! ```
//!
//! Sparsity only comes from the two penalties; nothing bounds the number of
//! active features per example.

use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use tracing::debug;

use crate::coder::{Diagnostics, LossOutput, SparseCoder};
use crate::error::SaeError;

/// Default weight for both L1 penalties.
pub const DEFAULT_L1_PENALTY: f64 = 0.1;

/// Dense linear encoder/decoder trained with L1 penalties.
pub struct DenseL1Coder {
    varmap: VarMap,
    encoder: Linear,
    decoder: Linear,
    d_activation: usize,
    n_features: usize,
    l1_penalty_code: f64,
    l1_penalty_feature: f64,
}

impl DenseL1Coder {
    pub fn new(
        d_activation: usize,
        n_features: usize,
        l1_penalty_code: f64,
        l1_penalty_feature: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        if d_activation == 0 || n_features == 0 {
            return Err(SaeError::config(format!(
                "dense coder dimensions must be non-zero (d_activation={d_activation}, n_features={n_features})"
            ))
            .into());
        }
        if l1_penalty_code < 0.0 || l1_penalty_feature < 0.0 {
            return Err(SaeError::config("L1 penalties must be non-negative").into());
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);
        let encoder = linear(d_activation, n_features, vb.pp("encoder"))?;
        let decoder = linear(n_features, d_activation, vb.pp("decoder"))?;

        Ok(Self {
            varmap,
            encoder,
            decoder,
            d_activation,
            n_features,
            l1_penalty_code,
            l1_penalty_feature,
        })
    }

    pub fn d_activation(&self) -> usize {
        self.d_activation
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Parameter store (`encoder.weight`, `encoder.bias`, `decoder.weight`, `decoder.bias`).
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Map a code matrix back to activation space.
    pub fn decode(&self, code: &Tensor) -> Result<Tensor> {
        match code.dims2() {
            Ok((_, n)) if n == self.n_features => {}
            _ => {
                return Err(SaeError::shape(
                    "dense decode",
                    format!("(batch, {})", self.n_features),
                    code.dims(),
                )
                .into())
            }
        }
        Ok(self.decoder.forward(code)?.relu()?)
    }

    fn check_batch(&self, batch: &Tensor) -> Result<()> {
        match batch.dims2() {
            Ok((_, d)) if d == self.d_activation => Ok(()),
            _ => Err(SaeError::shape(
                "dense encode",
                format!("(batch, {})", self.d_activation),
                batch.dims(),
            )
            .into()),
        }
    }
}

impl SparseCoder for DenseL1Coder {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn encode(&self, batch: &Tensor) -> Result<Tensor> {
        self.check_batch(batch)?;
        Ok(self.encoder.forward(batch)?)
    }

    fn loss(&self, batch: &Tensor) -> Result<LossOutput> {
        let code = self.encode(batch)?;
        let recon = self.decode(&code)?;

        let mse = candle_nn::loss::mse(&recon, batch)?;
        let abs_code = code.abs()?;
        // Per-example L1, averaged over the batch
        let code_l1 = (abs_code.sum(1)?.mean_all()? * self.l1_penalty_code)?;
        // Per-feature L1 across the batch, averaged over features
        let feature_l1 = (abs_code.sum(0)?.mean_all()? * self.l1_penalty_feature)?;
        let loss = ((&mse + &code_l1)? + &feature_l1)?;

        let scalar = |t: &Tensor| -> Result<f32> { Ok(t.to_dtype(DType::F32)?.to_scalar::<f32>()?) };
        let diagnostics = Diagnostics {
            loss: scalar(&loss)?,
            reconstruction_loss: scalar(&mse)?,
            code_penalty: scalar(&code_l1)?,
            feature_penalty: scalar(&feature_l1)?,
            code: code.detach(),
        };
        debug!(
            "dense loss {:.6} (mse {:.6}, code l1 {:.6}, feature l1 {:.6})",
            diagnostics.loss,
            diagnostics.reconstruction_loss,
            diagnostics.code_penalty,
            diagnostics.feature_penalty
        );

        Ok(LossOutput { loss, diagnostics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_shapes() {
        let coder = DenseL1Coder::new(8, 40, 0.1, 0.1, DType::F32, &Device::Cpu).unwrap();
        let batch = Tensor::randn(0f32, 1.0, (5, 8), &Device::Cpu).unwrap();

        let code = coder.encode(&batch).unwrap();
        assert_eq!(code.dims(), &[5, 40]);
        let recon = coder.decode(&code).unwrap();
        assert_eq!(recon.dims(), &[5, 8]);

        // Decoder output passes through ReLU
        let recon: Vec<Vec<f32>> = recon.to_vec2().unwrap();
        assert!(recon.iter().flatten().all(|&v| v >= 0.0));
        assert_eq!(coder.vars().len(), 4);
    }

    #[test]
    fn test_zero_penalties_reduce_to_mse() {
        let coder = DenseL1Coder::new(6, 24, 0.0, 0.0, DType::F32, &Device::Cpu).unwrap();
        let batch = Tensor::randn(0f32, 1.0, (4, 6), &Device::Cpu).unwrap();
        let out = coder.loss(&batch).unwrap();

        assert!(out.diagnostics.reconstruction_loss >= 0.0);
        assert_eq!(out.diagnostics.code_penalty, 0.0);
        assert_eq!(out.diagnostics.feature_penalty, 0.0);
        assert!((out.diagnostics.loss - out.diagnostics.reconstruction_loss).abs() < 1e-7);
    }

    #[test]
    fn test_penalty_terms_match_definition() {
        let coder = DenseL1Coder::new(3, 6, 0.5, 0.25, DType::F32, &Device::Cpu).unwrap();
        let batch = Tensor::randn(0f32, 1.0, (4, 3), &Device::Cpu).unwrap();
        let out = coder.loss(&batch).unwrap();

        let code: Vec<Vec<f32>> = out.diagnostics.code.to_vec2().unwrap();
        let per_example: f32 =
            code.iter().map(|r| r.iter().map(|v| v.abs()).sum::<f32>()).sum::<f32>() / 4.0;
        let per_feature: f32 = (0..6)
            .map(|j| code.iter().map(|r| r[j].abs()).sum::<f32>())
            .sum::<f32>()
            / 6.0;

        assert!((out.diagnostics.code_penalty - 0.5 * per_example).abs() < 1e-4);
        assert!((out.diagnostics.feature_penalty - 0.25 * per_feature).abs() < 1e-4);
        let total = out.diagnostics.reconstruction_loss
            + out.diagnostics.code_penalty
            + out.diagnostics.feature_penalty;
        assert!((out.diagnostics.loss - total).abs() < 1e-4);
    }

    #[test]
    fn test_dense_rejects_bad_input() {
        let coder = DenseL1Coder::new(4, 16, 0.1, 0.1, DType::F32, &Device::Cpu).unwrap();
        let batch = Tensor::zeros((2, 5), DType::F32, &Device::Cpu).unwrap();
        let err = coder.encode(&batch).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SaeError>(),
            Some(SaeError::Shape { .. })
        ));
        assert!(DenseL1Coder::new(4, 16, -0.1, 0.1, DType::F32, &Device::Cpu).is_err());
    }
}
