//! Integration tests for sae-rs
//!
//! All tests run on CPU with small synthetic activations.

use std::collections::HashMap;
use std::io::Write;

use candle_core::{DType, Device, Tensor};
use sae_rs::{
    run, topk, ActivationDataset, CoderKind, DictionaryStore, LearnedDict, Precision, SaeError,
    TopKCoder, TrainingConfig,
};
use tempfile::NamedTempFile;

/// Test config loading from JSON with defaults filled in
#[test]
fn test_config_loading() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{
        "d_activation": 16,
        "n_features": 128,
        "sparsity": 4,
        "coder": "dense",
        "precision": "f64"
    }}"#
    )
    .unwrap();

    let config = TrainingConfig::load(file.path()).unwrap();
    assert_eq!(config.d_activation, 16);
    assert_eq!(config.n_features, 128);
    assert_eq!(config.sparsity, 4);
    assert_eq!(config.coder, CoderKind::Dense);
    assert_eq!(config.precision, Precision::F64);
    assert_eq!(config.epochs, 10);
    assert_eq!(config.batch_size, 32);
    assert!(config.shuffle);
}

/// Test that required fields are actually required
#[test]
fn test_config_missing_dimension() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"n_features": 128, "sparsity": 4}}"#).unwrap();
    assert!(TrainingConfig::load(file.path()).is_err());
}

/// Scenario: d_activation=4, n_features=8, k=2, batch of 3
#[test]
fn test_small_scenario() {
    let device = Device::Cpu;
    let coder = TopKCoder::new(4, 8, 2, 42, DType::F32, &device).unwrap();
    let batch = Tensor::randn(0f32, 1.0, (3, 4), &device).unwrap();

    let normed = coder.dictionary().normalized().unwrap();
    let code = topk::encode(&batch, 2, &normed).unwrap();
    assert_eq!(code.dims(), &[3, 8]);
    let rows: Vec<Vec<f32>> = code.to_vec2().unwrap();
    for row in &rows {
        assert!(row.iter().filter(|&&v| v != 0.0).count() <= 2);
        assert!(row.iter().all(|&v| v >= 0.0));
    }

    let zeros = Tensor::zeros((3, 8), DType::F32, &device).unwrap();
    let recon: Vec<Vec<f32>> = topk::decode(&zeros, &normed).unwrap().to_vec2().unwrap();
    assert_eq!(recon, vec![vec![0.0f32; 4]; 3]);
}

/// Learned dictionary survives a safetensors round trip
#[test]
fn test_learned_dict_save_load() {
    let device = Device::Cpu;
    let coder = TopKCoder::new(6, 24, 3, 7, DType::F32, &device).unwrap();
    let learned = coder.to_learned_dict().unwrap();

    let file = NamedTempFile::new().unwrap();
    learned.save(file.path()).unwrap();
    let loaded = LearnedDict::load(file.path(), &device).unwrap();

    assert_eq!(loaded.sparsity(), 3);
    assert_eq!(loaded.n_features(), 24);
    assert_eq!(loaded.d_activation(), 6);

    let x = Tensor::randn(0f32, 1.0, (5, 6), &device).unwrap();
    let a: Vec<Vec<f32>> = learned.encode(&x).unwrap().to_vec2().unwrap();
    let b: Vec<Vec<f32>> = loaded.encode(&x).unwrap().to_vec2().unwrap();
    assert_eq!(a, b);
}

/// Activations load from a named safetensors tensor
#[test]
fn test_dataset_from_safetensors() {
    let device = Device::Cpu;
    let activations = Tensor::randn(0f32, 1.0, (10, 4), &device).unwrap();
    let mut tensors = HashMap::new();
    tensors.insert("resid_mid".to_string(), activations.clone());

    let file = NamedTempFile::new().unwrap();
    candle_core::safetensors::save(&tensors, file.path()).unwrap();

    let dataset =
        ActivationDataset::load_safetensors(file.path(), "resid_mid", DType::F32, &device).unwrap();
    assert_eq!(dataset.len(), 10);
    assert_eq!(dataset.d_activation(), 4);

    assert!(
        ActivationDataset::load_safetensors(file.path(), "missing", DType::F32, &device).is_err()
    );
}

/// End-to-end: train, snapshot, keep training, snapshot is unchanged
#[test]
fn test_training_pipeline() {
    let device = Device::Cpu;
    let dataset =
        ActivationDataset::new(Tensor::randn(0f32, 1.0, (64, 8), &device).unwrap()).unwrap();
    let config = TrainingConfig {
        d_activation: 8,
        n_features: 32,
        sparsity: 4,
        epochs: 5,
        batch_size: 16,
        learning_rate: 1e-2,
        ..Default::default()
    };

    let outcome = run(&config, &dataset, &device).unwrap();
    assert_eq!(outcome.reports.len(), 5);
    assert!(outcome.reports.iter().all(|r| r.n_batches == 4));
    assert!(outcome.reports.iter().all(|r| r.loss.is_finite() && r.loss >= 0.0));

    let learned = outcome.coder.to_learned_dict().unwrap().unwrap();
    let norms: Vec<f32> = learned
        .get_dictionary()
        .sqr()
        .unwrap()
        .sum(1)
        .unwrap()
        .sqrt()
        .unwrap()
        .to_vec1()
        .unwrap();
    for n in norms {
        assert!((n - 1.0).abs() < 1e-5);
    }

    let before: Vec<Vec<f32>> = learned.get_dictionary().to_vec2().unwrap();
    let more = sae_rs::train_coder(outcome.coder.as_coder(), &dataset, &config).unwrap();
    assert_eq!(more.len(), 5);
    let after: Vec<Vec<f32>> = learned.get_dictionary().to_vec2().unwrap();
    assert_eq!(before, after);
}

/// Shape errors surface as typed errors through the public API
#[test]
fn test_shape_error_from_learned_dict() {
    let device = Device::Cpu;
    let raw = Tensor::randn(0f32, 1.0, (8, 4), &device).unwrap();
    let store = DictionaryStore::from_tensor(&raw).unwrap();
    let learned = LearnedDict::new(store.normalized().unwrap(), 2).unwrap();

    let wrong = Tensor::zeros((2, 3), DType::F32, &device).unwrap();
    let err = learned.encode(&wrong).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SaeError>(),
        Some(SaeError::Shape { .. })
    ));
}
