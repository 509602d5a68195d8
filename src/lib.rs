// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::many_single_char_names)] // x, k, n standard in math
#![allow(clippy::module_name_repetitions)] // TopKCoder in topk.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility

//! sae-rs: sparse dictionary learning over language-model activations
//!
//! Trains an overcomplete dictionary of unit-norm "feature" directions so
//! that each activation vector is reconstructed from a few active features.
//!
//! ## Architecture
//!
//! - `dictionary`: trainable RAW dictionary, normalized on demand
//! - `topk`: top-k sparse coder (hard selection, ReLU)
//! - `dense`: dense linear coder trained with L1 penalties
//! - `coder`: `SparseCoder` trait shared by both variants
//! - `train`: `TrainingConfig` and the Adam training loop
//! - `learned`: frozen `LearnedDict` for inference and persistence
//! - `dataset`: activation batching and shuffling
//! - `stats`: per-feature firing statistics
//! - `error`: typed shape/configuration errors

pub mod coder;
pub mod dataset;
pub mod dense;
pub mod dictionary;
pub mod error;
pub mod learned;
pub mod stats;
pub mod topk;
pub mod train;

pub use coder::{CoderKind, Diagnostics, LossOutput, SparseCoder};
pub use dataset::ActivationDataset;
pub use dense::DenseL1Coder;
pub use dictionary::{normalize_rows, DictionaryStore};
pub use error::SaeError;
pub use learned::LearnedDict;
pub use stats::{FeatureStats, FeatureSummary};
pub use topk::TopKCoder;
pub use train::{
    build_coder, run, train_coder, EpochReport, Precision, TrainedCoder, TrainingConfig,
    TrainingOutcome,
};
