//! sae-rs CLI: train a sparse dictionary on cached activations

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, ValueEnum};
use sae_rs::{run, ActivationDataset, CoderKind, FeatureStats, TrainedCoder, TrainingConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CoderArg {
    Topk,
    Dense,
}

impl From<CoderArg> for CoderKind {
    fn from(arg: CoderArg) -> Self {
        match arg {
            CoderArg::Topk => CoderKind::TopK,
            CoderArg::Dense => CoderKind::Dense,
        }
    }
}

#[derive(Parser)]
#[command(name = "sae-rs")]
#[command(about = "Sparse dictionary learning over language-model activations")]
#[command(version)]
struct Cli {
    /// Safetensors file holding an (n_samples, d_activation) activation matrix
    #[arg(short, long)]
    activations: PathBuf,

    /// Name of the activation tensor inside the file
    #[arg(short, long, default_value = "activations")]
    tensor: String,

    /// JSON training config; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Coder variant
    #[arg(long, value_enum)]
    coder: Option<CoderArg>,

    /// Number of dictionary features
    #[arg(long)]
    n_features: Option<usize>,

    /// Active features per example (top-k)
    #[arg(short = 'k', long)]
    sparsity: Option<usize>,

    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Output directory for the learned dictionary and reports
    #[arg(short, long, default_value = "outputs")]
    output: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Force CPU mode
    #[arg(long)]
    cpu: bool,
}

impl Cli {
    fn training_config(
        &self,
        file_config: Option<TrainingConfig>,
        d_activation: usize,
    ) -> Result<TrainingConfig> {
        let mut config = match file_config {
            Some(config) => config,
            None => TrainingConfig {
                d_activation,
                n_features: d_activation * 8,
                ..Default::default()
            },
        };
        if let Some(coder) = self.coder {
            config.coder = coder.into();
        }
        if let Some(n) = self.n_features {
            config.n_features = n;
        }
        if let Some(k) = self.sparsity {
            config.sparsity = k;
        }
        if let Some(e) = self.epochs {
            config.epochs = e;
        }
        if let Some(lr) = self.learning_rate {
            config.learning_rate = lr;
        }
        if let Some(b) = self.batch_size {
            config.batch_size = b;
        }
        config.validate()?;
        Ok(config)
    }
}

fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        info!("Forcing CPU mode");
        return Device::Cpu;
    }
    match Device::cuda_if_available(0) {
        Ok(dev) if dev.is_cuda() => {
            info!("Using CUDA device");
            dev
        }
        _ => {
            info!("CUDA not available, using CPU");
            Device::Cpu
        }
    }
}

/// Pretty-print `value` as JSON into `path`.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    println!("=== sae-rs: sparse dictionary learning ===");
    println!("Activations: {}", cli.activations.display());
    println!("Output:      {}", cli.output.display());

    let device = select_device(cli.cpu);

    let file_config = cli.config.as_deref().map(TrainingConfig::load).transpose()?;
    let precision = file_config
        .as_ref()
        .map(|c| c.precision)
        .unwrap_or_default();
    let dataset =
        ActivationDataset::load_safetensors(&cli.activations, &cli.tensor, precision.dtype(), &device)?;
    let config = cli.training_config(file_config, dataset.d_activation())?;
    info!(
        "Dataset: {} activations of dimension {}",
        dataset.len(),
        dataset.d_activation()
    );

    let outcome = run(&config, &dataset, &device)?;

    println!("\n=== Results ===");
    for report in &outcome.reports {
        println!("Epoch {:3}: last-batch loss {:.6}", report.epoch, report.loss);
    }

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("Failed to create output directory {}", cli.output.display()))?;

    let report_path = cli.output.join("training_report.json");
    write_json(&report_path, &outcome.reports)?;
    info!("Training report saved to {}", report_path.display());

    let stats = FeatureStats::collect(
        outcome.coder.as_coder(),
        config.n_features,
        &dataset,
        config.batch_size,
    )?;
    let summary = stats.summary();
    println!(
        "Features: mean L0 {:.2}, {} dead of {}",
        summary.mean_l0, summary.dead_features, summary.n_features
    );
    let stats_path = cli.output.join("feature_stats.json");
    write_json(&stats_path, &summary)?;
    info!("Feature statistics saved to {}", stats_path.display());

    match &outcome.coder {
        TrainedCoder::TopK(coder) => {
            let learned = coder.to_learned_dict()?;
            learned.save(&cli.output.join("learned_dict.safetensors"))?;
        }
        TrainedCoder::Dense(coder) => {
            let path = cli.output.join("dense_coder.safetensors");
            coder
                .varmap()
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Dense coder weights saved to {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_json(&path, &[1.5f32, 2.0]).unwrap();
        let back: Vec<f32> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, vec![1.5, 2.0]);
    }

    #[test]
    fn test_write_json_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report.json");
        let err = write_json(&path, &[0u8]).unwrap_err();
        assert!(
            format!("{err}").contains("report.json"),
            "error should name the file: {err}"
        );
    }
}
