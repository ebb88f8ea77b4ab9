use crate::animator::{Animator, JsonlSink, LogSink, PlotSink};
use crate::config::ExperimentConfig;
use crate::devices::{platform_probe, try_all_gpus, TrainDevice};
use crate::submission::write_submission_from_model;
use crate::train::{train, TrainReport};
use crate::TrainBackend;
use anyhow::Context;
use breed_dataset::{prepare_data, prepare_folder_data, reorg_dog_data, DataIters};
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use clap::{Args, Parser, ValueEnum};
use models::BreedClassifier;
use std::fs;
use std::path::{Path, PathBuf};

pub type ADBackend = Autodiff<TrainBackend>;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

/// Which on-disk layout the loaders read.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `train/`, `test/` and `labels.csv`, validation split at random.
    Flat,
    /// `train_valid_test/` as written by `reorg`.
    Reorganized,
}

/// Options shared by `train` and `submit`. Flags override the config file.
#[derive(Args, Debug, Clone)]
pub struct ExperimentArgs {
    /// TOML config (defaults to $BREED_CONFIG, then ./breed.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    #[arg(long, value_enum, default_value_t = Layout::Flat)]
    pub layout: Layout,
    /// Dataset root containing train/, test/ and labels.csv.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub lr: Option<f64>,
    /// Weight decay.
    #[arg(long)]
    pub wd: Option<f64>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Optional metrics output path (JSONL); receives every plotted point.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

impl ExperimentArgs {
    pub fn resolve(&self) -> anyhow::Result<ExperimentConfig> {
        let mut cfg = match &self.config {
            Some(path) => ExperimentConfig::from_path(path)?
                .with_context(|| format!("config file {} not found", path.display()))?,
            None => ExperimentConfig::load(),
        };
        if let Some(dir) = &self.data_dir {
            cfg.data.data_dir = dir.clone();
        }
        if let Some(bs) = self.batch_size {
            cfg.data.batch_size = bs;
        }
        if let Some(epochs) = self.epochs {
            cfg.train.num_epochs = epochs;
        }
        if let Some(lr) = self.lr {
            cfg.train.lr = lr;
        }
        if let Some(wd) = self.wd {
            cfg.train.wd = wd;
        }
        if self.seed.is_some() {
            cfg.data.seed = self.seed;
        }
        if self.metrics_out.is_some() {
            cfg.metrics_out = self.metrics_out.clone();
        }
        Ok(cfg)
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "reorg",
    about = "Copy train/ and test/ into per-class train_valid_test folders"
)]
pub struct ReorgArgs {
    /// Dataset root containing train/, test/ and labels.csv.
    #[arg(long)]
    pub data_dir: PathBuf,
    /// Fraction of the rarest class held out per class for validation.
    #[arg(long, default_value_t = 0.1)]
    pub valid_ratio: f64,
}

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the breed classifier and report validation metrics")]
pub struct TrainArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,
    /// Checkpoint output path (defaults to the config's checkpoint).
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(
    name = "submit",
    about = "Train on train+valid (or load a checkpoint) and write submission.csv"
)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,
    /// Skip training and load this checkpoint.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    #[arg(long, default_value = "submission.csv")]
    pub output: PathBuf,
}

/// Install the fmt subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

pub fn prepare(cfg: &ExperimentConfig, layout: Layout) -> anyhow::Result<DataIters> {
    let data = match layout {
        Layout::Flat => prepare_data(&cfg.data),
        Layout::Reorganized => prepare_folder_data(&cfg.data),
    }
    .with_context(|| format!("preparing data under {}", cfg.data.data_dir.display()))?;
    if data.label_index.is_empty() {
        anyhow::bail!("no classes found under {}", cfg.data.data_dir.display());
    }
    Ok(data)
}

pub fn save_checkpoint<B: Backend>(model: &BreedClassifier<B>, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint: {e}"))?;
    model
        .features()
        .clone()
        .save_file(features_path(path), &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save feature extractor: {e}"))?;
    Ok(())
}

/// Feature-extractor weights stored next to a full checkpoint.
pub fn features_path(checkpoint: &Path) -> PathBuf {
    checkpoint.with_extension("features.bin")
}

pub fn load_checkpoint<B: Backend>(
    cfg: &ExperimentConfig,
    num_classes: usize,
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<BreedClassifier<B>> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    BreedClassifier::<B>::new(&cfg.model.classifier(num_classes), device)
        .load_file(path, &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", path.display()))
}

/// Fresh classifier, starting from saved feature weights when configured.
pub fn build_model<B: Backend>(
    cfg: &ExperimentConfig,
    num_classes: usize,
    device: &B::Device,
) -> anyhow::Result<BreedClassifier<B>> {
    let model = BreedClassifier::<B>::new(&cfg.model.classifier(num_classes), device);
    let Some(path) = &cfg.model.pretrained_features else {
        return Ok(model);
    };
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let features = model
        .features()
        .clone()
        .load_file(path, &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load feature weights {}: {e}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded feature extractor weights");
    Ok(model.with_features(features))
}

fn plot_sink(cfg: &ExperimentConfig) -> anyhow::Result<Box<dyn PlotSink>> {
    Ok(match &cfg.metrics_out {
        Some(path) => Box::new(JsonlSink::new(path)?),
        None => Box::new(LogSink),
    })
}

fn fit(
    cfg: &ExperimentConfig,
    data: &DataIters,
    with_valid: bool,
    devices: &[TrainDevice],
) -> anyhow::Result<(BreedClassifier<ADBackend>, TrainReport)> {
    let model = build_model::<ADBackend>(cfg, data.label_index.len(), &devices[0])?;
    let mut animator = Animator::for_training(cfg.train.num_epochs, with_valid, plot_sink(cfg)?);
    let (train_loader, valid_loader) = if with_valid {
        (&data.train, Some(&data.valid))
    } else {
        (&data.train_valid, None)
    };
    train::<ADBackend, _>(
        model,
        train_loader,
        valid_loader,
        &cfg.train,
        devices,
        &mut animator,
    )
}

pub fn run_reorg(args: ReorgArgs) -> anyhow::Result<()> {
    let quota = reorg_dog_data(&args.data_dir, args.valid_ratio)
        .with_context(|| format!("reorganizing {}", args.data_dir.display()))?;
    tracing::info!(n_valid_per_label = quota, "reorganization complete");
    Ok(())
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainReport> {
    validate_backend_choice(args.experiment.backend)?;
    let cfg = args.experiment.resolve()?;
    let data = prepare(&cfg, args.experiment.layout)?;
    let devices = try_all_gpus(platform_probe().as_ref());

    let (model, report) = fit(&cfg, &data, true, &devices)?;
    let ckpt_path = args.checkpoint_out.unwrap_or_else(|| cfg.checkpoint.clone());
    save_checkpoint(&model, &ckpt_path)?;
    tracing::info!(path = %ckpt_path.display(), "saved checkpoint");
    Ok(report)
}

pub fn run_submit(args: SubmitArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.experiment.backend)?;
    let cfg = args.experiment.resolve()?;
    let data = prepare(&cfg, args.experiment.layout)?;
    let devices = try_all_gpus(platform_probe().as_ref());
    let device = &devices[0];

    let model: BreedClassifier<TrainBackend> = match &args.checkpoint {
        Some(path) => load_checkpoint::<TrainBackend>(&cfg, data.label_index.len(), path, device)?,
        None => {
            let (model, _report) = fit(&cfg, &data, false, &devices)?;
            save_checkpoint(&model, &cfg.checkpoint)?;
            model.valid()
        }
    };
    write_submission_from_model::<TrainBackend, _>(
        &args.output,
        &model,
        &data.test,
        &data.label_index,
        device,
    )
}
