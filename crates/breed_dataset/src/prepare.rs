//! Assemble the train / valid / train_valid / test loaders.

use crate::aug::{AugmentConfig, TransformPipeline};
use crate::batch::{DataLoader, LoaderConfig, DEFAULT_LOG_EVERY_SAMPLES};
use crate::dataset::{class_dirs, random_split, DogsDataset, ExampleSource, ImageFolderDataset, Subset};
use crate::labels::{read_csv_labels, LabelIndex};
use crate::reorg::{LABELS_FILE, REORG_DIR};
use crate::types::{DatasetResult, Split};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub valid_ratio: f64,
    pub batch_size: usize,
    pub seed: Option<u64>,
    pub augment: AugmentConfig,
    pub log_every_samples: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/dog-breed-identification"),
            valid_ratio: 0.1,
            batch_size: 32,
            seed: Some(0),
            augment: AugmentConfig::default(),
            log_every_samples: Some(DEFAULT_LOG_EVERY_SAMPLES),
        }
    }
}

impl DataConfig {
    fn train_loader(&self) -> LoaderConfig {
        LoaderConfig {
            log_every_samples: self.log_every_samples,
            ..LoaderConfig::train(self.batch_size, self.seed)
        }
    }

    fn eval_loader(&self) -> LoaderConfig {
        LoaderConfig {
            log_every_samples: self.log_every_samples,
            seed: self.seed,
            ..LoaderConfig::eval(self.batch_size)
        }
    }
}

pub struct DataIters {
    pub train: DataLoader,
    pub valid: DataLoader,
    pub train_valid: DataLoader,
    pub test: DataLoader,
    pub label_index: LabelIndex,
}

/// Loaders over the flat layout; validation is a random split of `train/`.
pub fn prepare_data(cfg: &DataConfig) -> DatasetResult<DataIters> {
    let labels = read_csv_labels(&cfg.data_dir.join(LABELS_FILE))?;
    let train_pipeline = TransformPipeline::train(&cfg.augment);
    let test_pipeline = TransformPipeline::test(&cfg.augment);
    tracing::debug!(
        train = %train_pipeline.describe(),
        test = %test_pipeline.describe(),
        "transform pipelines"
    );

    let train_aug: Arc<dyn ExampleSource> = Arc::new(DogsDataset::with_labels(
        &cfg.data_dir,
        Split::Train,
        train_pipeline,
        labels.clone(),
    )?);
    let train_plain = DogsDataset::with_labels(
        &cfg.data_dir,
        Split::Train,
        test_pipeline.clone(),
        labels.clone(),
    )?;
    let label_index = train_plain.label_index().clone();
    let train_plain: Arc<dyn ExampleSource> = Arc::new(train_plain);
    let test: Arc<dyn ExampleSource> = Arc::new(DogsDataset::with_labels(
        &cfg.data_dir,
        Split::Test,
        test_pipeline,
        labels,
    )?);

    let (train_idx, valid_idx) =
        random_split(train_aug.len(), cfg.valid_ratio, cfg.seed.unwrap_or(0));
    tracing::info!(
        train = train_idx.len(),
        valid = valid_idx.len(),
        test = test.len(),
        classes = label_index.len(),
        "prepared flat-layout loaders"
    );
    Ok(DataIters {
        train: DataLoader::new(
            Arc::new(Subset::new(train_aug.clone(), train_idx)),
            cfg.train_loader(),
        ),
        valid: DataLoader::new(Arc::new(Subset::new(train_plain, valid_idx)), cfg.eval_loader()),
        train_valid: DataLoader::new(train_aug, cfg.train_loader()),
        test: DataLoader::new(test, cfg.eval_loader()),
        label_index,
    })
}

/// Loaders over `<data_dir>/train_valid_test` as written by the reorganizer.
pub fn prepare_folder_data(cfg: &DataConfig) -> DatasetResult<DataIters> {
    let root = cfg.data_dir.join(REORG_DIR);
    let label_index = LabelIndex::from_labels(class_dirs(&root.join("train_valid"))?);
    let train_pipeline = TransformPipeline::train(&cfg.augment);
    let test_pipeline = TransformPipeline::test(&cfg.augment);
    tracing::debug!(
        train = %train_pipeline.describe(),
        test = %test_pipeline.describe(),
        "transform pipelines"
    );

    let folder = |name: &str, pipeline: &TransformPipeline| -> DatasetResult<Arc<dyn ExampleSource>> {
        Ok(Arc::new(ImageFolderDataset::new(
            &root.join(name),
            Some(&label_index),
            pipeline.clone(),
        )?))
    };
    let train = folder("train", &train_pipeline)?;
    let valid = folder("valid", &test_pipeline)?;
    let train_valid = folder("train_valid", &train_pipeline)?;
    // Unlabeled: the single `unknown` class directory carries no label.
    let test: Arc<dyn ExampleSource> =
        Arc::new(ImageFolderDataset::new(&root.join("test"), None, test_pipeline)?);

    tracing::info!(
        train = train.len(),
        valid = valid.len(),
        train_valid = train_valid.len(),
        test = test.len(),
        classes = label_index.len(),
        "prepared reorganized-layout loaders"
    );
    Ok(DataIters {
        train: DataLoader::new(train, cfg.train_loader()),
        valid: DataLoader::new(valid, cfg.eval_loader()),
        train_valid: DataLoader::new(train_valid, cfg.train_loader()),
        test: DataLoader::new(test, cfg.eval_loader()),
        label_index,
    })
}
