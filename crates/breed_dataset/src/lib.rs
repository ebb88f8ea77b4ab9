//! Dog-breed dataset handling: label tables, folder reorganization,
//! augmentation pipelines and burn-compatible batch loading.
//!
//! This crate provides utilities for:
//! - Parsing `labels.csv` and the lexicographic label index
//! - Copying the flat competition layout into per-class folders
//! - Train-time and test-time transform pipelines
//! - Datasets over the flat and the reorganized layouts
//! - Seeded, rayon-parallel batch loading into burn tensors

pub mod aug;
pub mod batch;
pub mod dataset;
pub mod labels;
pub mod prepare;
pub mod reorg;
pub mod types;

pub use aug::{
    AugmentConfig, Normalization, PipelineKind, TransformPipeline, TransformPipelineBuilder,
    IMAGENET_MEAN, IMAGENET_STD,
};
pub use batch::{BatchIter, DataLoader, ImageBatch, LoaderConfig};
pub use dataset::{
    class_dirs, random_split, DogsDataset, ExampleSource, ImageFolderDataset, Subset,
};
pub use labels::{class_counts, label_map, read_csv_labels, LabelIndex, LabelTable};
pub use prepare::{prepare_data, prepare_folder_data, DataConfig, DataIters};
pub use reorg::{
    reorg_dog_data, reorg_test, reorg_train_valid, sorted_file_names, valid_quota, LABELS_FILE,
    REORG_DIR, UNKNOWN_CLASS_DIR,
};
pub use types::*;
