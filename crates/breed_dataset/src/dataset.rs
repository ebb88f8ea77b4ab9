//! Indexed image datasets over the flat and the reorganized layouts.

use crate::aug::TransformPipeline;
use crate::labels::{label_map, read_csv_labels, LabelIndex, LabelTable};
use crate::reorg::{sorted_file_names, LABELS_FILE};
use crate::types::{file_id, DatasetError, DatasetResult, Example, Split};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Random-access source of examples.
///
/// `get` draws any augmentation randomness from the supplied RNG, so a
/// loader controls reproducibility.
pub trait ExampleSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Example id (file stem) at `index`.
    fn id(&self, index: usize) -> Option<&str>;

    fn get(&self, index: usize, rng: &mut dyn rand::RngCore) -> DatasetResult<Example>;
}

pub(crate) fn decode_rgb(path: &Path) -> DatasetResult<image::RgbImage> {
    let img = image::open(path).map_err(|e| DatasetError::Image {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(img.to_rgb8())
}

/// Dataset over `<data_dir>/train` or `<data_dir>/test` of the competition
/// layout, labeled through `<data_dir>/labels.csv`.
pub struct DogsDataset {
    dir: PathBuf,
    split: Split,
    files: Vec<String>,
    labels: LabelTable,
    label_index: LabelIndex,
    pipeline: TransformPipeline,
}

impl DogsDataset {
    pub fn new(data_dir: &Path, split: Split, pipeline: TransformPipeline) -> DatasetResult<Self> {
        let labels = read_csv_labels(&data_dir.join(LABELS_FILE))?;
        Self::with_labels(data_dir, split, pipeline, labels)
    }

    /// Build over an already parsed label table.
    pub fn with_labels(
        data_dir: &Path,
        split: Split,
        pipeline: TransformPipeline,
        labels: LabelTable,
    ) -> DatasetResult<Self> {
        let dir = data_dir.join(split.dir_name());
        let files = sorted_file_names(&dir)?;
        let label_index = label_map(&labels);
        tracing::debug!(
            dir = %dir.display(),
            files = files.len(),
            classes = label_index.len(),
            "indexed dataset"
        );
        Ok(Self {
            dir,
            split,
            files,
            labels,
            label_index,
            pipeline,
        })
    }

    pub fn label_index(&self) -> &LabelIndex {
        &self.label_index
    }
}

impl ExampleSource for DogsDataset {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn id(&self, index: usize) -> Option<&str> {
        self.files.get(index).map(|name| file_id(name))
    }

    fn get(&self, index: usize, rng: &mut dyn rand::RngCore) -> DatasetResult<Example> {
        let name = self.files.get(index).ok_or(DatasetError::OutOfRange {
            index,
            len: self.files.len(),
        })?;
        let img = decode_rgb(&self.dir.join(name))?;
        let image = self.pipeline.apply(img, rng);
        match self.split {
            Split::Train => {
                let label = self.label_index.resolve(&self.labels, file_id(name))?;
                Ok(Example::Labeled { image, label })
            }
            Split::Test => Ok(Example::Unlabeled { image }),
        }
    }
}

struct FolderEntry {
    path: PathBuf,
    id: String,
    label: Option<usize>,
}

/// Dataset over a `<root>/<class>/<file>` tree.
///
/// With a label index every class directory must be known to it; without
/// one the examples are unlabeled.
pub struct ImageFolderDataset {
    entries: Vec<FolderEntry>,
    pipeline: TransformPipeline,
}

impl ImageFolderDataset {
    pub fn new(
        root: &Path,
        label_index: Option<&LabelIndex>,
        pipeline: TransformPipeline,
    ) -> DatasetResult<Self> {
        let mut entries = Vec::new();
        for class in class_dirs(root)? {
            let label = match label_index {
                Some(index) => Some(
                    index
                        .index_of(&class)
                        .ok_or_else(|| DatasetError::UnknownClass {
                            class: class.clone(),
                        })?,
                ),
                None => None,
            };
            let class_dir = root.join(&class);
            for name in sorted_file_names(&class_dir)? {
                entries.push(FolderEntry {
                    id: file_id(&name).to_string(),
                    path: class_dir.join(&name),
                    label,
                });
            }
        }
        tracing::debug!(root = %root.display(), files = entries.len(), "indexed image folder");
        Ok(Self { entries, pipeline })
    }
}

/// Sorted class directory names under `root`.
pub fn class_dirs(root: &Path) -> DatasetResult<Vec<String>> {
    let entries = fs::read_dir(root).map_err(|e| DatasetError::io(root, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DatasetError::io(root, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| DatasetError::NonUtf8Name { path: path.clone() })?;
        names.push(name);
    }
    names.sort();
    Ok(names)
}

impl ExampleSource for ImageFolderDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn id(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.id.as_str())
    }

    fn get(&self, index: usize, rng: &mut dyn rand::RngCore) -> DatasetResult<Example> {
        let entry = self.entries.get(index).ok_or(DatasetError::OutOfRange {
            index,
            len: self.entries.len(),
        })?;
        let image = self.pipeline.apply(decode_rgb(&entry.path)?, rng);
        Ok(match entry.label {
            Some(label) => Example::Labeled { image, label },
            None => Example::Unlabeled { image },
        })
    }
}

/// A view over selected indices of another source.
pub struct Subset {
    inner: Arc<dyn ExampleSource>,
    indices: Vec<usize>,
}

impl Subset {
    pub fn new(inner: Arc<dyn ExampleSource>, indices: Vec<usize>) -> Self {
        Self { inner, indices }
    }

}

impl ExampleSource for Subset {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn id(&self, index: usize) -> Option<&str> {
        self.indices.get(index).and_then(|&i| self.inner.id(i))
    }

    fn get(&self, index: usize, rng: &mut dyn rand::RngCore) -> DatasetResult<Example> {
        let inner_index = *self.indices.get(index).ok_or(DatasetError::OutOfRange {
            index,
            len: self.indices.len(),
        })?;
        self.inner.get(inner_index, rng)
    }
}

/// Split `0..len` into shuffled train and validation indices.
///
/// The train part holds `floor(len * (1 - valid_ratio))` indices.
pub fn random_split(len: usize, valid_ratio: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let ratio = valid_ratio.clamp(0.0, 1.0);
    let n_train = ((len as f64) * (1.0 - ratio)).floor() as usize;
    let valid = indices.split_off(n_train.min(len));
    (indices, valid)
}
