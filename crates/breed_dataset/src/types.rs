//! Core types and error definitions for breed_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("malformed label row {line} in {path}")]
    MalformedLabels { path: PathBuf, line: usize },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("file name is not valid UTF-8: {path}")]
    NonUtf8Name { path: PathBuf },
    #[error("no label for example id {id:?}")]
    MissingLabel { id: String },
    #[error("class directory {class:?} is not in the label index")]
    UnknownClass { class: String },
    #[error("index {index} out of range for dataset of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("{0}")]
    Batch(String),
}

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Which folder of the competition layout a dataset reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    /// `train/`, labeled through `labels.csv`.
    Train,
    /// `test/`, unlabeled.
    Test,
}

impl Split {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

/// A transformed image in CHW layout, normalized by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub chw: Vec<f32>,
    pub height: u32,
    pub width: u32,
}

impl ImageTensor {
    pub fn channels(&self) -> usize {
        let plane = self.height as usize * self.width as usize;
        if plane == 0 {
            0
        } else {
            self.chw.len() / plane
        }
    }
}

/// One item produced by a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Example {
    Labeled { image: ImageTensor, label: usize },
    Unlabeled { image: ImageTensor },
}

impl Example {
    pub fn image(&self) -> &ImageTensor {
        match self {
            Example::Labeled { image, .. } | Example::Unlabeled { image } => image,
        }
    }

    pub fn label(&self) -> Option<usize> {
        match self {
            Example::Labeled { label, .. } => Some(*label),
            Example::Unlabeled { .. } => None,
        }
    }
}

/// Strip the extension from a file name the way example ids are derived.
pub fn file_id(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => &file_name[..pos],
        _ => file_name,
    }
}
