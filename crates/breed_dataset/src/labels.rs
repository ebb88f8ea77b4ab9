//! `labels.csv` parsing and the lexicographic label index.

use crate::types::{DatasetError, DatasetResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Example id -> class label, as read from `labels.csv`.
pub type LabelTable = BTreeMap<String, String>;

/// Read a header-bearing `id,label` file into a label table.
///
/// Fields are trimmed; a duplicated id keeps the last row.
pub fn read_csv_labels(path: &Path) -> DatasetResult<LabelTable> {
    let file = fs::File::open(path).map_err(|e| DatasetError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut table = LabelTable::new();
    for record in reader.records() {
        let record = record.map_err(|e| DatasetError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        match (record.get(0), record.get(1)) {
            (Some(id), Some(label)) if record.len() == 2 && !id.is_empty() => {
                table.insert(id.to_string(), label.to_string());
            }
            _ => {
                return Err(DatasetError::MalformedLabels {
                    path: path.to_path_buf(),
                    line,
                })
            }
        }
    }
    Ok(table)
}

/// Dense class indices assigned in lexicographic label order.
///
/// The order fixes both the classifier's output columns and the
/// submission header, so it must not depend on table iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelIndex {
    labels: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl LabelIndex {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = labels.into_iter().map(Into::into).collect();
        let labels: Vec<String> = unique.into_iter().collect();
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Self { labels, index }
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Labels in index order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Resolve an example id straight to its class index.
    pub fn resolve(&self, table: &LabelTable, id: &str) -> DatasetResult<usize> {
        table
            .get(id)
            .and_then(|label| self.index_of(label))
            .ok_or_else(|| DatasetError::MissingLabel { id: id.to_string() })
    }
}

/// Build the label index over the distinct labels of a table.
pub fn label_map(table: &LabelTable) -> LabelIndex {
    LabelIndex::from_labels(table.values().cloned())
}

/// Per-class example counts.
pub fn class_counts(table: &LabelTable) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for label in table.values() {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }
    counts
}
