//! Copy the flat competition layout into per-class train/valid/test folders.
//!
//! Input: `<data_dir>/{train,test}/<id>.<ext>` plus `<data_dir>/labels.csv`.
//! Output: `<data_dir>/train_valid_test/{train,valid,train_valid}/<label>/<file>`
//! and `<data_dir>/train_valid_test/test/unknown/<file>`.
//!
//! Files are copied, never moved. Copies overwrite, so rerunning over an
//! untouched source produces identical content. A failed copy aborts and
//! leaves whatever was written so far.

use crate::labels::{class_counts, read_csv_labels, LabelTable};
use crate::types::{file_id, DatasetError, DatasetResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const REORG_DIR: &str = "train_valid_test";
pub const LABELS_FILE: &str = "labels.csv";
pub const UNKNOWN_CLASS_DIR: &str = "unknown";

/// Validation examples per class: `max(1, floor(min_class_count * valid_ratio))`.
///
/// The minimum is global over the label table, so every class gets the
/// same quota as the rarest one. An empty table yields 1.
pub fn valid_quota(labels: &LabelTable, valid_ratio: f64) -> usize {
    let n = class_counts(labels).values().copied().min().unwrap_or(0);
    ((n as f64 * valid_ratio).floor() as usize).max(1)
}

/// Sorted file names directly under `dir`. A name that is not valid UTF-8
/// is an error rather than a silently dropped file.
pub fn sorted_file_names(dir: &Path) -> DatasetResult<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| DatasetError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DatasetError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
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

/// Copy `file` into `target_dir`, creating the directory first.
pub fn copy_into(file: &Path, target_dir: &Path) -> DatasetResult<PathBuf> {
    fs::create_dir_all(target_dir).map_err(|e| DatasetError::io(target_dir, e))?;
    let name = file
        .file_name()
        .ok_or_else(|| DatasetError::Batch(format!("not a file path: {}", file.display())))?;
    let dest = target_dir.join(name);
    fs::copy(file, &dest).map_err(|e| DatasetError::io(file, e))?;
    Ok(dest)
}

/// Split `train/` into per-class `train`, `valid` and `train_valid` folders.
///
/// Returns the per-class validation quota.
pub fn reorg_train_valid(
    data_dir: &Path,
    labels: &LabelTable,
    valid_ratio: f64,
) -> DatasetResult<usize> {
    let n_valid_per_label = valid_quota(labels, valid_ratio);
    let src_dir = data_dir.join("train");
    let out = data_dir.join(REORG_DIR);

    let mut label_count: HashMap<&str, usize> = HashMap::new();
    let mut copied = 0usize;
    for name in sorted_file_names(&src_dir)? {
        let id = file_id(&name);
        let label = labels
            .get(id)
            .ok_or_else(|| DatasetError::MissingLabel { id: id.to_string() })?;
        let file = src_dir.join(&name);
        copy_into(&file, &out.join("train_valid").join(label))?;

        let count = label_count.entry(label.as_str()).or_insert(0);
        if *count < n_valid_per_label {
            copy_into(&file, &out.join("valid").join(label))?;
            *count += 1;
        } else {
            copy_into(&file, &out.join("train").join(label))?;
        }
        copied += 1;
    }
    tracing::info!(
        copied,
        classes = label_count.len(),
        n_valid_per_label,
        "reorganized training images"
    );
    Ok(n_valid_per_label)
}

/// Copy `test/` into `train_valid_test/test/unknown`.
pub fn reorg_test(data_dir: &Path) -> DatasetResult<usize> {
    let src_dir = data_dir.join("test");
    let dest = data_dir.join(REORG_DIR).join("test").join(UNKNOWN_CLASS_DIR);
    let names = sorted_file_names(&src_dir)?;
    for name in &names {
        copy_into(&src_dir.join(name), &dest)?;
    }
    tracing::info!(copied = names.len(), "reorganized test images");
    Ok(names.len())
}

/// Read `labels.csv` and reorganize both the training and the test folder.
pub fn reorg_dog_data(data_dir: &Path, valid_ratio: f64) -> DatasetResult<usize> {
    let labels = read_csv_labels(&data_dir.join(LABELS_FILE))?;
    let quota = reorg_train_valid(data_dir, &labels, valid_ratio)?;
    reorg_test(data_dir)?;
    Ok(quota)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(counts: &[(&str, usize)]) -> LabelTable {
        let mut t = LabelTable::new();
        for (label, n) in counts {
            for i in 0..*n {
                t.insert(format!("{label}{i:03}"), label.to_string());
            }
        }
        t
    }

    #[test]
    fn quota_uses_global_minimum_class() {
        let t = table(&[("A", 100), ("B", 10), ("C", 50)]);
        assert_eq!(valid_quota(&t, 0.1), 1);
        let t = table(&[("A", 100), ("B", 40)]);
        assert_eq!(valid_quota(&t, 0.1), 4);
    }

    #[test]
    fn listing_is_sorted_and_skips_directories() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("b.jpg"), b"b")?;
        fs::write(dir.path().join("a.jpg"), b"a")?;
        fs::create_dir(dir.path().join("nested"))?;
        assert_eq!(sorted_file_names(dir.path())?, ["a.jpg", "b.jpg"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_reported() -> anyhow::Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("ok.jpg"), b"x")?;
        let bad = dir.path().join(OsStr::from_bytes(b"dog\xff.jpg"));
        if fs::write(&bad, b"x").is_err() {
            // filesystem refuses raw bytes in names
            return Ok(());
        }
        match sorted_file_names(dir.path()) {
            Err(DatasetError::NonUtf8Name { path }) => assert_eq!(path, bad),
            other => panic!("expected NonUtf8Name, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn quota_is_at_least_one() {
        let t = table(&[("A", 3), ("B", 2)]);
        assert_eq!(valid_quota(&t, 0.1), 1);
        assert_eq!(valid_quota(&LabelTable::new(), 0.5), 1);
    }
}
