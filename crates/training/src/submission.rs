//! Test-set probabilities and the competition submission file.

use anyhow::Context;
use breed_dataset::{DataLoader, LabelIndex};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use models::{ImageClassifier, Input};
use std::fs;
use std::path::Path;

/// Per-example softmax rows, with the ids they belong to, in loader order.
pub fn predict_probabilities<B, M>(
    model: &M,
    loader: &DataLoader,
    device: &B::Device,
) -> anyhow::Result<(Vec<String>, Vec<Vec<f32>>)>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    let mut ids = Vec::with_capacity(loader.len());
    let mut rows = Vec::with_capacity(loader.len());
    let mut iter = loader.iter();
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let input = Input::Single(batch.images).to_device(device);
        let probs = softmax(model.forward_input(input), 1);
        let [_, cols] = probs.dims();
        let values = probs
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("reading probabilities: {e:?}"))?;
        rows.extend(values.chunks(cols.max(1)).map(<[f32]>::to_vec));
        ids.extend(batch.ids);
    }
    Ok((ids, rows))
}

/// Write `id,<label_0>,...,<label_k>` followed by one row per example.
pub fn write_submission(
    path: &Path,
    label_index: &LabelIndex,
    ids: &[String],
    rows: &[Vec<f32>],
) -> anyhow::Result<()> {
    if ids.len() != rows.len() {
        anyhow::bail!("{} ids but {} probability rows", ids.len(), rows.len());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating submission {}", path.display()))?;
    let mut header = vec!["id".to_string()];
    header.extend(label_index.labels().iter().cloned());
    writer.write_record(&header)?;
    for (id, row) in ids.iter().zip(rows) {
        if row.len() != label_index.len() {
            anyhow::bail!(
                "row for {id} has {} columns, expected {}",
                row.len(),
                label_index.len()
            );
        }
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(id.clone());
        record.extend(row.iter().map(|p| p.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), rows = rows.len(), "wrote submission");
    Ok(())
}

/// Predict over `test_loader` and write the submission.
pub fn write_submission_from_model<B, M>(
    path: &Path,
    model: &M,
    test_loader: &DataLoader,
    label_index: &LabelIndex,
    device: &B::Device,
) -> anyhow::Result<()>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    let (ids, rows) = predict_probabilities::<B, _>(model, test_loader, device)?;
    write_submission(path, label_index, &ids, &rows)
}
