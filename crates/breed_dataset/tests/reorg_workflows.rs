//! End-to-end checks of the reorganizer and the loaders built on top of it.

use breed_dataset::{
    prepare_data, prepare_folder_data, reorg_dog_data, AugmentConfig, DataConfig, DatasetError,
    DogsDataset, ExampleSource, Split, TransformPipeline, REORG_DIR,
};
use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

type B = NdArray<f32>;

/// Write `<root>/train/<label><i>.png` per class, a labels.csv and `test_count`
/// unlabeled test images.
fn synthetic_dataset(root: &Path, classes: &[(&str, usize)], test_count: usize) -> anyhow::Result<()> {
    fs::create_dir_all(root.join("train"))?;
    fs::create_dir_all(root.join("test"))?;
    let mut csv = String::from("id,breed\n");
    for (c, (label, n)) in classes.iter().enumerate() {
        for i in 0..*n {
            let id = format!("{label}{i:03}");
            let img = RgbImage::from_pixel(6, 5, Rgb([(c * 60) as u8, i as u8, 90]));
            img.save(root.join("train").join(format!("{id}.png")))?;
            csv.push_str(&format!("{id},{label}\n"));
        }
    }
    fs::write(root.join("labels.csv"), csv)?;
    for i in 0..test_count {
        let img = RgbImage::from_pixel(7, 4, Rgb([10, 20, i as u8]));
        img.save(root.join("test").join(format!("t{i:03}.png")))?;
    }
    Ok(())
}

fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

fn snapshot(dir: &Path) -> anyhow::Result<BTreeMap<PathBuf, Vec<u8>>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in fs::read_dir(&d)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.insert(path.strip_prefix(dir)?.to_path_buf(), fs::read(&path)?);
            }
        }
    }
    Ok(out)
}

fn small_config(data_dir: &Path, batch_size: usize) -> DataConfig {
    DataConfig {
        data_dir: data_dir.to_path_buf(),
        batch_size,
        augment: AugmentConfig {
            image_size: 4,
            resize: 5,
            ..Default::default()
        },
        log_every_samples: None,
        ..Default::default()
    }
}

#[test]
fn stratified_split_routes_one_file_per_class_to_valid() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    synthetic_dataset(root, &[("A", 100), ("B", 10), ("C", 50)], 3)?;

    let quota = reorg_dog_data(root, 0.1)?;
    assert_eq!(quota, 1);

    let out = root.join(REORG_DIR);
    for (label, n) in [("A", 100), ("B", 10), ("C", 50)] {
        assert_eq!(count_files(&out.join("valid").join(label)), 1, "valid/{label}");
        assert_eq!(count_files(&out.join("train").join(label)), n - 1, "train/{label}");
        assert_eq!(count_files(&out.join("train_valid").join(label)), n, "train_valid/{label}");
    }
    assert_eq!(count_files(&out.join("test").join("unknown")), 3);
    // Sorted listing: the first file of each class goes to valid.
    assert!(out.join("valid").join("B").join("B000.png").exists());
    Ok(())
}

#[test]
fn rerunning_the_reorganizer_is_content_stable() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    synthetic_dataset(root, &[("akita", 4), ("beagle", 6)], 2)?;

    reorg_dog_data(root, 0.5)?;
    let first = snapshot(&root.join(REORG_DIR))?;
    reorg_dog_data(root, 0.5)?;
    let second = snapshot(&root.join(REORG_DIR))?;
    assert_eq!(first, second);
    assert_eq!(count_files(&root.join(REORG_DIR).join("valid").join("akita")), 2);
    Ok(())
}

#[test]
fn unknown_training_id_aborts() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    synthetic_dataset(root, &[("akita", 2)], 0)?;
    RgbImage::new(2, 2).save(root.join("train").join("stray.png"))?;
    let err = reorg_dog_data(root, 0.1).unwrap_err();
    assert!(matches!(err, DatasetError::MissingLabel { ref id } if id == "stray"));
    Ok(())
}

#[test]
fn dogs_dataset_resolves_labels_by_file_stem() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    synthetic_dataset(root, &[("poodle", 1), ("akita", 2)], 1)?;

    let cfg = AugmentConfig {
        image_size: 4,
        resize: 4,
        ..Default::default()
    };
    let train = DogsDataset::new(root, Split::Train, TransformPipeline::test(&cfg))?;
    assert_eq!(train.len(), 3);
    assert_eq!(train.label_index().labels(), ["akita", "poodle"]);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    assert_eq!(train.id(2), Some("poodle000"));
    assert_eq!(train.get(2, &mut rng)?.label(), Some(1));
    assert_eq!(train.get(0, &mut rng)?.label(), Some(0));
    assert!(matches!(
        train.get(9, &mut rng),
        Err(DatasetError::OutOfRange { index: 9, len: 3 })
    ));

    let test = DogsDataset::new(root, Split::Test, TransformPipeline::test(&cfg))?;
    let example = test.get(0, &mut rng)?;
    assert_eq!(example.label(), None);
    assert_eq!((example.image().height, example.image().width), (4, 4));
    Ok(())
}

#[test]
fn flat_and_reorganized_loaders_agree_on_classes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    synthetic_dataset(root, &[("beagle", 6), ("akita", 6)], 3)?;
    reorg_dog_data(root, 0.2)?;

    let cfg = small_config(root, 2);
    let flat = prepare_data(&cfg)?;
    let folder = prepare_folder_data(&cfg)?;
    assert_eq!(flat.label_index, folder.label_index);
    assert_eq!(flat.train_valid.len(), 12);
    assert_eq!(folder.train_valid.len(), 12);
    assert_eq!(folder.valid.len(), 2);
    assert_eq!(flat.train.len() + flat.valid.len(), 12);
    assert_eq!(folder.test.ids(), ["t000", "t001", "t002"]);

    let device = Default::default();
    let mut iter = folder.test.iter();
    let mut seen = 0;
    while let Some(batch) = iter.next_batch::<B>(&device)? {
        assert!(batch.targets.is_none());
        assert_eq!(batch.images.dims()[1..], [3, 4, 4]);
        seen += batch.len();
    }
    assert_eq!(seen, 3);

    let mut iter = folder.train.iter();
    let batch = iter
        .next_batch::<B>(&device)?
        .ok_or_else(|| anyhow::anyhow!("empty train loader"))?;
    assert!(batch.targets.is_some());
    Ok(())
}
