//! Batch loading into burn tensors.

use crate::dataset::ExampleSource;
use crate::types::{DatasetError, DatasetResult, Example};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Reshuffle the visiting order on every pass.
    pub shuffle: bool,
    /// Drop a trailing partial batch.
    pub drop_last: bool,
    /// Seed for shuffling and per-sample augmentation; `None` draws from the OS.
    pub seed: Option<u64>,
    /// Emit a progress event every N samples; `None` disables it.
    pub log_every_samples: Option<usize>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: false,
            drop_last: false,
            seed: None,
            log_every_samples: Some(DEFAULT_LOG_EVERY_SAMPLES),
        }
    }
}

impl LoaderConfig {
    pub fn train(batch_size: usize, seed: Option<u64>) -> Self {
        Self {
            batch_size,
            shuffle: true,
            drop_last: true,
            seed,
            ..Default::default()
        }
    }

    pub fn eval(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }
}

pub struct ImageBatch<B: Backend> {
    /// `[N, 3, H, W]`.
    pub images: Tensor<B, 4>,
    /// Class indices, present when every example in the batch is labeled.
    pub targets: Option<Tensor<B, 1, Int>>,
    pub ids: Vec<String>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Re-iterable loader over an example source.
pub struct DataLoader {
    source: Arc<dyn ExampleSource>,
    cfg: LoaderConfig,
    passes: AtomicU64,
}

impl DataLoader {
    pub fn new(source: Arc<dyn ExampleSource>, cfg: LoaderConfig) -> Self {
        Self {
            source,
            cfg,
            passes: AtomicU64::new(0),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.cfg.batch_size.max(1)
    }

    /// Number of examples in the source.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        let len = self.len();
        let bs = self.batch_size();
        if self.cfg.drop_last {
            len / bs
        } else {
            len.div_ceil(bs)
        }
    }

    /// Ids in source order.
    pub fn ids(&self) -> Vec<String> {
        (0..self.source.len())
            .filter_map(|i| self.source.id(i).map(str::to_string))
            .collect()
    }

    /// Start a new pass. Each pass gets a fresh order when shuffling.
    pub fn iter(&self) -> BatchIter<'_> {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        let pass_seed = match self.cfg.seed {
            Some(seed) => seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(pass),
            None => rand::rng().random(),
        };
        let mut indices: Vec<usize> = (0..self.source.len()).collect();
        if self.cfg.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(pass_seed);
            indices.shuffle(&mut rng);
        }
        let now = Instant::now();
        BatchIter {
            loader: self,
            indices,
            cursor: 0,
            pass_seed,
            processed_samples: 0,
            processed_batches: 0,
            started: now,
            total_load_time: Duration::ZERO,
            last_logged_samples: 0,
        }
    }
}

/// One pass over a [`DataLoader`].
pub struct BatchIter<'a> {
    loader: &'a DataLoader,
    indices: Vec<usize>,
    cursor: usize,
    pass_seed: u64,
    processed_samples: usize,
    processed_batches: usize,
    started: Instant,
    total_load_time: Duration,
    last_logged_samples: usize,
}

fn sample_seed(pass_seed: u64, index: usize) -> u64 {
    pass_seed ^ (index as u64).wrapping_add(1).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

impl BatchIter<'_> {
    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<ImageBatch<B>>> {
        let batch_size = self.loader.batch_size();
        if self.cursor >= self.indices.len() {
            return Ok(None);
        }
        let end = (self.cursor + batch_size).min(self.indices.len());
        if self.loader.cfg.drop_last && end - self.cursor < batch_size {
            self.cursor = self.indices.len();
            return Ok(None);
        }
        let slice = &self.indices[self.cursor..end];
        self.cursor = end;

        let source = self.loader.source.as_ref();
        let pass_seed = self.pass_seed;
        let t_load = Instant::now();
        let loaded: Vec<DatasetResult<Example>> = slice
            .par_iter()
            .map(|&index| {
                let mut rng = rand::rngs::StdRng::seed_from_u64(sample_seed(pass_seed, index));
                source.get(index, &mut rng)
            })
            .collect();
        self.total_load_time += t_load.elapsed();

        let mut expected_size: Option<(u32, u32)> = None;
        let mut images_buf: Vec<f32> = Vec::new();
        let mut targets: Vec<i64> = Vec::with_capacity(slice.len());
        let mut labeled = 0usize;
        let mut ids = Vec::with_capacity(slice.len());
        for (&index, res) in slice.iter().zip(loaded) {
            let example = res?;
            let image = example.image();
            let size = (image.width, image.height);
            match expected_size {
                None => {
                    expected_size = Some(size);
                    images_buf.reserve(slice.len() * image.chw.len());
                }
                Some(sz) if sz != size => {
                    return Err(DatasetError::Batch(
                        "batch contains varying image sizes; the pipeline must emit a fixed size"
                            .to_string(),
                    ));
                }
                _ => {}
            }
            images_buf.extend_from_slice(&image.chw);
            if let Some(label) = example.label() {
                targets.push(label as i64);
                labeled += 1;
            }
            ids.push(self.loader.source.id(index).unwrap_or_default().to_string());
        }
        if labeled != 0 && labeled != ids.len() {
            return Err(DatasetError::Batch(
                "batch mixes labeled and unlabeled examples".to_string(),
            ));
        }

        let Some((width, height)) = expected_size else {
            return Ok(None);
        };
        let n = ids.len();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images_buf, [n, 3, height as usize, width as usize]),
            device,
        );
        let targets = (labeled > 0)
            .then(|| Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [n]), device));

        self.processed_samples += n;
        self.processed_batches += 1;
        self.maybe_log_progress();
        Ok(Some(ImageBatch {
            images,
            targets,
            ids,
        }))
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.loader.cfg.log_every_samples else {
            return;
        };
        if self.processed_samples - self.last_logged_samples < threshold {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_load_ms =
            self.total_load_time.as_secs_f64() * 1000.0 / self.processed_batches.max(1) as f64;
        tracing::info!(
            target: "dataset",
            batches = self.processed_batches,
            samples = self.processed_samples,
            rate = self.processed_samples as f32 / secs,
            avg_load_ms,
            "loader progress"
        );
        self.last_logged_samples = self.processed_samples;
    }
}
