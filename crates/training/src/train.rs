//! SGD training with a step-decay schedule and data-parallel batch splitting.

use crate::animator::Animator;
use crate::eval::{accuracy, cross_entropy_per_example, evaluate_accuracy_inference, evaluate_loss};
use crate::metrics::{Accumulator, Timer};
use crate::schedule::StepDecay;
use breed_dataset::{DataLoader, ImageBatch};
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsAccumulator, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use models::{ImageClassifier, Input};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub num_epochs: usize,
    pub lr: f64,
    /// Weight decay applied by the optimizer.
    pub wd: f64,
    pub momentum: f64,
    pub lr_period: usize,
    pub lr_decay: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            lr: 1e-4,
            wd: 1e-4,
            momentum: 0.9,
            lr_period: 2,
            lr_decay: 0.9,
        }
    }
}

impl TrainConfig {
    pub fn schedule(&self) -> StepDecay {
        StepDecay::new(self.lr, self.lr_period, self.lr_decay)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainReport {
    pub train_loss: f64,
    pub train_acc: f64,
    pub valid_loss: Option<f64>,
    pub valid_acc: Option<f64>,
    /// Last epoch's example count times the epoch count over total step time.
    pub examples_per_sec: f64,
    pub devices: Vec<String>,
}

impl TrainReport {
    pub fn summary(&self) -> String {
        let mut out = format!(
            "train loss {:.3}, train acc {:.3}",
            self.train_loss, self.train_acc
        );
        if let (Some(loss), Some(acc)) = (self.valid_loss, self.valid_acc) {
            out.push_str(&format!(", valid loss {loss:.3}, valid acc {acc:.3}"));
        }
        out.push_str(&format!(
            "\n{:.1} examples/sec on [{}]",
            self.examples_per_sec,
            self.devices.join(", ")
        ));
        out
    }
}

/// Loss sum, correct predictions and example count of one step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    pub loss_sum: f64,
    pub correct: f64,
    pub examples: usize,
}

/// Splits each batch across devices and merges the shard gradients on the
/// primary device before a single optimizer step.
pub struct DataParallel<B: AutodiffBackend> {
    devices: Vec<B::Device>,
}

impl<B: AutodiffBackend> DataParallel<B> {
    pub fn new(devices: Vec<B::Device>) -> anyhow::Result<Self> {
        if devices.is_empty() {
            anyhow::bail!("data-parallel training needs at least one device");
        }
        Ok(Self { devices })
    }

    pub fn primary(&self) -> &B::Device {
        &self.devices[0]
    }

    pub fn devices(&self) -> &[B::Device] {
        &self.devices
    }

    /// Contiguous `(start, len)` shards, one per device, never empty.
    pub fn shard_ranges(&self, n: usize) -> Vec<(usize, usize)> {
        let d = self.devices.len().min(n);
        if d == 0 {
            return Vec::new();
        }
        let base = n / d;
        let rem = n % d;
        let mut start = 0;
        (0..d)
            .map(|i| {
                let len = base + usize::from(i < rem);
                let shard = (start, len);
                start += len;
                shard
            })
            .collect()
    }

    pub fn step<M, O>(
        &self,
        model: M,
        optim: &mut O,
        lr: f64,
        batch: ImageBatch<B>,
    ) -> anyhow::Result<(M, StepStats)>
    where
        M: AutodiffModule<B> + ImageClassifier<B>,
        O: Optimizer<M, B>,
    {
        let Some(targets) = batch.targets else {
            anyhow::bail!("training needs labeled batches");
        };
        let n = batch.images.dims()[0];
        let primary = self.primary();
        let mut accumulator = GradientsAccumulator::<M>::new();
        let mut stats = StepStats::default();
        for ((start, len), device) in self.shard_ranges(n).into_iter().zip(&self.devices) {
            let replica = if device == primary {
                model.clone()
            } else {
                model.clone().fork(device)
            };
            let x = batch.images.clone().slice([start..start + len]).to_device(device);
            let y = targets.clone().slice([start..start + len]).to_device(device);
            let logits = replica.forward_input(Input::Single(x));
            let loss = cross_entropy_per_example(logits.clone(), y.clone()).sum();
            stats.loss_sum += loss.clone().into_scalar().elem::<f64>();
            stats.correct += accuracy(logits.detach(), y);
            stats.examples += len;
            let grads = GradientsParams::from_grads(loss.backward(), &replica)
                .to_device(primary, &model);
            accumulator.accumulate(&model, grads);
        }
        let grads = accumulator.grads();
        Ok((optim.step(lr, model, grads), stats))
    }
}

/// Train `model` for `cfg.num_epochs` epochs.
///
/// Progress points go to `animator` five times per epoch and on the last
/// batch; validation points once per epoch when `valid_loader` is given.
pub fn train<B, M>(
    model: M,
    train_loader: &DataLoader,
    valid_loader: Option<&DataLoader>,
    cfg: &TrainConfig,
    devices: &[B::Device],
    animator: &mut Animator,
) -> anyhow::Result<(M, TrainReport)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
{
    let dp = DataParallel::<B>::new(devices.to_vec())?;
    let mut model = model.fork(dp.primary());
    let mut optim = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(cfg.momentum)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(cfg.wd as f32)))
        .init::<B, M>();
    let schedule = cfg.schedule();
    let num_batches = train_loader.num_batches();
    let log_every = (num_batches / 5).max(1);
    let width = if valid_loader.is_some() { 4 } else { 2 };
    let mut timer = Timer::new();
    // loss sum, correct predictions, examples
    let mut metric = Accumulator::new(3);
    let mut valid = None;

    tracing::info!(
        epochs = cfg.num_epochs,
        num_batches,
        devices = dp.devices().len(),
        "starting training"
    );
    for epoch in 0..cfg.num_epochs {
        metric.reset();
        let lr = schedule.lr_at(epoch);
        let mut iter = train_loader.iter();
        let mut i = 0usize;
        while let Some(batch) = iter.next_batch::<B>(dp.primary())? {
            timer.start();
            let (next, stats) = dp.step(model, &mut optim, lr, batch)?;
            model = next;
            metric.add(&[stats.loss_sum, stats.correct, stats.examples as f64]);
            timer.stop();
            if (i + 1) % log_every == 0 || i + 1 == num_batches {
                let ys = [
                    Some(metric[0] / metric[2]),
                    Some(metric[1] / metric[2]),
                    None,
                    None,
                ];
                animator.add(epoch as f64 + (i + 1) as f64 / num_batches as f64, &ys[..width])?;
            }
            i += 1;
        }
        if let Some(valid_loader) = valid_loader {
            let eval_model = model.valid();
            let valid_loss =
                evaluate_loss::<B::InnerBackend, _>(valid_loader, &eval_model, devices)?;
            let valid_acc = evaluate_accuracy_inference::<B::InnerBackend, _>(
                &eval_model,
                valid_loader,
                dp.primary(),
            )?;
            animator.add(
                (epoch + 1) as f64,
                &[None, None, Some(valid_loss), Some(valid_acc)],
            )?;
            valid = Some((valid_loss, valid_acc));
        }
        tracing::debug!(epoch, lr, "epoch finished");
    }

    let report = TrainReport {
        train_loss: metric[0] / metric[2],
        train_acc: metric[1] / metric[2],
        valid_loss: valid.map(|(loss, _)| loss),
        valid_acc: valid.map(|(_, acc)| acc),
        examples_per_sec: metric[2] * cfg.num_epochs as f64 / timer.sum(),
        devices: devices.iter().map(|d| format!("{d:?}")).collect(),
    };
    tracing::info!("{}", report.summary());
    Ok((model, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animator::NullSink;
    use crate::eval::tests::FixedLabels;
    use breed_dataset::LoaderConfig;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use models::{BreedClassifier, BreedClassifierConfig};
    use std::sync::Arc;

    type AB = Autodiff<NdArray<f32>>;

    fn tiny_model(device: &<AB as burn::tensor::backend::Backend>::Device) -> BreedClassifier<AB> {
        let cfg = BreedClassifierConfig {
            num_classes: 2,
            channels: vec![4],
            hidden: 4,
            dropout: 0.0,
            freeze_features: false,
        };
        BreedClassifier::new(&cfg, device)
    }

    #[test]
    fn shards_are_contiguous_and_cover_the_batch() {
        let dp = DataParallel::<AB>::new(vec![Default::default(); 3]).unwrap();
        assert_eq!(dp.shard_ranges(7), vec![(0, 3), (3, 2), (5, 2)]);
        assert_eq!(dp.shard_ranges(2), vec![(0, 1), (1, 1)]);
        assert!(dp.shard_ranges(0).is_empty());
    }

    #[test]
    fn data_parallel_needs_a_device() {
        assert!(DataParallel::<AB>::new(Vec::new()).is_err());
    }

    #[test]
    fn sharded_step_counts_every_example() {
        let device = Default::default();
        let dp = DataParallel::<AB>::new(vec![device; 2]).unwrap();
        let model = tiny_model(&device);
        let mut optim = SgdConfig::new().init::<AB, BreedClassifier<AB>>();
        let loader = DataLoader::new(
            Arc::new(FixedLabels::new(vec![0, 1, 1, 0, 1])),
            LoaderConfig::eval(5),
        );
        let batch = loader.iter().next_batch::<AB>(&device).unwrap().unwrap();
        let (_model, stats) = dp.step(model, &mut optim, 0.1, batch).unwrap();
        assert_eq!(stats.examples, 5);
        assert!(stats.loss_sum.is_finite() && stats.loss_sum > 0.0);
        assert!((0.0..=5.0).contains(&stats.correct));
    }

    #[test]
    fn train_reports_metrics_and_plots_progress() {
        let device = Default::default();
        let train_loader = DataLoader::new(
            Arc::new(FixedLabels::new(vec![0, 1, 0, 1])),
            LoaderConfig::train(2, Some(1)),
        );
        let valid_loader = DataLoader::new(
            Arc::new(FixedLabels::new(vec![0, 1])),
            LoaderConfig::eval(2),
        );
        let cfg = TrainConfig {
            num_epochs: 2,
            lr: 0.01,
            ..Default::default()
        };
        let mut animator = Animator::for_training(cfg.num_epochs, true, Box::new(NullSink));
        let (_model, report) = train(
            tiny_model(&device),
            &train_loader,
            Some(&valid_loader),
            &cfg,
            &[device],
            &mut animator,
        )
        .unwrap();

        assert!(report.train_loss.is_finite());
        assert!((0.0..=1.0).contains(&report.train_acc));
        assert!(report.valid_loss.is_some_and(f64::is_finite));
        assert!(report.valid_acc.is_some());
        assert_eq!(report.devices.len(), 1);
        // Two batches per epoch, one point each; one validation point per epoch.
        assert_eq!(animator.series()[0].len(), 4);
        assert_eq!(animator.series()[3].len(), 2);
        assert_eq!(animator.series()[0][1].0, 1.0);
    }

    #[test]
    fn summary_mentions_throughput() {
        let report = TrainReport {
            train_loss: 0.5,
            train_acc: 0.75,
            valid_loss: None,
            valid_acc: None,
            examples_per_sec: 12.34,
            devices: vec!["Cpu".into()],
        };
        assert_eq!(
            report.summary(),
            "train loss 0.500, train acc 0.750\n12.3 examples/sec on [Cpu]"
        );
    }
}
