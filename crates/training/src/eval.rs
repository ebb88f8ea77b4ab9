//! Accuracy and loss evaluation over data loaders.

use crate::metrics::Accumulator;
use breed_dataset::{DataLoader, ImageBatch};
use burn::module::AutodiffModule;
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor};
use models::{ImageClassifier, Input};

/// Number of rows whose prediction equals the target.
///
/// Multi-column predictions are reduced with arg-max; a single column is
/// cast to the target type directly.
pub fn accuracy<B: Backend>(y_hat: Tensor<B, 2>, y: Tensor<B, 1, Int>) -> f64 {
    let [n, cols] = y_hat.dims();
    let pred: Tensor<B, 1, Int> = if cols > 1 {
        y_hat.argmax(1).reshape([n])
    } else {
        y_hat.reshape([n]).int()
    };
    pred.equal(y).int().sum().into_scalar().elem::<i64>() as f64
}

/// Unreduced cross-entropy: `-log_softmax(logits)[i, target_i]`.
pub fn cross_entropy_per_example<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let [n, _] = logits.dims();
    log_softmax(logits, 1)
        .gather(1, targets.reshape([n, 1]))
        .reshape([n])
        .neg()
}

fn labeled<B: Backend>(
    batch: ImageBatch<B>,
    device: &B::Device,
) -> anyhow::Result<(Input<B>, Tensor<B, 1, Int>)> {
    let Some(targets) = batch.targets else {
        anyhow::bail!("evaluation needs labeled batches");
    };
    Ok((
        Input::Single(batch.images).to_device(device),
        targets.to_device(device),
    ))
}

/// Fraction of correct predictions, with the model in evaluation mode and
/// gradients off. An empty loader yields NaN.
pub fn evaluate_accuracy<B, M>(model: &M, loader: &DataLoader, device: &B::Device) -> anyhow::Result<f64>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
{
    let model = model.valid();
    evaluate_accuracy_inference::<B::InnerBackend, _>(&model, loader, device)
}

/// [`evaluate_accuracy`] for a model that already lives on an inference backend.
pub fn evaluate_accuracy_inference<B, M>(
    model: &M,
    loader: &DataLoader,
    device: &B::Device,
) -> anyhow::Result<f64>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    // correct predictions, predictions
    let mut metric = Accumulator::new(2);
    let mut iter = loader.iter();
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let (input, targets) = labeled(batch, device)?;
        let n = input.batch_size();
        let y_hat = model.forward_input(input);
        metric.add(&[accuracy(y_hat, targets), n as f64]);
    }
    Ok(metric[0] / metric[1])
}

/// Mean per-example cross-entropy on `devices[0]`.
pub fn evaluate_loss<B, M>(loader: &DataLoader, model: &M, devices: &[B::Device]) -> anyhow::Result<f64>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    let Some(device) = devices.first() else {
        anyhow::bail!("evaluate_loss needs at least one device");
    };
    // loss sum, examples
    let mut metric = Accumulator::new(2);
    let mut iter = loader.iter();
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let (input, targets) = labeled(batch, device)?;
        let n = input.batch_size();
        let losses = cross_entropy_per_example(model.forward_input(input), targets);
        metric.add(&[losses.sum().into_scalar().elem::<f64>(), n as f64]);
    }
    Ok(metric[0] / metric[1])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use breed_dataset::{DatasetResult, Example, ExampleSource, ImageTensor, LoaderConfig};
    use burn::backend::Autodiff;
    use burn::module::{Module, Param};
    use burn::nn::{Linear, LinearConfig};
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use std::sync::Arc;

    type B = NdArray<f32>;

    /// Labeled 2x2 images with the given labels.
    pub(crate) struct FixedLabels {
        pub labels: Vec<usize>,
        pub ids: Vec<String>,
    }

    impl FixedLabels {
        pub fn new(labels: Vec<usize>) -> Self {
            let ids = (0..labels.len()).map(|i| format!("ex{i}")).collect();
            Self { labels, ids }
        }
    }

    impl ExampleSource for FixedLabels {
        fn len(&self) -> usize {
            self.labels.len()
        }
        fn id(&self, index: usize) -> Option<&str> {
            self.ids.get(index).map(String::as_str)
        }
        fn get(&self, index: usize, _rng: &mut dyn rand::RngCore) -> DatasetResult<Example> {
            Ok(Example::Labeled {
                image: ImageTensor {
                    chw: vec![0.5; 12],
                    height: 2,
                    width: 2,
                },
                label: self.labels[index],
            })
        }
    }

    /// Always predicts class 0 out of two.
    pub(crate) struct AlwaysFirst;

    impl<Bk: Backend> ImageClassifier<Bk> for AlwaysFirst {
        fn forward_input(&self, input: Input<Bk>) -> Tensor<Bk, 2> {
            let n = input.batch_size();
            let device = match &input {
                Input::Single(x) => x.device(),
                Input::Multiple(xs) => xs.first().map(|x| x.device()).unwrap_or_default(),
            };
            let rows: Vec<f32> = (0..n).flat_map(|_| [1.0, 0.0]).collect();
            Tensor::from_data(TensorData::new(rows, [n, 2]), &device)
        }

        fn num_classes(&self) -> usize {
            2
        }
    }

    /// 2x2 images that are 1.0 in one channel and 0.0 elsewhere.
    struct DominantChannel {
        channels: Vec<usize>,
        labels: Vec<usize>,
    }

    impl ExampleSource for DominantChannel {
        fn len(&self) -> usize {
            self.labels.len()
        }
        fn id(&self, _index: usize) -> Option<&str> {
            None
        }
        fn get(&self, index: usize, _rng: &mut dyn rand::RngCore) -> DatasetResult<Example> {
            let mut chw = vec![0.0; 12];
            let c = self.channels[index];
            chw[c * 4..(c + 1) * 4].fill(1.0);
            Ok(Example::Labeled {
                image: ImageTensor {
                    chw,
                    height: 2,
                    width: 2,
                },
                label: self.labels[index],
            })
        }
    }

    /// Pools each channel and projects through an identity layer, so the
    /// predicted class is the brightest channel.
    #[derive(Module, Debug)]
    struct ChannelVote<Bk: Backend> {
        proj: Linear<Bk>,
    }

    impl<Bk: Backend> ChannelVote<Bk> {
        fn new(device: &Bk::Device) -> Self {
            let mut proj = LinearConfig::new(3, 3).with_bias(false).init(device);
            let eye = vec![1.0f32, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
            proj.weight = Param::from_tensor(Tensor::from_data(TensorData::new(eye, [3, 3]), device));
            Self { proj }
        }
    }

    impl<Bk: Backend> ImageClassifier<Bk> for ChannelVote<Bk> {
        fn forward_input(&self, input: Input<Bk>) -> Tensor<Bk, 2> {
            let Input::Single(x) = input else {
                panic!("single view only");
            };
            let [n, c, _, _] = x.dims();
            self.proj.forward(x.mean_dim(3).mean_dim(2).reshape([n, c]))
        }

        fn num_classes(&self) -> usize {
            3
        }
    }

    fn ints(values: Vec<i64>) -> Tensor<B, 1, Int> {
        let n = values.len();
        Tensor::from_data(TensorData::new(values, [n]), &Default::default())
    }

    #[test]
    fn accuracy_counts_argmax_matches() {
        // argmax per row is [0, 1, 1] against labels [0, 1, 2]
        let y_hat = Tensor::<B, 2>::from_data(
            TensorData::new(vec![0.6f32, 0.3, 0.1, 0.2, 0.7, 0.1, 0.1, 0.5, 0.4], [3, 3]),
            &Default::default(),
        );
        assert_eq!(accuracy(y_hat, ints(vec![0, 1, 2])), 2.0);
    }

    #[test]
    fn evaluate_accuracy_runs_the_inference_model() {
        type AB = Autodiff<B>;
        let device = Default::default();
        let model = ChannelVote::<AB>::new(&device);
        let loader = DataLoader::new(
            Arc::new(DominantChannel {
                channels: vec![0, 1, 1],
                labels: vec![0, 1, 2],
            }),
            LoaderConfig::eval(3),
        );
        assert_eq!(loader.num_batches(), 1);
        let acc = evaluate_accuracy::<AB, _>(&model, &loader, &device).unwrap();
        assert!((acc - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn accuracy_casts_single_column() {
        let y_hat = Tensor::<B, 2>::from_data(
            TensorData::new(vec![1.0f32, 0.0], [2, 1]),
            &Default::default(),
        );
        assert_eq!(accuracy(y_hat, ints(vec![1, 1])), 1.0);
    }

    #[test]
    fn uniform_logits_give_log_k_loss() {
        let logits = Tensor::<B, 2>::zeros([2, 4], &Default::default());
        let losses = cross_entropy_per_example(logits, ints(vec![0, 3]));
        let values = losses.into_data().to_vec::<f32>().unwrap();
        for v in values {
            assert!((v - 4f32.ln()).abs() < 1e-5);
        }
    }

    #[test]
    fn evaluate_accuracy_over_loader() {
        let loader = DataLoader::new(
            Arc::new(FixedLabels::new(vec![0, 0, 1])),
            LoaderConfig::eval(2),
        );
        let acc = evaluate_accuracy_inference::<B, _>(&AlwaysFirst, &loader, &Default::default())
            .unwrap();
        assert!((acc - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn evaluate_loss_is_mean_cross_entropy() {
        let loader = DataLoader::new(
            Arc::new(FixedLabels::new(vec![0, 1, 0, 1])),
            LoaderConfig::eval(3),
        );
        let devices = [Default::default()];
        let loss = evaluate_loss::<B, _>(&loader, &AlwaysFirst, &devices).unwrap();
        let log_z = (1f64.exp() + 1.0).ln();
        let expected = ((log_z - 1.0) + log_z) / 2.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn evaluate_loss_requires_a_device() {
        let loader = DataLoader::new(Arc::new(FixedLabels::new(vec![0])), LoaderConfig::eval(1));
        assert!(evaluate_loss::<B, _>(&loader, &AlwaysFirst, &[]).is_err());
    }

    #[test]
    fn empty_loader_accuracy_is_nan() {
        let loader = DataLoader::new(Arc::new(FixedLabels::new(vec![])), LoaderConfig::eval(1));
        let acc = evaluate_accuracy_inference::<B, _>(&AlwaysFirst, &loader, &Default::default())
            .unwrap();
        assert!(acc.is_nan());
    }
}
