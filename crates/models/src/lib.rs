//! Burn image classifiers for dog-breed identification.
//!
//! - `Input`: a single image batch, or several views of the same batch
//!   whose logits are averaged.
//! - `ImageClassifier`: the seam the training and evaluation code drives.
//! - `BreedClassifier`: convolutional feature extractor plus a two-layer
//!   head. The extractor can be frozen so only the head trains.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Model input: one `[N, C, H, W]` batch or several views of it.
#[derive(Debug, Clone)]
pub enum Input<B: Backend> {
    Single(Tensor<B, 4>),
    Multiple(Vec<Tensor<B, 4>>),
}

impl<B: Backend> Input<B> {
    pub fn to_device(self, device: &B::Device) -> Self {
        match self {
            Input::Single(x) => Input::Single(x.to_device(device)),
            Input::Multiple(xs) => {
                Input::Multiple(xs.into_iter().map(|x| x.to_device(device)).collect())
            }
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            Input::Single(x) => x.dims()[0],
            Input::Multiple(xs) => xs.first().map(|x| x.dims()[0]).unwrap_or(0),
        }
    }
}

/// Anything that maps an [`Input`] to `[N, num_classes]` logits.
pub trait ImageClassifier<B: Backend> {
    fn forward_input(&self, input: Input<B>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct BreedClassifierConfig {
    pub num_classes: usize,
    /// Output channels of each conv block; each block halves the resolution.
    pub channels: Vec<usize>,
    pub hidden: usize,
    pub dropout: f64,
    /// Stop gradients at the feature extractor output.
    pub freeze_features: bool,
}

impl Default for BreedClassifierConfig {
    fn default() -> Self {
        Self {
            num_classes: 120,
            channels: vec![32, 64, 128, 256],
            hidden: 256,
            dropout: 0.2,
            freeze_features: true,
        }
    }
}

#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(relu(self.norm.forward(self.conv.forward(x))))
    }
}

/// Conv blocks followed by global average pooling.
#[derive(Debug, Module)]
pub struct FeatureExtractor<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    gap: AdaptiveAvgPool2d,
    out_channels: usize,
}

impl<B: Backend> FeatureExtractor<B> {
    pub fn new(channels: &[usize], device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(channels.len());
        let mut in_channels = 3;
        for &out in channels {
            blocks.push(ConvBlock::new(in_channels, out, device));
            in_channels = out;
        }
        Self {
            blocks,
            gap: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            out_channels: in_channels,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// `[N, 3, H, W]` -> `[N, out_channels]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let pooled = self.gap.forward(x);
        let [n, c, _, _] = pooled.dims();
        pooled.reshape([n, c])
    }
}

#[derive(Debug, Module)]
pub struct ClassifierHead<B: Backend> {
    fc1: nn::Linear<B>,
    dropout: nn::Dropout,
    fc2: nn::Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    fn new(in_features: usize, hidden: usize, num_classes: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            fc1: nn::LinearConfig::new(in_features, hidden).init(device),
            dropout: nn::DropoutConfig::new(dropout).init(),
            fc2: nn::LinearConfig::new(hidden, num_classes).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.fc1.forward(x));
        self.fc2.forward(self.dropout.forward(x))
    }
}

#[derive(Debug, Module)]
pub struct BreedClassifier<B: Backend> {
    features: FeatureExtractor<B>,
    head: ClassifierHead<B>,
    freeze_features: bool,
    num_classes: usize,
}

impl<B: Backend> BreedClassifier<B> {
    pub fn new(cfg: &BreedClassifierConfig, device: &B::Device) -> Self {
        let features = FeatureExtractor::new(&cfg.channels, device);
        let head = ClassifierHead::new(
            features.out_channels(),
            cfg.hidden,
            cfg.num_classes.max(1),
            cfg.dropout,
            device,
        );
        Self {
            features,
            head,
            freeze_features: cfg.freeze_features,
            num_classes: cfg.num_classes.max(1),
        }
    }

    pub fn features(&self) -> &FeatureExtractor<B> {
        &self.features
    }

    /// Swap in a feature extractor, e.g. one restored from a checkpoint.
    pub fn with_features(mut self, features: FeatureExtractor<B>) -> Self {
        self.features = features;
        self
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let feats = self.features.forward(images);
        let feats = if self.freeze_features {
            feats.detach()
        } else {
            feats
        };
        self.head.forward(feats)
    }
}

impl<B: Backend> ImageClassifier<B> for BreedClassifier<B> {
    fn forward_input(&self, input: Input<B>) -> Tensor<B, 2> {
        match input {
            Input::Single(x) => self.forward(x),
            Input::Multiple(views) => {
                let n = views.len();
                let mut logits = views.into_iter().map(|x| self.forward(x));
                match logits.next() {
                    Some(first) => logits.fold(first, |acc, l| acc + l) / n as f64,
                    None => Tensor::zeros([0, self.num_classes], &self.head.fc2.weight.val().device()),
                }
            }
        }
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

pub mod prelude {
    pub use super::{
        BreedClassifier, BreedClassifierConfig, FeatureExtractor, ImageClassifier, Input,
    };
}
