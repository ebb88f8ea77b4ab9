#![recursion_limit = "256"]

pub mod animator;
pub mod config;
pub mod devices;
pub mod eval;
pub mod metrics;
pub mod schedule;
pub mod submission;
pub mod train;
pub mod util;

pub use animator::{Animator, JsonlSink, LogSink, NullSink, PlotFrame, PlotSink};
pub use config::{ExperimentConfig, ModelConfig};
pub use devices::{platform_probe, try_all_gpus, try_gpu, DeviceProbe, FixedProbe, NvidiaSmiProbe};
pub use eval::{
    accuracy, cross_entropy_per_example, evaluate_accuracy, evaluate_accuracy_inference,
    evaluate_loss,
};
pub use metrics::{Accumulator, Timer};
pub use models::{BreedClassifier, BreedClassifierConfig, ImageClassifier, Input};
pub use schedule::StepDecay;
pub use submission::{predict_probabilities, write_submission, write_submission_from_model};
pub use train::{train, DataParallel, StepStats, TrainConfig, TrainReport};
pub use util::{run_reorg, run_submit, run_train, ReorgArgs, SubmitArgs, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
