//! Accelerator discovery and device selection.

use crate::TrainBackend;
use std::process::Command;

pub type TrainDevice = <TrainBackend as burn::tensor::backend::Backend>::Device;

/// Reports how many accelerators the host exposes.
pub trait DeviceProbe {
    fn accelerator_count(&self) -> usize;
}

/// Counts GPUs listed by `nvidia-smi -L`; zero when the tool is missing.
pub struct NvidiaSmiProbe;

impl DeviceProbe for NvidiaSmiProbe {
    fn accelerator_count(&self) -> usize {
        let output = match Command::new("nvidia-smi").arg("-L").output() {
            Ok(output) if output.status.success() => output,
            _ => return 0,
        };
        count_gpu_lines(&String::from_utf8_lossy(&output.stdout))
    }
}

fn count_gpu_lines(listing: &str) -> usize {
    listing
        .lines()
        .filter(|line| line.trim_start().starts_with("GPU "))
        .count()
}

/// A probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub usize);

impl DeviceProbe for FixedProbe {
    fn accelerator_count(&self) -> usize {
        self.0
    }
}

pub fn platform_probe() -> Box<dyn DeviceProbe> {
    Box::new(NvidiaSmiProbe)
}

#[cfg(feature = "backend-wgpu")]
fn accelerator(i: usize) -> Option<TrainDevice> {
    Some(burn_wgpu::WgpuDevice::DiscreteGpu(i))
}

#[cfg(not(feature = "backend-wgpu"))]
fn accelerator(_i: usize) -> Option<TrainDevice> {
    None
}

/// Accelerator `i` when it exists, otherwise the default device.
pub fn try_gpu(probe: &dyn DeviceProbe, i: usize) -> TrainDevice {
    if probe.accelerator_count() > i {
        if let Some(device) = accelerator(i) {
            return device;
        }
    }
    TrainDevice::default()
}

/// Every accelerator, or just the default device when there are none.
pub fn try_all_gpus(probe: &dyn DeviceProbe) -> Vec<TrainDevice> {
    let devices: Vec<TrainDevice> = (0..probe.accelerator_count())
        .filter_map(accelerator)
        .collect();
    if devices.is_empty() {
        vec![TrainDevice::default()]
    } else {
        devices
    }
}
