//! Train-time and test-time image transform pipelines.

use crate::types::ImageTensor;
use image::imageops::FilterType;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Per-channel normalization applied after scaling pixels to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

/// Shared parameters for both pipelines.
///
/// Train and test pipelines built from the same config always share the
/// normalization constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Side of the square network input.
    pub image_size: u32,
    /// Shorter-side resize before the test-time center crop.
    pub resize: u32,
    /// Crop area range, as a fraction of the source area.
    pub crop_scale: (f32, f32),
    /// Crop aspect-ratio range (width / height).
    pub crop_ratio: (f32, f32),
    pub flip_horizontal_prob: f32,
    /// Max relative change for brightness, contrast and saturation.
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub normalization: Normalization,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            resize: 256,
            crop_scale: (0.08, 1.0),
            crop_ratio: (3.0 / 4.0, 4.0 / 3.0),
            flip_horizontal_prob: 0.5,
            brightness: 0.4,
            contrast: 0.4,
            saturation: 0.4,
            normalization: Normalization::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Random resized crop, flip, color jitter, normalize.
    Train,
    /// Resize, center crop, normalize.
    Test,
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub kind: PipelineKind,
    pub image_size: u32,
    pub resize: u32,
    pub crop_scale: (f32, f32),
    pub crop_ratio: (f32, f32),
    pub flip_horizontal_prob: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub normalization: Normalization,
}

impl TransformPipeline {
    fn from_config(kind: PipelineKind, cfg: &AugmentConfig) -> Self {
        Self {
            kind,
            image_size: cfg.image_size,
            resize: cfg.resize,
            crop_scale: cfg.crop_scale,
            crop_ratio: cfg.crop_ratio,
            flip_horizontal_prob: cfg.flip_horizontal_prob,
            brightness: cfg.brightness,
            contrast: cfg.contrast,
            saturation: cfg.saturation,
            normalization: cfg.normalization,
        }
    }

    pub fn train(cfg: &AugmentConfig) -> Self {
        Self::from_config(PipelineKind::Train, cfg)
    }

    pub fn test(cfg: &AugmentConfig) -> Self {
        Self::from_config(PipelineKind::Test, cfg)
    }

    pub fn describe(&self) -> String {
        match self.kind {
            PipelineKind::Train => format!(
                "train size={} scale=[{:.2},{:.2}] ratio=[{:.3},{:.3}] flip_p={:.2} jitter=({:.2},{:.2},{:.2}) mean={:?} std={:?}",
                self.image_size,
                self.crop_scale.0,
                self.crop_scale.1,
                self.crop_ratio.0,
                self.crop_ratio.1,
                self.flip_horizontal_prob,
                self.brightness,
                self.contrast,
                self.saturation,
                self.normalization.mean,
                self.normalization.std,
            ),
            PipelineKind::Test => format!(
                "test resize={} crop={} mean={:?} std={:?}",
                self.resize, self.image_size, self.normalization.mean, self.normalization.std,
            ),
        }
    }

    /// Transform one decoded image into a normalized CHW tensor of
    /// `3 x image_size x image_size`.
    pub fn apply(&self, img: image::RgbImage, rng: &mut dyn rand::RngCore) -> ImageTensor {
        let img = match self.kind {
            PipelineKind::Train => {
                let mut img = random_resized_crop(
                    &img,
                    self.image_size,
                    self.crop_scale,
                    self.crop_ratio,
                    rng,
                );
                maybe_hflip(&mut img, self.flip_horizontal_prob, rng);
                color_jitter(
                    &mut img,
                    self.brightness,
                    self.contrast,
                    self.saturation,
                    rng,
                );
                img
            }
            PipelineKind::Test => {
                let resized = resize_shorter_side(&img, self.resize);
                center_crop(&resized, self.image_size)
            }
        };
        to_tensor_normalized(&img, &self.normalization)
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl TransformPipelineBuilder {
    pub fn new(kind: PipelineKind) -> Self {
        Self {
            inner: TransformPipeline::from_config(kind, &AugmentConfig::default()),
        }
    }
    pub fn image_size(mut self, size: u32) -> Self {
        self.inner.image_size = size;
        self
    }
    pub fn resize(mut self, size: u32) -> Self {
        self.inner.resize = size;
        self
    }
    pub fn crop_scale(mut self, min: f32, max: f32) -> Self {
        self.inner.crop_scale = (min, max);
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn color_jitter(mut self, brightness: f32, contrast: f32, saturation: f32) -> Self {
        self.inner.brightness = brightness;
        self.inner.contrast = contrast;
        self.inner.saturation = saturation;
        self
    }
    pub fn normalization(mut self, normalization: Normalization) -> Self {
        self.inner.normalization = normalization;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

fn uniform(rng: &mut dyn rand::RngCore, lo: f32, hi: f32) -> f32 {
    if lo >= hi {
        lo
    } else {
        rng.random_range(lo..hi)
    }
}

/// Crop a random region covering `scale` of the area with an aspect ratio in
/// `ratio`, then resize it to `size x size`. After ten failed draws the
/// largest centered crop within the ratio bounds is used.
pub(crate) fn random_resized_crop(
    img: &image::RgbImage,
    size: u32,
    scale: (f32, f32),
    ratio: (f32, f32),
    rng: &mut dyn rand::RngCore,
) -> image::RgbImage {
    let (x, y, w, h) = random_crop_params(img.width(), img.height(), scale, ratio, rng);
    let cropped = image::imageops::crop_imm(img, x, y, w, h).to_image();
    image::imageops::resize(&cropped, size, size, FilterType::Triangle)
}

pub(crate) fn random_crop_params(
    width: u32,
    height: u32,
    scale: (f32, f32),
    ratio: (f32, f32),
    rng: &mut dyn rand::RngCore,
) -> (u32, u32, u32, u32) {
    let area = (width as f32) * (height as f32);
    let log_ratio = (ratio.0.ln(), ratio.1.ln());
    for _ in 0..10 {
        let target_area = area * uniform(rng, scale.0, scale.1);
        let aspect = uniform(rng, log_ratio.0, log_ratio.1).exp();
        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;
        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.random_range(0..=width - w);
            let y = rng.random_range(0..=height - h);
            return (x, y, w, h);
        }
    }

    let in_ratio = width as f32 / height.max(1) as f32;
    let (w, h) = if in_ratio < ratio.0.min(ratio.1) {
        (width, ((width as f32 / ratio.0.min(ratio.1)).round() as u32).min(height))
    } else if in_ratio > ratio.0.max(ratio.1) {
        (((height as f32 * ratio.0.max(ratio.1)).round() as u32).min(width), height)
    } else {
        (width, height)
    };
    ((width - w) / 2, (height - h) / 2, w.max(1), h.max(1))
}

pub(crate) fn maybe_hflip(img: &mut image::RgbImage, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
    }
}

/// Brightness, contrast and saturation jitter in a random order, each factor
/// drawn from `[max(0, 1 - s), 1 + s]`.
pub(crate) fn color_jitter(
    img: &mut image::RgbImage,
    brightness: f32,
    contrast: f32,
    saturation: f32,
    rng: &mut dyn rand::RngCore,
) {
    let mut order = [0usize, 1, 2];
    order.shuffle(rng);
    for op in order {
        match op {
            0 if brightness > 0.0 => {
                let f = uniform(rng, (1.0 - brightness).max(0.0), 1.0 + brightness);
                adjust_brightness(img, f);
            }
            1 if contrast > 0.0 => {
                let f = uniform(rng, (1.0 - contrast).max(0.0), 1.0 + contrast);
                adjust_contrast(img, f);
            }
            2 if saturation > 0.0 => {
                let f = uniform(rng, (1.0 - saturation).max(0.0), 1.0 + saturation);
                adjust_saturation(img, f);
            }
            _ => {}
        }
    }
}

fn luma(p: &image::Rgb<u8>) -> f32 {
    (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32) / 255.0
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub(crate) fn adjust_brightness(img: &mut image::RgbImage, factor: f32) {
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            pixel[c] = to_u8(pixel[c] as f32 / 255.0 * factor);
        }
    }
}

pub(crate) fn adjust_contrast(img: &mut image::RgbImage, factor: f32) {
    let count = (img.width() as usize * img.height() as usize).max(1);
    let mean = img.pixels().map(luma).sum::<f32>() / count as f32;
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            pixel[c] = to_u8((v - mean) * factor + mean);
        }
    }
}

pub(crate) fn adjust_saturation(img: &mut image::RgbImage, factor: f32) {
    for pixel in img.pixels_mut() {
        let gray = luma(pixel);
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            pixel[c] = to_u8(gray + (v - gray) * factor);
        }
    }
}

/// Resize so the shorter side equals `size`, keeping the aspect ratio.
pub(crate) fn resize_shorter_side(img: &image::RgbImage, size: u32) -> image::RgbImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let (new_w, new_h) = if w <= h {
        (size, ((size as u64 * h as u64) / w as u64) as u32)
    } else {
        (((size as u64 * w as u64) / h as u64) as u32, size)
    };
    if (new_w, new_h) == (w, h) {
        return img.clone();
    }
    image::imageops::resize(img, new_w.max(1), new_h.max(1), FilterType::Triangle)
}

/// Center `size x size` window; zero-padded when the image is smaller.
pub(crate) fn center_crop(img: &image::RgbImage, size: u32) -> image::RgbImage {
    let (w, h) = img.dimensions();
    // ties round to even
    let x0 = ((w as f64 - size as f64) / 2.0).round_ties_even() as i64;
    let y0 = ((h as f64 - size as f64) / 2.0).round_ties_even() as i64;
    let mut canvas = image::RgbImage::new(size, size);
    image::imageops::replace(&mut canvas, img, -x0, -y0);
    canvas
}

pub fn to_tensor_normalized(img: &image::RgbImage, norm: &Normalization) -> ImageTensor {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        for c in 0..3 {
            chw[c * plane + base] = (pixel[c] as f32 / 255.0 - norm.mean[c]) / norm.std[c];
        }
    }
    ImageTensor { chw, height, width }
}
