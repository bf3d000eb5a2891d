use candle_core::{Device, Tensor};
use image::{imageops::FilterType, DynamicImage};
use serde::Deserialize;

/// Older processor configs carry a single edge length, newer ones an
/// explicit height/width object.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(untagged)]
pub enum SizeSpec {
    Edge(u32),
    Dims { height: u32, width: u32 },
}

impl SizeSpec {
    pub fn dims(&self) -> (u32, u32) {
        match *self {
            SizeSpec::Edge(edge) => (edge, edge),
            SizeSpec::Dims { height, width } => (height, width),
        }
    }
}

fn default_size() -> SizeSpec {
    SizeSpec::Edge(224)
}

fn default_mean() -> Vec<f64> {
    vec![0.5, 0.5, 0.5]
}

fn default_std() -> Vec<f64> {
    vec![0.5, 0.5, 0.5]
}

fn default_rescale() -> f64 {
    1.0 / 255.0
}

fn default_true() -> bool {
    true
}

/// The subset of `preprocessor_config.json` the adapter honors. Unknown
/// members are ignored; absent ones fall back to the standard ViT values.
#[derive(Clone, Debug, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_size")]
    pub size: SizeSpec,
    #[serde(default = "default_mean")]
    pub image_mean: Vec<f64>,
    #[serde(default = "default_std")]
    pub image_std: Vec<f64>,
    #[serde(default = "default_rescale")]
    pub rescale_factor: f64,
    #[serde(default = "default_true")]
    pub do_resize: bool,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            image_mean: default_mean(),
            image_std: default_std(),
            rescale_factor: default_rescale(),
            do_resize: true,
            do_rescale: true,
            do_normalize: true,
        }
    }
}

/// Resize, rescale, and normalize an image into the 1x3xHxW input tensor the
/// classifier expects.
pub fn to_tensor(
    img: &DynamicImage,
    cfg: &ProcessorConfig,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let (height, width) = cfg.size.dims();
    let resized = if cfg.do_resize {
        img.resize_exact(width, height, FilterType::CatmullRom)
    } else {
        img.clone()
    };
    let rgb = resized.to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let mean = channel_triple(&cfg.image_mean);
    let std = channel_triple(&cfg.image_std);

    let mut data = vec![0f32; 3 * h * w];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let mut v = pixel[c] as f64;
            if cfg.do_rescale {
                v *= cfg.rescale_factor;
            }
            if cfg.do_normalize {
                v = (v - mean[c]) / std[c];
            }
            data[c * h * w + (y as usize) * w + (x as usize)] = v as f32;
        }
    }
    Tensor::from_vec(data, (3, h, w), device)?.unsqueeze(0)
}

fn channel_triple(values: &[f64]) -> [f64; 3] {
    let mut out = [0.5f64; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        if let Some(v) = values.get(c) {
            *slot = *v;
        }
    }
    out
}
