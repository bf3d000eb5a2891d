use crate::preprocess::{self, ProcessorConfig};
use candle_core::{DType, Device, Module, D};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use image::DynamicImage;
use leaf_core::vision::{round4, Prediction, TopPrediction};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const CONFIG_FILE: &str = "config.json";
pub const PROCESSOR_FILE: &str = "preprocessor_config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("model directory not found: {}", .0.display())]
    ModelDirMissing(PathBuf),
    #[error("missing model files: {missing} in {}", .dir.display())]
    MissingArtifacts { missing: String, dir: PathBuf },
    #[error("model load failed: {0}")]
    Load(String),
    #[error("could not decode uploaded image: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Deserialize)]
struct LabelIndex {
    id2label: Option<HashMap<String, String>>,
}

/// Pretrained ViT image classifier loaded from a local artifact directory
/// (`config.json`, `preprocessor_config.json`, `model.safetensors`).
pub struct Classifier {
    model: vit::Model,
    processor: ProcessorConfig,
    labels: HashMap<usize, String>,
    device: Device,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("labels", &self.labels)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl Classifier {
    /// Loads the checkpoint. Absent artifacts produce a descriptive error
    /// naming exactly what is missing; the caller surfaces it per-request.
    pub fn load(dir: &Path) -> Result<Self, VisionError> {
        if !dir.is_dir() {
            return Err(VisionError::ModelDirMissing(dir.to_path_buf()));
        }
        let missing: Vec<&str> = [CONFIG_FILE, PROCESSOR_FILE, WEIGHTS_FILE]
            .into_iter()
            .filter(|name| !dir.join(name).exists())
            .collect();
        if !missing.is_empty() {
            return Err(VisionError::MissingArtifacts {
                missing: missing.join(", "),
                dir: dir.to_path_buf(),
            });
        }

        let raw_config = fs::read_to_string(dir.join(CONFIG_FILE))
            .map_err(|e| VisionError::Load(e.to_string()))?;
        let config: vit::Config = serde_json::from_str(&raw_config)
            .map_err(|e| VisionError::Load(format!("invalid {CONFIG_FILE}: {e}")))?;
        let labels = parse_labels(&raw_config)?;
        let num_classes = labels.keys().max().map(|m| m + 1).unwrap_or(0);
        if num_classes == 0 {
            return Err(VisionError::Load(format!(
                "{CONFIG_FILE} carries no id2label mapping"
            )));
        }

        let raw_processor = fs::read_to_string(dir.join(PROCESSOR_FILE))
            .map_err(|e| VisionError::Load(e.to_string()))?;
        let processor: ProcessorConfig = serde_json::from_str(&raw_processor)
            .map_err(|e| VisionError::Load(format!("invalid {PROCESSOR_FILE}: {e}")))?;

        let device = Device::Cpu;
        let weights =
            fs::read(dir.join(WEIGHTS_FILE)).map_err(|e| VisionError::Load(e.to_string()))?;
        let vb = VarBuilder::from_buffered_safetensors(weights, DType::F32, &device)
            .map_err(|e| VisionError::Load(e.to_string()))?;
        let model = vit::Model::new(&config, num_classes, vb)
            .map_err(|e| VisionError::Load(e.to_string()))?;

        info!(
            target: "vision",
            "loaded classifier with {num_classes} classes from {}", dir.display()
        );
        Ok(Self { model, processor, labels, device })
    }

    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction, VisionError> {
        let img = image::load_from_memory(bytes).map_err(|e| VisionError::Decode(e.to_string()))?;
        self.predict(&img)
    }

    /// Runs the forward pass and ranks the softmax distribution.
    pub fn predict(&self, img: &DynamicImage) -> Result<Prediction, VisionError> {
        let input = preprocess::to_tensor(img, &self.processor, &self.device)
            .map_err(|e| VisionError::Inference(e.to_string()))?;
        let logits = self
            .model
            .forward(&input)
            .map_err(|e| VisionError::Inference(e.to_string()))?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)
            .and_then(|p| p.squeeze(0))
            .and_then(|p| p.to_vec1::<f32>())
            .map_err(|e| VisionError::Inference(e.to_string()))?;
        Ok(rank(&probs, &self.labels))
    }
}

fn parse_labels(raw_config: &str) -> Result<HashMap<usize, String>, VisionError> {
    let index: LabelIndex =
        serde_json::from_str(raw_config).map_err(|e| VisionError::Load(e.to_string()))?;
    let mut labels = HashMap::new();
    for (key, label) in index.id2label.unwrap_or_default() {
        if let Ok(idx) = key.parse::<usize>() {
            labels.insert(idx, label);
        }
    }
    Ok(labels)
}

/// Ranks a probability distribution: arg-max label and confidence plus the
/// top three predictions, confidence-descending. Unmapped class indices fall
/// back to `class_N`; confidences are rounded to four digits.
pub fn rank(probs: &[f32], labels: &HashMap<usize, String>) -> Prediction {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|a, b| {
        probs[*b]
            .partial_cmp(&probs[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top: Vec<TopPrediction> = order
        .iter()
        .take(3)
        .map(|&i| TopPrediction {
            label: labels
                .get(&i)
                .cloned()
                .unwrap_or_else(|| format!("class_{i}")),
            confidence: round4(probs[i] as f64),
        })
        .collect();
    match top.first() {
        Some(best) => Prediction {
            label: best.label.clone(),
            confidence: best.confidence,
            top,
        },
        None => Prediction { label: String::new(), confidence: 0.0, top },
    }
}
