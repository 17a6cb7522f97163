use crate::ort::{load_onnx_model, ONNXModelConfig};
use crate::preprocess::{self, PreprocessConfig};
use crate::{ExecutionDevice, VisionError, VisionResult};
use anyhow::anyhow;
use image::RgbImage;
use ndarray::{Array1, Array2, ArrayD, ArrayView4, Axis, Ix2};
use ort::Session;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

// default CLIP text context length
const CLIP_TEXT_MAX_LEN: usize = 77;
const CLIP_LOGIT_SCALE: f32 = 100.0;

pub const DEFAULT_MOOD_LABELS: &[&str] = &[
    "happy",
    "calm",
    "peaceful",
    "warm",
    "cozy",
    "romantic",
    "energetic",
    "exciting",
    "nostalgic",
    "lonely",
    "sad",
    "gloomy",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodScore {
    pub label: String,
    pub score: f32,
}

/// Zero-shot image/text similarity.
///
/// Returns one logit per label for the image. Implementations may hand back
/// (images, labels), (labels) or, when a single label is scored, a scalar.
pub trait MoodGraph: Send + Sync {
    fn label_logits(
        &self,
        pixel_values: ArrayView4<f32>,
        labels: &[String],
    ) -> anyhow::Result<ArrayD<f32>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    pub image_model_path: PathBuf,
    pub text_model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub num_intra_thread: usize,
    pub preprocess: PreprocessConfig,
}

impl Default for ClipConfig {
    fn default() -> Self {
        let model_dir = PathBuf::from("CLIP-ViT-B-32");
        Self {
            image_model_path: model_dir.join("visual.onnx"),
            text_model_path: model_dir.join("textual.onnx"),
            tokenizer_path: model_dir.join("tokenizer.json"),
            num_intra_thread: 4,
            preprocess: PreprocessConfig::clip(),
        }
    }
}

pub struct OrtClipGraph {
    image_model: Session,
    text_model: Session,
    text_tokenizer: Tokenizer,
}

impl OrtClipGraph {
    pub fn from_config(config: &ClipConfig, device: ExecutionDevice) -> anyhow::Result<Self> {
        let onnx_config = || ONNXModelConfig {
            num_intra_thread: config.num_intra_thread,
            device,
            ..Default::default()
        };
        let image_model = load_onnx_model(&config.image_model_path, Some(onnx_config()))?;
        let text_model = load_onnx_model(&config.text_model_path, Some(onnx_config()))?;

        let mut text_tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow!("can not load tokenizer: {}", e))?;
        let truncation = tokenizers::utils::truncation::TruncationParams {
            max_length: CLIP_TEXT_MAX_LEN,
            ..Default::default()
        };
        text_tokenizer
            .with_truncation(Some(truncation))
            .map_err(|e| anyhow!("invalid truncation: {}", e))?;

        Ok(Self {
            image_model,
            text_model,
            text_tokenizer,
        })
    }

    fn image_embedding(&self, pixel_values: ArrayView4<f32>) -> anyhow::Result<Array1<f32>> {
        let outputs = self
            .image_model
            .run(ort::inputs!["pixel_values" => pixel_values.view()]?)?;

        let output = outputs
            .get("output")
            .ok_or(anyhow!("output not found"))?
            .try_extract_tensor::<f32>()?
            .view()
            .to_owned();

        let dim = output.len();
        Ok(normalize(output.into_shape(dim)?))
    }

    fn text_embeddings(&self, texts: &[String]) -> anyhow::Result<Array2<f32>> {
        let mut ids = Array2::<i32>::zeros((texts.len(), CLIP_TEXT_MAX_LEN));
        let mut attention_mask = Array2::<i32>::zeros((texts.len(), CLIP_TEXT_MAX_LEN));

        for (row, text) in texts.iter().enumerate() {
            let encoding = self
                .text_tokenizer
                .encode(text.as_str(), true)
                .map_err(|err| anyhow!(err))?;
            for (col, (&id, &mask)) in encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .take(CLIP_TEXT_MAX_LEN)
                .enumerate()
            {
                ids[[row, col]] = id as i32;
                attention_mask[[row, col]] = mask as i32;
            }
        }

        let outputs = self.text_model.run(
            ort::inputs!["input_ids" => ids.view(), "attention_mask" => attention_mask.view()]?,
        )?;

        let output = outputs
            .get("output")
            .ok_or(anyhow!("output not found"))?
            .try_extract_tensor::<f32>()?
            .view()
            .to_owned();

        let mut output = output.into_dimensionality::<Ix2>()?;
        for mut row in output.axis_iter_mut(Axis(0)) {
            let norm = row.dot(&row).sqrt().max(f32::EPSILON);
            row.mapv_inplace(|v| v / norm);
        }
        Ok(output)
    }
}

impl MoodGraph for OrtClipGraph {
    fn label_logits(
        &self,
        pixel_values: ArrayView4<f32>,
        labels: &[String],
    ) -> anyhow::Result<ArrayD<f32>> {
        let image = self.image_embedding(pixel_values)?;
        let texts = self.text_embeddings(labels)?;
        Ok((texts.dot(&image) * CLIP_LOGIT_SCALE).into_dyn())
    }
}

fn normalize(v: Array1<f32>) -> Array1<f32> {
    let norm = v.dot(&v).sqrt().max(f32::EPSILON);
    v / norm
}

pub struct MoodModel {
    graph: Box<dyn MoodGraph>,
    preprocess: PreprocessConfig,
}

impl MoodModel {
    pub fn new(graph: Box<dyn MoodGraph>, preprocess: PreprocessConfig) -> Self {
        Self { graph, preprocess }
    }

    pub fn from_config(config: &ClipConfig, device: ExecutionDevice) -> anyhow::Result<Self> {
        let graph = OrtClipGraph::from_config(config, device)?;
        info!(
            "CLIP mood model loaded from {}",
            config.image_model_path.display()
        );
        Ok(Self::new(Box::new(graph), config.preprocess.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodSettings {
    pub labels: Vec<String>,
    /// Text fed to the text encoder, `{}` is replaced by the label.
    pub label_template: String,
    pub top_k: usize,
}

impl Default for MoodSettings {
    fn default() -> Self {
        Self {
            labels: DEFAULT_MOOD_LABELS.iter().map(|v| v.to_string()).collect(),
            label_template: "a photo with a {} mood".into(),
            top_k: 3,
        }
    }
}

/// Zero-shot mood classification over a fixed label vocabulary.
///
/// Failures are logged and reported as an empty list; a missing mood never
/// fails the caller.
#[derive(Debug, Clone, Default)]
pub struct MoodClassifier {
    settings: MoodSettings,
}

impl MoodClassifier {
    pub fn new(settings: MoodSettings) -> Self {
        Self { settings }
    }

    pub fn classify(&self, model: &MoodModel, image_bytes: &[u8]) -> Vec<MoodScore> {
        match preprocess::decode_rgb(image_bytes) {
            Ok(image) => self.classify_image(model, &image),
            Err(e) => {
                warn!("mood classification skipped: {}", e);
                vec![]
            }
        }
    }

    pub fn classify_image(&self, model: &MoodModel, image: &RgbImage) -> Vec<MoodScore> {
        match self.try_classify_image(model, image) {
            Ok(moods) => moods,
            Err(e) => {
                warn!("mood classification failed: {}", e);
                vec![]
            }
        }
    }

    pub fn try_classify_image(
        &self,
        model: &MoodModel,
        image: &RgbImage,
    ) -> VisionResult<Vec<MoodScore>> {
        let labels = &self.settings.labels;
        if labels.is_empty() || self.settings.top_k == 0 {
            return Ok(vec![]);
        }

        let pixel_values = preprocess::to_tensor(image, &model.preprocess);
        let texts: Vec<String> = labels
            .iter()
            .map(|label| self.settings.label_template.replace("{}", label))
            .collect();

        let logits = model.graph.label_logits(pixel_values.view(), &texts)?;
        let logits = label_row(logits, labels.len())?;
        let probs = softmax(&logits);

        let mut ranked: Vec<usize> = (0..probs.len()).collect();
        ranked.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

        let moods: Vec<MoodScore> = ranked
            .into_iter()
            .take(self.settings.top_k)
            .map(|i| MoodScore {
                label: labels[i].clone(),
                score: probs[i],
            })
            .collect();
        debug!("moods: {:?}", moods);

        Ok(moods)
    }
}

/// Flatten whatever the graph returned into one logit per label.
fn label_row(logits: ArrayD<f32>, num_labels: usize) -> VisionResult<Vec<f32>> {
    let row: Vec<f32> = match logits.ndim() {
        0 | 1 => logits.iter().copied().collect(),
        2 => logits.index_axis(Axis(0), 0).iter().copied().collect(),
        _ => {
            return Err(VisionError::Inference(format!(
                "unexpected mood logits shape {:?}",
                logits.shape()
            )))
        }
    };

    if row.len() != num_labels {
        return Err(VisionError::Inference(format!(
            "expected {} mood logits, got {}",
            num_labels,
            row.len()
        )));
    }
    if row.iter().any(|v| !v.is_finite()) {
        return Err(VisionError::Inference("non-finite mood logits".into()));
    }

    Ok(row)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}
