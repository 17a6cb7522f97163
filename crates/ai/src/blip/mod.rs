mod decoder;

pub use decoder::*;

use crate::ort::{load_onnx_model, ONNXModelConfig};
use crate::preprocess::{self, PreprocessConfig};
use crate::{ExecutionDevice, VisionResult};
use anyhow::anyhow;
use image::RgbImage;
use ndarray::{Array3, ArrayView2, ArrayView4, Ix3};
use ort::Session;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

// BLIP's BERT tokenizer: [DEC] opens a caption, [SEP] ends it
const DEC_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

/// One forward pass of a captioning graph.
///
/// Returns logits shaped (batch, sequence, vocabulary) for `input_ids`
/// conditioned on `pixel_values`.
pub trait CaptionGraph: Send + Sync {
    fn forward(
        &self,
        pixel_values: ArrayView4<f32>,
        input_ids: ArrayView2<i64>,
    ) -> anyhow::Result<Array3<f32>>;
}

/// Turns generated ids back into text with special tokens removed.
pub trait TokenDecoder: Send + Sync {
    fn decode_ids(&self, ids: &[u32]) -> anyhow::Result<String>;
}

impl TokenDecoder for Tokenizer {
    fn decode_ids(&self, ids: &[u32]) -> anyhow::Result<String> {
        self.decode(ids, true).map_err(|err| anyhow!(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub bos: u32,
    pub eos: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlipConfig {
    /// ONNX export taking `pixel_values` and `input_ids`, producing logits.
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub logits_output: String,
    pub bos_token_id: Option<u32>,
    pub eos_token_id: Option<u32>,
    pub num_intra_thread: usize,
    pub preprocess: PreprocessConfig,
}

impl Default for BlipConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("blip-image-captioning-large/blip_caption.onnx"),
            tokenizer_path: PathBuf::from("blip-image-captioning-large/tokenizer.json"),
            logits_output: "logits".into(),
            bos_token_id: None,
            eos_token_id: None,
            num_intra_thread: 4,
            preprocess: PreprocessConfig::blip(),
        }
    }
}

pub struct OrtBlipGraph {
    session: Session,
    logits_output: String,
}

impl OrtBlipGraph {
    pub(crate) fn from_file(
        model_path: impl AsRef<Path>,
        logits_output: &str,
        config: ONNXModelConfig,
    ) -> anyhow::Result<Self> {
        let session = load_onnx_model(model_path, Some(config))?;
        Ok(Self {
            session,
            logits_output: logits_output.to_string(),
        })
    }
}

impl CaptionGraph for OrtBlipGraph {
    fn forward(
        &self,
        pixel_values: ArrayView4<f32>,
        input_ids: ArrayView2<i64>,
    ) -> anyhow::Result<Array3<f32>> {
        let outputs = self.session.run(
            ort::inputs!["pixel_values" => pixel_values.view(), "input_ids" => input_ids.view()]?,
        )?;

        let logits = outputs
            .get(self.logits_output.as_str())
            .ok_or(anyhow!("output {} not found", self.logits_output))?
            .try_extract_tensor::<f32>()?
            .view()
            .to_owned();

        Ok(logits.into_dimensionality::<Ix3>()?)
    }
}

/// A loaded captioning model: graph, tokenizer and the image layout it expects.
/// Immutable after construction and shared by all concurrent decode calls.
pub struct CaptionModel {
    graph: Box<dyn CaptionGraph>,
    tokenizer: Box<dyn TokenDecoder>,
    special_tokens: SpecialTokens,
    preprocess: PreprocessConfig,
}

impl CaptionModel {
    pub fn new(
        graph: Box<dyn CaptionGraph>,
        tokenizer: Box<dyn TokenDecoder>,
        special_tokens: SpecialTokens,
        preprocess: PreprocessConfig,
    ) -> Self {
        Self {
            graph,
            tokenizer,
            special_tokens,
            preprocess,
        }
    }

    pub fn from_config(config: &BlipConfig, device: ExecutionDevice) -> anyhow::Result<Self> {
        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow!("failed to initialize tokenizer: {}", e))?;

        let special_tokens = SpecialTokens {
            bos: config
                .bos_token_id
                .or_else(|| tokenizer.token_to_id("[DEC]"))
                .or_else(|| tokenizer.token_to_id("[CLS]"))
                .unwrap_or(DEC_TOKEN_ID),
            eos: config
                .eos_token_id
                .or_else(|| tokenizer.token_to_id("[SEP]"))
                .or(Some(SEP_TOKEN_ID)),
        };

        let graph = OrtBlipGraph::from_file(
            &config.model_path,
            &config.logits_output,
            ONNXModelConfig {
                num_intra_thread: config.num_intra_thread,
                device,
                ..Default::default()
            },
        )?;

        info!(
            "BLIP captioner loaded from {} (bos {}, eos {:?})",
            config.model_path.display(),
            special_tokens.bos,
            special_tokens.eos
        );

        Ok(Self::new(
            Box::new(graph),
            Box::new(tokenizer),
            special_tokens,
            config.preprocess.clone(),
        ))
    }

    pub fn graph(&self) -> &dyn CaptionGraph {
        self.graph.as_ref()
    }

    pub fn tokenizer(&self) -> &dyn TokenDecoder {
        self.tokenizer.as_ref()
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special_tokens
    }

    pub fn preprocess_config(&self) -> &PreprocessConfig {
        &self.preprocess
    }

    /// Preprocess an already decoded image and run the decoder over it.
    pub fn caption_image(&self, image: &RgbImage, decoder: &CaptionDecoder) -> VisionResult<String> {
        let start = Instant::now();
        let pixel_values = preprocess::to_tensor(image, &self.preprocess);
        debug!("preprocess time: {:?}", start.elapsed());

        let caption = decoder.decode(self, pixel_values.view())?;
        debug!("total caption time: {:?}", start.elapsed());

        Ok(caption)
    }

    pub fn caption(&self, image_bytes: &[u8], decoder: &CaptionDecoder) -> VisionResult<String> {
        let image = preprocess::decode_rgb(image_bytes)?;
        self.caption_image(&image, decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::decoder::tests::scripted_model;
    use super::*;
    use crate::preprocess::tests::encode;
    use crate::VisionError;
    use image::{ImageFormat, Rgb};

    #[test]
    fn captions_encoded_image() {
        let model = scripted_model(vec![2, 3, 4]);
        let bytes = encode(
            &RgbImage::from_pixel(100, 100, Rgb([255, 255, 255])),
            ImageFormat::Jpeg,
        );

        let caption = model
            .caption(
                &bytes,
                &CaptionDecoder::new(DecodeParams {
                    min_new_tokens: 1,
                    max_new_tokens: 20,
                }),
            )
            .unwrap();
        assert_eq!(caption, "a white wall");
    }

    #[test]
    fn invalid_bytes_never_reach_the_graph() {
        let model = scripted_model(vec![2]);
        let err = model
            .caption(b"", &CaptionDecoder::default())
            .unwrap_err();
        assert!(matches!(err, VisionError::InvalidImage(_)));
    }
}
