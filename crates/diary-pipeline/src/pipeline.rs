use crate::{PipelineConfig, PipelineError, PipelineResult};
use ai::blip::CaptionDecoder;
use ai::clip::{MoodClassifier, MoodScore};
use ai::{preprocess, ModelKind, ModelRegistry, VisionError, VisionModel};
use image::RgbImage;
use llm::{GenerationOutcome, PromptBuilder, StructuredCaptionResult, StructuredGenerationClient};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionAnalysis {
    pub caption: String,
    /// Ranked by score, empty when classification is off or failed.
    pub moods: Vec<MoodScore>,
}

impl CaptionAnalysis {
    pub fn mood_text(&self) -> Option<String> {
        mood_text(&self.moods)
    }
}

fn mood_text(moods: &[MoodScore]) -> Option<String> {
    if moods.is_empty() {
        return None;
    }
    Some(
        moods
            .iter()
            .map(|m| m.label.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiaryEntry {
    pub analysis: CaptionAnalysis,
    pub outcome: GenerationOutcome,
}

impl DiaryEntry {
    pub fn result(&self) -> &StructuredCaptionResult {
        self.outcome.result()
    }
}

/// Image bytes in, diary entry out.
///
/// Decoding, captioning and mood classification run on the blocking pool; the
/// generator call is awaited on the runtime. Invalid images and model load
/// failures end the run with an error, generator problems come back as
/// [`GenerationOutcome::Degraded`].
pub struct DiaryPipeline {
    registry: Arc<ModelRegistry<VisionModel>>,
    generator: Arc<StructuredGenerationClient>,
    decoder: CaptionDecoder,
    classifier: Option<MoodClassifier>,
    prompt: PromptBuilder,
    config: PipelineConfig,
}

impl DiaryPipeline {
    pub fn new(
        registry: Arc<ModelRegistry<VisionModel>>,
        generator: Arc<StructuredGenerationClient>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            generator,
            decoder: CaptionDecoder::new(config.decode),
            classifier: config.mood.clone().map(MoodClassifier::new),
            prompt: PromptBuilder::new(config.prompt.clone()),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry<VisionModel>> {
        &self.registry
    }

    /// Models a run needs, for warm-up.
    pub fn model_kinds(&self) -> Vec<ModelKind> {
        let mut kinds = vec![ModelKind::Caption];
        if self.classifier.is_some() {
            kinds.push(ModelKind::Mood);
        }
        kinds
    }

    async fn blocking<T, F>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(f);
        match self.config.inference_timeout {
            // on timeout the task keeps running, only the wait ends
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => Ok(joined?),
                Err(_) => Err(PipelineError::InferenceTimeout(limit)),
            },
            None => Ok(handle.await?),
        }
    }

    #[tracing::instrument(name = "DiaryPipeline::analyze", skip_all, fields(bytes = image_bytes.len()))]
    pub async fn analyze(&self, image_bytes: Vec<u8>) -> PipelineResult<CaptionAnalysis> {
        let start = Instant::now();

        // decode before touching the registry so a bad upload never loads a model
        let image = self
            .blocking(move || preprocess::decode_rgb(&image_bytes))
            .await??;
        debug!("image decoded: {:?}", image.dimensions());
        let image = Arc::new(image);

        let (caption, moods) = tokio::join!(self.caption(image.clone()), self.moods(image));
        let caption = caption?;

        info!(
            "caption: {:?}, moods: {:?}, analyze time: {:?}",
            caption,
            mood_text(&moods),
            start.elapsed()
        );

        Ok(CaptionAnalysis { caption, moods })
    }

    async fn caption(&self, image: Arc<RgbImage>) -> PipelineResult<String> {
        let model = self.registry.acquire(ModelKind::Caption).await?;
        let decoder = self.decoder.clone();

        let caption = self
            .blocking(move || {
                let model = model.as_caption().ok_or_else(|| {
                    VisionError::Inference("caption slot holds another model".into())
                })?;
                model.caption_image(&image, &decoder)
            })
            .await??;

        Ok(caption)
    }

    async fn moods(&self, image: Arc<RgbImage>) -> Vec<MoodScore> {
        let Some(classifier) = self.classifier.clone() else {
            return vec![];
        };

        let model = match self.registry.acquire(ModelKind::Mood).await {
            Ok(model) => model,
            Err(e) => {
                warn!("mood classification skipped: {}", e);
                return vec![];
            }
        };

        let moods = self
            .blocking(move || match model.as_mood() {
                Some(model) => classifier.classify_image(model, &image),
                None => vec![],
            })
            .await;

        moods.unwrap_or_else(|e| {
            warn!("mood classification failed: {}", e);
            vec![]
        })
    }

    #[tracing::instrument(name = "DiaryPipeline::generate", skip_all)]
    pub async fn generate(
        &self,
        caption: &str,
        user_context: Option<&str>,
        moods: &[MoodScore],
    ) -> GenerationOutcome {
        let caption = if self.config.translate_caption {
            self.generator.translate(caption).await
        } else {
            caption.to_string()
        };

        let mood = mood_text(moods);
        let prompt = self
            .prompt
            .build_with_mood(&caption, user_context, mood.as_deref());
        let outcome = self.generator.generate(&prompt).await;

        if let Some(reason) = outcome.degrade_reason() {
            warn!("generation degraded: {}", reason);
        }
        outcome
    }

    #[tracing::instrument(name = "DiaryPipeline::run", skip_all)]
    pub async fn run(
        &self,
        image_bytes: Vec<u8>,
        user_context: Option<&str>,
    ) -> PipelineResult<DiaryEntry> {
        let analysis = self.analyze(image_bytes).await?;
        let outcome = self
            .generate(&analysis.caption, user_context, &analysis.moods)
            .await;
        Ok(DiaryEntry { analysis, outcome })
    }
}
