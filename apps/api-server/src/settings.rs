use ai::{blip::BlipConfig, clip::ClipConfig, clip::MoodSettings, ExecutionDevice, VisionConfig};
use anyhow::{anyhow, Context};
use diary_pipeline::PipelineConfig;
use llm::GenerationConfig;
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
/// Multipart uploads up to 20 MiB, enough for full resolution phone photos.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Everything the server needs, read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub log_dir: Option<PathBuf>,
    pub preload_models: bool,
    pub max_upload_bytes: usize,
    pub vision: VisionConfig,
    pub generation: GenerationConfig,
    pub pipeline: PipelineConfig,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let env = Env(lookup);

        let device = match env.get("VISION_DEVICE").as_deref() {
            None | Some("auto") => ExecutionDevice::detect(),
            Some(v) => ExecutionDevice::from_str(v)
                .map_err(|_| anyhow!("invalid VISION_DEVICE: {}", v))?,
        };

        let mut caption = BlipConfig::default();
        if let Some(path) = env.get("BLIP_MODEL_PATH") {
            caption.model_path = path.into();
        }
        if let Some(path) = env.get("BLIP_TOKENIZER_PATH") {
            caption.tokenizer_path = path.into();
        }

        // mood classification is on only when a CLIP image model is configured
        let mood = env.get("CLIP_IMAGE_MODEL_PATH").map(|image_model_path| {
            let mut config = ClipConfig {
                image_model_path: image_model_path.into(),
                ..Default::default()
            };
            if let Some(path) = env.get("CLIP_TEXT_MODEL_PATH") {
                config.text_model_path = path.into();
            }
            if let Some(path) = env.get("CLIP_TOKENIZER_PATH") {
                config.tokenizer_path = path.into();
            }
            config
        });

        let mut generation = GenerationConfig {
            api_key: env.get("CHATGPT_API_KEY"),
            ..Default::default()
        };
        if let Some(base_url) = env.get("OPENAI_BASE_URL") {
            generation.base_url = base_url;
        }
        if let Some(model) = env.get("LLM_MODEL") {
            generation.model = model;
        }
        if let Some(temperature) = env.parse::<f32>("LLM_TEMPERATURE")? {
            generation.temperature = temperature;
        }
        if let Some(secs) = env.parse::<u64>("LLM_TIMEOUT_SECS")? {
            generation.timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = env.parse::<u64>("DAILY_TOKEN_LIMIT")? {
            generation.daily_token_limit = (limit > 0).then_some(limit);
        }

        let mut pipeline = PipelineConfig::default();
        if let Some(v) = env.parse::<usize>("CAPTION_MIN_NEW_TOKENS")? {
            pipeline.decode.min_new_tokens = v;
        }
        if let Some(v) = env.parse::<usize>("CAPTION_MAX_NEW_TOKENS")? {
            pipeline.decode.max_new_tokens = v;
        }
        if mood.is_some() {
            let mut settings = MoodSettings::default();
            if let Some(top_k) = env.parse::<usize>("MOOD_TOP_K")? {
                settings.top_k = top_k;
            }
            pipeline.mood = Some(settings);
        }
        if let Some(secs) = env.parse::<u64>("INFERENCE_TIMEOUT_SECS")? {
            pipeline.inference_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = env.flag("TRANSLATE_CAPTION")? {
            pipeline.translate_caption = v;
        }
        pipeline.prompt.language = generation.language;

        let bind_addr = env
            .get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse()
            .with_context(|| format!("invalid BIND_ADDR: {}", bind_addr))?;

        Ok(Self {
            bind_addr,
            log_dir: env.get("LOCAL_LOG_DIR").map(PathBuf::from),
            preload_models: env.flag("PRELOAD_MODELS")?.unwrap_or(true),
            max_upload_bytes: env
                .parse::<usize>("MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            vision: VisionConfig {
                caption,
                mood,
                device,
            },
            generation,
            pipeline,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|e| anyhow!("invalid {}={:?}: {}", name, v, e))
            })
            .transpose()
    }

    fn flag(&self, name: &str) -> anyhow::Result<Option<bool>> {
        self.get(name)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(anyhow!("invalid {}={:?}: expected a boolean", name, v)),
            })
            .transpose()
    }
}
