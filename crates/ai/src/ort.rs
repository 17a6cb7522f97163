use ort::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    ExecutionProviderDispatch, GraphOptimizationLevel, Session,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::debug;

/// Where ONNX sessions run. Resolved once at startup and handed to the provider,
/// so call sites never branch on the platform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionDevice {
    #[default]
    Cpu,
    #[strum(serialize = "coreml")]
    #[serde(rename = "coreml")]
    CoreMl,
    Cuda,
}

impl ExecutionDevice {
    /// CoreML on macOS, CPU everywhere else.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Self::CoreMl
        } else {
            Self::Cpu
        }
    }

    fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        // CPU always comes last as the fallback
        match self {
            Self::Cpu => vec![CPUExecutionProvider::default().build()],
            Self::CoreMl => vec![
                CoreMLExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
            Self::Cuda => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }
}

pub(crate) struct ONNXModelConfig {
    pub num_intra_thread: usize,
    pub optimization_level: GraphOptimizationLevel,
    pub device: ExecutionDevice,
}

impl Default for ONNXModelConfig {
    fn default() -> Self {
        Self {
            num_intra_thread: 4,
            optimization_level: GraphOptimizationLevel::Level3,
            device: ExecutionDevice::Cpu,
        }
    }
}

/// Load ONNX model from file with the execution providers of the configured device.
pub(crate) fn load_onnx_model(
    model_path: impl AsRef<Path>,
    config: Option<ONNXModelConfig>,
) -> anyhow::Result<Session> {
    let config = config.unwrap_or_default();
    debug!(
        "loading onnx model {} on {}",
        model_path.as_ref().display(),
        config.device
    );

    let session = Session::builder()?
        .with_execution_providers(config.device.execution_providers())?
        .with_intra_threads(config.num_intra_thread)?
        .with_optimization_level(config.optimization_level)?
        .commit_from_file(model_path)?;

    Ok(session)
}
