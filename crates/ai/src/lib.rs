mod error;
mod loader;
mod ort;
mod provider;

pub mod blip;
pub mod clip;
pub mod preprocess;

pub use error::*;
pub use loader::*;
pub use ort::ExecutionDevice;
pub use preprocess::PreprocessConfig;
pub use provider::*;
pub use tokenizers;
