mod config;
mod error;
mod pipeline;
mod record;

pub use config::*;
pub use error::*;
pub use pipeline::*;
pub use record::*;
