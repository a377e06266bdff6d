//! Conversion of one artifact to the target format.

mod error;
mod orchestrator;

pub use error::ConversionError;
pub use orchestrator::{converted_path, ConversionOrchestrator, DEFAULT_TARGET_FORMAT};
