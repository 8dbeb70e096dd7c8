pub mod gemini;
pub mod ingest;

pub use gemini::{VisionClient, VisionConfig, VisionError};
pub use ingest::{ExtractedAttributes, extract_attributes};
