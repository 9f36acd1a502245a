pub mod config;
pub mod extractor;
pub mod models;
pub mod pipeline;
pub mod services;

pub use models::{ContentIdentifier, StreamCandidate};
pub use pipeline::Pipeline;
