//! Ingestion of untrusted image sources into the data directory.

pub mod normalizer;
pub mod staging;

pub use normalizer::{base64_budget, InputNormalizer};
pub use staging::FileStager;
