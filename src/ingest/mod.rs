//! Node ingestion: fingerprinting, privacy classification and upsert

pub mod hashing;
pub mod ingestor;

pub use hashing::content_fingerprint;
pub use ingestor::{normalize_tags, IngestOutcome, IngestStatus, NodeIngestor, NodeInput};
