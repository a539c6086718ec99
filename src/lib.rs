// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod operator;
pub mod pipeline;
pub mod services;
pub mod source_weights;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::error::{PipelineError, StageError, StoreError};
pub use crate::operator::Operator;
pub use crate::pipeline::{Pipeline, Stage, VideoJob};
