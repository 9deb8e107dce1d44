pub mod baseline;
pub mod pipeline;
pub mod types;

// Re-export commonly used items
pub use baseline::AdaptiveBaseline;
pub use pipeline::{PipelineConfig, RawAlert, SmartAlertPipeline};
pub use types::{
    fingerprint, jaccard_similarity, AlertBook, AlertEntity, AlertGroup, AlertKind, AlertPriority,
    AlertSeverity, AlertState,
};
