pub mod metrics;

// Re-export commonly used items
pub use metrics::{round_to, Metrics, MetricsSnapshot, StreamMetrics};
