// Library exports for the translation relay service

pub mod api;
pub mod core;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use api::{router, AppState};
pub use core::{
    config::Config,
    errors::{ArtifactError, ConfigError, LogError, RelayError, TaskError},
    types::{ArtifactRole, ClientEvent, TaskStatus, TextTranslationRequest, TranslationRecord},
};
pub use orchestration::{PdfOrchestrator, TaskRegistry};
pub use services::{ArtifactStore, PdfWorkerClient, StreamRelay, TranslationLog};
pub use utils::Metrics;
