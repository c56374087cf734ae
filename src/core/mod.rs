pub mod config;
pub mod errors;
pub mod language;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{ArtifactError, ConfigError, LogError, RelayError, TaskError};
pub use types::{
    ArtifactRole, ClientEvent, PdfTaskMetadata, TaskStatus, TextTranslationRequest,
    TranslationRecord,
};
