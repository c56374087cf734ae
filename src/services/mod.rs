pub mod pdf;
pub mod storage;
pub mod translation;

// Re-export commonly used services
pub use pdf::PdfWorkerClient;
pub use storage::{ArtifactStore, TranslationLog};
pub use translation::StreamRelay;
