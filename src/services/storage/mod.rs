pub mod artifact_store;
pub mod translation_log;

pub use artifact_store::ArtifactStore;
pub use translation_log::TranslationLog;
