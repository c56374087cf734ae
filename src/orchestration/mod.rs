pub mod pdf_orchestrator;
pub mod task_registry;

pub use pdf_orchestrator::PdfOrchestrator;
pub use task_registry::TaskRegistry;
