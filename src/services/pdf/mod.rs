pub mod worker_client;

pub use worker_client::{CancelOutcome, DocumentUpload, PdfWorkerClient, RemoteStatus};
