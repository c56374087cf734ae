pub mod prompt;
pub mod relay;
pub mod stream;

pub use relay::StreamRelay;
pub use stream::{Completion, CompletionReason, Flow, LineBuffer, StreamState};
