pub mod backend;
pub mod extract;
pub mod prompt;

pub use backend::{
    BackendError, CancellationToken, GenerationBackend, GenerationError, Jitter, RetryPolicy,
    SqlGenerator,
};
pub use prompt::{GenerationRequest, PromptOptions};
