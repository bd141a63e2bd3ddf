//! Language-model orchestration
//!
//! Architecture follows the project pattern (trait + impl + mock):
//! - `LlmBackend` trait: one completion call against a provider
//! - `HttpLlmBackend`: reqwest implementation for Ollama, OpenAI-compatible
//!   and Anthropic endpoints
//! - `MockLlmBackend`: scripted replies for tests
//!
//! On top of the backends sit the provider router (privacy-aware selection)
//! and the invoker (timeouts, retries, schema parsing, cost recording).

pub mod error;
pub mod invoke;
pub mod mock;
pub mod profiles;
pub mod prompts;
pub mod provider;
pub mod router;
pub mod schema;
pub mod traits;

pub use error::{BackendError, ErrorKind, ProviderError, RegistryError, RoutingError};
pub use invoke::{BackoffPolicy, Invocation, InvocationContext, Invoker};
pub use mock::{MockLlmBackend, MockReply};
pub use profiles::{ProviderKind, ProviderProfile, ProviderRegistry, TaskKind};
pub use prompts::Prompt;
pub use provider::HttpLlmBackend;
pub use router::select_provider;
pub use schema::{ConnectionVerdict, StructuredResult};
pub use traits::{Completion, CompletionRequest, LlmBackend, TokenUsage};
