//! `pocketbrain-agent` — the LLM-agent runtime contract.
//!
//! The control plane never talks to a model directly: it drives an
//! external agent server through the [`runtime::AgentRuntime`] trait
//! (create/resume sessions, submit prompts, consume the event stream,
//! fetch the canonical message). Two implementations ship in-tree:
//! [`http::HttpAgentRuntime`] for a running agent server and
//! [`mock::MockAgentRuntime`] for tests and offline development.

pub mod error;
pub mod events;
pub mod http;
pub mod mock;
pub mod runtime;

pub use error::{AgentError, Result};
pub use events::{AgentEvent, MessageInfo, MessagePart, MessageRecord};
pub use runtime::{AgentRuntime, EventStream};
