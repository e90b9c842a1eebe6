//! LLM-driven agent that answers sales questions by invoking registered
//! tools over the sales table.

pub mod instructions;
pub mod registry;
pub mod runtime;

pub use registry::ToolRegistry;
pub use runtime::AgentRuntime;
