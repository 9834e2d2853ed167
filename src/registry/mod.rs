//! Tool, Agent, and Workflow Registries: process-wide, thread-safe catalogs
//! populated at startup and immutable except for metrics recording.

pub mod agent;
pub mod tool;
pub mod workflow;

pub use agent::{AgentDefinition, AgentHandler, AgentRegistry, AgentType};
pub use tool::{RateLimit, RateLimiter, ToolDefinition, ToolRegistry};
pub use workflow::{Workflow, WorkflowRegistry};
