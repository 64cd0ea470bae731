//! Core traits and types for AgentLens
//!
//! This crate describes the host agent runtime as the telemetry engine sees it:
//! message content, model requests/responses, the invocation and callback
//! contexts handed to plugins, plus the shared error type and configuration.

pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod model;

// Re-exports
pub use config::{LensConfig, ModelConfig, ObservabilityConfig, OpenTelemetryConfig};
pub use content::{Content, FileData, FunctionCall, FunctionResponse, InlineData, Part};
pub use context::{
    CallbackContext, DefaultCallbackContext, DefaultInvocationContext, InvocationContext,
    ReadonlyContext,
};
pub use error::{Error, Result};
pub use model::{LLMRequest, LLMResponse, UsageMetadata};
