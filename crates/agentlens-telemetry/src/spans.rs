//! Span helpers for hosts that report model calls and tool executions
//! through `tracing`.
//!
//! The spans carry the host attribute keys; the translating exporter renames
//! them on the way out.

use crate::attributes::*;

/// Attributes of a model call
#[derive(Debug, Clone, Default)]
pub struct ModelCallAttributes {
    pub model: String,
    pub invocation_id: String,
    pub session_id: String,
    pub event_id: String,
    pub request_json: String,
    pub response_json: String,
}

/// Attributes of a tool execution
#[derive(Debug, Clone, Default)]
pub struct ToolCallAttributes {
    pub tool_name: String,
    pub tool_description: String,
    pub tool_call_id: String,
    pub invocation_id: String,
    pub session_id: String,
    pub event_id: String,
    pub args_json: String,
    pub response_json: String,
}

/// Span for one model call, named `generate_content <model>`.
///
/// The span is exported when the returned handle is dropped.
pub fn model_call_span(attrs: &ModelCallAttributes) -> tracing::Span {
    tracing::info_span!(
        "generate_content",
        otel.name = %format!("{} {}", SPAN_GENERATE_CONTENT, attrs.model),
        { GEN_AI_SYSTEM } = HOST_SYSTEM_NAME,
        { GEN_AI_OPERATION_NAME } = OPERATION_GENERATE_CONTENT,
        { GEN_AI_REQUEST_MODEL } = %attrs.model,
        { HOST_INVOCATION_ID } = %attrs.invocation_id,
        { HOST_SESSION_ID } = %attrs.session_id,
        { HOST_EVENT_ID } = %attrs.event_id,
        { HOST_LLM_REQUEST } = %attrs.request_json,
        { HOST_LLM_RESPONSE } = %attrs.response_json,
    )
}

/// Span for one tool execution, named `execute_tool <tool>`.
pub fn tool_call_span(attrs: &ToolCallAttributes) -> tracing::Span {
    tracing::info_span!(
        "execute_tool",
        otel.name = %format!("{} {}", SPAN_EXECUTE_TOOL, attrs.tool_name),
        { GEN_AI_OPERATION_NAME } = OPERATION_EXECUTE_TOOL,
        { GEN_AI_TOOL_NAME } = %attrs.tool_name,
        { GEN_AI_TOOL_DESCRIPTION } = %attrs.tool_description,
        { GEN_AI_TOOL_CALL_ID } = %attrs.tool_call_id,
        { HOST_INVOCATION_ID } = %attrs.invocation_id,
        { HOST_SESSION_ID } = %attrs.session_id,
        { HOST_EVENT_ID } = %attrs.event_id,
        { HOST_TOOL_CALL_ARGS } = %attrs.args_json,
        { HOST_TOOL_RESPONSE } = %attrs.response_json,
    )
}

/// JSON for a span attribute, or a placeholder when `value` cannot be serialized
pub fn safe_serialize<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<not serializable>".to_string())
}
