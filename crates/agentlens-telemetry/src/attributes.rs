//! OpenTelemetry span attribute constants for AI agent observability.
//!
//! Standard keys follow the OpenTelemetry GenAI semantic conventions. The
//! `gcp.vertex.agent.*` keys are the ones the host runtime writes on its own
//! spans; the exporter remaps them onto the standard keys.

use opentelemetry::{KeyValue, Value};

/// Instrumentation name used for the tracer and meter owned by this crate
pub const INSTRUMENTATION_NAME: &str = "agentlens";

/// Version stamped on the instrumentation scope of every exported span
pub const INSTRUMENTATION_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scope name presented to backends in place of the known internal scope names
pub const PUBLIC_SCOPE_NAME: &str = "openinference.instrumentation.agentlens";

/// Scope names the host runtime (and this crate) report for their tracers
pub const INTERNAL_SCOPE_NAMES: &[&str] = &[HOST_SYSTEM_NAME, HOST_LEGACY_SCOPE_NAME, INSTRUMENTATION_NAME];

pub const HOST_LEGACY_SCOPE_NAME: &str = "gcp.vertex.agent.telemetry";

// Span names
pub const SPAN_INVOCATION: &str = "invocation";
pub const SPAN_INVOKE_AGENT: &str = "invoke_agent";
pub const SPAN_GENERATE_CONTENT: &str = "generate_content";
pub const SPAN_CALL_LLM: &str = "call_llm";
pub const SPAN_EXECUTE_TOOL: &str = "execute_tool";

// Operation names
pub const OPERATION_CHAT: &str = "chat";
pub const OPERATION_CHAIN: &str = "chain";
pub const OPERATION_EXECUTE_TOOL: &str = "execute_tool";
pub const OPERATION_GENERATE_CONTENT: &str = "generate_content";
pub const OPERATION_INVOKE_AGENT: &str = "invoke_agent";

// Span kind values
pub const SPAN_KIND_WORKFLOW: &str = "workflow";
pub const SPAN_KIND_LLM: &str = "llm";
pub const SPAN_KIND_TOOL: &str = "tool";

// General attributes
pub const GEN_AI_SYSTEM: &str = "gen_ai.system";
pub const GEN_AI_SYSTEM_VERSION: &str = "gen_ai.system.version";
pub const GEN_AI_SPAN_KIND: &str = "gen_ai.span.kind";
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";
pub const GEN_AI_AGENT_NAME: &str = "gen_ai.agent.name";
pub const GEN_AI_APP_NAME: &str = "gen_ai.app.name";
pub const GEN_AI_USER_ID: &str = "gen_ai.user.id";
pub const GEN_AI_SESSION_ID: &str = "gen_ai.session.id";
pub const GEN_AI_INVOCATION_ID: &str = "gen_ai.invocation.id";
pub const INSTRUMENTATION_KEY: &str = "openinference.instrumentation.agentlens";

// Platform aliases of the general attributes
pub const AGENT_NAME_ALIAS: &str = "agent_name";
pub const AGENT_NAME_DOT_ALIAS: &str = "agent.name";
pub const APP_NAME_ALIAS: &str = "app_name";
pub const APP_NAME_DOT_ALIAS: &str = "app.name";
pub const USER_ID_ALIAS: &str = "user.id";
pub const SESSION_ID_ALIAS: &str = "session.id";
pub const INVOCATION_ID_ALIAS: &str = "invocation.id";

pub const REPORT_SOURCE_KEY: &str = "agentlens.report.source";
pub const REPORT_SOURCE: &str = "agentlens";
pub const CALL_TYPE_KEY: &str = "agentlens.call_type";
pub const PLATFORM_INPUT_KEY: &str = "agentlens.input";
pub const PLATFORM_OUTPUT_KEY: &str = "agentlens.output";
pub const DEFAULT_CALL_TYPE: &str = "None";

// LLM attributes
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";
pub const GEN_AI_REQUEST_TYPE: &str = "gen_ai.request.type";
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
pub const GEN_AI_USAGE_TOTAL_TOKENS: &str = "gen_ai.usage.total_tokens";
pub const GEN_AI_RESPONSE_PROMPT_TOKEN_COUNT: &str = "gen_ai.response.prompt_token_count";
pub const GEN_AI_RESPONSE_CANDIDATES_TOKEN_COUNT: &str = "gen_ai.response.candidates_token_count";
pub const GEN_AI_MESSAGES: &str = "gen_ai.messages";
pub const GEN_AI_CHOICE: &str = "gen_ai.choice";
pub const REQUEST_TYPE_CHAT: &str = "chat";

pub const INPUT_VALUE: &str = "input.value";
pub const OUTPUT_VALUE: &str = "output.value";
pub const GEN_AI_INPUT: &str = "gen_ai.input";
pub const GEN_AI_OUTPUT: &str = "gen_ai.output";

// Tool attributes
pub const GEN_AI_TOOL_NAME: &str = "gen_ai.tool.name";
pub const GEN_AI_TOOL_DESCRIPTION: &str = "gen_ai.tool.description";
pub const GEN_AI_TOOL_CALL_ID: &str = "gen_ai.tool.call.id";
pub const GEN_AI_TOOL_INPUT: &str = "gen_ai.tool.input";
pub const GEN_AI_TOOL_OUTPUT: &str = "gen_ai.tool.output";

// Host runtime attributes
pub const HOST_ATTRIBUTE_PREFIX: &str = "gcp.vertex.agent.";
pub const HOST_LLM_REQUEST: &str = "gcp.vertex.agent.llm_request";
pub const HOST_LLM_RESPONSE: &str = "gcp.vertex.agent.llm_response";
pub const HOST_TOOL_CALL_ARGS: &str = "gcp.vertex.agent.tool_call_args";
pub const HOST_TOOL_RESPONSE: &str = "gcp.vertex.agent.tool_response";
pub const HOST_EVENT_ID: &str = "gcp.vertex.agent.event_id";
pub const HOST_INVOCATION_ID: &str = "gcp.vertex.agent.invocation_id";
pub const HOST_SESSION_ID: &str = "gcp.vertex.agent.session_id";

/// `gen_ai.system` literal the host runtime writes instead of a real provider
pub const HOST_SYSTEM_NAME: &str = "gcp.vertex.agent";
/// Public provider name the literal above is normalized to
pub const HOST_PUBLIC_PROVIDER: &str = "gcp.vertex_ai";

/// Internal host keys and the standard keys they are remapped to on export
pub const HOST_ATTRIBUTE_RENAMES: &[(&str, &str)] = &[
    (HOST_LLM_REQUEST, INPUT_VALUE),
    (HOST_LLM_RESPONSE, OUTPUT_VALUE),
    (HOST_TOOL_CALL_ARGS, GEN_AI_TOOL_INPUT),
    (HOST_TOOL_RESPONSE, GEN_AI_TOOL_OUTPUT),
    (HOST_INVOCATION_ID, GEN_AI_INVOCATION_ID),
    (HOST_SESSION_ID, GEN_AI_SESSION_ID),
];

// Event names synthesized on model-call spans
pub const EVENT_USER_MESSAGE: &str = "gen_ai.user.message";
pub const EVENT_CONTENT_PROMPT: &str = "gen_ai.content.prompt";
pub const EVENT_CHOICE: &str = "gen_ai.choice";
pub const EVENT_CONTENT_COMPLETION: &str = "gen_ai.content.completion";

// Sentinels used when no layer supplies a value
pub const FALLBACK_AGENT_NAME: &str = "<unknown_agent_name>";
pub const FALLBACK_APP_NAME: &str = "<unknown_app_name>";
pub const FALLBACK_USER_ID: &str = "<unknown_user_id>";
pub const FALLBACK_SESSION_ID: &str = "<unknown_session_id>";
pub const FALLBACK_INVOCATION_ID: &str = "<unknown_invocation_id>";
pub const FALLBACK_MODEL_PROVIDER: &str = "<unknown_model_provider>";

// Environment variables consulted after context and config
pub const ENV_MODEL_PROVIDER: &str = "AGENTLENS_MODEL_PROVIDER";
pub const ENV_USER_ID: &str = "AGENTLENS_USER_ID";
pub const ENV_SESSION_ID: &str = "AGENTLENS_SESSION_ID";
pub const ENV_APP_NAME: &str = "AGENTLENS_APP_NAME";
pub const ENV_CALL_TYPE: &str = "AGENTLENS_CALL_TYPE";

// Metric names
pub const METRIC_TOKEN_USAGE: &str = "gen_ai.client.token.usage";
pub const METRIC_OPERATION_DURATION: &str = "gen_ai.client.operation.duration";
pub const METRIC_CHAT_COUNT: &str = "gen_ai.chat.count";
pub const METRIC_CHAT_EXCEPTIONS: &str = "gen_ai.chat_completions.exceptions";

// Metric dimensions
pub const METRIC_OPERATION_NAME: &str = "gen_ai_operation_name";
pub const METRIC_OPERATION_TYPE: &str = "gen_ai_operation_type";
pub const METRIC_RESPONSE_MODEL: &str = "gen_ai_response_model";
pub const METRIC_ERROR_TYPE: &str = "error_type";
pub const METRIC_TOKEN_DIRECTION: &str = "token.direction";

/// Last non-empty string value stored under `key`.
pub(crate) fn string_attr(attributes: &[KeyValue], key: &str) -> Option<String> {
    attributes
        .iter()
        .rev()
        .filter(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
        .find(|value| !value.is_empty())
}

/// Last integer value stored under `key`, accepting numeric strings.
pub(crate) fn int_attr(attributes: &[KeyValue], key: &str) -> Option<i64> {
    attributes
        .iter()
        .rev()
        .find(|kv| kv.key.as_str() == key)
        .and_then(|kv| match &kv.value {
            Value::I64(n) => Some(*n),
            Value::F64(n) => Some(*n as i64),
            other => other.as_str().parse().ok(),
        })
}

/// Replace the value under `kv.key`, or append it.
pub(crate) fn upsert(attributes: &mut Vec<KeyValue>, kv: KeyValue) {
    match attributes.iter_mut().find(|existing| existing.key == kv.key) {
        Some(existing) => existing.value = kv.value,
        None => attributes.push(kv),
    }
}

/// Looks up the standard key an internal host key is remapped to.
pub fn renamed_key(internal: &str) -> Option<&'static str> {
    HOST_ATTRIBUTE_RENAMES
        .iter()
        .find(|(from, _)| *from == internal)
        .map(|(_, to)| *to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_constants() {
        assert_eq!(GEN_AI_OPERATION_NAME, "gen_ai.operation.name");
        assert_eq!(GEN_AI_SYSTEM, "gen_ai.system");
        assert!(HOST_LLM_REQUEST.starts_with(HOST_ATTRIBUTE_PREFIX));
    }

    #[test]
    fn test_renamed_key() {
        assert_eq!(renamed_key(HOST_LLM_REQUEST), Some(INPUT_VALUE));
        assert_eq!(renamed_key(HOST_TOOL_RESPONSE), Some(GEN_AI_TOOL_OUTPUT));
        assert_eq!(renamed_key(HOST_EVENT_ID), None);
        assert_eq!(renamed_key(GEN_AI_SYSTEM), None);
    }

    #[test]
    fn test_attribute_helpers() {
        let mut attrs = vec![
            KeyValue::new(GEN_AI_TOOL_NAME, ""),
            KeyValue::new(GEN_AI_USAGE_INPUT_TOKENS, 42_i64),
            KeyValue::new(GEN_AI_USAGE_OUTPUT_TOKENS, "7"),
        ];

        assert_eq!(string_attr(&attrs, GEN_AI_TOOL_NAME), None);
        assert_eq!(int_attr(&attrs, GEN_AI_USAGE_INPUT_TOKENS), Some(42));
        assert_eq!(int_attr(&attrs, GEN_AI_USAGE_OUTPUT_TOKENS), Some(7));

        upsert(&mut attrs, KeyValue::new(GEN_AI_TOOL_NAME, "search"));
        upsert(&mut attrs, KeyValue::new(GEN_AI_SPAN_KIND, SPAN_KIND_TOOL));
        assert_eq!(attrs.len(), 4);
        assert_eq!(string_attr(&attrs, GEN_AI_TOOL_NAME).as_deref(), Some("search"));
    }

    #[test]
    fn test_lookups_prefer_last_write() {
        let attrs = vec![
            KeyValue::new(GEN_AI_SYSTEM, "gcp.vertex.agent"),
            KeyValue::new(GEN_AI_USAGE_INPUT_TOKENS, 10_i64),
            KeyValue::new(GEN_AI_SYSTEM, "openai"),
            KeyValue::new(GEN_AI_USAGE_INPUT_TOKENS, 12_i64),
            KeyValue::new(GEN_AI_SYSTEM, ""),
        ];

        assert_eq!(string_attr(&attrs, GEN_AI_SYSTEM).as_deref(), Some("openai"));
        assert_eq!(int_attr(&attrs, GEN_AI_USAGE_INPUT_TOKENS), Some(12));
    }
}
