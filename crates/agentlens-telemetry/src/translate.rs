//! Export-time span translation.
//!
//! [`translate`] produces the view of a finished span that downstream
//! exporters receive: host attribute keys remapped onto the GenAI
//! conventions, tool payloads rebuilt as structured JSON, prompt and
//! completion events synthesized for model calls, and the trace and parent
//! rewritten through the [`CorrelationRegistry`] so host spans land in the
//! AgentLens trace. The input span is never modified.

use crate::attributes::*;
use crate::classify::{SpanCategory, classify};
use crate::registry::CorrelationRegistry;
use opentelemetry::trace::{Event, SpanContext, SpanId, TraceId};
use opentelemetry::{InstrumentationLibrary, KeyValue};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::trace::SpanEvents;
use serde_json::{Map, Value, json};
use std::borrow::Cow;
use std::collections::HashSet;
use std::time::SystemTime;

pub fn translate(span: &SpanData, registry: &CorrelationRegistry) -> SpanData {
    let category = classify(&span.name);
    let payload = ToolPayload::scan(&span.attributes);

    let (tool_input, tool_output) = if category == SpanCategory::Tool {
        (payload.reconstruct_input(), payload.reconstruct_output())
    } else {
        (None, None)
    };

    let mut attributes = remap_attributes(
        category,
        &span.attributes,
        tool_input.is_some(),
        tool_output.is_some(),
    );

    if let Some(input) = tool_input {
        for key in [GEN_AI_TOOL_INPUT, GEN_AI_INPUT, INPUT_VALUE, PLATFORM_INPUT_KEY] {
            upsert(&mut attributes, KeyValue::new(key, input.clone()));
        }
    }
    if let Some(output) = tool_output {
        for key in [GEN_AI_TOOL_OUTPUT, GEN_AI_OUTPUT, OUTPUT_VALUE, PLATFORM_OUTPUT_KEY] {
            upsert(&mut attributes, KeyValue::new(key, output.clone()));
        }
    }

    if payload.tool_name.is_some() || payload.tool_call_id.is_some() {
        upsert(&mut attributes, KeyValue::new(GEN_AI_SPAN_KIND, SPAN_KIND_TOOL));
    }

    if category == SpanCategory::Model && string_attr(&attributes, GEN_AI_RESPONSE_MODEL).is_none()
    {
        if let Some(model) = string_attr(&attributes, GEN_AI_REQUEST_MODEL) {
            upsert(&mut attributes, KeyValue::new(GEN_AI_RESPONSE_MODEL, model));
        }
    }

    let tool_call_id = payload.tool_call_id.as_deref().unwrap_or_default();

    let mut translated = span.clone();
    translated.span_context = rewrite_span_context(&span.span_context, tool_call_id, registry);
    translated.parent_span_id = rewrite_parent(span, category, tool_call_id, registry).span_id();
    translated.attributes = attributes;
    translated.instrumentation_lib = public_scope(&span.instrumentation_lib);

    if category == SpanCategory::Model {
        translated.name = Cow::Borrowed(SPAN_CALL_LLM);
        translated.events = synthesize_events(&span.attributes, &span.events, span.start_time);
    }

    translated
}

/// Register `host trace -> AgentLens trace` for a tool span whose call id is bound.
///
/// Catches host traces the plugin callbacks never bridged.
pub fn bridge_tool_trace(span: &SpanData, registry: &CorrelationRegistry) {
    if classify(&span.name) != SpanCategory::Tool {
        return;
    }

    let host_trace_id = span.span_context.trace_id();
    if host_trace_id == TraceId::INVALID {
        return;
    }

    let Some(tool_call_id) = string_attr(&span.attributes, GEN_AI_TOOL_CALL_ID) else {
        return;
    };

    if let Some(parent) = registry.parent_context_by_tool_call_id(&tool_call_id) {
        registry.register_trace_mapping(host_trace_id, parent.trace_id());
        tracing::debug!(
            tool_call_id = %tool_call_id,
            host_trace_id = %host_trace_id,
            sdk_trace_id = %parent.trace_id(),
            "Matched tool span by call id, bridged traces"
        );
    }
}

/// Raw tool fields found on a span
#[derive(Debug, Default)]
struct ToolPayload {
    tool_name: Option<String>,
    tool_description: Option<String>,
    tool_call_id: Option<String>,
    args: Option<String>,
    response: Option<String>,
}

impl ToolPayload {
    fn scan(attributes: &[KeyValue]) -> Self {
        Self {
            tool_name: string_attr(attributes, GEN_AI_TOOL_NAME),
            tool_description: string_attr(attributes, GEN_AI_TOOL_DESCRIPTION),
            tool_call_id: string_attr(attributes, GEN_AI_TOOL_CALL_ID),
            args: string_attr(attributes, HOST_TOOL_CALL_ARGS),
            response: string_attr(attributes, HOST_TOOL_RESPONSE),
        }
    }

    /// `{name, description, parameters}` when the arguments are a JSON object
    fn reconstruct_input(&self) -> Option<String> {
        let name = self.tool_name.as_deref()?;
        let parameters: Map<String, Value> = serde_json::from_str(self.args.as_deref()?).ok()?;

        let input = json!({
            "name": name,
            "description": self.tool_description.as_deref().unwrap_or_default(),
            "parameters": parameters,
        });
        serde_json::to_string(&input).ok()
    }

    /// `{id, name, response}` when the response is a JSON object
    fn reconstruct_output(&self) -> Option<String> {
        let id = self.tool_call_id.as_deref()?;
        let response: Map<String, Value> =
            serde_json::from_str(self.response.as_deref()?).ok()?;

        let output = json!({
            "id": id,
            "name": self.tool_name.as_deref().unwrap_or_default(),
            "response": response,
        });
        serde_json::to_string(&output).ok()
    }
}

/// Remap host keys onto standard keys.
///
/// A renamed host key never overrides a standard key the span already
/// carries. Keys set more than once keep their last value, the way a span
/// overwrites on `set_attribute`. The raw tool argument and response keys are
/// dropped when their structured replacement was rebuilt and kept verbatim
/// otherwise.
fn remap_attributes(
    category: SpanCategory,
    attributes: &[KeyValue],
    input_rebuilt: bool,
    output_rebuilt: bool,
) -> Vec<KeyValue> {
    let existing: HashSet<&str> = attributes.iter().map(|kv| kv.key.as_str()).collect();
    let mut remapped = Vec::with_capacity(attributes.len());

    for kv in attributes {
        let key = kv.key.as_str();

        if let Some(target) = renamed_key(key) {
            let rebuilt = match target {
                GEN_AI_TOOL_INPUT => Some(input_rebuilt),
                GEN_AI_TOOL_OUTPUT => Some(output_rebuilt),
                _ => None,
            };
            match rebuilt {
                Some(true) => {}
                Some(false) => remapped.push(kv.clone()),
                None if !existing.contains(target) => {
                    remapped.push(KeyValue::new(target, kv.value.clone()));
                }
                None => {}
            }
            continue;
        }

        if key == GEN_AI_OPERATION_NAME {
            remapped.push(normalize_operation_name(category, kv));
        } else if key == GEN_AI_SYSTEM && kv.value.as_str() == HOST_SYSTEM_NAME {
            remapped.push(KeyValue::new(GEN_AI_SYSTEM, HOST_PUBLIC_PROVIDER));
        } else {
            remapped.push(kv.clone());
        }
    }

    let mut deduped = Vec::with_capacity(remapped.len());
    for kv in remapped {
        upsert(&mut deduped, kv);
    }
    deduped
}

fn normalize_operation_name(category: SpanCategory, kv: &KeyValue) -> KeyValue {
    let operation = kv.value.as_str();
    match category {
        SpanCategory::Model if operation == OPERATION_GENERATE_CONTENT => {
            KeyValue::new(GEN_AI_OPERATION_NAME, OPERATION_CHAT)
        }
        SpanCategory::Invocation | SpanCategory::Agent if operation == OPERATION_INVOKE_AGENT => {
            KeyValue::new(GEN_AI_OPERATION_NAME, OPERATION_CHAIN)
        }
        _ => kv.clone(),
    }
}

/// Append prompt and completion events that the span does not already carry.
fn synthesize_events(
    attributes: &[KeyValue],
    events: &SpanEvents,
    timestamp: SystemTime,
) -> SpanEvents {
    let present: HashSet<&str> = events.events.iter().map(|event| &*event.name).collect();
    let input = first_string(attributes, &[HOST_LLM_REQUEST, INPUT_VALUE]);
    let output = first_string(attributes, &[HOST_LLM_RESPONSE, OUTPUT_VALUE]);

    let mut synthesized = Vec::new();
    let mut add = |name: &'static str, key: &'static str, value: &str| {
        if !present.contains(name) {
            synthesized.push(Event::new(
                name,
                timestamp,
                vec![KeyValue::new(key, value.to_string())],
                0,
            ));
        }
    };

    if let Some(input) = &input {
        add(EVENT_USER_MESSAGE, GEN_AI_MESSAGES, input);
        add(EVENT_CONTENT_PROMPT, INPUT_VALUE, input);
    }
    if let Some(output) = &output {
        add(EVENT_CHOICE, GEN_AI_CHOICE, output);
        add(EVENT_CONTENT_COMPLETION, OUTPUT_VALUE, output);
    }

    let mut merged = events.clone();
    merged.events.extend(synthesized);
    merged
}

/// Value of the first attribute in span order whose key is one of `keys`
fn first_string(attributes: &[KeyValue], keys: &[&str]) -> Option<String> {
    attributes
        .iter()
        .filter(|kv| keys.contains(&kv.key.as_str()))
        .map(|kv| kv.value.as_str().into_owned())
        .find(|value| !value.is_empty())
}

fn rewrite_span_context(
    span_context: &SpanContext,
    tool_call_id: &str,
    registry: &CorrelationRegistry,
) -> SpanContext {
    if let Some(parent) = registry.parent_context_by_tool_call_id(tool_call_id) {
        return with_trace_id(span_context, parent.trace_id());
    }
    if let Some(sdk_trace_id) = registry.sdk_trace_id(span_context.trace_id()) {
        return with_trace_id(span_context, sdk_trace_id);
    }
    span_context.clone()
}

/// Resolve the parent the translated span should report.
fn rewrite_parent(
    span: &SpanData,
    category: SpanCategory,
    tool_call_id: &str,
    registry: &CorrelationRegistry,
) -> SpanContext {
    let host_trace_id = span.span_context.trace_id();

    if category == SpanCategory::Agent {
        if let Some(invocation) = registry.invocation_span_context(host_trace_id) {
            return invocation;
        }
    }

    if let Some(parent) = registry.parent_context_by_tool_call_id(tool_call_id) {
        return parent;
    }

    let parent = SpanContext::new(
        host_trace_id,
        span.parent_span_id,
        span.span_context.trace_flags(),
        false,
        span.span_context.trace_state().clone(),
    );
    if span.parent_span_id != SpanId::INVALID {
        if let Some(sdk_trace_id) = registry.sdk_trace_id(host_trace_id) {
            return with_trace_id(&parent, sdk_trace_id);
        }
    }
    parent
}

fn with_trace_id(span_context: &SpanContext, trace_id: TraceId) -> SpanContext {
    SpanContext::new(
        trace_id,
        span_context.span_id(),
        span_context.trace_flags(),
        span_context.is_remote(),
        span_context.trace_state().clone(),
    )
}

fn public_scope(scope: &InstrumentationLibrary) -> InstrumentationLibrary {
    let mut scope = scope.clone();
    if INTERNAL_SCOPE_NAMES.iter().any(|name| *name == scope.name) {
        scope.name = Cow::Borrowed(PUBLIC_SCOPE_NAME);
    }
    scope.version = Some(Cow::Borrowed(INSTRUMENTATION_VERSION));
    scope
}
