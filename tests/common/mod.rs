//! Common test utilities and helpers
#![allow(dead_code)]

use agentlens_core::{Content, FunctionCall, LLMResponse, LensConfig, Part};
use agentlens_telemetry::attributes::*;
use agentlens_telemetry::{
    AmbientResolver, InMemoryExporter, InMemoryMetrics, TelemetryPipeline,
};
use opentelemetry::trace::{SpanBuilder, TraceContextExt, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::trace::Tracer;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// A pipeline exporting synchronously into memory, plus a tracer standing in
/// for the host runtime's instrumentation.
pub struct Harness {
    pub pipeline: TelemetryPipeline,
    pub sender: InMemoryExporter,
    pub metrics: Arc<InMemoryMetrics>,
    pub host: Tracer,
}

pub fn harness() -> Harness {
    let sender = InMemoryExporter::new();
    let metrics = Arc::new(InMemoryMetrics::new());
    let config = LensConfig::test_defaults();
    let pipeline = TelemetryPipeline::builder(config.clone())
        .with_sender(sender.clone())
        .with_resolver(AmbientResolver::from_config(&config).with_env_lookup(|_| None))
        .with_metrics(metrics.clone())
        .with_simple_export()
        .build()
        .expect("pipeline");
    let host = pipeline.provider().tracer(HOST_SYSTEM_NAME);

    Harness {
        pipeline,
        sender,
        metrics,
        host,
    }
}

impl Harness {
    /// Start a host span under `parent` and return a context carrying it.
    pub fn host_span(&self, builder: SpanBuilder, parent: &Context) -> Context {
        let span = builder.start_with_context(&self.host, parent);
        parent.with_span(span)
    }

    pub fn exported(&self, name: &str) -> Vec<SpanData> {
        self.sender
            .spans()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }
}

/// End the span carried by `cx`.
pub fn end(cx: &Context) {
    cx.span().end();
}

/// End the span carried by `cx` at `start + elapsed`.
pub fn end_after(cx: &Context, start: SystemTime, elapsed: Duration) {
    cx.span().end_with_timestamp(start + elapsed);
}

pub fn tool_builder(tool: &str, call_id: &str, args: &str, response: &str) -> SpanBuilder {
    SpanBuilder::from_name(format!("{} {}", SPAN_EXECUTE_TOOL, tool)).with_attributes(vec![
        KeyValue::new(GEN_AI_TOOL_NAME, tool.to_string()),
        KeyValue::new(GEN_AI_TOOL_DESCRIPTION, format!("Looks up {}", tool)),
        KeyValue::new(GEN_AI_TOOL_CALL_ID, call_id.to_string()),
        KeyValue::new(HOST_TOOL_CALL_ARGS, args.to_string()),
        KeyValue::new(HOST_TOOL_RESPONSE, response.to_string()),
        KeyValue::new(GEN_AI_OPERATION_NAME, OPERATION_EXECUTE_TOOL),
    ])
}

pub fn function_calls(ids: &[&str]) -> LLMResponse {
    LLMResponse {
        content: Some(Content {
            role: "model".to_string(),
            parts: ids
                .iter()
                .map(|id| Part::FunctionCall {
                    function_call: FunctionCall {
                        name: "get_weather".to_string(),
                        args: serde_json::json!({"city": "Lisbon"}),
                        id: Some(id.to_string()),
                    },
                })
                .collect(),
        }),
        turn_complete: true,
        ..Default::default()
    }
}

pub fn attr(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
}
