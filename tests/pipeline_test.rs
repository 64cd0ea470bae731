// Pipeline tests: enrichment, metrics and senders behind a real tracer provider.

mod common;

use agentlens_core::config::FileConfig;
use agentlens_core::{DefaultInvocationContext, LLMRequest, LensConfig};
use agentlens_telemetry::attributes::*;
use agentlens_telemetry::{AmbientResolver, InMemoryExporter, RuntimeScope, ScopeContextExt, ScopeFields, TelemetryPipeline};
use common::*;
use opentelemetry::trace::{SpanBuilder, TraceContextExt};
use opentelemetry::{Context, KeyValue};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

#[test]
fn test_tool_span_metrics_use_estimated_tokens() {
    let h = harness();
    let start = SystemTime::now();

    // 28 bytes of arguments, 13 bytes of response
    let tool_cx = h.host_span(
        tool_builder(
            "get_weather",
            "call-1",
            r#"{"city":"Lisbon","unit":"C"}"#,
            r#"{"temp":21.5}"#,
        )
        .with_start_time(start),
        &Context::new(),
    );
    end_after(&tool_cx, start, Duration::from_millis(250));

    let durations = h.metrics.points_named(METRIC_OPERATION_DURATION);
    assert_eq!(durations.len(), 1);
    assert!((durations[0].value - 0.25).abs() < 1e-6);
    assert_eq!(durations[0].attribute(METRIC_OPERATION_NAME).as_deref(), Some("get_weather"));
    assert_eq!(durations[0].attribute(METRIC_OPERATION_TYPE).as_deref(), Some(SPAN_KIND_TOOL));
    assert_eq!(durations[0].attribute(GEN_AI_SYSTEM).as_deref(), Some("test-provider"));

    let tokens = h.metrics.points_named(METRIC_TOKEN_USAGE);
    let by_direction: HashMap<String, f64> = tokens
        .iter()
        .map(|p| (p.attribute(METRIC_TOKEN_DIRECTION).unwrap(), p.value))
        .collect();
    assert_eq!(by_direction["input"], 7.0);
    assert_eq!(by_direction["output"], 3.0);
}

#[test]
fn test_zero_duration_tool_span_records_no_metrics() {
    let h = harness();
    let start = SystemTime::now();

    let tool_cx = h.host_span(
        tool_builder("get_weather", "call-1", r#"{"city":"Lisbon"}"#, r#"{"temp":21}"#)
            .with_start_time(start),
        &Context::new(),
    );
    end_after(&tool_cx, start, Duration::ZERO);

    assert!(h.metrics.points().is_empty());
    // The span itself is still exported
    assert_eq!(h.exported("execute_tool get_weather").len(), 1);
}

#[test]
fn test_model_span_metrics_from_usage_attributes() {
    let h = harness();
    let start = SystemTime::now();

    let model_cx = h.host_span(
        SpanBuilder::from_name("generate_content gemini-2.0-flash")
            .with_start_time(start)
            .with_attributes(vec![
                KeyValue::new(GEN_AI_REQUEST_MODEL, "gemini-2.0-flash"),
                KeyValue::new(GEN_AI_RESPONSE_PROMPT_TOKEN_COUNT, 40_i64),
                KeyValue::new(GEN_AI_RESPONSE_CANDIDATES_TOKEN_COUNT, 10_i64),
            ]),
        &Context::new(),
    );
    end_after(&model_cx, start, Duration::from_secs(2));

    let durations = h.metrics.points_named(METRIC_OPERATION_DURATION);
    assert_eq!(durations.len(), 1);
    assert_eq!(durations[0].value, 2.0);
    assert_eq!(durations[0].attribute(METRIC_OPERATION_NAME).as_deref(), Some(OPERATION_CHAT));
    assert_eq!(
        durations[0].attribute(METRIC_RESPONSE_MODEL).as_deref(),
        Some("gemini-2.0-flash")
    );
    assert_eq!(h.metrics.points_named(METRIC_TOKEN_USAGE).len(), 2);
}

#[test]
fn test_malformed_tool_json_passes_through() {
    let h = harness();

    let tool_cx = h.host_span(
        tool_builder("get_weather", "call-1", "{not json", r#"{"temp":21}"#),
        &Context::new(),
    );
    end(&tool_cx);

    let tool = &h.exported("execute_tool get_weather")[0];
    assert_eq!(attr(tool, HOST_TOOL_CALL_ARGS).as_deref(), Some("{not json"));
    assert_eq!(attr(tool, GEN_AI_TOOL_INPUT), None);
    assert_eq!(attr(tool, GEN_AI_SPAN_KIND).as_deref(), Some(SPAN_KIND_TOOL));

    // The response was valid and is still rebuilt
    let output: serde_json::Value =
        serde_json::from_str(&attr(tool, GEN_AI_TOOL_OUTPUT).unwrap()).unwrap();
    assert_eq!(output["response"]["temp"], 21);
    assert_eq!(attr(tool, HOST_TOOL_RESPONSE), None);
}

#[test]
fn test_exported_spans_carry_each_key_once() {
    let h = harness();

    let model_cx = h.host_span(
        SpanBuilder::from_name("generate_content gpt-4o").with_attributes(vec![
            KeyValue::new(GEN_AI_SYSTEM, HOST_SYSTEM_NAME),
            KeyValue::new(GEN_AI_OPERATION_NAME, OPERATION_GENERATE_CONTENT),
            KeyValue::new(GEN_AI_REQUEST_MODEL, "gpt-4o"),
        ]),
        &Context::new(),
    );
    end(&model_cx);
    let tool_cx = h.host_span(
        tool_builder("get_weather", "call-1", r#"{"city":"Lisbon"}"#, r#"{"temp":21}"#),
        &Context::new(),
    );
    end(&tool_cx);

    let spans = h.sender.spans();
    assert_eq!(spans.len(), 2);
    for span in &spans {
        let mut keys: Vec<&str> = span.attributes.iter().map(|kv| kv.key.as_str()).collect();
        let total = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), total, "span {} repeats a key", span.name);
    }

    // The provider stamped at span start overwrites the host's literal
    let model = &h.exported(SPAN_CALL_LLM)[0];
    assert_eq!(attr(model, GEN_AI_SYSTEM).as_deref(), Some("test-provider"));
    assert_eq!(attr(model, GEN_AI_OPERATION_NAME).as_deref(), Some(OPERATION_CHAT));
    let tool = &h.exported("execute_tool get_weather")[0];
    assert_eq!(attr(tool, GEN_AI_TOOL_NAME).as_deref(), Some("get_weather"));
}

#[test]
fn test_callback_scope_wins_over_invocation_scope() {
    let h = harness();
    let inv = DefaultInvocationContext::new("inv-1", "app-from-run", "user-1", "sess-1", "root");
    let cb = inv.callback("researcher");
    let plugin = h.pipeline.plugin();

    let run_cx = plugin.before_run(&inv, &Context::new());
    let step_cx = plugin.before_agent(&cb, &run_cx);
    plugin.before_model(&cb, &LLMRequest::new("gpt-4o"));

    let step = h.host_span(SpanBuilder::from_name("fetch notes"), &step_cx);
    end(&step);
    plugin.after_run(&inv, &run_cx);

    let span = &h.exported("fetch notes")[0];
    assert_eq!(attr(span, GEN_AI_AGENT_NAME).as_deref(), Some("researcher"));
    assert_eq!(attr(span, AGENT_NAME_ALIAS).as_deref(), Some("researcher"));
    assert_eq!(attr(span, GEN_AI_APP_NAME).as_deref(), Some("app-from-run"));
    assert_eq!(attr(span, GEN_AI_INVOCATION_ID).as_deref(), Some("inv-1"));
    assert_eq!(attr(span, CALL_TYPE_KEY).as_deref(), Some(DEFAULT_CALL_TYPE));
}

#[test]
fn test_environment_fills_what_runtime_and_config_leave_out() {
    let sender = InMemoryExporter::new();
    let mut config = LensConfig::test_defaults();
    config.model.provider = None;
    config.observability.opentelemetry.enable_metrics = Some(false);

    let env: HashMap<&str, &str> = HashMap::from([
        (ENV_MODEL_PROVIDER, "anthropic"),
        (ENV_USER_ID, "env-user"),
        (ENV_SESSION_ID, "env-session"),
        (ENV_CALL_TYPE, "batch"),
    ]);
    let resolver = AmbientResolver::from_config(&config)
        .with_env_lookup(move |key| env.get(key).map(|v| v.to_string()));
    let pipeline = TelemetryPipeline::builder(config)
        .with_sender(sender.clone())
        .with_resolver(resolver)
        .with_simple_export()
        .build()
        .unwrap();
    let host = opentelemetry::trace::TracerProvider::tracer(pipeline.provider(), HOST_SYSTEM_NAME);

    let scoped = Context::new().with_runtime_scope(RuntimeScope::Invocation(ScopeFields {
        session_id: Some("sess-from-run".to_string()),
        ..Default::default()
    }));
    let span = SpanBuilder::from_name("generate_content").start_with_context(&host, &scoped);
    Context::new().with_span(span).span().end();

    let span = &sender.spans()[0];
    assert_eq!(span.name, SPAN_CALL_LLM);
    assert_eq!(attr(span, GEN_AI_SESSION_ID).as_deref(), Some("sess-from-run"));
    assert_eq!(attr(span, GEN_AI_USER_ID).as_deref(), Some("env-user"));
    assert_eq!(attr(span, GEN_AI_SYSTEM).as_deref(), Some("anthropic"));
    assert_eq!(attr(span, CALL_TYPE_KEY).as_deref(), Some("batch"));
    assert_eq!(attr(span, GEN_AI_APP_NAME).as_deref(), Some("test-app"));
    assert_eq!(attr(span, GEN_AI_AGENT_NAME).as_deref(), Some(FALLBACK_AGENT_NAME));
}

#[test]
fn test_every_sender_receives_the_translated_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spans.jsonl");
    let sender = InMemoryExporter::new();

    let mut config = LensConfig::test_defaults();
    config.observability.service_name = Some("weather-bot".to_string());
    config.observability.opentelemetry.file = Some(FileConfig {
        path: path.display().to_string(),
    });
    let pipeline = TelemetryPipeline::builder(config)
        .with_sender(sender.clone())
        .with_resolver(AmbientResolver::default().with_env_lookup(|_| None))
        .with_simple_export()
        .build()
        .unwrap();
    let host = opentelemetry::trace::TracerProvider::tracer(pipeline.provider(), HOST_SYSTEM_NAME);

    let span = tool_builder("get_weather", "call-1", r#"{"city":"Lisbon"}"#, r#"{"temp":21}"#)
        .start_with_context(&host, &Context::new());
    Context::new().with_span(span).span().end();
    pipeline.shutdown().unwrap();

    assert_eq!(sender.spans().len(), 1);
    let contents = std::fs::read_to_string(&path).unwrap();
    let line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(line["name"], "execute_tool get_weather");
    assert_eq!(line["scope"]["name"], PUBLIC_SCOPE_NAME);
    assert!(line["attributes"][GEN_AI_TOOL_INPUT].as_str().unwrap().contains("Lisbon"));
    assert_eq!(line["attributes"][GEN_AI_SPAN_KIND], SPAN_KIND_TOOL);
    assert_eq!(line["resource"]["service.name"], "weather-bot");
}
