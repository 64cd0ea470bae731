//! Runs one simulated agent turn through the full AgentLens pipeline.
//!
//! The "host runtime" here starts its own traces, exactly like a real agent
//! framework would. The exported spans (printed as JSON lines) all land in
//! one AgentLens trace.
//!
//! ```bash
//! cp config.toml.example config.toml
//! RUST_LOG=agentlens_telemetry=debug cargo run --example pipeline
//! ```

use agentlens_core::config::StdoutConfig;
use agentlens_core::{
    Content, DefaultInvocationContext, FunctionCall, LLMRequest, LLMResponse, LensConfig, Part,
    UsageMetadata,
};
use agentlens_telemetry::attributes::*;
use agentlens_telemetry::{TelemetryPipeline, ToolCallAttributes, init_telemetry, tool_call_span};
use anyhow::Result;
use opentelemetry::trace::{SpanBuilder, TraceContextExt, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match LensConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Using built-in defaults: {}", e);
            let mut config = LensConfig::test_defaults();
            config.observability.opentelemetry.stdout = Some(StdoutConfig { enable: true });
            config
        }
    };

    let pipeline = TelemetryPipeline::install(&config)?;
    init_telemetry(&pipeline)?;

    let plugin = pipeline.plugin();
    let host = pipeline.provider().tracer(HOST_SYSTEM_NAME);

    let inv = DefaultInvocationContext::new("inv-demo", "", "user-1", "session-1", "weather_agent")
        .with_user_content(Content::new_user_text("What's the weather in Lisbon?"));
    let cb = inv.callback("weather_agent");

    // The host runtime traces the run in its own trace
    let host_root = SpanBuilder::from_name(SPAN_INVOCATION).start_with_context(&host, &Context::new());
    let host_cx = Context::new().with_span(host_root);
    let run_cx = plugin.before_run(&inv, &host_cx);

    let agent = SpanBuilder::from_name("invoke_agent weather_agent").start_with_context(&host, &run_cx);
    let agent_cx = plugin.before_agent(&cb, &run_cx.with_span(agent));

    plugin.before_model(&cb, &LLMRequest::new("gpt-4o"));
    let model = SpanBuilder::from_name("generate_content gpt-4o")
        .with_attributes(vec![KeyValue::new(GEN_AI_REQUEST_MODEL, "gpt-4o")])
        .start_with_context(&host, &agent_cx);
    let response = LLMResponse {
        content: Some(Content {
            role: "model".to_string(),
            parts: vec![Part::FunctionCall {
                function_call: FunctionCall {
                    name: "get_weather".to_string(),
                    args: json!({"city": "Lisbon"}),
                    id: Some("call-42".to_string()),
                },
            }],
        }),
        turn_complete: true,
        usage_metadata: Some(UsageMetadata {
            prompt_token_count: 24,
            candidates_token_count: 9,
            total_token_count: 33,
        }),
        ..Default::default()
    };
    agent_cx.with_span(model).span().end();
    plugin.after_model(&cb, &agent_cx, Ok(&response));

    // The tool runs somewhere that lost the trace; the call id still links it
    {
        let span = tool_call_span(&ToolCallAttributes {
            tool_name: "get_weather".to_string(),
            tool_description: "Current weather for a city".to_string(),
            tool_call_id: "call-42".to_string(),
            invocation_id: "inv-demo".to_string(),
            session_id: "session-1".to_string(),
            args_json: json!({"city": "Lisbon"}).to_string(),
            response_json: json!({"temp_c": 21, "sky": "clear"}).to_string(),
            ..Default::default()
        });
        let _guard = span.enter();
        tracing::info!("Tool executed");
    }

    agent_cx.span().end();
    host_cx.span().end();
    plugin.after_run(&inv, &run_cx);

    pipeline.shutdown()?;
    Ok(())
}
