//! Host runtime callbacks.
//!
//! [`ObservabilityPlugin`] opens the AgentLens root span for every run, keeps
//! the correlation registry up to date as the run progresses, accumulates
//! token usage and records the invocation-level metrics.

use crate::attributes::*;
use crate::metrics::MetricsRecorder;
use crate::registry::{CorrelationRegistry, InvocationSpan};
use crate::scope::{AmbientResolver, RuntimeScope, ScopeContextExt, ScopeFields};
use crate::serialization::serialize_content;
use agentlens_core::{CallbackContext, Content, Error, InvocationContext, LLMRequest, LLMResponse};
use dashmap::DashMap;
use opentelemetry::trace::{Span as _, SpanContext, SpanKind, TraceContextExt, TraceId, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Per-run bookkeeping, keyed by invocation id
#[derive(Debug)]
struct InvocationState {
    span: InvocationSpan,
    span_context: SpanContext,
    /// Key the registry files this run's mappings under
    correlation_trace_id: TraceId,
    started: Instant,
    model_name: Option<String>,
    model_started: Option<Instant>,
    prompt_tokens: i64,
    candidate_tokens: i64,
    total_tokens: i64,
    output: Option<Content>,
}

/// Lifecycle hooks the host runtime calls around each run, agent step and model call.
#[derive(Debug)]
pub struct ObservabilityPlugin {
    tracer: Tracer,
    registry: Arc<CorrelationRegistry>,
    resolver: AmbientResolver,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    invocations: DashMap<String, InvocationState>,
}

impl ObservabilityPlugin {
    pub fn new(tracer: Tracer, registry: Arc<CorrelationRegistry>, resolver: AmbientResolver) -> Self {
        Self {
            tracer,
            registry,
            resolver,
            metrics: None,
            invocations: DashMap::new(),
        }
    }

    pub fn with_metrics(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(recorder);
        self
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Number of runs started and not yet finished.
    pub fn active_invocations(&self) -> usize {
        self.invocations.len()
    }

    /// Context of the root span opened for `invocation_id`.
    pub fn invocation_span_context(&self, invocation_id: &str) -> Option<SpanContext> {
        self.invocations
            .get(invocation_id)
            .map(|state| state.span_context.clone())
    }

    /// Opens the AgentLens root span for a run.
    ///
    /// The returned context carries the invocation scope; the host should use
    /// it as the parent context of the spans it emits for this run.
    pub fn before_run(&self, ctx: &dyn InvocationContext, host_cx: &Context) -> Context {
        let fields = ScopeFields::from_invocation(ctx);
        let host_trace_id = host_trace_id(host_cx);

        // Fresh trace: the root span never inherits the host's parent
        let parent = Context::new().with_runtime_scope(RuntimeScope::Invocation(fields.clone()));
        let mut span = self
            .tracer
            .span_builder(SPAN_INVOCATION)
            .with_kind(SpanKind::Server)
            .start_with_context(&self.tracer, &parent);

        if let Some(content) = ctx.user_content() {
            let input = serialize_content(content);
            span.set_attribute(KeyValue::new(INPUT_VALUE, input.clone()));
            span.set_attribute(KeyValue::new(GEN_AI_INPUT, input));
        }

        let span_context = span.span_context().clone();
        let correlation_trace_id = if host_trace_id == TraceId::INVALID {
            span_context.trace_id()
        } else {
            host_trace_id
        };

        let span: InvocationSpan = Arc::new(Mutex::new(span));
        self.registry
            .register_trace_mapping(host_trace_id, span_context.trace_id());
        self.registry
            .register_invocation_span(correlation_trace_id, Arc::clone(&span));

        tracing::debug!(
            invocation_id = ctx.invocation_id(),
            host_trace_id = %host_trace_id,
            sdk_trace_id = %span_context.trace_id(),
            "Opened invocation span"
        );

        self.invocations.insert(
            ctx.invocation_id().to_string(),
            InvocationState {
                span,
                span_context,
                correlation_trace_id,
                started: Instant::now(),
                model_name: None,
                model_started: None,
                prompt_tokens: 0,
                candidate_tokens: 0,
                total_tokens: 0,
                output: None,
            },
        );

        host_cx.with_runtime_scope(RuntimeScope::Invocation(fields))
    }

    /// Called before an agent step. The host may have started a new trace for
    /// the step, so the trace mapping is registered again.
    pub fn before_agent(&self, ctx: &dyn CallbackContext, host_cx: &Context) -> Context {
        let host_trace_id = host_trace_id(host_cx);
        if let Some(state) = self.invocations.get(ctx.invocation_id()) {
            self.registry
                .register_trace_mapping(host_trace_id, state.span_context.trace_id());
            if host_trace_id != TraceId::INVALID && host_trace_id != state.correlation_trace_id {
                self.registry
                    .register_invocation_span(host_trace_id, Arc::clone(&state.span));
            }
        }

        host_cx.with_runtime_scope(RuntimeScope::Callback(ScopeFields::from_callback(ctx)))
    }

    pub fn before_model(&self, ctx: &dyn CallbackContext, request: &LLMRequest) {
        if let Some(mut state) = self.invocations.get_mut(ctx.invocation_id()) {
            if !request.model.is_empty() {
                state.model_name = Some(request.model.clone());
            }
            state.model_started = Some(Instant::now());
        }
    }

    pub fn after_model(
        &self,
        ctx: &dyn CallbackContext,
        host_cx: &Context,
        response: Result<&LLMResponse, &Error>,
    ) {
        let provider = self.resolver.model_provider(host_cx);
        let Some(mut state) = self.invocations.get_mut(ctx.invocation_id()) else {
            tracing::debug!(invocation_id = ctx.invocation_id(), "Model response for unknown invocation");
            return;
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.record_model_exception(&state, &provider, error_type(err));
                return;
            }
        };

        if let Some(code) = response.error_code.as_deref().filter(|code| !code.is_empty()) {
            self.record_model_exception(&state, &provider, code);
        }

        if let Some(model) = response.model_version.as_deref().filter(|m| !m.is_empty()) {
            state.model_name = Some(model.to_string());
        }

        if let Some(content) = &response.content {
            for call in content.function_calls() {
                let Some(call_id) = call.id.as_deref().filter(|id| !id.is_empty()) else {
                    continue;
                };
                self.registry.register_tool_call_mapping(
                    call_id,
                    state.correlation_trace_id,
                    state.span_context.clone(),
                );
                tracing::debug!(tool_call_id = call_id, tool = %call.name, "Bound tool call to invocation span");
            }
        }

        if response.partial {
            return;
        }

        if let Some(content) = &response.content {
            state.output = Some(content.clone());
        }

        let usage = response.usage_metadata.unwrap_or_default();
        state.prompt_tokens += usage.prompt_token_count;
        state.candidate_tokens += usage.candidates_token_count;
        state.total_tokens += usage.effective_total();

        if let Some(metrics) = &self.metrics {
            let dimensions = [
                KeyValue::new(METRIC_OPERATION_NAME, OPERATION_CHAT),
                KeyValue::new(METRIC_OPERATION_TYPE, SPAN_KIND_LLM),
                KeyValue::new(METRIC_RESPONSE_MODEL, state.model_name.clone().unwrap_or_default()),
                KeyValue::new(GEN_AI_SYSTEM, provider),
            ];
            metrics.record_chat_count(1, &dimensions);
            metrics.record_token_usage(
                usage.prompt_token_count,
                usage.candidates_token_count,
                &dimensions,
            );
            if let Some(started) = state.model_started.take() {
                metrics.record_operation_duration(started.elapsed().as_secs_f64(), &dimensions);
            }
        }
    }

    /// Finishes the run: stamps output and usage on the root span, records the
    /// invocation duration, schedules cleanup and ends the span.
    pub fn after_run(&self, ctx: &dyn InvocationContext, host_cx: &Context) {
        let Some((_, state)) = self.invocations.remove(ctx.invocation_id()) else {
            tracing::debug!(invocation_id = ctx.invocation_id(), "after_run for unknown invocation");
            return;
        };

        let sdk_span_id = state.span_context.span_id();
        {
            let mut span = state.span.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(output) = &state.output {
                let output = serialize_content(output);
                span.set_attribute(KeyValue::new(OUTPUT_VALUE, output.clone()));
                span.set_attribute(KeyValue::new(GEN_AI_OUTPUT, output));
            }
            if let Some(model) = &state.model_name {
                span.set_attribute(KeyValue::new(GEN_AI_RESPONSE_MODEL, model.clone()));
            }
            if state.total_tokens > 0 {
                span.set_attribute(KeyValue::new(GEN_AI_USAGE_INPUT_TOKENS, state.prompt_tokens));
                span.set_attribute(KeyValue::new(GEN_AI_USAGE_OUTPUT_TOKENS, state.candidate_tokens));
                span.set_attribute(KeyValue::new(GEN_AI_USAGE_TOTAL_TOKENS, state.total_tokens));
            }
            span.end();
        }

        if let Some(metrics) = &self.metrics {
            let dimensions = [
                KeyValue::new(METRIC_OPERATION_NAME, OPERATION_CHAIN),
                KeyValue::new(METRIC_OPERATION_TYPE, SPAN_KIND_WORKFLOW),
                KeyValue::new(GEN_AI_SYSTEM, self.resolver.model_provider(host_cx)),
            ];
            metrics.record_operation_duration(state.started.elapsed().as_secs_f64(), &dimensions);
        }

        self.registry
            .schedule_cleanup(state.correlation_trace_id, sdk_span_id);
    }

    /// Ends every root span still open and stops the cleanup loop.
    pub fn shutdown(&self) {
        self.invocations.clear();
        self.registry.end_all_invocation_spans();
        self.registry.shutdown();
    }

    fn record_model_exception(&self, state: &InvocationState, provider: &str, error_type: &str) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.record_exception(&[
            KeyValue::new(METRIC_OPERATION_NAME, OPERATION_CHAT),
            KeyValue::new(METRIC_OPERATION_TYPE, SPAN_KIND_LLM),
            KeyValue::new(METRIC_RESPONSE_MODEL, state.model_name.clone().unwrap_or_default()),
            KeyValue::new(METRIC_ERROR_TYPE, error_type.to_string()),
            KeyValue::new(GEN_AI_SYSTEM, provider.to_string()),
        ]);
    }
}

fn host_trace_id(cx: &Context) -> TraceId {
    let span = cx.span();
    let span_context = span.span_context();
    if span_context.is_valid() {
        span_context.trace_id()
    } else {
        TraceId::INVALID
    }
}

fn error_type(err: &Error) -> &'static str {
    match err {
        Error::Model(_) => "model_error",
        Error::Io(_) => "io_error",
        Error::Serialization(_) => "serialization_error",
        _ => "error",
    }
}
