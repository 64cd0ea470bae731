//! Span processor that stamps ambient identifiers and kind-specific
//! attributes when a span starts, and records operation metrics when
//! model and tool spans end.

use crate::attributes::*;
use crate::classify::{SpanCategory, classify, name_suffix};
use crate::metrics::{CharRatioEstimator, MetricsRecorder, TokenEstimator};
use crate::scope::AmbientResolver;
use opentelemetry::trace::{Span as _, TraceResult};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::trace::{Span, SpanProcessor};
use std::sync::Arc;

/// Enriches every span at start and feeds metrics at end
#[derive(Debug)]
pub struct EnrichmentProcessor {
    resolver: AmbientResolver,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    estimator: Arc<dyn TokenEstimator>,
}

impl EnrichmentProcessor {
    pub fn new(resolver: AmbientResolver) -> Self {
        Self {
            resolver,
            metrics: None,
            estimator: Arc::new(CharRatioEstimator::default()),
        }
    }

    /// Enable metric emission through `recorder`.
    pub fn with_metrics(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(recorder);
        self
    }

    pub fn with_token_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Attributes stamped on a span named `name` started under `cx`.
    pub fn start_attributes(&self, name: &str, cx: &Context) -> Vec<KeyValue> {
        let scope = self.resolver.resolve(cx);
        let category = classify(name);

        let mut attrs = vec![
            KeyValue::new(REPORT_SOURCE_KEY, REPORT_SOURCE),
            KeyValue::new(GEN_AI_SYSTEM, scope.model_provider),
            KeyValue::new(GEN_AI_SYSTEM_VERSION, INSTRUMENTATION_VERSION),
            KeyValue::new(INSTRUMENTATION_KEY, INSTRUMENTATION_VERSION),
            KeyValue::new(CALL_TYPE_KEY, scope.call_type),
        ];
        push_with_aliases(&mut attrs, GEN_AI_SESSION_ID, &scope.session_id, &[SESSION_ID_ALIAS]);
        push_with_aliases(&mut attrs, GEN_AI_USER_ID, &scope.user_id, &[USER_ID_ALIAS]);
        push_with_aliases(
            &mut attrs,
            GEN_AI_APP_NAME,
            &scope.app_name,
            &[APP_NAME_ALIAS, APP_NAME_DOT_ALIAS],
        );
        push_with_aliases(
            &mut attrs,
            GEN_AI_INVOCATION_ID,
            &scope.invocation_id,
            &[INVOCATION_ID_ALIAS],
        );

        // Agent spans name their agent; that beats the ambient value
        let agent_name = match (category, name_suffix(name)) {
            (SpanCategory::Agent, Some(agent)) => agent.to_string(),
            _ => scope.agent_name,
        };
        push_with_aliases(
            &mut attrs,
            GEN_AI_AGENT_NAME,
            &agent_name,
            &[AGENT_NAME_ALIAS, AGENT_NAME_DOT_ALIAS],
        );

        match category {
            SpanCategory::Invocation | SpanCategory::Agent => {
                attrs.push(KeyValue::new(GEN_AI_SPAN_KIND, SPAN_KIND_WORKFLOW));
                attrs.push(KeyValue::new(GEN_AI_OPERATION_NAME, OPERATION_CHAIN));
            }
            SpanCategory::Model => {
                attrs.push(KeyValue::new(GEN_AI_SPAN_KIND, SPAN_KIND_LLM));
                attrs.push(KeyValue::new(GEN_AI_OPERATION_NAME, OPERATION_CHAT));
                attrs.push(KeyValue::new(GEN_AI_REQUEST_TYPE, REQUEST_TYPE_CHAT));
            }
            SpanCategory::Tool => {
                attrs.push(KeyValue::new(GEN_AI_SPAN_KIND, SPAN_KIND_TOOL));
                attrs.push(KeyValue::new(GEN_AI_OPERATION_NAME, OPERATION_EXECUTE_TOOL));
                if let Some(tool_name) = name_suffix(name) {
                    attrs.push(KeyValue::new(GEN_AI_TOOL_NAME, tool_name.to_string()));
                }
            }
            SpanCategory::Unknown => {}
        }

        attrs
    }

    fn record_end_metrics(&self, metrics: &dyn MetricsRecorder, span: &SpanData) {
        let category = classify(&span.name);
        if !matches!(category, SpanCategory::Tool | SpanCategory::Model) {
            return;
        }

        let elapsed = match span.end_time.duration_since(span.start_time) {
            Ok(elapsed) if !elapsed.is_zero() => elapsed.as_secs_f64(),
            _ => {
                tracing::debug!(span = %span.name, "Skipping metrics for span with non-positive duration");
                return;
            }
        };

        let provider = string_attr(&span.attributes, GEN_AI_SYSTEM)
            .unwrap_or_else(|| FALLBACK_MODEL_PROVIDER.to_string());

        let (dimensions, input, output) = if category == SpanCategory::Tool {
            let tool_name = string_attr(&span.attributes, GEN_AI_TOOL_NAME)
                .or_else(|| name_suffix(&span.name).map(str::to_string))
                .unwrap_or_default();
            let args = string_attr(&span.attributes, HOST_TOOL_CALL_ARGS).unwrap_or_default();
            let response = string_attr(&span.attributes, HOST_TOOL_RESPONSE).unwrap_or_default();

            let dimensions = vec![
                KeyValue::new(METRIC_OPERATION_NAME, tool_name),
                KeyValue::new(METRIC_OPERATION_TYPE, SPAN_KIND_TOOL),
                KeyValue::new(GEN_AI_SYSTEM, provider),
            ];
            (
                dimensions,
                self.estimator.estimate(&args),
                self.estimator.estimate(&response),
            )
        } else {
            let model = string_attr(&span.attributes, GEN_AI_RESPONSE_MODEL)
                .or_else(|| string_attr(&span.attributes, GEN_AI_REQUEST_MODEL))
                .unwrap_or_default();
            let input = int_attr(&span.attributes, GEN_AI_USAGE_INPUT_TOKENS)
                .or_else(|| int_attr(&span.attributes, GEN_AI_RESPONSE_PROMPT_TOKEN_COUNT))
                .unwrap_or(0);
            let output = int_attr(&span.attributes, GEN_AI_USAGE_OUTPUT_TOKENS)
                .or_else(|| int_attr(&span.attributes, GEN_AI_RESPONSE_CANDIDATES_TOKEN_COUNT))
                .unwrap_or(0);

            let dimensions = vec![
                KeyValue::new(METRIC_OPERATION_NAME, OPERATION_CHAT),
                KeyValue::new(METRIC_OPERATION_TYPE, SPAN_KIND_LLM),
                KeyValue::new(METRIC_RESPONSE_MODEL, model),
                KeyValue::new(GEN_AI_SYSTEM, provider),
            ];
            (dimensions, input, output)
        };

        metrics.record_operation_duration(elapsed, &dimensions);
        if input > 0 || output > 0 {
            metrics.record_token_usage(input, output, &dimensions);
        }
    }
}

fn push_with_aliases(attrs: &mut Vec<KeyValue>, key: &'static str, value: &str, aliases: &[&'static str]) {
    attrs.push(KeyValue::new(key, value.to_string()));
    for alias in aliases {
        attrs.push(KeyValue::new(*alias, value.to_string()));
    }
}

impl SpanProcessor for EnrichmentProcessor {
    fn on_start(&self, span: &mut Span, cx: &Context) {
        let Some(name) = span.exported_data().map(|data| data.name) else {
            return;
        };

        for kv in self.start_attributes(&name, cx) {
            span.set_attribute(kv);
        }
    }

    fn on_end(&self, span: SpanData) {
        if let Some(metrics) = &self.metrics {
            self.record_end_metrics(metrics.as_ref(), &span);
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> TraceResult<()> {
        Ok(())
    }
}
