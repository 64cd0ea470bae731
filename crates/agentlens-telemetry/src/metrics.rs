//! GenAI client metrics and token estimation.

use crate::attributes::*;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};

/// Destination for the metrics recorded by the plugin and the enrichment processor
pub trait MetricsRecorder: Send + Sync + Debug {
    fn record_operation_duration(&self, seconds: f64, attributes: &[KeyValue]);

    /// Records one point per direction, skipping directions with no tokens.
    fn record_token_usage(&self, input: i64, output: i64, attributes: &[KeyValue]);

    fn record_chat_count(&self, count: u64, attributes: &[KeyValue]);

    fn record_exception(&self, attributes: &[KeyValue]);
}

/// OpenTelemetry instruments for the GenAI client metrics
#[derive(Debug, Clone)]
pub struct GenAiMetrics {
    operation_duration: Histogram<f64>,
    token_usage: Histogram<f64>,
    chat_count: Counter<u64>,
    exceptions: Counter<u64>,
}

impl GenAiMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            operation_duration: meter
                .f64_histogram(METRIC_OPERATION_DURATION)
                .with_description("GenAI operation duration in seconds")
                .with_unit("s")
                .init(),
            token_usage: meter
                .f64_histogram(METRIC_TOKEN_USAGE)
                .with_description("Token consumption of LLM invocations")
                .with_unit("count")
                .init(),
            chat_count: meter
                .u64_counter(METRIC_CHAT_COUNT)
                .with_description("Number of LLM invocations")
                .with_unit("count")
                .init(),
            exceptions: meter
                .u64_counter(METRIC_CHAT_EXCEPTIONS)
                .with_description("Number of exceptions occurred during chat completions")
                .with_unit("count")
                .init(),
        }
    }

    /// Instruments bound to the global meter provider.
    pub fn global() -> Self {
        Self::new(&opentelemetry::global::meter(INSTRUMENTATION_NAME))
    }
}

impl MetricsRecorder for GenAiMetrics {
    fn record_operation_duration(&self, seconds: f64, attributes: &[KeyValue]) {
        self.operation_duration.record(seconds, attributes);
    }

    fn record_token_usage(&self, input: i64, output: i64, attributes: &[KeyValue]) {
        for (direction, tokens) in [("input", input), ("output", output)] {
            if tokens > 0 {
                self.token_usage
                    .record(tokens as f64, &with_direction(attributes, direction));
            }
        }
    }

    fn record_chat_count(&self, count: u64, attributes: &[KeyValue]) {
        self.chat_count.add(count, attributes);
    }

    fn record_exception(&self, attributes: &[KeyValue]) {
        self.exceptions.add(1, attributes);
    }
}

fn with_direction(attributes: &[KeyValue], direction: &'static str) -> Vec<KeyValue> {
    let mut tagged = attributes.to_vec();
    tagged.push(KeyValue::new(METRIC_TOKEN_DIRECTION, direction));
    tagged
}

/// A single recorded data point
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: &'static str,
    pub value: f64,
    pub attributes: Vec<KeyValue>,
}

impl MetricPoint {
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.as_str().into_owned())
    }
}

/// Recorder that keeps every point in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    points: Mutex<Vec<MetricPoint>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<MetricPoint> {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn points_named(&self, name: &str) -> Vec<MetricPoint> {
        self.points()
            .into_iter()
            .filter(|point| point.name == name)
            .collect()
    }

    fn push(&self, name: &'static str, value: f64, attributes: Vec<KeyValue>) {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MetricPoint {
                name,
                value,
                attributes,
            });
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn record_operation_duration(&self, seconds: f64, attributes: &[KeyValue]) {
        self.push(METRIC_OPERATION_DURATION, seconds, attributes.to_vec());
    }

    fn record_token_usage(&self, input: i64, output: i64, attributes: &[KeyValue]) {
        for (direction, tokens) in [("input", input), ("output", output)] {
            if tokens > 0 {
                self.push(
                    METRIC_TOKEN_USAGE,
                    tokens as f64,
                    with_direction(attributes, direction),
                );
            }
        }
    }

    fn record_chat_count(&self, count: u64, attributes: &[KeyValue]) {
        self.push(METRIC_CHAT_COUNT, count as f64, attributes.to_vec());
    }

    fn record_exception(&self, attributes: &[KeyValue]) {
        self.push(METRIC_CHAT_EXCEPTIONS, 1.0, attributes.to_vec());
    }
}

/// Estimates a token count from a serialized payload.
pub trait TokenEstimator: Send + Sync + Debug {
    fn estimate(&self, payload: &str) -> i64;
}

/// Coarse estimate of one token per `chars_per_token` bytes of payload.
///
/// This is not a tokenizer; counts are only good for rough usage dashboards.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, payload: &str) -> i64 {
        (payload.len() / self.chars_per_token) as i64
    }
}
