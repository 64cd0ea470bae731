//! Trace correlation and span enrichment for agent runtimes.
//!
//! The host agent runtime emits its own spans in its own traces. This crate
//! stitches them into one AgentLens trace per run:
//!
//! - [`ObservabilityPlugin`] opens a root span per run and records which host
//!   trace and which model-requested tool calls belong to it.
//! - [`EnrichmentProcessor`] stamps session, user, app and agent identifiers
//!   plus kind-specific attributes on every span as it starts.
//! - [`TranslatingExporter`] rewrites trace and parent ids at export time and
//!   renames the host's attributes to the public vocabulary.
//!
//! [`TelemetryPipeline`] wires all of it together.

pub mod attributes;
pub mod classify;
pub mod exporter;
pub mod metrics;
pub mod plugin;
pub mod processor;
pub mod registry;
pub mod scope;
pub mod serialization;
pub mod spans;
pub mod tracer;
pub mod translate;

pub use classify::{SpanCategory, classify};
pub use exporter::{
    ExportErrors, FanoutExporter, InMemoryExporter, JsonLinesExporter, TranslatingExporter,
};
pub use metrics::{
    CharRatioEstimator, GenAiMetrics, InMemoryMetrics, MetricPoint, MetricsRecorder,
    TokenEstimator,
};
pub use plugin::ObservabilityPlugin;
pub use processor::EnrichmentProcessor;
pub use registry::{CorrelationRegistry, InvocationSpan};
pub use scope::{AmbientResolver, ResolvedScope, RuntimeScope, ScopeContextExt, ScopeFields};
pub use serialization::serialize_content;
pub use spans::{
    ModelCallAttributes, ToolCallAttributes, model_call_span, safe_serialize, tool_call_span,
};
pub use tracer::{PipelineBuilder, TelemetryPipeline, init_logging, init_telemetry};
pub use translate::{bridge_tool_trace, translate};
