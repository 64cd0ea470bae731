//! Pipeline setup: tracer provider, enrichment, translation and senders

use crate::attributes::INSTRUMENTATION_NAME;
use crate::exporter::{FanoutExporter, JsonLinesExporter, TranslatingExporter};
use crate::metrics::{GenAiMetrics, MetricsRecorder};
use crate::plugin::ObservabilityPlugin;
use crate::processor::EnrichmentProcessor;
use crate::registry::CorrelationRegistry;
use crate::scope::AmbientResolver;
use agentlens_core::{Error, LensConfig, Result};
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::trace::{Config, Tracer, TracerProvider};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Builds a [`TelemetryPipeline`].
///
/// Senders come from the configuration (stdout and/or file) plus any added
/// with [`PipelineBuilder::with_sender`].
#[derive(Debug)]
pub struct PipelineBuilder {
    config: LensConfig,
    senders: FanoutExporter,
    resolver: Option<AmbientResolver>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    registry: Option<Arc<CorrelationRegistry>>,
    batch: bool,
}

impl PipelineBuilder {
    pub fn new(config: LensConfig) -> Self {
        Self {
            config,
            senders: FanoutExporter::new(),
            resolver: None,
            metrics: None,
            registry: None,
            batch: true,
        }
    }

    pub fn with_sender<E: SpanExporter + 'static>(mut self, sender: E) -> Self {
        self.senders = self.senders.with_sender(sender);
        self
    }

    pub fn with_resolver(mut self, resolver: AmbientResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Records metrics through `recorder` instead of the global meter.
    ///
    /// Ignored when metrics are disabled in the configuration.
    pub fn with_metrics(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(recorder);
        self
    }

    pub fn with_registry(mut self, registry: Arc<CorrelationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Export each span as it ends instead of batching on the tokio runtime.
    pub fn with_simple_export(mut self) -> Self {
        self.batch = false;
        self
    }

    pub fn build(self) -> Result<TelemetryPipeline> {
        let otel = &self.config.observability.opentelemetry;

        let mut senders = self.senders;
        if otel.stdout.as_ref().is_some_and(|stdout| stdout.enable) {
            senders = senders.with_sender(JsonLinesExporter::stdout());
        }
        if let Some(file) = otel.file.as_ref().filter(|file| !file.path.is_empty()) {
            let exporter = JsonLinesExporter::file(&file.path).map_err(|err| {
                Error::config_error(format!("cannot open span file {}: {}", file.path, err))
            })?;
            senders = senders.with_sender(exporter);
        }
        if senders.is_empty() {
            tracing::warn!("No span senders configured, spans will be dropped");
        }

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(CorrelationRegistry::new()));
        let cleanup = if tokio::runtime::Handle::try_current().is_ok() {
            registry.start_cleanup()
        } else {
            tracing::warn!("No tokio runtime, correlation cleanup loop not started");
            None
        };

        let resolver = self
            .resolver
            .unwrap_or_else(|| AmbientResolver::from_config(&self.config));
        let metrics: Option<Arc<dyn MetricsRecorder>> = if otel.metrics_enabled() {
            Some(
                self.metrics
                    .unwrap_or_else(|| Arc::new(GenAiMetrics::global())),
            )
        } else {
            None
        };

        let mut processor = EnrichmentProcessor::new(resolver.clone());
        if let Some(metrics) = &metrics {
            processor = processor.with_metrics(Arc::clone(metrics));
        }

        let sender_count = senders.len();
        let exporter = TranslatingExporter::new(senders, Arc::clone(&registry));

        let service_name = self
            .config
            .observability
            .service_name
            .clone()
            .unwrap_or_else(|| INSTRUMENTATION_NAME.to_string());
        let builder = TracerProvider::builder()
            .with_config(
                Config::default()
                    .with_resource(Resource::new(vec![KeyValue::new("service.name", service_name)])),
            )
            .with_span_processor(processor);
        let provider = if self.batch {
            builder
                .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                .build()
        } else {
            builder.with_simple_exporter(exporter).build()
        };

        let tracer = provider.tracer(INSTRUMENTATION_NAME);
        let mut plugin =
            ObservabilityPlugin::new(tracer.clone(), Arc::clone(&registry), resolver);
        if let Some(metrics) = metrics {
            plugin = plugin.with_metrics(metrics);
        }

        tracing::info!(
            senders = sender_count,
            batch = self.batch,
            metrics = otel.metrics_enabled(),
            "Telemetry pipeline installed"
        );

        Ok(TelemetryPipeline {
            provider,
            tracer,
            registry,
            plugin: Arc::new(plugin),
            cleanup,
        })
    }
}

/// A running pipeline
#[derive(Debug)]
pub struct TelemetryPipeline {
    provider: TracerProvider,
    tracer: Tracer,
    registry: Arc<CorrelationRegistry>,
    plugin: Arc<ObservabilityPlugin>,
    cleanup: Option<JoinHandle<()>>,
}

impl TelemetryPipeline {
    pub fn builder(config: LensConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Builds the pipeline from `config` and installs its tracer provider globally.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install(config: &LensConfig) -> Result<Self> {
        let pipeline = PipelineBuilder::new(config.clone()).build()?;
        opentelemetry::global::set_tracer_provider(pipeline.provider.clone());
        Ok(pipeline)
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn plugin(&self) -> Arc<ObservabilityPlugin> {
        Arc::clone(&self.plugin)
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Export every finished span now.
    pub fn force_flush(&self) -> Result<()> {
        for result in self.provider.force_flush() {
            result.map_err(|err| Error::telemetry_error(err.to_string()))?;
        }
        Ok(())
    }

    /// Ends open invocation spans, flushes and shuts the provider down.
    pub fn shutdown(mut self) -> Result<()> {
        self.plugin.shutdown();
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
        self.force_flush()?;
        self.provider
            .shutdown()
            .map_err(|err| Error::telemetry_error(err.to_string()))
    }
}

/// Install a `tracing` subscriber with an `EnvFilter` (honours `RUST_LOG`) and
/// a fmt layer. Logging only; no spans are exported.
pub fn init_logging() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_line_number(true),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|err| Error::telemetry_error(err.to_string()))
}

/// Install a `tracing` subscriber whose spans flow into `pipeline`, next to
/// the logging layers of [`init_logging`].
///
/// # Example
///
/// ```rust,no_run
/// use agentlens_core::LensConfig;
/// use agentlens_telemetry::{TelemetryPipeline, init_telemetry};
///
/// # async fn run() -> agentlens_core::Result<()> {
/// let pipeline = TelemetryPipeline::install(&LensConfig::load()?)?;
/// init_telemetry(&pipeline)?;
/// # Ok(())
/// # }
/// ```
pub fn init_telemetry(pipeline: &TelemetryPipeline) -> Result<()> {
    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(pipeline.tracer().clone());

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_line_number(true),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|err| Error::telemetry_error(err.to_string()))
}
