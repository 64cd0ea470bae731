//! Span exporters: the translating wrapper placed in front of every sender,
//! a fan-out to several senders, and a JSON-lines sender.

use crate::registry::CorrelationRegistry;
use crate::translate::{bridge_tool_trace, translate};
use futures::future::{self, BoxFuture};
use opentelemetry::trace::{SpanKind, Status, TraceError};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use serde_json::{Map, json};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

/// Translates every span of a batch before handing it to `inner`.
#[derive(Debug)]
pub struct TranslatingExporter<E> {
    inner: E,
    registry: Arc<CorrelationRegistry>,
}

impl<E: SpanExporter> TranslatingExporter<E> {
    pub fn new(inner: E, registry: Arc<CorrelationRegistry>) -> Self {
        Self { inner, registry }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: SpanExporter> SpanExporter for TranslatingExporter<E> {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        if batch.is_empty() {
            return Box::pin(future::ready(Ok(())));
        }

        // Bridge first so spans later in the batch see mappings from earlier tool spans
        for span in &batch {
            bridge_tool_trace(span, &self.registry);
        }

        let translated: Vec<SpanData> = batch
            .iter()
            .map(|span| translate(span, &self.registry))
            .collect();

        self.inner.export(translated)
    }

    fn shutdown(&mut self) {
        self.inner.shutdown();
    }

    fn force_flush(&mut self) -> BoxFuture<'static, ExportResult> {
        self.inner.force_flush()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// Errors from several senders, reported together
#[derive(Debug, thiserror::Error)]
#[error("{} span exporter(s) failed: {}", .0.len(), join_errors(.0))]
pub struct ExportErrors(pub Vec<TraceError>);

fn join_errors(errors: &[TraceError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Sends every batch to all senders, even when some of them fail.
#[derive(Debug, Default)]
pub struct FanoutExporter {
    senders: Vec<Box<dyn SpanExporter>>,
}

impl FanoutExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender<E: SpanExporter + 'static>(mut self, sender: E) -> Self {
        self.senders.push(Box::new(sender));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }
}

impl SpanExporter for FanoutExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        if batch.is_empty() || self.senders.is_empty() {
            return Box::pin(future::ready(Ok(())));
        }

        let exports: Vec<_> = self
            .senders
            .iter_mut()
            .map(|sender| sender.export(batch.clone()))
            .collect();
        join_senders(exports)
    }

    fn shutdown(&mut self) {
        for sender in &mut self.senders {
            sender.shutdown();
        }
    }

    fn force_flush(&mut self) -> BoxFuture<'static, ExportResult> {
        let flushes: Vec<_> = self
            .senders
            .iter_mut()
            .map(|sender| sender.force_flush())
            .collect();
        join_senders(flushes)
    }

    fn set_resource(&mut self, resource: &Resource) {
        for sender in &mut self.senders {
            sender.set_resource(resource);
        }
    }
}

/// Wait for every sender and report all failures together.
fn join_senders(results: Vec<BoxFuture<'static, ExportResult>>) -> BoxFuture<'static, ExportResult> {
    Box::pin(async move {
        let errors: Vec<TraceError> = future::join_all(results)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            for err in &errors {
                tracing::warn!("Span sender failed: {}", err);
            }
            Err(TraceError::Other(Box::new(ExportErrors(errors))))
        }
    })
}

/// Writes one JSON object per span, one span per line.
///
/// Once the provider hands over its resource, every line carries it under
/// `resource`.
pub struct JsonLinesExporter {
    writer: Box<dyn Write + Send + Sync>,
    target: String,
    resource: Option<serde_json::Value>,
}

impl fmt::Debug for JsonLinesExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesExporter")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl JsonLinesExporter {
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout(), "stdout")
    }

    /// Append to `path`, creating it if needed.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(file, path.display().to_string()))
    }

    pub fn from_writer<W>(writer: W, target: impl Into<String>) -> Self
    where
        W: Write + Send + Sync + 'static,
    {
        Self {
            writer: Box::new(writer),
            target: target.into(),
            resource: None,
        }
    }

    fn write_batch(&mut self, batch: &[SpanData]) -> io::Result<()> {
        for span in batch {
            let mut value = span_to_json(span);
            if let Some(resource) = &self.resource {
                value["resource"] = resource.clone();
            }
            let line = serde_json::to_string(&value)?;
            self.writer.write_all(line.as_bytes())?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

impl SpanExporter for JsonLinesExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let result = self.write_batch(&batch).map_err(|err| {
            TraceError::Other(Box::new(io::Error::new(
                err.kind(),
                format!("writing spans to {}: {}", self.target, err),
            )))
        });
        Box::pin(future::ready(result))
    }

    fn shutdown(&mut self) {
        if let Err(err) = self.writer.flush() {
            tracing::warn!(target = %self.target, "Failed to flush span writer: {}", err);
        }
    }

    fn force_flush(&mut self) -> BoxFuture<'static, ExportResult> {
        let result = self
            .writer
            .flush()
            .map_err(|err| TraceError::Other(Box::new(err)));
        Box::pin(future::ready(result))
    }

    fn set_resource(&mut self, resource: &Resource) {
        let attributes: Vec<KeyValue> = resource
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
            .collect();
        self.resource = Some(attributes_to_json(&attributes));
    }
}

/// Keeps exported spans in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn span_named(&self, name: &str) -> Option<SpanData> {
        self.spans().into_iter().find(|span| span.name == name)
    }

    pub fn clear(&self) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SpanExporter for InMemoryExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(batch);
        Box::pin(future::ready(Ok(())))
    }
}

/// JSON rendering of a span used by [`JsonLinesExporter`]
pub fn span_to_json(span: &SpanData) -> serde_json::Value {
    let events: Vec<_> = span
        .events
        .events
        .iter()
        .map(|event| {
            json!({
                "name": event.name,
                "time_unix_nano": unix_nanos(event.timestamp),
                "attributes": attributes_to_json(&event.attributes),
            })
        })
        .collect();

    let status = match &span.status {
        Status::Unset => json!({"code": "unset"}),
        Status::Ok => json!({"code": "ok"}),
        Status::Error { description } => json!({"code": "error", "message": description}),
    };

    json!({
        "trace_id": span.span_context.trace_id().to_string(),
        "span_id": span.span_context.span_id().to_string(),
        "parent_span_id": span.parent_span_id.to_string(),
        "name": span.name,
        "kind": span_kind_name(&span.span_kind),
        "start_time_unix_nano": unix_nanos(span.start_time),
        "end_time_unix_nano": unix_nanos(span.end_time),
        "attributes": attributes_to_json(&span.attributes),
        "events": events,
        "status": status,
        "scope": {
            "name": span.instrumentation_lib.name,
            "version": span.instrumentation_lib.version,
        },
    })
}

fn attributes_to_json(attributes: &[KeyValue]) -> serde_json::Value {
    let mut map = Map::new();
    for kv in attributes {
        let value = match &kv.value {
            Value::Bool(b) => json!(b),
            Value::I64(n) => json!(n),
            Value::F64(n) => json!(n),
            other => json!(other.as_str()),
        };
        map.insert(kv.key.as_str().to_string(), value);
    }
    serde_json::Value::Object(map)
}

fn span_kind_name(kind: &SpanKind) -> &'static str {
    match kind {
        SpanKind::Client => "client",
        SpanKind::Server => "server",
        SpanKind::Producer => "producer",
        SpanKind::Consumer => "consumer",
        SpanKind::Internal => "internal",
    }
}

fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::*;
    use opentelemetry::InstrumentationLibrary;
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};
    use opentelemetry_sdk::trace::{SpanEvents, SpanLinks};
    use std::borrow::Cow;
    use std::time::Duration;

    #[derive(Debug, Clone, Default)]
    struct Capture {
        spans: Arc<Mutex<Vec<SpanData>>>,
        resource: Arc<Mutex<Option<Resource>>>,
        flushes: Arc<Mutex<usize>>,
        fail_with: Option<&'static str>,
    }

    impl SpanExporter for Capture {
        fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
            self.spans.lock().unwrap().extend(batch);
            let result = match self.fail_with {
                Some(msg) => Err(TraceError::from(msg)),
                None => Ok(()),
            };
            Box::pin(future::ready(result))
        }

        fn force_flush(&mut self) -> BoxFuture<'static, ExportResult> {
            *self.flushes.lock().unwrap() += 1;
            Box::pin(future::ready(Ok(())))
        }

        fn set_resource(&mut self, resource: &Resource) {
            *self.resource.lock().unwrap() = Some(resource.clone());
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn tool_span(call_id: &str) -> SpanData {
        let start_time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        SpanData {
            span_context: SpanContext::new(
                TraceId::from_bytes([9; 16]),
                SpanId::from_bytes([2; 8]),
                TraceFlags::SAMPLED,
                false,
                TraceState::default(),
            ),
            parent_span_id: SpanId::from_bytes([3; 8]),
            span_kind: SpanKind::Internal,
            name: Cow::Borrowed("execute_tool search"),
            start_time,
            end_time: start_time + Duration::from_millis(5),
            attributes: vec![KeyValue::new(GEN_AI_TOOL_CALL_ID, call_id.to_string())],
            dropped_attributes_count: 0,
            events: SpanEvents::default(),
            links: SpanLinks::default(),
            status: Status::Unset,
            instrumentation_lib: InstrumentationLibrary::default(),
        }
    }

    #[tokio::test]
    async fn test_translating_exporter_rewrites_and_bridges() {
        let registry = Arc::new(CorrelationRegistry::new());
        let parent = SpanContext::new(
            TraceId::from_bytes([1; 16]),
            SpanId::from_bytes([1; 8]),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        registry.register_tool_call_mapping("call-42", TraceId::INVALID, parent.clone());

        let capture = Capture::default();
        let mut exporter = TranslatingExporter::new(capture.clone(), Arc::clone(&registry));
        exporter.export(vec![tool_span("call-42")]).await.unwrap();

        let spans = capture.spans.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].span_context.trace_id(), parent.trace_id());
        assert_eq!(spans[0].parent_span_id, parent.span_id());
        assert_eq!(
            registry.sdk_trace_id(TraceId::from_bytes([9; 16])),
            Some(parent.trace_id())
        );
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let capture = Capture {
            fail_with: Some("should not be called"),
            ..Default::default()
        };
        let mut exporter =
            TranslatingExporter::new(capture.clone(), Arc::new(CorrelationRegistry::new()));

        exporter.export(Vec::new()).await.unwrap();
        assert!(capture.spans.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fanout_attempts_every_sender() {
        let first = Capture {
            fail_with: Some("collector unreachable"),
            ..Default::default()
        };
        let second = Capture::default();
        let third = Capture {
            fail_with: Some("unauthorized"),
            ..Default::default()
        };

        let mut fanout = FanoutExporter::new()
            .with_sender(first.clone())
            .with_sender(second.clone())
            .with_sender(third.clone());
        assert_eq!(fanout.len(), 3);

        let err = fanout.export(vec![tool_span("call-1")]).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("collector unreachable"), "{message}");
        assert!(message.contains("unauthorized"), "{message}");

        for capture in [&first, &second, &third] {
            assert_eq!(capture.spans.lock().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_resource_and_flush_reach_every_sender() {
        let first = Capture::default();
        let second = Capture::default();
        let fanout = FanoutExporter::new()
            .with_sender(first.clone())
            .with_sender(second.clone());
        let mut exporter = TranslatingExporter::new(fanout, Arc::new(CorrelationRegistry::new()));

        exporter.set_resource(&Resource::new(vec![KeyValue::new("service.name", "weather-bot")]));
        exporter.force_flush().await.unwrap();

        for capture in [&first, &second] {
            let resource = capture.resource.lock().unwrap().clone().unwrap();
            assert_eq!(
                resource.get("service.name".into()).map(|v| v.to_string()).as_deref(),
                Some("weather-bot")
            );
            assert_eq!(*capture.flushes.lock().unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_json_lines_stamps_resource() {
        let buf = SharedBuf::default();
        let mut exporter = JsonLinesExporter::from_writer(buf.clone(), "memory");
        exporter.set_resource(&Resource::new(vec![KeyValue::new("service.name", "weather-bot")]));

        exporter.export(vec![tool_span("call-1")]).await.unwrap();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let line: serde_json::Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(line["resource"]["service.name"], "weather-bot");
    }

    #[tokio::test]
    async fn test_fanout_without_senders() {
        let mut fanout = FanoutExporter::new();
        assert!(fanout.is_empty());
        fanout.export(vec![tool_span("call-1")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_json_lines_writes_one_line_per_span() {
        let buf = SharedBuf::default();
        let mut exporter = JsonLinesExporter::from_writer(buf.clone(), "memory");

        exporter
            .export(vec![tool_span("call-1"), tool_span("call-2")])
            .await
            .unwrap();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["name"], "execute_tool search");
        assert_eq!(lines[0]["trace_id"], TraceId::from_bytes([9; 16]).to_string());
        assert_eq!(lines[1]["attributes"][GEN_AI_TOOL_CALL_ID], "call-2");
        assert_eq!(lines[0]["kind"], "internal");
    }

    #[tokio::test]
    async fn test_json_lines_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spans.jsonl");

        JsonLinesExporter::file(&path)
            .unwrap()
            .export(vec![tool_span("call-1")])
            .await
            .unwrap();
        JsonLinesExporter::file(&path)
            .unwrap()
            .export(vec![tool_span("call-2")])
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
