//! Correlation registry linking host runtime traces to AgentLens traces.
//!
//! The host runtime starts its own trace for every run. The registry remembers
//! which AgentLens trace each host trace belongs to, which AgentLens span each
//! model-requested tool call should hang under, and which invocation spans are
//! still open. Entries for a host trace are dropped by a background loop once a
//! grace period has passed after the invocation ends, so spans still sitting in
//! a batch exporter can be correlated.

use dashmap::DashMap;
use opentelemetry::trace::{Span as _, SpanContext, SpanId, TraceId};
use opentelemetry_sdk::trace::Span;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Delay between an invocation ending and its mappings being dropped
pub const CLEANUP_GRACE_PERIOD: Duration = Duration::from_secs(120);

/// How often the cleanup loop looks for expired requests
pub const CLEANUP_TICK: Duration = Duration::from_secs(10);

pub const CLEANUP_QUEUE_CAPACITY: usize = 512;

/// Live handle to an AgentLens invocation span, shared with the plugin that opened it
pub type InvocationSpan = Arc<Mutex<Span>>;

/// Per host-trace record
#[derive(Debug, Default)]
struct TraceMapping {
    sdk_trace_id: Option<TraceId>,
    invocation_span: Option<SpanContext>,
    owned_tool_call_ids: Vec<String>,
}

#[derive(Debug, Clone)]
struct CleanupRequest {
    host_trace_id: TraceId,
    sdk_span_id: SpanId,
    deadline: Instant,
}

/// Process-wide correlation tables shared by the plugin, the enrichment
/// processor and the translating exporter.
#[derive(Debug)]
pub struct CorrelationRegistry {
    tool_calls: DashMap<String, SpanContext>,
    traces: RwLock<HashMap<TraceId, TraceMapping>>,
    invocation_spans: DashMap<SpanId, InvocationSpan>,
    cleanup_tx: mpsc::Sender<CleanupRequest>,
    cleanup_rx: Mutex<Option<mpsc::Receiver<CleanupRequest>>>,
    grace_period: Duration,
    tick: Duration,
    shutdown: CancellationToken,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::with_timing(CLEANUP_GRACE_PERIOD, CLEANUP_TICK)
    }

    /// Registry with custom cleanup timing.
    pub fn with_timing(grace_period: Duration, tick: Duration) -> Self {
        let (cleanup_tx, cleanup_rx) = mpsc::channel(CLEANUP_QUEUE_CAPACITY);
        Self {
            tool_calls: DashMap::new(),
            traces: RwLock::new(HashMap::new()),
            invocation_spans: DashMap::new(),
            cleanup_tx,
            cleanup_rx: Mutex::new(Some(cleanup_rx)),
            grace_period,
            tick,
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the cleanup loop on the current tokio runtime.
    ///
    /// Returns `None` if the loop was already started.
    pub fn start_cleanup(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let rx = self
            .cleanup_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let registry = Arc::clone(self);
        Some(tokio::spawn(async move { registry.run_cleanup(rx).await }))
    }

    /// Stop the cleanup loop. Pending requests are discarded.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run_cleanup(&self, mut rx: mpsc::Receiver<CleanupRequest>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending: Vec<CleanupRequest> = Vec::new();

        tracing::debug!(tick = ?self.tick, grace = ?self.grace_period, "Correlation cleanup loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(req) = rx.recv() => pending.push(req),
                _ = ticker.tick() => self.cleanup_expired(&mut pending, Instant::now()),
            }
        }

        tracing::debug!(pending = pending.len(), "Correlation cleanup loop stopped");
    }

    fn cleanup_expired(&self, pending: &mut Vec<CleanupRequest>, now: Instant) {
        pending.retain(|req| {
            if now >= req.deadline {
                self.cleanup_trace(req.host_trace_id, req.sdk_span_id);
                false
            } else {
                true
            }
        });
    }

    /// Remove the trace mapping of `host_trace_id`, every tool-call binding it
    /// owns, and the invocation span entry for `sdk_span_id`.
    ///
    /// Other host traces bridged into the same AgentLens trace (a second agent
    /// trace, a detached tool trace) are removed with it.
    fn cleanup_trace(&self, host_trace_id: TraceId, sdk_span_id: SpanId) {
        self.invocation_spans.remove(&sdk_span_id);

        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let Some(mapping) = traces.remove(&host_trace_id) else {
            return;
        };

        // Without a host trace the run's records are filed under its own trace
        let sdk_trace_id = mapping.sdk_trace_id.unwrap_or(host_trace_id);
        let mut removed = vec![mapping];
        let linked: Vec<TraceId> = traces
            .iter()
            .filter(|(_, linked)| linked.sdk_trace_id == Some(sdk_trace_id))
            .map(|(id, _)| *id)
            .collect();
        removed.extend(linked.iter().filter_map(|id| traces.remove(id)));
        drop(traces);

        let mut tool_calls = 0;
        for mapping in &removed {
            for tool_call_id in &mapping.owned_tool_call_ids {
                self.tool_calls.remove(tool_call_id);
                tool_calls += 1;
            }
        }

        tracing::debug!(
            host_trace_id = %host_trace_id,
            linked_traces = linked.len(),
            tool_calls,
            "Cleaned up trace mapping"
        );
    }

    /// Bind a model-requested tool call to the AgentLens span that should parent it.
    ///
    /// Later registrations for the same id replace the parent.
    pub fn register_tool_call_mapping(
        &self,
        tool_call_id: &str,
        host_trace_id: TraceId,
        parent: SpanContext,
    ) {
        if tool_call_id.is_empty() || !parent.is_valid() {
            return;
        }

        self.tool_calls.insert(tool_call_id.to_string(), parent);

        if host_trace_id != TraceId::INVALID {
            let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
            let mapping = traces.entry(host_trace_id).or_default();
            if !mapping.owned_tool_call_ids.iter().any(|id| id == tool_call_id) {
                mapping.owned_tool_call_ids.push(tool_call_id.to_string());
            }
        }
    }

    /// Record that `host_trace_id` belongs to the AgentLens trace `sdk_trace_id`.
    pub fn register_trace_mapping(&self, host_trace_id: TraceId, sdk_trace_id: TraceId) {
        if host_trace_id == TraceId::INVALID || sdk_trace_id == TraceId::INVALID {
            return;
        }

        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        traces.entry(host_trace_id).or_default().sdk_trace_id = Some(sdk_trace_id);
    }

    pub fn parent_context_by_tool_call_id(&self, tool_call_id: &str) -> Option<SpanContext> {
        if tool_call_id.is_empty() {
            return None;
        }
        self.tool_calls
            .get(tool_call_id)
            .map(|entry| entry.value().clone())
            .filter(SpanContext::is_valid)
    }

    pub fn sdk_trace_id(&self, host_trace_id: TraceId) -> Option<TraceId> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces
            .get(&host_trace_id)
            .and_then(|mapping| mapping.sdk_trace_id)
            .filter(|id| *id != TraceId::INVALID)
    }

    /// Track an open invocation span so it can be force-ended on shutdown.
    ///
    /// When `host_trace_id` is valid the span's context is also remembered as
    /// the parent for that host trace's agent spans.
    pub fn register_invocation_span(&self, host_trace_id: TraceId, span: InvocationSpan) {
        let span_context = span
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .span_context()
            .clone();
        if !span_context.is_valid() {
            return;
        }

        if host_trace_id != TraceId::INVALID {
            let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
            traces.entry(host_trace_id).or_default().invocation_span = Some(span_context.clone());
        }
        self.invocation_spans.insert(span_context.span_id(), span);
    }

    /// Context of the invocation span registered for `host_trace_id`.
    pub fn invocation_span_context(&self, host_trace_id: TraceId) -> Option<SpanContext> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces
            .get(&host_trace_id)
            .and_then(|mapping| mapping.invocation_span.clone())
    }

    /// End every invocation span still open. Returns how many were ended.
    pub fn end_all_invocation_spans(&self) -> usize {
        let span_ids: Vec<SpanId> = self
            .invocation_spans
            .iter()
            .map(|entry| *entry.key())
            .collect();

        let mut ended = 0;
        for span_id in span_ids {
            if let Some((_, span)) = self.invocation_spans.remove(&span_id) {
                let mut span = span.lock().unwrap_or_else(PoisonError::into_inner);
                if span.is_recording() {
                    span.end();
                    ended += 1;
                }
            }
        }

        if ended > 0 {
            tracing::info!(count = ended, "Force-ended open invocation spans");
        }
        ended
    }

    /// Queue removal of everything owned by `host_trace_id` after the grace period.
    pub fn schedule_cleanup(&self, host_trace_id: TraceId, sdk_span_id: SpanId) {
        let req = CleanupRequest {
            host_trace_id,
            sdk_span_id,
            deadline: Instant::now() + self.grace_period,
        };

        if let Err(err) = self.cleanup_tx.try_send(req) {
            tracing::warn!(host_trace_id = %host_trace_id, "Trace cleanup queue rejected request: {}", err);
        }
    }

    pub fn tool_call_count(&self) -> usize {
        self.tool_calls.len()
    }

    pub fn trace_mapping_count(&self) -> usize {
        self.traces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn active_invocation_count(&self) -> usize {
        self.invocation_spans.len()
    }
}
