//! Span classification by name.
//!
//! Both the enrichment processor and the translating exporter decide what a
//! span is through [`classify`]; keep every name rule here.

use crate::attributes::{
    OPERATION_GENERATE_CONTENT, SPAN_CALL_LLM, SPAN_EXECUTE_TOOL, SPAN_GENERATE_CONTENT,
    SPAN_INVOCATION, SPAN_INVOKE_AGENT,
};

/// The categories of span the engine knows how to enrich
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanCategory {
    Invocation,
    Agent,
    Model,
    Tool,
    Unknown,
}

impl SpanCategory {
    /// Invocation and agent spans are both reported as workflow spans
    pub fn is_workflow(self) -> bool {
        matches!(self, SpanCategory::Invocation | SpanCategory::Agent)
    }
}

pub fn classify(name: &str) -> SpanCategory {
    if name == SPAN_INVOCATION {
        SpanCategory::Invocation
    } else if matches_prefix(name, SPAN_INVOKE_AGENT) {
        SpanCategory::Agent
    } else if matches_prefix(name, SPAN_GENERATE_CONTENT)
        || name == OPERATION_GENERATE_CONTENT
        || name == SPAN_CALL_LLM
    {
        SpanCategory::Model
    } else if matches_prefix(name, SPAN_EXECUTE_TOOL) {
        SpanCategory::Tool
    } else {
        SpanCategory::Unknown
    }
}

/// Returns the text after the first space of a `"<prefix> <suffix>"` span name.
pub fn name_suffix(name: &str) -> Option<&str> {
    name.split_once(' ')
        .map(|(_, suffix)| suffix)
        .filter(|suffix| !suffix.is_empty())
}

/// `prefix` alone, or `prefix` followed by a space-separated suffix
fn matches_prefix(name: &str, prefix: &str) -> bool {
    match name.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(' '),
        None => false,
    }
}
