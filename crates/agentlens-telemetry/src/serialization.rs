//! Content serialization for span attributes.
//!
//! Produces the `{"role", "parts"}` JSON that backends render as chat
//! messages. Binary payloads are inlined as `data:` URLs and inline text
//! payloads are decoded.

use agentlens_core::{Content, FileData, InlineData, Part};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

/// Serialize `content` for telemetry. Returns an empty string on failure.
pub fn serialize_content(content: &Content) -> String {
    let parts: Vec<Value> = content.parts.iter().map(normalize_part).collect();
    let payload = json!({
        "role": content.role,
        "parts": parts,
    });

    serde_json::to_string(&payload).unwrap_or_default()
}

fn normalize_part(part: &Part) -> Value {
    match part {
        Part::Text { text } => json!({"type": "text", "text": text}),
        Part::FunctionCall { function_call } => json!({
            "type": "function_call",
            "id": function_call.id.as_deref().unwrap_or_default(),
            "name": function_call.name,
            "args": function_call.args,
        }),
        Part::FunctionResponse { function_response } => json!({
            "type": "function_response",
            "id": function_response.id.as_deref().unwrap_or_default(),
            "name": function_response.name,
            "response": function_response.response,
        }),
        Part::FileData { file_data } => normalize_file_data(file_data),
        Part::InlineData { inline_data } => normalize_inline_data(inline_data),
    }
}

fn normalize_file_data(file: &FileData) -> Value {
    let name = file.display_name.as_deref().unwrap_or_default();

    match media_kind(&file.mime_type) {
        Some(kind) => media_url(kind, name, &file.file_uri),
        None => json!({
            "type": "file",
            "file": {
                "name": name,
                "url": file.file_uri,
                "mime_type": file.mime_type,
            },
        }),
    }
}

fn normalize_inline_data(blob: &InlineData) -> Value {
    let name = blob.display_name.as_deref().unwrap_or_default();

    if blob.mime_type.starts_with("text/") {
        // Undecodable text payloads are reported as-is
        let text = STANDARD
            .decode(&blob.data)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| blob.data.clone());
        return json!({"type": "text", "text": text});
    }

    let url = if blob.data.is_empty() || blob.mime_type.is_empty() {
        String::new()
    } else {
        format!("data:{};base64,{}", blob.mime_type, blob.data)
    };

    match media_kind(&blob.mime_type) {
        Some(kind) => media_url(kind, name, &url),
        None => json!({
            "type": "file",
            "file": {
                "name": name,
                "mime_type": blob.mime_type,
                "data_base64": url,
            },
        }),
    }
}

fn media_kind(mime_type: &str) -> Option<&'static str> {
    if mime_type.starts_with("image/") {
        Some("image_url")
    } else if mime_type.starts_with("video/") {
        Some("video_url")
    } else if mime_type.starts_with("audio/") {
        Some("audio_url")
    } else {
        None
    }
}

fn media_url(kind: &str, name: &str, url: &str) -> Value {
    let mut part = serde_json::Map::new();
    part.insert("type".to_string(), Value::from(kind));
    part.insert(kind.to_string(), json!({"name": name, "url": url}));
    Value::Object(part)
}
