use serde::{Deserialize, Serialize};

/// One message of a conversation, as exchanged with the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new_user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn new_model_text(text: impl Into<String>) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// Iterates over the function calls requested in this content, in part order.
    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.parts.iter().filter_map(|part| match part {
            Part::FunctionCall { function_call } => Some(function_call),
            _ => None,
        })
    }
}

/// A piece of a message. Variants are distinguished by their field name on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String, // base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Reference to content stored outside the message (e.g. a bucket URI)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_calls_in_part_order() {
        let content = Content {
            role: "model".to_string(),
            parts: vec![
                Part::Text {
                    text: "let me check".to_string(),
                },
                Part::FunctionCall {
                    function_call: FunctionCall {
                        name: "search".to_string(),
                        args: json!({"q": "rust"}),
                        id: Some("call-1".to_string()),
                    },
                },
                Part::FunctionCall {
                    function_call: FunctionCall {
                        name: "weather".to_string(),
                        args: json!({}),
                        id: None,
                    },
                },
            ],
        };

        let names: Vec<_> = content.function_calls().map(|fc| fc.name.as_str()).collect();
        assert_eq!(names, vec!["search", "weather"]);
    }

    #[test]
    fn test_part_wire_format() {
        let part: Part = serde_json::from_value(json!({
            "functionCall": {"name": "search", "args": {"q": "x"}, "id": "call-9"}
        }))
        .unwrap();

        match part {
            Part::FunctionCall { function_call } => {
                assert_eq!(function_call.id.as_deref(), Some("call-9"));
            }
            other => panic!("unexpected part: {:?}", other),
        }
    }
}
