use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: TurnContent::Text(text.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub media_type: String,
    /// Data URI, e.g. `data:application/pdf;base64,...`.
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<Turn>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamGenerateRequest {
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<Turn>,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub result: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistoryResponse {
    pub history: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Payload of one `data:` line on `/generate/stream`.
///
/// Variant order matters for deserialization: the terminal event is the only
/// one carrying `fullText`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Done {
        content: String,
        done: bool,
        #[serde(rename = "fullText")]
        full_text: String,
    },
    Error {
        error: String,
    },
    Delta {
        content: String,
        done: bool,
    },
}

impl StreamEvent {
    pub fn delta(content: impl Into<String>) -> Self {
        Self::Delta {
            content: content.into(),
            done: false,
        }
    }

    pub fn done(full_text: impl Into<String>) -> Self {
        Self::Done {
            content: String::new(),
            done: true,
            full_text: full_text.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stream_events_match_wire_contract() {
        assert_eq!(
            serde_json::to_value(StreamEvent::delta("Hel")).expect("serializes"),
            json!({"content": "Hel", "done": false})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::done("Hello")).expect("serializes"),
            json!({"content": "", "done": true, "fullText": "Hello"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::error("boom")).expect("serializes"),
            json!({"error": "boom"})
        );
    }

    #[test]
    fn stream_events_parse_each_shape() {
        let done: StreamEvent =
            serde_json::from_value(json!({"content": "", "done": true, "fullText": "abc"}))
                .expect("done parses");
        assert_eq!(done, StreamEvent::done("abc"));

        let delta: StreamEvent =
            serde_json::from_value(json!({"content": "a", "done": false})).expect("delta parses");
        assert_eq!(delta, StreamEvent::delta("a"));

        let error: StreamEvent =
            serde_json::from_value(json!({"error": "nope"})).expect("error parses");
        assert_eq!(error, StreamEvent::error("nope"));
    }

    #[test]
    fn turns_accept_text_and_part_content() {
        let turns: Vec<Turn> = serde_json::from_value(json!([
            {"role": "user", "content": "hi"},
            {"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AA=="}}
            ]}
        ]))
        .expect("turns parse");

        assert_eq!(turns[0], Turn::user("hi"));
        assert_eq!(
            turns[1].content,
            TurnContent::Parts(vec![
                ContentPart::text("look"),
                ContentPart::image("data:image/png;base64,AA==")
            ])
        );
    }

    #[test]
    fn generate_response_serializes_null_conversation_id() {
        let value = serde_json::to_value(GenerateResponse {
            result: "ok".to_string(),
            conversation_id: None,
        })
        .expect("serializes");
        assert_eq!(value, json!({"result": "ok", "conversationId": null}));
    }
}
