//! Request parser (C4): shape detection, validation, and user-content
//! extraction from the two accepted OpenAI-compatible request bodies.

use serde_json::Value;

use crate::error::RequestError;

/// Which inbound shape was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    ChatCompletion,
    Responses,
}

/// Content extracted from a parsed request body, plus the bits the proxy
/// core needs to decide how to forward the response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub shape: RequestShape,
    pub stream: bool,
    pub user_content: Option<String>,
    pub non_user_content: Vec<String>,
}

/// Parse `body` as UTF-8 JSON, detect its shape, validate required keys,
/// and extract user/non-user content.
pub fn parse_and_extract(body: &[u8]) -> Result<ExtractedContent, RequestError> {
    let text = std::str::from_utf8(body).map_err(|_| RequestError::BadRequest("body is not valid UTF-8".into()))?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| RequestError::BadRequest(format!("invalid JSON: {e}")))?;
    let object = value.as_object().ok_or_else(|| RequestError::BadRequest("body must be a JSON object".into()))?;

    let stream = object.get("stream").and_then(Value::as_bool).unwrap_or(false);

    if object.contains_key("messages") {
        require_str(object, "model")?;
        let messages = object
            .get("messages")
            .and_then(Value::as_array)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| RequestError::BadRequest("`messages` must be a non-empty array".into()))?;
        let (user_content, non_user_content) = extract_chat_content(messages);
        Ok(ExtractedContent { shape: RequestShape::ChatCompletion, stream, user_content, non_user_content })
    } else if object.contains_key("input") {
        require_str(object, "model")?;
        let input = object.get("input").ok_or_else(|| RequestError::BadRequest("`input` is required".into()))?;
        let (user_content, non_user_content) = extract_responses_content(input);
        Ok(ExtractedContent { shape: RequestShape::Responses, stream, user_content, non_user_content })
    } else {
        Err(RequestError::UnsupportedPayload)
    }
}

fn require_str(object: &serde_json::Map<String, Value>, key: &str) -> Result<(), RequestError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|_| ())
        .ok_or_else(|| RequestError::BadRequest(format!("`{key}` is required")))
}

/// Render a message's `content` field: a plain string is taken as-is; an
/// array is the concatenation (single-space separated) of each part whose
/// `type == "text"`.
fn render_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// The last `role == "user"` message becomes `user_content`; every other
/// rendered message contributes to `non_user_content`, in order.
fn extract_chat_content(messages: &[Value]) -> (Option<String>, Vec<String>) {
    let mut last_user_index = None;
    for (i, message) in messages.iter().enumerate() {
        if message.get("role").and_then(Value::as_str) == Some("user") {
            last_user_index = Some(i);
        }
    }

    let mut user_content = None;
    let mut non_user_content = Vec::new();
    for (i, message) in messages.iter().enumerate() {
        let rendered = render_content(message.get("content").unwrap_or(&Value::Null));
        if Some(i) == last_user_index {
            user_content = Some(rendered);
        } else {
            non_user_content.push(rendered);
        }
    }
    (user_content, non_user_content)
}

/// String `input` is `user_content` verbatim. Array `input`: string elements
/// are joined by newline into `user_content`; non-string elements are
/// stringified into `non_user_content`.
fn extract_responses_content(input: &Value) -> (Option<String>, Vec<String>) {
    match input {
        Value::String(s) => (Some(s.clone()), Vec::new()),
        Value::Array(items) => {
            let mut user_parts = Vec::new();
            let mut non_user_content = Vec::new();
            for item in items {
                if let Value::String(s) = item {
                    user_parts.push(s.clone());
                } else {
                    non_user_content.push(item.to_string());
                }
            }
            let user_content = if user_parts.is_empty() { None } else { Some(user_parts.join("\n")) };
            (user_content, non_user_content)
        }
        _ => (None, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_completion_string_content() {
        let body = json!({"model":"m","messages":[{"role":"user","content":"hi"}],"stream":true});
        let parsed = parse_and_extract(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.shape, RequestShape::ChatCompletion);
        assert!(parsed.stream);
        assert_eq!(parsed.user_content.as_deref(), Some("hi"));
        assert!(parsed.non_user_content.is_empty());
    }

    #[test]
    fn chat_completion_array_content_joins_text_parts_with_spaces() {
        let body = json!({
            "model":"m",
            "messages":[{
                "role":"user",
                "content":[{"type":"text","text":"hello"},{"type":"image_url","image_url":{}},{"type":"text","text":"world"}]
            }]
        });
        let parsed = parse_and_extract(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.user_content.as_deref(), Some("hello world"));
    }

    #[test]
    fn chat_completion_tracks_last_user_message_only() {
        let body = json!({
            "model":"m",
            "messages":[
                {"role":"system","content":"sys"},
                {"role":"user","content":"first"},
                {"role":"assistant","content":"reply"},
                {"role":"user","content":"second"},
            ]
        });
        let parsed = parse_and_extract(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.user_content.as_deref(), Some("second"));
        assert_eq!(parsed.non_user_content, vec!["sys".to_string(), "first".to_string(), "reply".to_string()]);
    }

    #[test]
    fn chat_completion_requires_non_empty_messages() {
        let body = json!({"model":"m","messages":[]});
        assert!(matches!(parse_and_extract(body.to_string().as_bytes()), Err(RequestError::BadRequest(_))));
    }

    #[test]
    fn chat_completion_requires_model() {
        let body = json!({"messages":[{"role":"user","content":"hi"}]});
        assert!(matches!(parse_and_extract(body.to_string().as_bytes()), Err(RequestError::BadRequest(_))));
    }

    #[test]
    fn responses_string_input() {
        let body = json!({"model":"m","input":"write a haiku"});
        let parsed = parse_and_extract(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.shape, RequestShape::Responses);
        assert_eq!(parsed.user_content.as_deref(), Some("write a haiku"));
        assert!(parsed.non_user_content.is_empty());
    }

    #[test]
    fn responses_array_input_joins_strings_and_stringifies_the_rest() {
        let body = json!({"model":"m","input":["part one","part two",{"role":"tool","output":"x"}]});
        let parsed = parse_and_extract(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.user_content.as_deref(), Some("part one\npart two"));
        assert_eq!(parsed.non_user_content.len(), 1);
    }

    #[test]
    fn unsupported_shape_is_rejected() {
        let body = json!({"foo":"bar"});
        assert!(matches!(parse_and_extract(body.to_string().as_bytes()), Err(RequestError::UnsupportedPayload)));
    }

    #[test]
    fn invalid_utf8_is_bad_request() {
        let bytes: &[u8] = &[0xff, 0xfe, 0xfd];
        assert!(matches!(parse_and_extract(bytes), Err(RequestError::BadRequest(_))));
    }

    #[test]
    fn non_json_body_is_bad_request() {
        assert!(matches!(parse_and_extract(b"not json"), Err(RequestError::BadRequest(_))));
    }

    #[test]
    fn non_object_json_is_bad_request() {
        assert!(matches!(parse_and_extract(b"[1,2,3]"), Err(RequestError::BadRequest(_))));
    }

    #[test]
    fn content_extraction_is_deterministic() {
        let body = json!({"model":"m","messages":[{"role":"user","content":"hi"}]});
        let bytes = body.to_string().into_bytes();
        let a = parse_and_extract(&bytes).unwrap();
        let b = parse_and_extract(&bytes).unwrap();
        assert_eq!(a, b);
    }
}
