//! Result Model (component G).

use serde::Serialize;
use serde_json::Value;

/// Severity of a `ResponseMessage`, ordered low-to-high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    Error = 1,
    Warning = 2,
    Info = 3,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMessage {
    pub text: String,
    pub priority: Priority,
}

impl ResponseMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self { text: text.into(), priority: Priority::Info }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { text: text.into(), priority: Priority::Warning }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { text: text.into(), priority: Priority::Error }
    }
}

/// Per-target deploy result: every pack body considered, every wire response
/// received, and a severity-ranked log of what happened.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub source: String,
    #[serde(default)]
    pub messages: Vec<ResponseMessage>,
    #[serde(default)]
    pub body: Vec<Value>,
    #[serde(default)]
    pub output: Vec<Value>,
}

impl Response {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            messages: Vec::new(),
            body: Vec::new(),
            output: Vec::new(),
        }
    }

    /// The highest-severity message, used by the CLI to pick a headline and
    /// color when summarizing a deploy.
    pub fn worst_message(&self) -> Option<&ResponseMessage> {
        self.messages.iter().min_by_key(|m| m.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_message_picks_highest_severity() {
        let mut response = Response::new("dev1");
        response.messages.push(ResponseMessage::info("ok"));
        response.messages.push(ResponseMessage::error("boom"));
        response.messages.push(ResponseMessage::warning("meh"));
        assert_eq!(response.worst_message().unwrap().text, "boom");
    }

    #[test]
    fn worst_message_none_when_empty() {
        let response = Response::new("dev1");
        assert!(response.worst_message().is_none());
    }
}
