//! Shared Gemini payload types used by the request builder, the stream
//! accumulator, and callers.

use super::failure::ErrorResult;
use super::usage::UsageSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }
}

/// Content unit of a turn or candidate.
///
/// Only `text` is interpreted; any other keys (inline data, function calls,
/// thought signatures) are carried through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

/// Gemini content container as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

/// One generated alternative, with cumulative text in its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub index: usize,
    pub role: Option<String>,
    pub parts: Vec<Part>,
    pub finish_reason: Option<String>,
}

impl Candidate {
    /// Concatenated text of all parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

/// Consolidated result of a generate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    pub contents: Vec<Candidate>,
    pub model_version: Option<String>,
    pub token_usage: UsageSnapshot,
    #[serde(rename = "_response")]
    pub response: Value,
}

impl FinalResult {
    /// Text of the first candidate, or an empty string when none was produced.
    pub fn text(&self) -> String {
        self.contents
            .first()
            .map(Candidate::text)
            .unwrap_or_default()
    }
}

/// Incremental notification delivered to streaming callers.
///
/// Text in `contents` is always cumulative for its `(candidate, part)` slot.
/// The terminal update has `done == true` and carries nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<UsageSnapshot>,
    pub done: bool,
}

impl StreamUpdate {
    pub fn done() -> Self {
        Self {
            contents: Vec::new(),
            token_usage: None,
            done: true,
        }
    }

    /// Cumulative text observed for a `(candidate, part)` slot in this update.
    pub fn text(&self, candidate: usize, part: usize) -> Option<&str> {
        self.contents
            .iter()
            .find(|c| c.index == candidate)
            .and_then(|c| c.parts.get(part))
            .and_then(|p| p.text.as_deref())
    }
}

/// Settled value of a call that reached the provider.
///
/// Serializes untagged, so JSON consumers see either the success shape or
/// `{ "error": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Success(T),
    ProviderError(ErrorResult),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::ProviderError(_) => None,
        }
    }

    pub fn provider_error(&self) -> Option<&ErrorResult> {
        match self {
            Outcome::Success(_) => None,
            Outcome::ProviderError(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_part_passes_unknown_fields_through() {
        let part: Part = serde_json::from_value(json!({
            "inlineData": { "mimeType": "image/png", "data": "AAAA" }
        }))
        .unwrap();

        assert!(part.text.is_none());
        assert_eq!(
            serde_json::to_value(&part).unwrap(),
            json!({ "inlineData": { "mimeType": "image/png", "data": "AAAA" } })
        );
    }

    #[test]
    fn test_turn_role_serializes_lowercase() {
        let json = serde_json::to_value(Turn::system("be brief")).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["parts"][0]["text"], "be brief");
    }

    #[test]
    fn test_done_update_serializes_as_bare_flag() {
        assert_eq!(
            serde_json::to_value(StreamUpdate::done()).unwrap(),
            json!({ "done": true })
        );
    }

    #[test]
    fn test_outcome_serializes_untagged() {
        let outcome: Outcome<Value> = Outcome::Success(json!({ "ok": 1 }));
        assert_eq!(serde_json::to_value(&outcome).unwrap(), json!({ "ok": 1 }));
    }
}
