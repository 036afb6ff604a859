//! Outbound request payloads built from conversation turns and options.

use super::types::{Content, Role, Turn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionKind {
    Number,
    Bool,
    String,
}

impl OptionKind {
    fn admits(self, value: &Value) -> bool {
        match self {
            OptionKind::Number => value.is_number(),
            OptionKind::Bool => value.is_boolean(),
            OptionKind::String => value.is_string(),
        }
    }
}

/// Where a recognized option lands in the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionTarget {
    /// `generationConfig.<key>` of a generate request.
    Generation,
    /// Top-level `cachedContent` reference of a generate request.
    CacheReference,
    /// Top-level field of a cache-administration request.
    CacheAdmin,
}

struct OptionRule {
    key: &'static str,
    kind: OptionKind,
    target: OptionTarget,
}

const fn rule(key: &'static str, kind: OptionKind, target: OptionTarget) -> OptionRule {
    OptionRule { key, kind, target }
}

/// Whitelist of recognized options. Anything not listed here is dropped.
const OPTION_RULES: &[OptionRule] = &[
    rule("maxOutputTokens", OptionKind::Number, OptionTarget::Generation),
    rule("temperature", OptionKind::Number, OptionTarget::Generation),
    rule("topP", OptionKind::Number, OptionTarget::Generation),
    rule("topK", OptionKind::Number, OptionTarget::Generation),
    rule("presencePenalty", OptionKind::Number, OptionTarget::Generation),
    rule("frequencyPenalty", OptionKind::Number, OptionTarget::Generation),
    rule("enableEnhancedCivicAnswers", OptionKind::Bool, OptionTarget::Generation),
    rule("cachedContent", OptionKind::String, OptionTarget::CacheReference),
    rule("model", OptionKind::String, OptionTarget::CacheAdmin),
    rule("ttl", OptionKind::String, OptionTarget::CacheAdmin),
    rule("name", OptionKind::String, OptionTarget::CacheAdmin),
];

/// Sparse, loosely typed generation options as supplied by callers.
///
/// Values are only forwarded when their key is recognized and their JSON type
/// matches; anything else is silently ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationOptions(Map<String, Value>);

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an options object; any other JSON value yields empty options.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Value of a recognized key, if present and correctly typed.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let rule = OPTION_RULES.iter().find(|rule| rule.key == key)?;
        self.0.get(key).filter(|value| rule.kind.admits(value))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Model override for this call.
    pub fn model(&self) -> Option<&str> {
        self.get_str("model")
    }

    fn recognized(&self, target: OptionTarget) -> impl Iterator<Item = (&'static str, &Value)> {
        OPTION_RULES
            .iter()
            .filter(move |rule| rule.target == target)
            .filter_map(move |rule| self.get(rule.key).map(|value| (rule.key, value)))
    }
}

/// JSON body for `generateContent`, `streamGenerateContent`, or `cachedContents`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_settings: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Turns normalized conversation turns and options into a request body.
#[derive(Debug, Clone, Copy)]
pub struct RequestBuilder<'a> {
    turns: &'a [Turn],
    options: &'a GenerationOptions,
    cached_content: Option<&'a str>,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(turns: &'a [Turn], options: &'a GenerationOptions) -> Self {
        Self {
            turns,
            options,
            cached_content: None,
        }
    }

    /// Cache reference for a generate request; takes precedence over the
    /// `cachedContent` option.
    pub fn cached_content(mut self, name: Option<&'a str>) -> Self {
        self.cached_content = name;
        self
    }

    /// Body for a generate (or stream-generate) request.
    pub fn build(&self) -> RequestBody {
        let (system_instruction, contents) = self.split_turns();

        let generation_config: Map<String, Value> = self
            .options
            .recognized(OptionTarget::Generation)
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();

        let cached_content = self
            .cached_content
            .or_else(|| {
                self.options
                    .recognized(OptionTarget::CacheReference)
                    .find_map(|(_, value)| value.as_str())
            })
            .map(str::to_owned);

        RequestBody {
            contents,
            system_instruction,
            safety_settings: Some(Vec::new()),
            generation_config: (!generation_config.is_empty()).then_some(generation_config),
            cached_content,
            ..RequestBody::default()
        }
    }

    /// Body for a cache-administration request: no generation settings, but
    /// `model`, `ttl` and `name` when provided.
    pub fn build_cache(&self) -> RequestBody {
        let (system_instruction, contents) = self.split_turns();
        let mut body = RequestBody {
            contents,
            system_instruction,
            ..RequestBody::default()
        };

        for (key, value) in self.options.recognized(OptionTarget::CacheAdmin) {
            let Some(value) = value.as_str() else {
                continue;
            };
            match key {
                "model" => {
                    let id = value.strip_prefix("models/").unwrap_or(value);
                    body.model = Some(format!("models/{}", id));
                }
                "ttl" => body.ttl = Some(value.to_string()),
                "name" => body.name = Some(value.to_string()),
                _ => {}
            }
        }
        body
    }

    /// Routes system turns into the single instruction slot (last one wins)
    /// and keeps every other turn in conversation order.
    fn split_turns(&self) -> (Option<Content>, Vec<Content>) {
        let mut system_instruction = None;
        let mut contents = Vec::with_capacity(self.turns.len());

        for turn in self.turns {
            match turn.role {
                Role::System => {
                    system_instruction = Some(Content {
                        role: None,
                        parts: turn.parts.clone(),
                    });
                }
                Role::User | Role::Model => contents.push(Content {
                    role: Some(turn.role.as_str().to_string()),
                    parts: turn.parts.clone(),
                }),
            }
        }

        (system_instruction, contents)
    }
}
