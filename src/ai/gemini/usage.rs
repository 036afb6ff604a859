//! Token-usage extraction from Gemini payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token counts reported by the provider; each is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub candidates: Option<u64>,
    pub prompt: Option<u64>,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub count: TokenCount,
    /// Set when `usageMetadata` is absent or any count is missing or mistyped.
    pub metadata_incomplete: bool,
}

impl UsageSnapshot {
    /// Snapshot for a payload that carried no usage metadata at all.
    pub fn missing() -> Self {
        Self {
            count: TokenCount::default(),
            metadata_incomplete: true,
        }
    }
}

/// Reads `usageMetadata` from any fragment or final payload.
///
/// Never fails: absent or mistyped counts become `None` and flag the snapshot
/// as incomplete.
pub fn extract_usage(payload: &Value) -> UsageSnapshot {
    let Some(metadata) = payload.get("usageMetadata") else {
        tracing::warn!("Gemini payload carries no usageMetadata");
        return UsageSnapshot::missing();
    };

    let count = TokenCount {
        candidates: read_count(metadata, "candidatesTokenCount"),
        prompt: read_count(metadata, "promptTokenCount"),
        total: read_count(metadata, "totalTokenCount"),
    };
    let metadata_incomplete =
        count.candidates.is_none() || count.prompt.is_none() || count.total.is_none();

    if metadata_incomplete {
        tracing::warn!(
            candidates = ?count.candidates,
            prompt = ?count.prompt,
            total = ?count.total,
            "Gemini usageMetadata is incomplete"
        );
    }

    UsageSnapshot {
        count,
        metadata_incomplete,
    }
}

fn read_count(metadata: &Value, field: &str) -> Option<u64> {
    metadata.get(field).and_then(Value::as_u64)
}
