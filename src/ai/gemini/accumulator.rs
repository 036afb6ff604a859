//! Per-call stream state: decodes chunks, merges text deltas into cumulative
//! per-candidate, per-part text, and produces the final result.

use super::decoder::ChunkDecoder;
use super::failure::ErrorResult;
use super::repair::parse_fragments;
use super::types::{Candidate, FinalResult, Outcome, Part, StreamUpdate};
use super::usage::{extract_usage, UsageSnapshot};
use serde_json::{Map, Value};

/// Cumulative state of one `(candidate, part)` slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartSlot {
    pub text: Option<String>,
    pub role: Option<String>,
    extra: Map<String, Value>,
}

impl PartSlot {
    fn merge(&mut self, mut part: Map<String, Value>, role: Option<&str>) {
        match part.remove("text") {
            Some(Value::String(delta)) => {
                self.text.get_or_insert_with(String::new).push_str(&delta);
            }
            Some(other) => {
                part.insert("text".to_string(), other);
            }
            None => {}
        }
        if let Some(role) = role {
            self.role = Some(role.to_string());
        }
        self.extra.extend(part);
    }

    fn to_part(&self) -> Part {
        Part {
            text: self.text.clone(),
            extra: self.extra.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CandidateSlot {
    seen: bool,
    role: Option<String>,
    finish_reason: Option<String>,
    parts: Vec<PartSlot>,
}

impl CandidateSlot {
    fn part_mut(&mut self, index: usize) -> &mut PartSlot {
        if self.parts.len() <= index {
            self.parts.resize_with(index + 1, PartSlot::default);
        }
        &mut self.parts[index]
    }
}

/// State owned by a single in-flight call and dropped when it settles.
#[derive(Debug, Default)]
pub struct StreamState {
    decoder: ChunkDecoder,
    cache: Vec<CandidateSlot>,
    last_payload: Option<Value>,
    usage: Option<UsageSnapshot>,
    model_version: Option<String>,
    provider_error: Option<ErrorResult>,
    fragments: usize,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one body chunk and accumulates every fragment it contains,
    /// invoking `on_update` once per fragment. Returns the number of
    /// fragments accepted from this chunk.
    pub fn feed<F>(&mut self, chunk: &[u8], on_update: &mut F) -> usize
    where
        F: FnMut(&StreamUpdate) + ?Sized,
    {
        let text = self.decoder.decode(chunk, false);
        self.process_text(&text, on_update)
    }

    /// Flushes the decoder, emits the terminal `done` update, and settles the
    /// call.
    pub fn finish<F>(mut self, on_update: &mut F) -> Outcome<FinalResult>
    where
        F: FnMut(&StreamUpdate) + ?Sized,
    {
        let tail = self.decoder.decode(&[], true);
        self.process_text(&tail, on_update);
        on_update(&StreamUpdate::done());
        self.into_outcome()
    }

    fn process_text<F>(&mut self, text: &str, on_update: &mut F) -> usize
    where
        F: FnMut(&StreamUpdate) + ?Sized,
    {
        let mut accepted = 0;
        for fragment in parse_fragments(text) {
            if let Some(err) = ErrorResult::from_payload(&fragment) {
                tracing::warn!(
                    code = ?err.error.code,
                    status = ?err.error.status,
                    "Gemini reported an error mid-stream"
                );
                self.provider_error = Some(err);
                continue;
            }
            let update = self.accumulate(fragment);
            on_update(&update);
            accepted += 1;
        }
        accepted
    }

    /// Merges one parsed fragment and returns the snapshot a caller should
    /// observe, with cumulative text substituted for the raw deltas.
    pub fn accumulate(&mut self, fragment: Value) -> StreamUpdate {
        self.fragments += 1;

        if let Some(version) = fragment.get("modelVersion").and_then(Value::as_str) {
            self.model_version = Some(version.to_string());
        }
        if fragment.get("usageMetadata").is_some() {
            self.usage = Some(extract_usage(&fragment));
        }

        let mut contents = Vec::new();
        if let Some(candidates) = fragment.get("candidates").and_then(Value::as_array) {
            for (i, candidate) in candidates.iter().enumerate() {
                if let Some(snapshot) = self.merge_candidate(i, candidate) {
                    contents.push(snapshot);
                }
            }
        }

        if carries_result_fields(&fragment) {
            self.last_payload = Some(fragment);
        }
        StreamUpdate {
            contents,
            token_usage: self.usage.clone(),
            done: false,
        }
    }

    fn merge_candidate(&mut self, index: usize, candidate: &Value) -> Option<Candidate> {
        let finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(str::to_uppercase);

        let slot = self.slot_mut(index);
        slot.seen = true;
        if finish_reason.is_some() {
            slot.finish_reason = finish_reason.clone();
        }

        let content = candidate.get("content")?;
        let role = content.get("role").and_then(Value::as_str);
        if let Some(role) = role {
            slot.role = Some(role.to_string());
        }

        let parts = flatten_parts(content.get("parts"));
        let mut snapshot_parts = Vec::with_capacity(parts.len());
        for (j, part) in parts.into_iter().enumerate() {
            let entry = slot.part_mut(j);
            entry.merge(part, role);
            snapshot_parts.push(entry.to_part());
        }

        Some(Candidate {
            index,
            role: slot.role.clone(),
            parts: snapshot_parts,
            finish_reason,
        })
    }

    fn slot_mut(&mut self, index: usize) -> &mut CandidateSlot {
        if self.cache.len() <= index {
            self.cache.resize_with(index + 1, CandidateSlot::default);
        }
        &mut self.cache[index]
    }

    /// Cumulative text accumulated so far for a `(candidate, part)` slot.
    pub fn cached_text(&self, candidate: usize, part: usize) -> Option<&str> {
        self.cache
            .get(candidate)
            .and_then(|slot| slot.parts.get(part))
            .and_then(|entry| entry.text.as_deref())
    }

    /// Number of fragments merged so far.
    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    /// Settles the call: a provider error seen at any point wins over content.
    pub fn into_outcome(self) -> Outcome<FinalResult> {
        match self.provider_error.clone() {
            Some(err) => Outcome::ProviderError(err),
            None => Outcome::Success(self.into_final()),
        }
    }

    /// Rebuilds the consolidated result from the cache and the last payload.
    pub fn into_final(self) -> FinalResult {
        let contents = self
            .cache
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.seen)
            .map(|(index, slot)| Candidate {
                index,
                role: slot.role.clone(),
                parts: slot.parts.iter().map(PartSlot::to_part).collect(),
                finish_reason: slot.finish_reason.clone(),
            })
            .collect();

        let token_usage = match &self.usage {
            Some(usage) => usage.clone(),
            None => extract_usage(self.last_payload.as_ref().unwrap_or(&Value::Null)),
        };

        let response = self
            .last_payload
            .clone()
            .map(|payload| self.patch_payload(payload))
            .unwrap_or(Value::Null);

        FinalResult {
            contents,
            model_version: self.model_version,
            token_usage,
            response,
        }
    }

    /// Writes cumulative text back into the parts of a raw payload.
    fn patch_payload(&self, mut payload: Value) -> Value {
        let Some(candidates) = payload.get_mut("candidates").and_then(Value::as_array_mut) else {
            return payload;
        };
        for (i, candidate) in candidates.iter_mut().enumerate() {
            let Some(slot) = self.cache.get(i) else {
                continue;
            };
            let Some(parts) = candidate
                .pointer_mut("/content/parts")
                .and_then(Value::as_array_mut)
            else {
                continue;
            };
            for (part, entry) in parts.iter_mut().zip(&slot.parts) {
                if let (Some(part), Some(text)) = (part.as_object_mut(), &entry.text) {
                    part.insert("text".to_string(), Value::String(text.clone()));
                }
            }
        }
        payload
    }
}

/// Whether a fragment has any of the fields the final `_response` is built
/// from; stubs left by repairing a truncated tail do not.
fn carries_result_fields(fragment: &Value) -> bool {
    ["candidates", "usageMetadata", "modelVersion"]
        .iter()
        .any(|key| fragment.get(key).is_some())
}

/// Normalizes `content.parts` into a flat list of part objects. A lone object
/// or nested arrays are accepted; anything else is ignored.
fn flatten_parts(parts: Option<&Value>) -> Vec<Map<String, Value>> {
    fn walk(value: &Value, out: &mut Vec<Map<String, Value>>) {
        match value {
            Value::Array(items) => items.iter().for_each(|item| walk(item, out)),
            Value::Object(map) => out.push(map.clone()),
            _ => {}
        }
    }

    let mut flat = Vec::new();
    if let Some(parts) = parts {
        walk(parts, &mut flat);
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn text_fragment(candidate_texts: &[&str]) -> Value {
        let candidates: Vec<Value> = candidate_texts
            .iter()
            .map(|text| json!({ "content": { "parts": [{ "text": text }], "role": "model" } }))
            .collect();
        json!({ "candidates": candidates })
    }

    fn collect_updates(state: &mut StreamState, chunks: &[&str]) -> Vec<StreamUpdate> {
        let mut updates = Vec::new();
        for chunk in chunks {
            state.feed(chunk.as_bytes(), &mut |update: &StreamUpdate| {
                updates.push(update.clone())
            });
        }
        updates
    }

    #[test]
    fn test_hello_scenario() {
        let mut state = StreamState::new();
        let mut updates = collect_updates(
            &mut state,
            &[
                r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}],"role":"model"}}]}"#,
                r#",{"candidates":[{"content":{"parts":[{"text":"lo"}],"role":"model"}}]}"#,
            ],
        );

        let outcome = state.finish(&mut |update: &StreamUpdate| updates.push(update.clone()));

        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].text(0, 0), Some("Hel"));
        assert_eq!(updates[1].text(0, 0), Some("Hello"));
        assert_eq!(updates[2], StreamUpdate::done());

        let result = outcome.success().unwrap();
        assert_eq!(result.contents.len(), 1);
        assert_eq!(result.contents[0].parts[0].text.as_deref(), Some("Hello"));
        assert_eq!(result.contents[0].role.as_deref(), Some("model"));
        assert_eq!(
            result.response["candidates"][0]["content"]["parts"][0]["text"],
            "Hello"
        );
    }

    #[test]
    fn test_cumulative_text_matches_concatenated_deltas() {
        let deltas = ["Once", " upon", " a", " time", ""];
        let mut state = StreamState::new();
        let mut expected = String::new();

        for delta in deltas {
            expected.push_str(delta);
            let update = state.accumulate(text_fragment(&[delta]));
            assert_eq!(update.text(0, 0), Some(expected.as_str()));
            assert_eq!(state.cached_text(0, 0), Some(expected.as_str()));
        }
    }

    #[test]
    fn test_candidates_accumulate_independently() {
        let mut state = StreamState::new();
        state.accumulate(text_fragment(&["a", "x"]));
        let update = state.accumulate(text_fragment(&["b", "y"]));

        assert_eq!(update.text(0, 0), Some("ab"));
        assert_eq!(update.text(1, 0), Some("xy"));
    }

    #[test]
    fn test_malformed_chunk_is_isolated() {
        let mut state = StreamState::new();
        let updates = collect_updates(
            &mut state,
            &[
                r#"[{"candidates":[{"content":{"parts":[{"text":"A"}]}}]}"#,
                r#",{"candidates":@@@}"#,
                r#",{"candidates":[{"content":{"parts":[{"text":"B"}]}}]}"#,
                "]",
            ],
        );

        assert_eq!(updates.len(), 2);
        let result = state.into_final();
        assert_eq!(result.text(), "AB");
    }

    #[test]
    fn test_fragment_without_candidates_only_updates_usage() {
        let mut state = StreamState::new();
        state.accumulate(text_fragment(&["hi"]));
        let update = state.accumulate(json!({
            "usageMetadata": {
                "promptTokenCount": 3,
                "candidatesTokenCount": 1,
                "totalTokenCount": 4
            },
            "modelVersion": "gemini-2.0-flash-001"
        }));

        assert!(update.contents.is_empty());
        assert_eq!(update.token_usage.unwrap().count.total, Some(4));

        let result = state.into_final();
        assert_eq!(result.text(), "hi");
        assert_eq!(result.model_version.as_deref(), Some("gemini-2.0-flash-001"));
        assert!(!result.token_usage.metadata_incomplete);
    }

    #[test]
    fn test_candidate_without_content_is_skipped_for_that_index() {
        let mut state = StreamState::new();
        let update = state.accumulate(json!({
            "candidates": [
                { "finishReason": "safety" },
                { "content": { "parts": [{ "text": "ok" }] } }
            ]
        }));

        assert_eq!(update.contents.len(), 1);
        assert_eq!(update.contents[0].index, 1);

        let result = state.into_final();
        assert_eq!(result.contents.len(), 2);
        assert_eq!(result.contents[0].finish_reason.as_deref(), Some("SAFETY"));
        assert!(result.contents[0].parts.is_empty());
        assert_eq!(result.contents[1].text(), "ok");
    }

    #[test]
    fn test_finish_reason_is_upper_cased() {
        let mut state = StreamState::new();
        let update = state.accumulate(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "end" }] },
                "finishReason": "stop"
            }]
        }));

        assert_eq!(update.contents[0].finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn test_non_text_part_fields_pass_through() {
        let mut state = StreamState::new();
        state.accumulate(json!({
            "candidates": [{ "content": { "parts": [{ "text": "a", "thought": true }] } }]
        }));
        state.accumulate(json!({
            "candidates": [{ "content": { "parts": [{ "text": "b" }] } }]
        }));

        let result = state.into_final();
        let part = &result.contents[0].parts[0];
        assert_eq!(part.text.as_deref(), Some("ab"));
        assert_eq!(part.extra.get("thought"), Some(&json!(true)));
    }

    #[test]
    fn test_nested_parts_are_flattened() {
        let mut state = StreamState::new();
        let update = state.accumulate(json!({
            "candidates": [{ "content": { "parts": [[{ "text": "a" }], { "text": "b" }] } }]
        }));

        assert_eq!(update.text(0, 0), Some("a"));
        assert_eq!(update.text(0, 1), Some("b"));
    }

    #[test]
    fn test_error_fragment_settles_as_provider_error() {
        let mut state = StreamState::new();
        collect_updates(
            &mut state,
            &[
                r#"[{"candidates":[{"content":{"parts":[{"text":"A"}]}}]}"#,
                r#",{"error":{"code":500,"message":"Internal","status":"INTERNAL"}}]"#,
            ],
        );

        let outcome = state.finish(&mut |_: &StreamUpdate| {});
        let err = outcome.provider_error().unwrap();
        assert_eq!(err.error.code, Some(500));
        assert_eq!(err.error.status.as_deref(), Some("INTERNAL"));
    }

    #[test]
    fn test_final_usage_falls_back_to_incomplete() {
        let mut state = StreamState::new();
        state.accumulate(text_fragment(&["x"]));
        let result = state.into_final();

        assert_eq!(result.token_usage, UsageSnapshot::missing());
    }

    #[test]
    fn test_repaired_stub_does_not_replace_final_response() {
        let mut state = StreamState::new();
        let updates = collect_updates(
            &mut state,
            &[
                r#"[{"candidates":[{"content":{"parts":[{"text":"Hello"}],"role":"model"},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":1,"totalTokenCount":3},"modelVersion":"gemini-2.0-flash"}"#,
                r#",{"usageMeta"#,
            ],
        );
        assert_eq!(updates.len(), 2);

        let result = state.into_final();
        assert_eq!(
            result.response["candidates"][0]["content"]["parts"][0]["text"],
            "Hello"
        );
        assert_eq!(result.response["usageMetadata"]["totalTokenCount"], 3);
        assert_eq!(result.response["modelVersion"], "gemini-2.0-flash");
        assert_eq!(result.token_usage.count.total, Some(3));
    }

    #[test]
    fn test_lone_opening_brace_is_not_a_fragment() {
        let mut state = StreamState::new();
        let mut updates = 0;
        let accepted = state.feed(b"{", &mut |_: &StreamUpdate| updates += 1);

        assert_eq!(accepted, 0);
        assert_eq!(updates, 0);
        assert_eq!(state.fragment_count(), 0);
    }

    #[test]
    fn test_multibyte_text_split_across_chunks() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"naïve"}]}}]}"#.as_bytes();
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut state = StreamState::new();
        let mut seen = Vec::new();
        state.feed(&body[..split], &mut |u: &StreamUpdate| seen.push(u.clone()));
        state.feed(&body[split..], &mut |u: &StreamUpdate| seen.push(u.clone()));

        // The first half repairs to "na"; the second half starts mid-string
        // and cannot be repaired, so only the first delta survives.
        assert_eq!(seen.len(), 1);
        assert_eq!(state.cached_text(0, 0), Some("na"));
    }
}
