//! Command orchestration for the `gemini-adapter` binary.

use crate::ai::gemini::catalog::UNRANKED_PRIORITY;
use crate::ai::gemini::{
    ClassifiedCatalog, FinalResult, GenerationOptions, Outcome, StreamUpdate, Turn,
};
use crate::ai::{GeminiClient, GenerativeService};
use crate::config::Config;
use crate::Result;
use std::collections::HashMap;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A single prompt plus the knobs the CLI exposes.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u64>,
    pub stream: bool,
}

impl GenerateRequest {
    pub fn turns(&self) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            turns.push(Turn::system(system.as_str()));
        }
        turns.push(Turn::user(self.prompt.as_str()));
        turns
    }

    pub fn options(&self) -> GenerationOptions {
        let mut options = GenerationOptions::new();
        if let Some(model) = &self.model {
            options = options.set("model", model.as_str());
        }
        if let Some(temperature) = self.temperature {
            options = options.set("temperature", temperature);
        }
        if let Some(max) = self.max_output_tokens {
            options = options.set("maxOutputTokens", max);
        }
        options
    }
}

/// Tracks how much of each cumulative `(candidate, part)` text has already
/// been written, so streamed output shows only the new suffix.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    printed: HashMap<(usize, usize), usize>,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// New text of the first candidate carried by `update`.
    pub fn next_chunk(&mut self, update: &StreamUpdate) -> String {
        let mut chunk = String::new();
        for candidate in update.contents.iter().filter(|c| c.index == 0) {
            for (part, slot) in candidate.parts.iter().enumerate() {
                let Some(text) = slot.text.as_deref() else {
                    continue;
                };
                let seen = self.printed.entry((candidate.index, part)).or_insert(0);
                if let Some(suffix) = text.get(*seen..) {
                    chunk.push_str(suffix);
                    *seen = text.len();
                }
            }
        }
        chunk
    }
}

pub struct App {
    service: Box<dyn GenerativeService>,
}

impl App {
    /// Build an app backed by the Gemini REST client configured from the
    /// environment.
    pub fn new() -> Result<Self> {
        let config = Config::from_env()?;
        info!(model = %config.model, base_url = %config.base_url, "Using Gemini");
        Ok(Self::with_service(Box::new(GeminiClient::from_config(
            &config,
        ))))
    }

    pub fn with_service(service: Box<dyn GenerativeService>) -> Self {
        Self { service }
    }

    /// Runs one generation, writing the text to `out` as it arrives when
    /// streaming, or once at the end otherwise.
    pub async fn generate<W>(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
        out: &mut W,
    ) -> Result<Outcome<FinalResult>>
    where
        W: Write + Send,
    {
        let turns = request.turns();
        let options = request.options();

        if !request.stream {
            let outcome = self.service.generate(&turns, &options).await?;
            if let Outcome::Success(result) = &outcome {
                writeln!(out, "{}", result.text())?;
                log_usage(result);
            }
            return Ok(outcome);
        }

        let mut printer = StreamPrinter::new();
        let mut write_error = None;
        let outcome = {
            let mut on_update = |update: &StreamUpdate| {
                if write_error.is_some() {
                    return;
                }
                let chunk = printer.next_chunk(update);
                if chunk.is_empty() {
                    return;
                }
                if let Err(e) = out.write_all(chunk.as_bytes()).and_then(|_| out.flush()) {
                    write_error = Some(e);
                }
            };
            self.service
                .stream_generate(&turns, &options, cancel, &mut on_update)
                .await?
        };
        if let Some(e) = write_error {
            return Err(e.into());
        }

        writeln!(out)?;
        if let Outcome::Success(result) = &outcome {
            log_usage(result);
        }
        Ok(outcome)
    }

    /// Lists admitted models in priority order, one per line.
    pub async fn list_models<W>(&self, out: &mut W) -> Result<Outcome<ClassifiedCatalog>>
    where
        W: Write + Send,
    {
        let outcome = self.service.list_models().await?;
        if let Outcome::Success(catalog) = &outcome {
            for model in catalog.ordered() {
                let category = serde_json::to_value(model.category)?;
                let priority = if model.priority_index == UNRANKED_PRIORITY {
                    "-".to_string()
                } else {
                    model.priority_index.to_string()
                };
                writeln!(
                    out,
                    "{:<8} {:>3}  {}",
                    category.as_str().unwrap_or_default(),
                    priority,
                    model.id
                )?;
            }
        }
        Ok(outcome)
    }
}

fn log_usage(result: &FinalResult) {
    let usage = &result.token_usage;
    info!(
        prompt = ?usage.count.prompt,
        candidates = ?usage.count.candidates,
        total = ?usage.count.total,
        incomplete = usage.metadata_incomplete,
        "Generation finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockGenerativeClient;

    fn hello_client() -> MockGenerativeClient {
        MockGenerativeClient::new()
            .with_chunk(r#"[{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#)
            .with_chunk(
                r#",{"candidates":[{"content":{"parts":[{"text":"lo"}]},"finishReason":"STOP"}]}]"#,
            )
    }

    #[test]
    fn test_request_options_and_turns() {
        let request = GenerateRequest {
            prompt: "hi".to_string(),
            system: Some("be brief".to_string()),
            model: Some("gemini-2.5-pro".to_string()),
            temperature: Some(0.2),
            max_output_tokens: Some(64),
            stream: false,
        };

        let turns = request.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn::system("be brief"));

        let options = request.options();
        assert_eq!(options.model(), Some("gemini-2.5-pro"));
        assert_eq!(options.get("maxOutputTokens"), Some(&serde_json::json!(64)));
    }

    #[test]
    fn test_stream_printer_emits_suffixes() {
        let mut printer = StreamPrinter::new();
        let mut state = crate::ai::gemini::StreamState::new();

        let first = state.accumulate(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hel" }] } }]
        }));
        let second = state.accumulate(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "lo" }] } }]
        }));

        assert_eq!(printer.next_chunk(&first), "Hel");
        assert_eq!(printer.next_chunk(&second), "lo");
        assert_eq!(printer.next_chunk(&StreamUpdate::done()), "");
    }

    #[tokio::test]
    async fn test_generate_streams_to_writer() {
        let app = App::with_service(Box::new(hello_client()));
        let request = GenerateRequest {
            prompt: "Say hello".to_string(),
            stream: true,
            ..Default::default()
        };

        let mut out = Vec::new();
        let outcome = app
            .generate(&request, &CancellationToken::new(), &mut out)
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(String::from_utf8(out).unwrap(), "Hello\n");
    }

    #[tokio::test]
    async fn test_generate_without_stream_writes_once() {
        let app = App::with_service(Box::new(hello_client()));
        let request = GenerateRequest {
            prompt: "Say hello".to_string(),
            ..Default::default()
        };

        let mut out = Vec::new();
        app.generate(&request, &CancellationToken::new(), &mut out)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Hello\n");
    }

    #[tokio::test]
    async fn test_list_models_prints_priority_order() {
        let app = App::with_service(Box::new(
            MockGenerativeClient::new()
                .with_model("models/gemini-2.0-flash-lite")
                .with_model("models/gemini-2.5-pro"),
        ));

        let mut out = Vec::new();
        app.list_models(&mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("main"));
        assert!(lines[0].ends_with("gemini-2.5-pro"));
        assert!(lines[1].starts_with("others"));
        assert!(lines[1].contains(" - "));
    }
}
