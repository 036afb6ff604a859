use super::gemini::catalog::{
    OrderingTable, RawModel, DEFAULT_MAX_MAJOR_VERSION, DEFAULT_MIN_MAJOR_VERSION,
};
use super::gemini::client::read_stream;
use super::gemini::failure::transport_error;
use super::gemini::{
    ClassifiedCatalog, ErrorResult, FinalResult, GenerationOptions, Outcome, StreamUpdate, Turn,
};
use super::GenerativeService;
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Replays canned body chunks through the same read loop and stream
/// accumulator the HTTP client uses.
pub struct MockGenerativeClient {
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    models: Arc<Mutex<Vec<RawModel>>>,
    provider_error: Arc<Mutex<Option<ErrorResult>>>,
    body_error: Arc<Mutex<Option<String>>>,
    call_count: Arc<Mutex<usize>>,
}

impl MockGenerativeClient {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
            models: Arc::new(Mutex::new(Vec::new())),
            provider_error: Arc::new(Mutex::new(None)),
            body_error: Arc::new(Mutex::new(None)),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_chunk(self, chunk: impl Into<Vec<u8>>) -> Self {
        self.chunks.lock().unwrap().push(chunk.into());
        self
    }

    pub fn with_model(self, name: &str) -> Self {
        self.models.lock().unwrap().push(RawModel::named(name));
        self
    }

    pub fn with_provider_error(self, error: ErrorResult) -> Self {
        *self.provider_error.lock().unwrap() = Some(error);
        self
    }

    /// Fails the body read after the scripted chunks have been delivered.
    pub fn with_body_error(self, detail: &str) -> Self {
        *self.body_error.lock().unwrap() = Some(detail.to_string());
        self
    }

    pub fn get_call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    fn record_call(&self) -> Option<ErrorResult> {
        *self.call_count.lock().unwrap() += 1;
        self.provider_error.lock().unwrap().clone()
    }

    fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().unwrap().clone()
    }
}

impl Default for MockGenerativeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerativeService for MockGenerativeClient {
    async fn generate(
        &self,
        turns: &[Turn],
        options: &GenerationOptions,
    ) -> Result<Outcome<FinalResult>> {
        let cancel = CancellationToken::new();
        self.stream_generate(turns, options, &cancel, &mut |_: &StreamUpdate| {})
            .await
    }

    async fn stream_generate(
        &self,
        _turns: &[Turn],
        _options: &GenerationOptions,
        cancel: &CancellationToken,
        on_update: &mut (dyn for<'u> FnMut(&'u StreamUpdate) + Send),
    ) -> Result<Outcome<FinalResult>> {
        if let Some(err) = self.record_call() {
            return Ok(Outcome::ProviderError(err));
        }

        let mut body: Vec<Result<Vec<u8>>> = self.chunks().into_iter().map(Ok).collect();
        let body_error = self.body_error.lock().unwrap().clone();
        if let Some(detail) = body_error {
            body.push(Err(transport_error(None, Some(detail))));
        }
        read_stream(futures_util::stream::iter(body), 200, cancel, on_update).await
    }

    async fn list_models(&self) -> Result<Outcome<ClassifiedCatalog>> {
        if let Some(err) = self.record_call() {
            return Ok(Outcome::ProviderError(err));
        }

        let ordering =
            OrderingTable::synthesize(DEFAULT_MAX_MAJOR_VERSION, DEFAULT_MIN_MAJOR_VERSION);
        let models = self.models.lock().unwrap().clone();
        Ok(Outcome::Success(ordering.classify(models)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::gemini::ProviderError;
    use crate::Error;

    #[tokio::test]
    async fn test_mock_replays_chunks_split_mid_fragment() {
        let client = MockGenerativeClient::new()
            .with_chunk(r#"[{"candidates":[{"content":{"parts":[{"text":"Once "}]}}]}"#)
            .with_chunk(r#",{"candidates":[{"content":{"parts":[{"text":"upon"#)
            .with_chunk(r#" a time"}]}}]}]"#);

        let mut texts = Vec::new();
        let outcome = client
            .stream_generate(
                &[Turn::user("Tell a story")],
                &GenerationOptions::new(),
                &CancellationToken::new(),
                &mut |update: &StreamUpdate| texts.push(update.text(0, 0).map(str::to_owned)),
            )
            .await
            .unwrap();

        let result = outcome.success().unwrap();
        assert!(result.text().starts_with("Once upon"));
        assert_eq!(texts.first().cloned().flatten().as_deref(), Some("Once "));
        assert_eq!(texts.last().cloned().flatten(), None);
    }

    #[tokio::test]
    async fn test_mock_honors_cancellation() {
        let client = MockGenerativeClient::new()
            .with_chunk(r#"[{"candidates":[{"content":{"parts":[{"text":"Hi"}]}}]}]"#);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut updates = 0;
        let err = client
            .stream_generate(
                &[Turn::user("hi")],
                &GenerationOptions::new(),
                &cancel,
                &mut |_: &StreamUpdate| updates += 1,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(updates, 0);
    }

    #[tokio::test]
    async fn test_mock_cancelled_mid_stream_skips_done_update() {
        let client = MockGenerativeClient::new()
            .with_chunk(r#"[{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#)
            .with_chunk(r#",{"candidates":[{"content":{"parts":[{"text":"lo"}]}}]}]"#);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let mut updates = Vec::new();
        let err = client
            .stream_generate(
                &[Turn::user("hi")],
                &GenerationOptions::new(),
                &cancel,
                &mut |update: &StreamUpdate| {
                    updates.push(update.clone());
                    trigger.cancel();
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].text(0, 0), Some("Hel"));
        assert!(!updates[0].done);
    }

    #[tokio::test]
    async fn test_mock_body_error_rejects_as_transport() {
        let client = MockGenerativeClient::new()
            .with_chunk(r#"[{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#)
            .with_body_error("connection reset by peer");

        let mut updates = Vec::new();
        let err = client
            .stream_generate(
                &[Turn::user("hi")],
                &GenerationOptions::new(),
                &CancellationToken::new(),
                &mut |update: &StreamUpdate| updates.push(update.clone()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport { status: None, .. }));
        assert!(err.to_string().contains("connection reset by peer"));
        assert_eq!(updates.len(), 1);
        assert!(!updates[0].done);
    }

    #[tokio::test]
    async fn test_mock_provider_error_and_call_count() {
        let client = MockGenerativeClient::new().with_provider_error(ErrorResult {
            error: ProviderError {
                code: Some(503),
                message: Some("overloaded".to_string()),
                status: Some("UNAVAILABLE".to_string()),
                details: None,
            },
        });

        assert_eq!(client.get_call_count(), 0);
        let outcome = client
            .generate(&[Turn::user("hi")], &GenerationOptions::new())
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.provider_error().unwrap().error.code, Some(503));
        assert_eq!(client.get_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_list_models_classifies() {
        let client = MockGenerativeClient::new()
            .with_model("models/gemini-2.5-flash")
            .with_model("models/embedding-001");

        let catalog = client.list_models().await.unwrap().success().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.main[0].id, "gemini-2.5-flash");
    }
}
