use super::accumulator::StreamState;
use super::catalog::{
    ClassifiedCatalog, ModelCatalog, OrderingTable, RawModel, DEFAULT_MAX_MAJOR_VERSION,
    DEFAULT_MIN_MAJOR_VERSION,
};
use super::failure::{transport_error, ErrorResult};
use super::request::{GenerationOptions, RequestBody, RequestBuilder};
use super::types::{FinalResult, Outcome, StreamUpdate, Turn};
use crate::config::Config;
use crate::{Error, Result};
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder as HttpRequest, Response};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelPage {
    #[serde(default)]
    models: Vec<RawModel>,
    next_page_token: Option<String>,
}

/// Gemini REST client covering generation, streaming, cache administration
/// and the model catalog.
///
/// Calls share nothing but the append-only [`ModelCatalog`]; each streaming
/// call owns its own [`StreamState`].
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    page_size: u32,
    ordering: OrderingTable,
    catalog: ModelCatalog,
}

impl GeminiClient {
    /// Construct a Gemini client.
    ///
    /// `model` is the default model for calls whose options carry none; a
    /// leading `models/` is stripped.
    pub fn new(api_key: String, model: String) -> Self {
        Self::new_with_client(api_key, model, Client::new())
    }

    pub fn new_with_client(api_key: String, model: String, client: Client) -> Self {
        Self {
            client,
            api_key,
            model: bare_model_id(&model).to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            ordering: OrderingTable::synthesize(
                DEFAULT_MAX_MAJOR_VERSION,
                DEFAULT_MIN_MAJOR_VERSION,
            ),
            catalog: ModelCatalog::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_key.clone(), config.model.clone())
            .with_base_url(config.base_url.clone())
            .with_page_size(config.page_size)
            .with_ordering(OrderingTable::synthesize(
                config.max_major_version,
                config.min_major_version,
            ))
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingTable) -> Self {
        self.ordering = ordering;
        self
    }

    /// Returns the default model ID without the `models/` prefix.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Descriptors admitted by every catalog fetch so far.
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    fn resolve_model<'a>(&'a self, options: &'a GenerationOptions) -> &'a str {
        options.model().map(bare_model_id).unwrap_or(&self.model)
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    fn post_json(&self, url: &str, body: &RequestBody) -> HttpRequest {
        self.client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(body)
    }

    /// Calls `generateContent` and returns the consolidated result.
    pub async fn generate_content(
        &self,
        turns: &[Turn],
        options: &GenerationOptions,
    ) -> Result<Outcome<FinalResult>> {
        let model = self.resolve_model(options);
        let body = RequestBuilder::new(turns, options).build();
        tracing::debug!(model, turns = turns.len(), "Sending generateContent request to Gemini");

        let response = send(self.post_json(&self.model_url(model, "generateContent"), &body)).await?;
        if !response.status().is_success() {
            return provider_error_or_fail(response)
                .await
                .map(Outcome::ProviderError);
        }

        let payload = read_json_body(response).await?;
        if let Some(err) = ErrorResult::from_body(&payload) {
            tracing::warn!(code = ?err.error.code, status = ?err.error.status, "Gemini reported an error");
            return Ok(Outcome::ProviderError(err));
        }

        let mut state = StreamState::new();
        state.accumulate(payload);
        Ok(state.into_outcome())
    }

    /// Calls `streamGenerateContent`, invoking `on_update` with cumulative
    /// snapshots as fragments arrive and once more with `done` at the end.
    ///
    /// The next body read is not issued until `on_update` returns. Cancelling
    /// `cancel` stops reading and rejects with [`Error::Cancelled`]; the
    /// partial state is discarded.
    pub async fn stream_generate_content<F>(
        &self,
        turns: &[Turn],
        options: &GenerationOptions,
        cancel: &CancellationToken,
        on_update: F,
    ) -> Result<Outcome<FinalResult>>
    where
        F: FnMut(&StreamUpdate) + Send,
    {
        let model = self.resolve_model(options);
        let body = RequestBuilder::new(turns, options).build();
        let request = self.post_json(&self.model_url(model, "streamGenerateContent"), &body);
        tracing::debug!(model, turns = turns.len(), "Opening Gemini content stream");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            response = send(request) => response?,
        };

        if !response.status().is_success() {
            return provider_error_or_fail(response)
                .await
                .map(Outcome::ProviderError);
        }

        let status = response.status().as_u16();
        let chunks = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                transport_error(e.status().map(|s| s.as_u16()), Some(e.to_string()))
            })
        });
        read_stream(chunks, status, cancel, on_update).await
    }

    /// Creates a cached-content resource from the given turns. Only `model`,
    /// `ttl` and `name` options are sent.
    pub async fn create_cached_content(
        &self,
        turns: &[Turn],
        options: &GenerationOptions,
    ) -> Result<Outcome<Value>> {
        let body = RequestBuilder::new(turns, options).build_cache();
        let url = format!("{}/cachedContents", self.base_url);
        tracing::debug!(turns = turns.len(), "Sending cachedContents request to Gemini");

        let response = send(self.post_json(&url, &body)).await?;
        if !response.status().is_success() {
            return provider_error_or_fail(response)
                .await
                .map(Outcome::ProviderError);
        }

        let payload = read_json_body(response).await?;
        match ErrorResult::from_body(&payload) {
            Some(err) => Ok(Outcome::ProviderError(err)),
            None => Ok(Outcome::Success(payload)),
        }
    }

    /// Fetches every catalog page, classifies the models, and appends the
    /// admitted ones to [`GeminiClient::catalog`].
    pub async fn list_models(&self) -> Result<Outcome<ClassifiedCatalog>> {
        let url = format!("{}/models", self.base_url);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .query(&[("key", self.api_key.as_str())])
                .query(&[("pageSize", self.page_size)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = send(request).await?;
            if !response.status().is_success() {
                return provider_error_or_fail(response)
                    .await
                    .map(Outcome::ProviderError);
            }

            let page: ModelPage = serde_json::from_value(read_json_body(response).await?)?;
            models.extend(page.models);

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let classified = self.ordering.classify(models);
        let added = self.catalog.extend(classified.ordered().cloned());
        tracing::info!(
            admitted = classified.len(),
            added,
            "Gemini model catalog refreshed"
        );
        Ok(Outcome::Success(classified))
    }
}

/// Drives a response body through a fresh [`StreamState`].
///
/// Cancellation is checked before every read; once it fires no further
/// updates are delivered and the partial state is dropped. A body that
/// yields no bytes at all is a transport failure.
pub(crate) async fn read_stream<S, B, F>(
    mut body: S,
    status: u16,
    cancel: &CancellationToken,
    mut on_update: F,
) -> Result<Outcome<FinalResult>>
where
    S: Stream<Item = Result<B>> + Unpin,
    B: AsRef<[u8]>,
    F: FnMut(&StreamUpdate),
{
    let mut state = StreamState::new();
    let mut received = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                let chunk = chunk.as_ref();
                received += chunk.len();
                state.feed(chunk, &mut on_update);
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    if received == 0 {
        return Err(transport_error(
            Some(status),
            Some("empty response body".to_string()),
        ));
    }

    tracing::debug!(fragments = state.fragment_count(), "Gemini stream finished");
    Ok(state.finish(&mut on_update))
}

fn bare_model_id(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

fn cancelled() -> Error {
    tracing::info!("Gemini call cancelled; discarding partial stream state");
    Error::Cancelled
}

async fn send(request: HttpRequest) -> Result<Response> {
    request.send().await.map_err(|e| {
        tracing::error!("Failed to send request to Gemini: {}", e);
        transport_error(e.status().map(|s| s.as_u16()), Some(e.to_string()))
    })
}

async fn read_json_body(response: Response) -> Result<Value> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    if body.trim().is_empty() {
        return Err(transport_error(
            Some(status),
            Some("empty response body".to_string()),
        ));
    }
    serde_json::from_str(&body).map_err(|e| {
        tracing::error!("Failed to parse Gemini response: {}\nBody: {}", e, body);
        Error::Serialization(e)
    })
}

/// Splits a non-2xx response into a provider error payload (resolved) or a
/// transport failure (rejected).
async fn provider_error_or_fail(response: Response) -> Result<ErrorResult> {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let structured = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|payload| ErrorResult::from_body(&payload));
    if let Some(err) = structured {
        tracing::warn!(
            status,
            code = ?err.error.code,
            message = ?err.error.message,
            "Gemini API error"
        );
        return Ok(err);
    }

    Err(transport_error(Some(status), Some(body)))
}
