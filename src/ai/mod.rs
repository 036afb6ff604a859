//! Generative content services
//!
//! [`GenerativeService`] is the seam between callers and the Gemini REST
//! client, so callers can be exercised against [`MockGenerativeClient`].

pub mod gemini;
pub mod mock;

pub use gemini::GeminiClient;
pub use mock::MockGenerativeClient;

use crate::Result;
use async_trait::async_trait;
use gemini::{ClassifiedCatalog, FinalResult, GenerationOptions, Outcome, StreamUpdate, Turn};
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait GenerativeService: Send + Sync {
    async fn generate(
        &self,
        turns: &[Turn],
        options: &GenerationOptions,
    ) -> Result<Outcome<FinalResult>>;

    async fn stream_generate(
        &self,
        turns: &[Turn],
        options: &GenerationOptions,
        cancel: &CancellationToken,
        on_update: &mut (dyn for<'u> FnMut(&'u StreamUpdate) + Send),
    ) -> Result<Outcome<FinalResult>>;

    async fn list_models(&self) -> Result<Outcome<ClassifiedCatalog>>;
}

#[async_trait]
impl GenerativeService for GeminiClient {
    async fn generate(
        &self,
        turns: &[Turn],
        options: &GenerationOptions,
    ) -> Result<Outcome<FinalResult>> {
        self.generate_content(turns, options).await
    }

    async fn stream_generate(
        &self,
        turns: &[Turn],
        options: &GenerationOptions,
        cancel: &CancellationToken,
        on_update: &mut (dyn for<'u> FnMut(&'u StreamUpdate) + Send),
    ) -> Result<Outcome<FinalResult>> {
        self.stream_generate_content(turns, options, cancel, on_update)
            .await
    }

    async fn list_models(&self) -> Result<Outcome<ClassifiedCatalog>> {
        GeminiClient::list_models(self).await
    }
}
