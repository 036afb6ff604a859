pub mod accumulator;
pub mod catalog;
pub mod client;
pub mod decoder;
pub mod failure;
pub mod repair;
pub mod request;
pub mod types;
pub mod usage;

pub use accumulator::StreamState;
pub use catalog::{
    Category, ClassifiedCatalog, ModelCatalog, ModelDescriptor, OrderingTable, RawModel,
};
pub use client::GeminiClient;
pub use failure::{status_phrase, ErrorResult, ProviderError};
pub use request::{GenerationOptions, RequestBody, RequestBuilder};
pub use types::{Candidate, Content, FinalResult, Outcome, Part, Role, StreamUpdate, Turn};
pub use usage::{TokenCount, UsageSnapshot};
