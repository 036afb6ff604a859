//! Environment configuration for the Gemini adapter.

use crate::ai::gemini::catalog::{DEFAULT_MAX_MAJOR_VERSION, DEFAULT_MIN_MAJOR_VERSION};
use crate::ai::gemini::client::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_PAGE_SIZE};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub page_size: u32,
    pub max_major_version: u32,
    pub min_major_version: u32,
}

impl Config {
    /// Reads configuration from the process environment, loading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Config("GEMINI_API_KEY not set".to_string()))?;

        Ok(Self {
            api_key,
            base_url: lookup("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            page_size: numeric(&lookup, "GEMINI_CATALOG_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            max_major_version: numeric(
                &lookup,
                "GEMINI_CATALOG_MAX_VERSION",
                DEFAULT_MAX_MAJOR_VERSION,
            )?,
            min_major_version: numeric(
                &lookup,
                "GEMINI_CATALOG_MIN_VERSION",
                DEFAULT_MIN_MAJOR_VERSION,
            )?,
        })
    }
}

fn numeric<F>(lookup: &F, key: &str, default: u32) -> Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            Error::Config(format!(
                "{} must be a non-negative integer, got '{}'",
                key, raw
            ))
        }),
    }
}
