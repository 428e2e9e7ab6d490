use anyhow::Result;
use std::env;

use crate::api::StatusLookup;

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Backend origin, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    pub status_lookup: StatusLookup,
    /// Timeout for REST queries; the status stream itself has none
    pub request_timeout_secs: u64,
    pub list_limit: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token: None,
            status_lookup: StatusLookup::default(),
            request_timeout_secs: 10,
            list_limit: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ApiConfig::default();

        Ok(Self {
            api: ApiConfig {
                base_url: lookup("DOCSTREAM_API_URL").unwrap_or(defaults.base_url),
                token: lookup("DOCSTREAM_API_TOKEN").filter(|t| !t.is_empty()),
                status_lookup: match lookup("DOCSTREAM_STATUS_LOOKUP") {
                    Some(value) => value.parse()?,
                    None => defaults.status_lookup,
                },
                request_timeout_secs: lookup("DOCSTREAM_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|| defaults.request_timeout_secs.to_string())
                    .parse()?,
                list_limit: lookup("DOCSTREAM_LIST_LIMIT")
                    .unwrap_or_else(|| defaults.list_limit.to_string())
                    .parse()?,
            },
        })
    }
}
