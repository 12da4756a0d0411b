use anyhow::{bail, Context, Result};
use std::env;
use std::net::SocketAddr;

use crate::tmdb::DEFAULT_BASE_URL;

const DEFAULT_REGION: &str = "NL";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3146";
const DEFAULT_MAX_CONCURRENT_RANDOMISE: usize = 4;

#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb_api_key: String,
    pub tmdb_base_url: String,
    pub watch_region: String,
    pub certification_country: String,
    pub bind_addr: SocketAddr,
    pub max_concurrent_randomise: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(tmdb_api_key) = get("TMDB_API_KEY") else {
            bail!("Missing required environment variable: TMDB_API_KEY");
        };
        let tmdb_base_url = get("TMDB_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let watch_region = get("WATCH_REGION")
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
            .to_ascii_uppercase();
        let certification_country = get("CERTIFICATION_COUNTRY")
            .unwrap_or_else(|| watch_region.clone())
            .to_ascii_uppercase();
        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:3146")?;
        let max_concurrent_randomise = match get("MAX_CONCURRENT_RANDOMISE") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| {
                    format!("MAX_CONCURRENT_RANDOMISE must be a positive integer, got '{raw}'")
                })?,
            None => DEFAULT_MAX_CONCURRENT_RANDOMISE,
        };

        Ok(Self {
            tmdb_api_key,
            tmdb_base_url,
            watch_region,
            certification_country,
            bind_addr,
            max_concurrent_randomise,
        })
    }
}
