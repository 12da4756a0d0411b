use thiserror::Error;

/// Failures surfaced by the catalog client and the filter resolver.
///
/// Each HTTP call maps to exactly one variant: request construction,
/// transport, status, empty body, then decoding, checked in that order.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Failed to fetch data: {0}")]
    Network(String),

    #[error("Invalid response (HTTP {status})")]
    InvalidResponse { status: u16 },

    #[error("No data")]
    NoData,

    #[error("Failed to decode data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}

impl CatalogError {
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogError::InvalidEndpoint(_) => "invalid_endpoint",
            CatalogError::Network(_) => "network",
            CatalogError::InvalidResponse { .. } => "invalid_response",
            CatalogError::NoData => "no_data",
            CatalogError::Serialization(_) => "serialization",
            CatalogError::InvalidFilter(_) => "invalid_filter",
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;
