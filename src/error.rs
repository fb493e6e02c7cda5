//! Error types for cloud-init-rs

use reqwest::header::HeaderMap;
use thiserror::Error;

/// Main error type for cloud-init-rs operations
#[derive(Error, Debug)]
pub enum CloudInitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Datasource error: {0}")]
    Datasource(String),

    #[error("No available data source found")]
    NoDatasource,

    #[error("Metadata not found: {0}")]
    ResourceMissing(String),

    #[error("Metadata for path {0} was not accessible")]
    ResourceNotAccessible(String),

    #[error(transparent)]
    Url(#[from] UrlError),

    #[error("Invalid API version {0:?}")]
    InvalidVersion(String),

    #[error("No metadata versions were found")]
    NoVersionsFound,

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unsupported by this datasource: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudInitError {
    /// Whether this error means "the resource is not there".
    ///
    /// Such errors are never retried: a missing resource will not appear
    /// by asking again.
    pub fn is_missing(&self) -> bool {
        match self {
            Self::ResourceMissing(_) | Self::ResourceNotAccessible(_) => true,
            Self::Url(e) => e.status == Some(404),
            _ => false,
        }
    }

    /// HTTP status code carried by a transport error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Url(e) => e.status,
            _ => None,
        }
    }
}

/// Failure of an HTTP request after all attempts were spent
#[derive(Error, Debug, Clone)]
#[error("{cause}")]
pub struct UrlError {
    /// Human readable cause of the last failure
    pub cause: String,
    /// Status code, when an HTTP response was received
    pub status: Option<u16>,
    /// Response headers, when an HTTP response was received
    pub headers: HeaderMap,
    /// Whether another attempt could succeed
    pub retriable: bool,
}

impl UrlError {
    /// Error for a request that got no HTTP response at all
    pub fn transport(cause: impl Into<String>, retriable: bool) -> Self {
        Self {
            cause: cause.into(),
            status: None,
            headers: HeaderMap::new(),
            retriable,
        }
    }

    /// Error for a response with an unacceptable status code.
    ///
    /// A 404 is final; every other status may be retried.
    pub fn status(cause: impl Into<String>, status: u16, headers: HeaderMap) -> Self {
        Self {
            cause: cause.into(),
            status: Some(status),
            headers,
            retriable: status != 404,
        }
    }
}
