//! OpenStack metadata service over HTTP

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{MetadataReader, OpenStack, OpenStackSource, VERSIONS_PATH};
use crate::datasources::{CachedResponse, SourceContext};
use crate::http::{HttpClient, UrlRequest, combine_url};
use crate::retry::{Clock, RetryPolicy};
use crate::routes::RouteHelper;
use crate::CloudInitError;

/// OpenStack metadata service URL (link-local address)
const OPENSTACK_METADATA_URL: &str = "http://169.254.169.254/";

/// Settings read from `datasource.OpenStack`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenStackConfig {
    pub metadata_url: String,
    /// Retries per metadata request
    pub retries: u32,
    /// Per-request timeout in seconds
    pub timeout: u64,
    /// Seconds to wait for the service to come up
    pub max_wait: u64,
    /// Base delay between attempts in seconds
    pub retry_interval: u64,
}

impl Default for OpenStackConfig {
    fn default() -> Self {
        Self {
            metadata_url: OPENSTACK_METADATA_URL.to_string(),
            retries: 3,
            timeout: 10,
            max_wait: 120,
            retry_interval: 1,
        }
    }
}

/// Reads the metadata tree from the metadata service
pub struct HttpReader {
    config: OpenStackConfig,
    client: HttpClient,
    routes: Arc<dyn RouteHelper>,
}

impl HttpReader {
    pub fn new(
        config: OpenStackConfig,
        clock: Arc<dyn Clock>,
        routes: Arc<dyn RouteHelper>,
    ) -> Result<Self, CloudInitError> {
        let client = HttpClient::with_clock(clock, Duration::from_secs(config.retry_interval))?;
        Ok(Self {
            config,
            client,
            routes,
        })
    }

    pub fn config(&self) -> &OpenStackConfig {
        &self.config
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.timeout))
    }
}

#[async_trait]
impl MetadataReader for HttpReader {
    fn name(&self) -> &'static str {
        "OpenStack"
    }

    fn locate(&self, path: &str) -> String {
        combine_url(&self.config.metadata_url, &[path])
    }

    /// Wait for the version listing to answer
    async fn attach(&self) -> Result<bool, CloudInitError> {
        if let Err(e) = self.routes.ensure_reachable(&self.config.metadata_url).await {
            warn!("Metadata service may be unreachable: {}", e);
        }

        let versions_url = self.locate(VERSIONS_PATH);
        let max_wait = Duration::from_secs(self.config.max_wait);
        match self
            .client
            .race_until_ready(&[versions_url], max_wait, self.timeout())
            .await
        {
            Some((url, _)) => {
                debug!("Using metadata source: {}", url);
                Ok(true)
            }
            None => {
                warn!("Metadata not found at URL {:?}", self.config.metadata_url);
                Ok(false)
            }
        }
    }

    async fn read(&self, path: &str) -> Result<CachedResponse, CloudInitError> {
        let url = self.locate(path);
        debug!("Getting metadata from: {}", url);

        let request = UrlRequest::get(url.as_str())
            .retries(self.config.retries)
            .timeout(self.timeout());
        match self.client.read_url(&request).await {
            Ok(response) => {
                let encoding = response
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .and_then(charset)
                    .unwrap_or("utf-8")
                    .to_string();
                Ok(CachedResponse::with_encoding(response.contents, encoding))
            }
            Err(e) if e.status == Some(404) => Err(CloudInitError::ResourceMissing(url)),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), CloudInitError> {
        let url = self.locate(path);
        debug!("Posting metadata to: {}", url);

        let request = UrlRequest::post(url, data).timeout(self.timeout());
        self.client.read_url(&request).await?;
        Ok(())
    }

    fn has_password_service(&self) -> bool {
        true
    }
}

/// `charset` parameter of a Content-Type value
fn charset(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"'))
}

impl OpenStack {
    pub fn new(
        config: OpenStackConfig,
        clock: Arc<dyn Clock>,
        routes: Arc<dyn RouteHelper>,
    ) -> Result<Self, CloudInitError> {
        let retry = RetryPolicy::new(config.retries, Duration::from_secs(config.retry_interval));
        let reader = HttpReader::new(config, clock.clone(), routes)?;
        Ok(OpenStackSource::with_reader(reader, retry, clock))
    }

    /// Build from `datasource.OpenStack` in the system configuration
    pub fn from_context(ctx: &SourceContext) -> Result<Self, CloudInitError> {
        let config = ctx.config.datasource_config::<OpenStackConfig>("OpenStack")?;
        Self::new(config, ctx.clock.clone(), ctx.routes.clone())
    }
}
