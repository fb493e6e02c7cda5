//! HTTP client with bounded retries
//!
//! Thin layer over reqwest used to talk to metadata services. Adds manual
//! retries with a sleep between attempts, failure classification (TLS
//! errors are never retried) and the `race_until_ready` polling loop in
//! [`wait`].

pub mod wait;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Certificate, Client, Identity, Method};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::CloudInitError;
use crate::error::UrlError;
use crate::retry::{Clock, RetryPolicy, SystemClock};

pub use wait::WaitCallbacks;

/// Maximum redirects followed when redirects are allowed
const MAX_REDIRECTS: usize = 10;

/// User agent sent when the caller supplies none
pub fn default_user_agent() -> String {
    format!("Cloud-Init/{}", env!("CARGO_PKG_VERSION"))
}

/// Client-side TLS material for https endpoints
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Extra CA bundle (PEM) used to verify the server
    pub ca_certs: Option<PathBuf>,
    /// Client certificate (PEM)
    pub cert_file: Option<PathBuf>,
    /// Client private key (PEM); may be bundled in `cert_file` instead
    pub key_file: Option<PathBuf>,
}

/// A single logical request, possibly sent several times
#[derive(Debug, Clone)]
pub struct UrlRequest {
    pub url: String,
    pub method: Method,
    pub body: Option<Vec<u8>>,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    pub retries: u32,
    pub check_status: bool,
    pub allow_redirects: bool,
    pub tls: Option<TlsOptions>,
}

impl UrlRequest {
    /// GET request with status checking, redirects and no retries
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
            retries: 0,
            check_status: true,
            allow_redirects: true,
            tls: None,
        }
    }

    /// POST request carrying `body`
    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: Method::POST,
            body: Some(body.into()),
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn check_status(mut self, check: bool) -> Self {
        self.check_status = check;
        self
    }

    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = allow;
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// A received HTTP response with its body fully read
#[derive(Debug, Clone)]
pub struct Response {
    pub contents: Vec<u8>,
    /// Final URL, after redirects
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
}

impl Response {
    /// `2xx`, or anything below `400` when redirects count as success
    pub fn ok(&self, redirects_ok: bool) -> bool {
        let upper = if redirects_ok { 400 } else { 300 };
        (200..upper).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }
}

/// Give scheme-less URLs an `http://` prefix
pub fn clean_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// Append path segments to a base URL, one `/` between each
pub fn combine_url(base: &str, parts: &[&str]) -> String {
    let mut url = base.to_string();
    for part in parts {
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(part.trim_start_matches('/'));
    }
    url
}

/// HTTP client used for every metadata request
pub struct HttpClient {
    follow: Client,
    no_follow: Client,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl HttpClient {
    /// Client with a real clock and a one second retry interval
    pub fn new() -> Result<Self, CloudInitError> {
        Self::with_clock(Arc::new(SystemClock), Duration::from_secs(1))
    }

    /// Client sleeping through `clock`, `interval` being the base delay
    /// between attempts
    pub fn with_clock(clock: Arc<dyn Clock>, interval: Duration) -> Result<Self, CloudInitError> {
        Ok(Self {
            follow: build_client(true, None)?,
            no_follow: build_client(false, None)?,
            policy: RetryPolicy::new(0, interval),
            clock,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Send `request`, retrying up to `request.retries` times.
    ///
    /// TLS failures and 404 responses abort at once. Connection failures,
    /// and other status codes of 400 and above when `check_status` is set,
    /// are retried. When all
    /// attempts fail the last error is returned.
    pub async fn read_url(&self, request: &UrlRequest) -> Result<Response, UrlError> {
        let url = clean_url(&request.url);
        let custom;
        let client = match &request.tls {
            Some(tls) if url.starts_with("https://") => {
                custom = client_with_tls(request.allow_redirects, tls).await?;
                &custom
            }
            _ if request.allow_redirects => &self.follow,
            _ => &self.no_follow,
        };

        let attempts = request.retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            debug!(
                "[{}/{}] open '{}' with {} (timeout: {:?}, check_status: {})",
                attempt, attempts, url, request.method, request.timeout, request.check_status
            );

            match self.send_once(client, &url, request).await {
                Ok(response) => {
                    debug!(
                        "Read from {} ({}, {}b) after {} attempts",
                        url,
                        response.status,
                        response.contents.len(),
                        attempt + 1
                    );
                    return Ok(response);
                }
                Err(e) => {
                    let retriable = e.retriable;
                    last_error = Some(e);
                    if !retriable {
                        debug!("Not retrying {}: failure is not transient", url);
                        break;
                    }
                    if attempt + 1 < attempts {
                        let delay = self.policy.delay_for(attempt);
                        debug!("Please wait {:?} while we wait to try again", delay);
                        self.clock.sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| UrlError::transport("no request was made", false)))
    }

    async fn send_once(
        &self,
        client: &Client,
        url: &str,
        request: &UrlRequest,
    ) -> Result<Response, UrlError> {
        let mut builder = client.request(request.method.clone(), url);

        let mut headers = request.headers.clone();
        if !headers.contains_key(USER_AGENT) {
            if let Ok(agent) = HeaderValue::from_str(&default_user_agent()) {
                headers.insert(USER_AGENT, agent);
            }
        }
        builder = builder.headers(headers);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let final_url = response.url().to_string();

        if request.check_status && status >= 400 {
            return Err(UrlError::status(
                format!("{} for url {}", response.status(), final_url),
                status,
                headers,
            ));
        }

        let contents = response.bytes().await.map_err(classify)?.to_vec();
        Ok(Response {
            contents,
            url: final_url,
            status,
            headers,
        })
    }
}

fn build_client(
    follow_redirects: bool,
    tls: Option<(Vec<Certificate>, Option<Identity>)>,
) -> Result<Client, CloudInitError> {
    let policy = if follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };
    let mut builder = Client::builder()
        .redirect(policy)
        .connect_timeout(Duration::from_secs(2));

    if let Some((roots, identity)) = tls {
        for cert in roots {
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = identity {
            builder = builder.identity(identity);
        }
    }

    builder
        .build()
        .map_err(|e| CloudInitError::Config(format!("Failed to create HTTP client: {}", e)))
}

async fn client_with_tls(follow_redirects: bool, tls: &TlsOptions) -> Result<Client, UrlError> {
    let invalid = |e: &dyn std::fmt::Display| {
        UrlError::transport(format!("invalid TLS settings: {}", e), false)
    };

    let mut roots = Vec::new();
    if let Some(path) = &tls.ca_certs {
        let pem = tokio::fs::read(path).await.map_err(|e| invalid(&e))?;
        roots.push(Certificate::from_pem(&pem).map_err(|e| invalid(&e))?);
    }

    let identity = match (&tls.cert_file, &tls.key_file) {
        (Some(cert), key) => {
            let mut pem = tokio::fs::read(cert).await.map_err(|e| invalid(&e))?;
            if let Some(key) = key {
                pem.push(b'\n');
                pem.extend(tokio::fs::read(key).await.map_err(|e| invalid(&e))?);
            }
            Some(Identity::from_pem(&pem).map_err(|e| invalid(&e))?)
        }
        (None, _) => None,
    };

    build_client(follow_redirects, Some((roots, identity))).map_err(|e| invalid(&e))
}

/// Map a reqwest failure to a [`UrlError`], deciding whether it is worth
/// another attempt
fn classify(err: reqwest::Error) -> UrlError {
    let retriable = !(err.is_builder() || is_tls_failure(&err));
    match err.status() {
        Some(status) => UrlError {
            cause: err.to_string(),
            status: Some(status.as_u16()),
            headers: HeaderMap::new(),
            retriable,
        },
        None => UrlError::transport(err.to_string(), retriable),
    }
}

/// Whether a rustls error sits anywhere below the top-level reqwest error.
///
/// `io::Error` hides its payload from `source()`, so it is unwrapped by hand.
fn is_tls_failure(err: &reqwest::Error) -> bool {
    let mut current = err.source();
    while let Some(e) = current {
        if e.is::<rustls::Error>() {
            return true;
        }
        current = match e.downcast_ref::<std::io::Error>().and_then(|io| io.get_ref()) {
            Some(inner) => Some(inner as &(dyn Error + 'static)),
            None => e.source(),
        };
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> Response {
        Response {
            contents: b"body".to_vec(),
            url: "http://169.254.169.254/".to_string(),
            status,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_response_ok() {
        assert!(response(200).ok(false));
        assert!(response(204).ok(false));
        assert!(!response(302).ok(false));
        assert!(response(302).ok(true));
        assert!(!response(404).ok(true));
        assert!(!response(101).ok(true));
    }

    #[test]
    fn test_clean_url() {
        assert_eq!(clean_url("169.254.169.254/openstack"), "http://169.254.169.254/openstack");
        assert_eq!(clean_url("https://example.com"), "https://example.com");
    }

    #[test]
    fn test_combine_url() {
        assert_eq!(
            combine_url("http://169.254.169.254", &["openstack", "latest"]),
            "http://169.254.169.254/openstack/latest"
        );
        assert_eq!(
            combine_url("http://169.254.169.254/", &["/openstack"]),
            "http://169.254.169.254/openstack"
        );
        assert_eq!(combine_url("http://host/a", &[]), "http://host/a");
    }

    #[test]
    fn test_request_builder() {
        let request = UrlRequest::post("http://host/password", "secret")
            .retries(2)
            .check_status(false)
            .allow_redirects(false);

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body.as_deref(), Some(&b"secret"[..]));
        assert_eq!(request.retries, 2);
        assert!(!request.check_status);
        assert!(!request.allow_redirects);
    }

    #[test]
    fn test_default_user_agent() {
        assert!(default_user_agent().starts_with("Cloud-Init/"));
    }
}
