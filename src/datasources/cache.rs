//! Per-instance cache of raw metadata responses

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::CloudInitError;

/// Raw bytes of a metadata resource plus their declared encoding
///
/// The decoded text is computed on first use and kept.
#[derive(Debug)]
pub struct CachedResponse {
    buffer: Vec<u8>,
    encoding: String,
    text: OnceLock<String>,
}

impl CachedResponse {
    pub fn new(buffer: impl Into<Vec<u8>>) -> Self {
        Self::with_encoding(buffer, "utf-8")
    }

    pub fn with_encoding(buffer: impl Into<Vec<u8>>, encoding: impl Into<String>) -> Self {
        Self {
            buffer: buffer.into(),
            encoding: encoding.into(),
            text: OnceLock::new(),
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Decoded contents
    pub fn text(&self) -> &str {
        self.text.get_or_init(|| decode(&self.buffer, &self.encoding))
    }
}

fn decode(buffer: &[u8], encoding: &str) -> String {
    match encoding.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" | "us-ascii" => String::from_utf8_lossy(buffer).into_owned(),
        "latin-1" | "latin1" | "iso-8859-1" => buffer.iter().map(|&b| b as char).collect(),
        other => {
            debug!("Unknown encoding {:?}, decoding as UTF-8", other);
            String::from_utf8_lossy(buffer).into_owned()
        }
    }
}

type Slot = Arc<OnceCell<Arc<CachedResponse>>>;

/// Path-keyed response cache
///
/// A path is fetched at most once: concurrent lookups of the same path
/// wait for the first fetch, and a successful result is kept for the life
/// of the cache. Failed fetches are not cached.
#[derive(Debug, Default)]
pub struct ResponseCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached response for `path`, calling `fetch` if absent
    pub async fn get_or_fetch<F, Fut>(
        &self,
        path: &str,
        fetch: F,
    ) -> Result<Arc<CachedResponse>, CloudInitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedResponse, CloudInitError>>,
    {
        let slot = self.slot(path)?;
        let response = slot
            .get_or_try_init(move || async move {
                debug!("Cache miss for {}", path);
                fetch().await.map(Arc::new)
            })
            .await?;
        Ok(response.clone())
    }

    /// Whether `path` has a cached response
    pub fn contains(&self, path: &str) -> bool {
        self.slots
            .lock()
            .map(|slots| slots.get(path).is_some_and(|slot| slot.initialized()))
            .unwrap_or(false)
    }

    fn slot(&self, path: &str) -> Result<Slot, CloudInitError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| CloudInitError::Datasource("response cache lock poisoned".into()))?;
        Ok(slots.entry(path.to_string()).or_default().clone())
    }
}
