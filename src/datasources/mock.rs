//! Mock datasource for testing
//!
//! Provides a configurable mock datasource that can be used in unit tests
//! and to exercise the discovery pipeline.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CachedResponse, Datasource};
use crate::CloudInitError;

/// Mock datasource for testing
///
/// # Example
/// ```
/// use cloud_init_rs::datasources::mock::MockDatasource;
///
/// let mock = MockDatasource::new()
///     .with_available(true)
///     .with_instance_id("test-123");
/// ```
pub struct MockDatasource {
    name: &'static str,
    available: bool,
    load_error: Option<String>,
    instance_id: Option<String>,
    user_data: Option<Arc<CachedResponse>>,
    loads: Arc<AtomicUsize>,
}

impl MockDatasource {
    /// Create a new mock datasource with default values
    pub fn new() -> Self {
        Self {
            name: "Mock",
            available: true,
            load_error: None,
            instance_id: None,
            user_data: None,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the datasource name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set whether the datasource is available
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_instance_id(mut self, instance_id: &str) -> Self {
        self.instance_id = Some(instance_id.to_string());
        self
    }

    pub fn with_user_data(mut self, user_data: &str) -> Self {
        self.user_data = Some(Arc::new(CachedResponse::new(user_data)));
        self
    }

    /// Configure `load` to fail
    pub fn with_load_error(mut self, error: &str) -> Self {
        self.load_error = Some(error.to_string());
        self
    }

    /// Share a load counter with the caller
    pub fn with_load_counter(mut self, loads: Arc<AtomicUsize>) -> Self {
        self.loads = loads;
        self
    }

    /// Number of times `load` was called
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl Default for MockDatasource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Datasource for MockDatasource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn load(&mut self) -> Result<bool, CloudInitError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.load_error {
            return Err(CloudInitError::Datasource(error.clone()));
        }
        Ok(self.available)
    }

    async fn instance_id(&self) -> Result<Option<String>, CloudInitError> {
        Ok(self.instance_id.clone())
    }

    async fn user_data(&self) -> Result<Option<Arc<CachedResponse>>, CloudInitError> {
        Ok(self.user_data.clone())
    }
}
