//! OpenStack datasources
//!
//! OpenStack publishes instance metadata under a versioned tree:
//!
//! ```text
//! openstack/                      newline separated list of versions
//! openstack/<version>/meta_data.json
//! openstack/<version>/user_data
//! openstack/<version>/vendor_data.json
//! openstack/<version>/network_data.json
//! openstack/<version>/password
//! openstack/content/<name>        blobs referenced by content_path
//! ```
//!
//! The tree is served over HTTP by the metadata service ([`http`]) and
//! written to a local disk labelled `config-2` ([`configdrive`]). Both
//! share the protocol implemented here and differ only in their
//! [`MetadataReader`].
//! <https://docs.openstack.org/nova/latest/user/metadata.html>

pub mod configdrive;
pub mod http;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{CachedResponse, Datasource, NetworkConfig, ResponseCache};
use crate::CloudInitError;
use crate::retry::{Clock, RetryPolicy, exec_with_retry};

pub use configdrive::{ConfigDriveConfig, ConfigDriveReader};
pub use http::{HttpReader, OpenStackConfig};

/// OpenStack metadata service over HTTP
pub type OpenStack = OpenStackSource<HttpReader>;

/// OpenStack metadata on a local config drive
pub type ConfigDrive = OpenStackSource<ConfigDriveReader>;

/// Version alias served by every metadata service
pub const LATEST: &str = "latest";

pub const FOLSOM: &str = "2012-08-10";
pub const GRIZZLY: &str = "2013-04-04";
pub const HAVANA: &str = "2013-10-17";

/// Dated versions this crate understands, oldest first
pub const KNOWN_VERSIONS: &[&str] = &[FOLSOM, GRIZZLY, HAVANA];

/// First version accepting password posts
const POST_PASSWORD_VERSION: &str = GRIZZLY;

const VERSIONS_PATH: &str = "openstack";

/// Transport that exposes the OpenStack metadata tree
#[async_trait]
pub trait MetadataReader: Send + Sync {
    /// Datasource name for this transport
    fn name(&self) -> &'static str;

    /// Where `path` lives on this transport, for messages
    fn locate(&self, path: &str) -> String;

    /// Make the tree readable.
    ///
    /// `Ok(false)` means the transport is not present on this instance.
    async fn attach(&self) -> Result<bool, CloudInitError>;

    /// Undo [`MetadataReader::attach`]
    async fn detach(&self) {}

    async fn read(&self, path: &str) -> Result<CachedResponse, CloudInitError>;

    async fn write(&self, _path: &str, _data: &[u8]) -> Result<(), CloudInitError> {
        Err(CloudInitError::Unsupported("writing metadata"))
    }

    /// Whether this transport accepts password posts
    fn has_password_service(&self) -> bool {
        false
    }
}

/// Whether `version` is `latest` or a `YYYY-MM-DD` date
pub fn is_valid_version(version: &str) -> bool {
    if version == LATEST {
        return true;
    }
    let bytes = version.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Parse a version listing, one version per line
///
/// Blank lines are ignored. Any other line must be a valid version.
pub fn parse_version_listing(listing: &str) -> Result<Vec<String>, CloudInitError> {
    let versions: Vec<String> = listing
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if let Some(invalid) = versions.iter().find(|v| !is_valid_version(v)) {
        return Err(CloudInitError::InvalidVersion(invalid.clone()));
    }
    if versions.is_empty() {
        return Err(CloudInitError::NoVersionsFound);
    }
    Ok(versions)
}

/// Newest known version that is also available, else `latest`
pub fn select_version(available: &[String]) -> &'static str {
    KNOWN_VERSIONS
        .iter()
        .rev()
        .find(|known| available.iter().any(|v| v.as_str() == **known))
        .copied()
        .unwrap_or(LATEST)
}

/// Whether `version` supports posting the instance password
///
/// `latest` has no date and sorts below every dated version.
pub fn can_post_password(version: &str) -> bool {
    version_key(version) >= version_key(POST_PASSWORD_VERSION)
}

fn version_key(version: &str) -> Vec<u32> {
    if version == LATEST {
        return vec![0];
    }
    version.split('-').map(|part| part.parse().unwrap_or(0)).collect()
}

fn resource_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// `network_config.content_path` of a metadata document
fn content_path(document: &Value) -> Option<&str> {
    document.get("network_config")?.get("content_path")?.as_str()
}

/// Whether a `network_data.json` document carries a full configuration
fn is_complete_network_data(data: &Value) -> bool {
    ["links", "networks", "services"].iter().all(|key| {
        data.get(key)
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty())
    })
}

/// The OpenStack metadata protocol over a [`MetadataReader`]
///
/// Responses are cached per path for the life of the instance. Until
/// [`Datasource::load`] has negotiated a version, paths are built with
/// `latest`.
pub struct OpenStackSource<R> {
    reader: R,
    cache: ResponseCache,
    version: Option<String>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<R: MetadataReader> OpenStackSource<R> {
    pub fn with_reader(reader: R, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            reader,
            cache: ResponseCache::new(),
            version: None,
            retry,
            clock,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Version negotiated by the last successful load
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn working_version(&self) -> &str {
        self.version.as_deref().unwrap_or(LATEST)
    }

    fn version_path(&self, file: &str) -> String {
        resource_path(&[VERSIONS_PATH, self.working_version(), file])
    }

    /// Fetch `path` through the response cache
    pub async fn get_cached(&self, path: &str) -> Result<Arc<CachedResponse>, CloudInitError> {
        self.cache
            .get_or_fetch(path, || self.reader.read(path))
            .await
    }

    /// Versions advertised by the metadata tree
    pub async fn available_versions(&self) -> Result<Vec<String>, CloudInitError> {
        let listing = self.get_cached(VERSIONS_PATH).await?;
        parse_version_listing(listing.text())
    }

    /// Pick the newest version both sides understand
    pub async fn negotiate_version(&self) -> Result<String, CloudInitError> {
        let available = self.available_versions().await?;
        let selected = select_version(&available);
        debug!("Selected version {:?} from {:?}", selected, available);
        Ok(selected.to_string())
    }

    /// Parsed `meta_data.json`; an empty file is an empty document
    pub async fn meta_data(&self) -> Result<Map<String, Value>, CloudInitError> {
        let data = self.get_cached(&self.version_path("meta_data.json")).await?;
        if data.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(data.text())? {
            Value::Object(map) => Ok(map),
            _ => Err(CloudInitError::Datasource(
                "meta_data.json is not a JSON object".into(),
            )),
        }
    }

    /// Named blob from the shared content directory
    pub async fn content(&self, name: &str) -> Result<Arc<CachedResponse>, CloudInitError> {
        self.get_cached(&resource_path(&[VERSIONS_PATH, "content", name]))
            .await
    }

    /// Parsed JSON document, `None` when missing or empty
    async fn optional_json(&self, path: &str) -> Result<Option<Value>, CloudInitError> {
        match self.get_cached(path).await {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some(serde_json::from_str(data.text())?)),
            Err(e) if e.is_missing() => {
                debug!("{} not found: {}", path, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn meta_value(&self, key: &str) -> Result<Option<String>, CloudInitError> {
        Ok(self
            .meta_data()
            .await?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn activate(&mut self) -> Result<bool, CloudInitError> {
        let version = match self.negotiate_version().await {
            Ok(version) => version,
            Err(e) if e.is_missing() => {
                warn!("No version listing at {}: {}", self.reader.locate(VERSIONS_PATH), e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.version = Some(version);

        match self.meta_data().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(
                    "Metadata not found at {}: {}",
                    self.reader.locate(&self.version_path("meta_data.json")),
                    e
                );
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl<R: MetadataReader> Datasource for OpenStackSource<R> {
    fn name(&self) -> &'static str {
        self.reader.name()
    }

    async fn load(&mut self) -> Result<bool, CloudInitError> {
        match self.reader.attach().await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) => {
                warn!("{} could not be attached: {}", self.reader.name(), e);
                return Ok(false);
            }
        }

        let loaded = self.activate().await;
        self.reader.detach().await;
        loaded
    }

    async fn instance_id(&self) -> Result<Option<String>, CloudInitError> {
        self.meta_value("uuid").await
    }

    async fn host_name(&self) -> Result<Option<String>, CloudInitError> {
        self.meta_value("hostname").await
    }

    async fn availability_zone(&self) -> Result<Option<String>, CloudInitError> {
        self.meta_value("availability_zone").await
    }

    async fn public_keys(&self) -> Result<Vec<String>, CloudInitError> {
        let meta = self.meta_data().await?;
        let keys = match meta.get("public_keys") {
            Some(Value::Object(keys)) => keys
                .values()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        Ok(keys)
    }

    async fn user_data(&self) -> Result<Option<Arc<CachedResponse>>, CloudInitError> {
        self.get_cached(&self.version_path("user_data"))
            .await
            .map(Some)
    }

    async fn vendor_data(&self) -> Result<Option<Arc<CachedResponse>>, CloudInitError> {
        self.get_cached(&self.version_path("vendor_data.json"))
            .await
            .map(Some)
    }

    async fn network_config(&self) -> Result<Option<NetworkConfig>, CloudInitError> {
        let network_data = self
            .optional_json(&self.version_path("network_data.json"))
            .await?;
        if let Some(data) = network_data {
            if is_complete_network_data(&data) {
                return Ok(Some(NetworkConfig::NetworkData(data)));
            }
            debug!("network_data.json is incomplete, looking for a content_path");
        }

        let meta = Value::Object(self.meta_data().await?);
        let pointer = match content_path(&meta) {
            Some(path) => Some(path.to_string()),
            None => self
                .optional_json(&self.version_path("vendor_data.json"))
                .await?
                .as_ref()
                .and_then(content_path)
                .map(str::to_string),
        };

        let Some(pointer) = pointer else {
            return Ok(None);
        };
        let Some(name) = Path::new(&pointer).file_name().and_then(|n| n.to_str()) else {
            return Err(CloudInitError::Datasource(format!(
                "invalid network config content_path {:?}",
                pointer
            )));
        };
        let blob = self.content(name).await?;
        Ok(Some(NetworkConfig::Legacy(blob.text().to_string())))
    }

    async fn admin_password(&self) -> Result<Option<String>, CloudInitError> {
        let meta = self.meta_data().await?;
        let nested = meta
            .get("meta")
            .and_then(|m| m.get("admin_pass"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty());
        let password = nested.or_else(|| meta.get("admin_pass").and_then(Value::as_str));
        Ok(password.map(str::to_string))
    }

    async fn post_password(&self, password: &str) -> Result<bool, CloudInitError> {
        if !self.reader.has_password_service() {
            return Ok(false);
        }

        let path = self.version_path("password");
        let result = exec_with_retry(&self.retry, self.clock.as_ref(), || {
            self.reader.write(&path, password.as_bytes())
        })
        .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.status_code() == Some(409) => {
                debug!("Password was already set: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn can_update_password(&self) -> bool {
        self.reader.has_password_service() && can_post_password(self.working_version())
    }

    async fn is_password_set(&self) -> Result<bool, CloudInitError> {
        if !self.reader.has_password_service() {
            return Ok(self.meta_data().await?.contains_key("admin_pass"));
        }

        // Not cached: posting a password changes this resource
        match self.reader.read(&self.version_path("password")).await {
            Ok(data) => Ok(!data.is_empty()),
            Err(e) if e.is_missing() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ManualClock;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory metadata tree
    #[derive(Default)]
    struct MemoryReader {
        files: HashMap<String, String>,
        present: bool,
        password_service: bool,
        write_status: Option<u16>,
        reads: Mutex<HashMap<String, usize>>,
        writes: AtomicUsize,
        detaches: AtomicUsize,
    }

    impl MemoryReader {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                present: true,
                ..Default::default()
            }
        }

        fn reads(&self, path: &str) -> usize {
            self.reads.lock().unwrap().get(path).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl MetadataReader for MemoryReader {
        fn name(&self) -> &'static str {
            "Memory"
        }

        fn locate(&self, path: &str) -> String {
            format!("memory://{}", path)
        }

        async fn attach(&self) -> Result<bool, CloudInitError> {
            Ok(self.present)
        }

        async fn detach(&self) {
            self.detaches.fetch_add(1, Ordering::SeqCst);
        }

        async fn read(&self, path: &str) -> Result<CachedResponse, CloudInitError> {
            *self.reads.lock().unwrap().entry(path.to_string()).or_default() += 1;
            self.files
                .get(path)
                .map(|body| CachedResponse::new(body.as_bytes()))
                .ok_or_else(|| CloudInitError::ResourceMissing(path.to_string()))
        }

        async fn write(&self, _path: &str, _data: &[u8]) -> Result<(), CloudInitError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            match self.write_status {
                None => Ok(()),
                Some(status) => Err(crate::error::UrlError::status(
                    format!("{} error", status),
                    status,
                    Default::default(),
                )
                .into()),
            }
        }

        fn has_password_service(&self) -> bool {
            self.password_service
        }
    }

    const META: &str = r#"{
        "uuid": "b0fa911b-69d4-4476-bbe2-1c92bff6535c",
        "hostname": "test.novalocal",
        "availability_zone": "nova",
        "public_keys": {"mykey": "ssh-rsa AAAA test@example"},
        "admin_pass": "top-secret",
        "meta": {"admin_pass": "nested-secret"}
    }"#;

    fn source(reader: MemoryReader) -> OpenStackSource<MemoryReader> {
        OpenStackSource::with_reader(
            reader,
            RetryPolicy::new(2, Duration::from_secs(1)),
            Arc::new(ManualClock::new()),
        )
    }

    fn havana(extra: &[(&str, &str)]) -> MemoryReader {
        let mut files = vec![
            ("openstack", "2012-08-10\n2013-04-04\n2013-10-17\nlatest\n"),
            ("openstack/2013-10-17/meta_data.json", META),
        ];
        files.extend_from_slice(extra);
        MemoryReader::new(&files)
    }

    #[test]
    fn test_version_validation() {
        assert!(is_valid_version("latest"));
        assert!(is_valid_version("2013-04-04"));
        assert!(!is_valid_version("  2004-11-20"));
        assert!(!is_valid_version("2013-4-4"));
        assert!(!is_valid_version("bogus"));
    }

    #[test]
    fn test_parse_version_listing() {
        let versions = parse_version_listing("\n2012-08-10\n\nlatest\n").unwrap();
        assert_eq!(versions, vec!["2012-08-10", "latest"]);

        assert!(matches!(
            parse_version_listing("2012-08-10\n  2004-11-20\n"),
            Err(CloudInitError::InvalidVersion(v)) if v == "  2004-11-20"
        ));
        assert!(matches!(
            parse_version_listing("\n\n"),
            Err(CloudInitError::NoVersionsFound)
        ));
    }

    #[test]
    fn test_select_version() {
        let available = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(select_version(&available(&["2012-08-10", "2013-04-04", "latest"])), GRIZZLY);
        assert_eq!(select_version(&available(&["2015-10-15", "2013-10-17"])), HAVANA);
        assert_eq!(select_version(&available(&["2009-04-04", "latest"])), LATEST);
    }

    #[test]
    fn test_can_post_password() {
        assert!(!can_post_password(FOLSOM));
        assert!(can_post_password(GRIZZLY));
        assert!(can_post_password(HAVANA));
        assert!(!can_post_password(LATEST));
    }

    #[test]
    fn test_resource_path() {
        assert_eq!(resource_path(&["openstack", "latest", "user_data"]), "openstack/latest/user_data");
        assert_eq!(resource_path(&["/openstack/", "content", "0000"]), "openstack/content/0000");
    }

    #[tokio::test]
    async fn test_load_negotiates_version() {
        let mut source = source(havana(&[]));

        assert!(source.load().await.unwrap());
        assert_eq!(source.version(), Some(HAVANA));
        assert_eq!(source.reader().detaches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_not_present() {
        let mut source = source(MemoryReader::default());

        assert!(!source.load().await.unwrap());
        assert_eq!(source.reader().reads("openstack"), 0);
        assert_eq!(source.reader().detaches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_invalid_version_is_an_error() {
        let mut source = source(MemoryReader::new(&[("openstack", "2013-10-17\nbogus\n")]));

        let result = source.load().await;
        assert!(matches!(result, Err(CloudInitError::InvalidVersion(_))));
        assert_eq!(source.reader().detaches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_without_metadata() {
        let mut source = source(MemoryReader::new(&[("openstack", "latest\n")]));

        assert!(!source.load().await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata_accessors_use_cache() {
        let mut source = source(havana(&[]));
        source.load().await.unwrap();

        assert_eq!(
            source.instance_id().await.unwrap().as_deref(),
            Some("b0fa911b-69d4-4476-bbe2-1c92bff6535c")
        );
        assert_eq!(source.host_name().await.unwrap().as_deref(), Some("test.novalocal"));
        assert_eq!(source.public_keys().await.unwrap(), vec!["ssh-rsa AAAA test@example"]);

        let metadata = source.metadata().await.unwrap();
        assert_eq!(metadata.availability_zone.as_deref(), Some("nova"));
        assert_eq!(metadata.cloud_name.as_deref(), Some("memory"));

        assert_eq!(source.reader().reads("openstack/2013-10-17/meta_data.json"), 1);
        assert_eq!(source.reader().reads("openstack"), 1);
    }

    #[tokio::test]
    async fn test_paths_use_latest_before_load() {
        let source = source(MemoryReader::new(&[("openstack/latest/user_data", "#!/bin/sh")]));

        let user_data = source.user_data().await.unwrap().unwrap();
        assert_eq!(user_data.text(), "#!/bin/sh");
    }

    #[tokio::test]
    async fn test_missing_user_data_is_an_error() {
        let mut source = source(havana(&[]));
        source.load().await.unwrap();

        let error = source.user_data().await.unwrap_err();
        assert!(error.is_missing());
    }

    #[tokio::test]
    async fn test_admin_password_prefers_nested_meta() {
        let mut source = source(havana(&[]));
        source.load().await.unwrap();

        assert_eq!(source.admin_password().await.unwrap().as_deref(), Some("nested-secret"));
    }

    #[tokio::test]
    async fn test_admin_password_top_level() {
        let mut source = source(MemoryReader::new(&[
            ("openstack", "latest"),
            ("openstack/latest/meta_data.json", r#"{"admin_pass": "top-secret"}"#),
        ]));
        source.load().await.unwrap();

        assert_eq!(source.admin_password().await.unwrap().as_deref(), Some("top-secret"));
    }

    #[tokio::test]
    async fn test_network_data_preferred() {
        let network_data = r#"{"links": [{"id": "tap1"}], "networks": [{"id": "net0"}], "services": [{"type": "dns"}]}"#;
        let mut source = source(havana(&[("openstack/2013-10-17/network_data.json", network_data)]));
        source.load().await.unwrap();

        match source.network_config().await.unwrap() {
            Some(NetworkConfig::NetworkData(data)) => assert_eq!(data["links"][0]["id"], "tap1"),
            other => panic!("unexpected network config: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_network_config_from_content_path() {
        let meta = r#"{"uuid": "1", "network_config": {"content_path": "/content/0000"}}"#;
        let mut source = source(MemoryReader::new(&[
            ("openstack", "latest"),
            ("openstack/latest/meta_data.json", meta),
            ("openstack/latest/network_data.json", r#"{"links": [], "networks": [], "services": []}"#),
            ("openstack/content/0000", "auto eth0\niface eth0 inet dhcp\n"),
        ]));
        source.load().await.unwrap();

        assert_eq!(
            source.network_config().await.unwrap(),
            Some(NetworkConfig::Legacy("auto eth0\niface eth0 inet dhcp\n".to_string()))
        );
    }

    #[tokio::test]
    async fn test_network_config_from_vendor_data() {
        let vendor = r#"{"network_config": {"content_path": "/content/0001"}}"#;
        let mut source = source(havana(&[
            ("openstack/2013-10-17/vendor_data.json", vendor),
            ("openstack/content/0001", "legacy"),
        ]));
        source.load().await.unwrap();

        assert_eq!(
            source.network_config().await.unwrap(),
            Some(NetworkConfig::Legacy("legacy".to_string()))
        );
    }

    #[tokio::test]
    async fn test_network_config_absent() {
        let mut source = source(havana(&[]));
        source.load().await.unwrap();

        assert_eq!(source.network_config().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_network_config_missing_blob_is_an_error() {
        let vendor = r#"{"network_config": {"content_path": "/content/0002"}}"#;
        let mut source = source(havana(&[("openstack/2013-10-17/vendor_data.json", vendor)]));
        source.load().await.unwrap();

        assert!(source.network_config().await.unwrap_err().is_missing());
    }

    #[tokio::test]
    async fn test_post_password() {
        let mut reader = havana(&[]);
        reader.password_service = true;
        let mut source = source(reader);
        source.load().await.unwrap();

        assert!(source.post_password("secret").await.unwrap());
        assert_eq!(source.reader().writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_password_conflict() {
        let mut reader = havana(&[]);
        reader.password_service = true;
        reader.write_status = Some(409);
        let mut source = source(reader);
        source.load().await.unwrap();

        assert!(!source.post_password("secret").await.unwrap());
    }

    #[tokio::test]
    async fn test_post_password_not_found_propagates() {
        let mut reader = havana(&[]);
        reader.password_service = true;
        reader.write_status = Some(404);
        let mut source = source(reader);
        source.load().await.unwrap();

        let error = source.post_password("secret").await.unwrap_err();
        assert_eq!(error.status_code(), Some(404));
        assert_eq!(source.reader().writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_password_server_error_is_retried() {
        let mut reader = havana(&[]);
        reader.password_service = true;
        reader.write_status = Some(500);
        let mut source = source(reader);
        source.load().await.unwrap();

        assert!(source.post_password("secret").await.is_err());
        assert_eq!(source.reader().writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_can_update_password_follows_version() {
        let mut reader = MemoryReader::new(&[
            ("openstack", "2012-08-10\n"),
            ("openstack/2012-08-10/meta_data.json", "{}"),
        ]);
        reader.password_service = true;
        let mut source = source(reader);

        assert!(!source.can_update_password());
        source.load().await.unwrap();
        assert!(!source.can_update_password());

        let mut reader = havana(&[]);
        reader.password_service = true;
        let mut source = self::source(reader);
        source.load().await.unwrap();
        assert!(source.can_update_password());
    }

    #[tokio::test]
    async fn test_is_password_set() {
        let mut reader = havana(&[("openstack/2013-10-17/password", "encrypted")]);
        reader.password_service = true;
        let mut source = source(reader);
        source.load().await.unwrap();

        assert!(source.is_password_set().await.unwrap());
        assert!(source.is_password_set().await.unwrap());
        assert_eq!(source.reader().reads("openstack/2013-10-17/password"), 2);
    }

    #[tokio::test]
    async fn test_is_password_set_without_password_service() {
        let mut source = source(havana(&[]));
        source.load().await.unwrap();

        assert!(source.is_password_set().await.unwrap());
        assert!(!source.post_password("secret").await.unwrap());
        assert!(!source.can_update_password());
    }
}
