//! Datasource registry and loader
//!
//! The registry knows how to build every datasource this crate ships; the
//! loader instantiates them, runs the configured search strategies and
//! hands back the winner.

use tracing::{debug, info, warn};

use super::strategy::{FilterByName, Sources, Strategy, apply_strategies};
use super::{ConfigDrive, Datasource, OpenStack, SourceContext};
use crate::CloudInitError;

type Build = Box<dyn Fn() -> Result<Box<dyn Datasource>, CloudInitError> + Send + Sync>;

/// A named datasource constructor
pub struct Candidate {
    name: &'static str,
    build: Build,
}

impl Candidate {
    pub fn new<F>(name: &'static str, build: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Datasource>, CloudInitError> + Send + Sync + 'static,
    {
        Self {
            name,
            build: Box::new(build),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Build a fresh datasource instance
    pub fn instantiate(&self) -> Result<Box<dyn Datasource>, CloudInitError> {
        (self.build)()
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate").field("name", &self.name).finish()
    }
}

/// Provides the datasource constructors to consider, in priority order
pub trait CandidateLister: Send + Sync {
    fn candidates(&self) -> &[Candidate];
}

/// Ordered collection of datasource constructors
#[derive(Debug, Default)]
pub struct DatasourceRegistry {
    candidates: Vec<Candidate>,
}

impl DatasourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin datasources
    ///
    /// The config drive comes first: it needs no network.
    pub fn builtin(ctx: &SourceContext) -> Self {
        let mut registry = Self::new();

        let drive_ctx = ctx.clone();
        registry.register(Candidate::new("ConfigDrive", move || {
            Ok(Box::new(ConfigDrive::from_context(&drive_ctx)?) as Box<dyn Datasource>)
        }));

        let http_ctx = ctx.clone();
        registry.register(Candidate::new("OpenStack", move || {
            Ok(Box::new(OpenStack::from_context(&http_ctx)?) as Box<dyn Datasource>)
        }));

        registry
    }

    pub fn register(&mut self, candidate: Candidate) {
        debug!("Registered datasource {}", candidate.name());
        self.candidates.push(candidate);
    }

    pub fn registered(&self) -> Vec<&'static str> {
        self.candidates.iter().map(Candidate::name).collect()
    }
}

impl CandidateLister for DatasourceRegistry {
    fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }
}

/// Runs a name filter and search strategies over the listed candidates
pub struct DataSourceLoader<'a> {
    names: Vec<String>,
    lister: &'a dyn CandidateLister,
    strategies: Vec<Box<dyn Strategy>>,
}

impl<'a> DataSourceLoader<'a> {
    pub fn new(
        names: Vec<String>,
        lister: &'a dyn CandidateLister,
        strategies: Vec<Box<dyn Strategy>>,
    ) -> Self {
        Self {
            names,
            lister,
            strategies,
        }
    }

    /// Instantiate every listed candidate
    ///
    /// Candidates that fail to build are logged and skipped.
    pub fn all_data_sources(&self) -> Sources {
        let mut sources: Vec<Box<dyn Datasource>> = Vec::new();
        for candidate in self.lister.candidates() {
            match candidate.instantiate() {
                Ok(source) => sources.push(source),
                Err(e) => warn!("Could not create datasource {}: {}", candidate.name(), e),
            }
        }
        Box::new(sources.into_iter())
    }

    /// Datasources left after the name filter and every strategy
    pub async fn valid_data_sources(&self) -> Sources {
        let filtered = FilterByName::new(self.names.clone())
            .search(self.all_data_sources())
            .await;
        apply_strategies(filtered, &self.strategies).await
    }
}

/// First datasource that survives the filter and `strategies`
pub async fn get_data_source(
    names: Vec<String>,
    lister: &dyn CandidateLister,
    strategies: Vec<Box<dyn Strategy>>,
) -> Result<Box<dyn Datasource>, CloudInitError> {
    let loader = DataSourceLoader::new(names, lister, strategies);
    let mut sources = loader.valid_data_sources().await;
    match sources.next() {
        Some(source) => {
            info!("Using datasource {}", source.name());
            Ok(source)
        }
        None => Err(CloudInitError::NoDatasource),
    }
}
