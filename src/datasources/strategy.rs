//! Search strategies over candidate datasources
//!
//! A strategy turns a stream of datasources into another stream. Strategies
//! are applied in order, each one consuming the output of the previous one,
//! and they stay lazy: a datasource is only loaded when a strategy actually
//! pulls it.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Datasource;

/// Lazily produced datasources
pub type Sources = Box<dyn Iterator<Item = Box<dyn Datasource>> + Send>;

/// A transformation of the candidate stream
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn search(&self, sources: Sources) -> Sources;
}

/// Load `source` and report whether it is usable.
///
/// Errors raised while loading are logged and count as "not available".
pub async fn is_available(source: &mut dyn Datasource) -> bool {
    match source.load().await {
        Ok(true) => true,
        Ok(false) => {
            debug!("Datasource {} is not available", source.name());
            false
        }
        Err(e) => {
            warn!("Failed to load datasource {}: {}", source.name(), e);
            false
        }
    }
}

/// Apply `strategies` left to right
pub async fn apply_strategies(mut sources: Sources, strategies: &[Box<dyn Strategy>]) -> Sources {
    for strategy in strategies {
        debug!("Applying search strategy {}", strategy.name());
        sources = strategy.search(sources).await;
    }
    sources
}

/// Keep only the datasources whose name is in the list
///
/// An empty list keeps everything.
#[derive(Debug, Clone, Default)]
pub struct FilterByName {
    names: Vec<String>,
}

impl FilterByName {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl Strategy for FilterByName {
    fn name(&self) -> &'static str {
        "FilterByName"
    }

    async fn search(&self, sources: Sources) -> Sources {
        if self.names.is_empty() {
            return sources;
        }
        let names = self.names.clone();
        Box::new(sources.filter(move |source| names.iter().any(|n| n == source.name())))
    }
}

/// Load candidates one at a time and yield the first available one
///
/// Candidates after the first available one are never loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialProbe;

#[async_trait]
impl Strategy for SerialProbe {
    fn name(&self) -> &'static str {
        "SerialProbe"
    }

    async fn search(&self, sources: Sources) -> Sources {
        for mut source in sources {
            if is_available(source.as_mut()).await {
                debug!("Datasource {} is available", source.name());
                return Box::new(std::iter::once(source));
            }
        }
        Box::new(std::iter::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasources::mock::MockDatasource;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mock(name: &'static str, available: bool) -> Box<dyn Datasource> {
        Box::new(MockDatasource::new().with_name(name).with_available(available))
    }

    fn sources(items: Vec<Box<dyn Datasource>>) -> Sources {
        Box::new(items.into_iter())
    }

    fn names(sources: Sources) -> Vec<&'static str> {
        sources.map(|s| s.name()).collect()
    }

    #[tokio::test]
    async fn test_filter_by_name() {
        let filter = FilterByName::new(vec!["b".to_string(), "c".to_string()]);
        let input = sources(vec![mock("a", true), mock("b", true), mock("c", false)]);

        assert_eq!(names(filter.search(input).await), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_filter_by_empty_names_keeps_everything() {
        let filter = FilterByName::default();
        let input = sources(vec![mock("a", true), mock("b", false)]);

        assert_eq!(names(filter.search(input).await), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_serial_probe_stops_at_first_available() {
        let first = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let input = sources(vec![
            Box::new(
                MockDatasource::new()
                    .with_name("a")
                    .with_available(false)
                    .with_load_counter(first.clone()),
            ),
            mock("b", true),
            Box::new(MockDatasource::new().with_name("c").with_load_counter(third.clone())),
        ]);

        assert_eq!(names(SerialProbe.search(input).await), vec!["b"]);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_serial_probe_treats_load_errors_as_unavailable() {
        let input = sources(vec![
            Box::new(MockDatasource::new().with_name("broken").with_load_error("bad version")),
            mock("good", true),
        ]);

        assert_eq!(names(SerialProbe.search(input).await), vec!["good"]);
    }

    #[tokio::test]
    async fn test_serial_probe_with_nothing_available() {
        let input = sources(vec![mock("a", false), mock("b", false)]);

        assert!(names(SerialProbe.search(input).await).is_empty());
    }

    #[tokio::test]
    async fn test_strategies_compose_in_order() {
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(FilterByName::new(vec!["b".to_string(), "c".to_string()])),
            Box::new(SerialProbe),
        ];
        let input = sources(vec![mock("a", true), mock("b", false), mock("c", true)]);

        let selected = apply_strategies(input, &strategies).await;
        assert_eq!(names(selected), vec!["c"]);
    }
}
