use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{FinderConfig, QueryOptions};
use crate::handler::{Plugin, Source};
use crate::hooks::{Hook, Hooks};
use crate::pagination::{PaginationError, Query};
use crate::request::GenericRequest;

/// Registry of loaded sources and hooks, and the entry point for queries.
#[derive(Debug, Default)]
pub struct MediaFinder {
    sources: HashMap<String, Arc<Source>>,
    hooks: Hooks,
    config: FinderConfig,
}

impl MediaFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FinderConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Registers `source`, replacing any source with the same id.
    pub fn load_source(&mut self, source: Source) -> &mut Self {
        let id = source.id.clone();
        if self.sources.insert(id.clone(), Arc::new(source)).is_some() {
            if self.config.warn_on_source_overwrite {
                warn!("Overwriting existing source \"{}\"", id);
            }
        } else {
            debug!("Loaded source \"{}\"", id);
        }
        self
    }

    pub fn load_plugin(&mut self, plugin: Plugin) -> &mut Self {
        for source in plugin.sources {
            self.load_source(source);
        }
        self
    }

    pub fn get_source(&self, id: &str) -> Result<Arc<Source>, PaginationError> {
        self.sources
            .get(id)
            .cloned()
            .ok_or_else(|| PaginationError::UnknownSource(id.to_string()))
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<Source>> {
        self.sources.values()
    }

    pub fn register_hook(&mut self, name: impl Into<String>, hook: Arc<dyn Hook>) -> &mut Self {
        self.hooks.register(name, hook);
        self
    }

    /// Starts a query. The query sees the sources and hooks as they are now;
    /// later loads do not affect it.
    pub fn query(&self, request: GenericRequest, options: QueryOptions) -> Query {
        Query::new(
            Arc::new(self.sources.clone()),
            request,
            options,
            Arc::new(self.hooks.clone()),
        )
    }
}
