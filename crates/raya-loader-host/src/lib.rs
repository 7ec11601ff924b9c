//! Host layer for the Raya module loader
//!
//! Provides the pieces a host plugs into [`raya_loader::Loader`]:
//! - [`HostResolver`]: import maps, intrinsics and the global object
//! - [`HostInstantiator`]: fetch through a [`SourceProvider`], evaluate
//!   scripts through an [`Evaluator`], load JSON documents
//! - [`HostConfig`]: TOML configuration
//!
//! ```ignore
//! let config = HostConfig::from_file(Path::new("loader.toml"))?;
//! let host = HostBuilder::new(config, evaluator).build()?;
//! let ns = host.import("./main.js").await?;
//! ```

mod config;
mod evaluator;
mod import_map;
mod instantiator;
mod intrinsics;
mod resolver;
mod source;

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use raya_loader::{LoadEvent, Loader, Namespace, SharedError};
use url::Url;

pub use config::{ConfigError, HostConfig};
pub use evaluator::Evaluator;
pub use import_map::{ImportMap, ImportMapDocument, Packages};
pub use instantiator::{is_javascript, json_to_value, HostInstantiator};
pub use intrinsics::IntrinsicTable;
pub use resolver::{HostResolver, ModuleKind, GLOBAL_IDENTIFIER};
pub use source::{
    content_type_for, FetchError, FetchResponse, FileSource, MemorySource, SourceProvider,
    TimeoutSource,
};

type LoadObserver = Box<dyn Fn(&LoadEvent)>;

/// Builder for [`Host`]
pub struct HostBuilder {
    config: HostConfig,
    evaluator: Rc<dyn Evaluator>,
    source: Option<Rc<dyn SourceProvider>>,
    intrinsics: IntrinsicTable,
    on_load: Option<LoadObserver>,
}

impl HostBuilder {
    pub fn new<E>(config: HostConfig, evaluator: E) -> Self
    where
        E: Evaluator + 'static,
    {
        Self {
            config,
            evaluator: Rc::new(evaluator),
            source: None,
            intrinsics: IntrinsicTable::with_std(),
            on_load: None,
        }
    }

    /// Fetch sources from `source` instead of the file system
    pub fn with_source<S>(mut self, source: S) -> Self
    where
        S: SourceProvider + 'static,
    {
        self.source = Some(Rc::new(source));
        self
    }

    /// Replace the intrinsic table
    pub fn with_intrinsics(mut self, intrinsics: IntrinsicTable) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    /// Observe records reaching a terminal state
    pub fn with_on_load<F>(mut self, observer: F) -> Self
    where
        F: Fn(&LoadEvent) + 'static,
    {
        self.on_load = Some(Box::new(observer));
        self
    }

    pub fn build(self) -> Result<Host, ConfigError> {
        let base_url = self.config.base_url()?;
        let import_map = self.config.import_map()?;
        let resolver = HostResolver::new(base_url, import_map, self.intrinsics)
            .with_global_identifier(&self.config.global_identifier);

        let source: Rc<dyn SourceProvider> = match (self.source, self.config.fetch_timeout()) {
            (Some(source), Some(timeout)) => Rc::new(TimeoutSource::new(source, timeout)),
            (Some(source), None) => source,
            (None, Some(timeout)) => Rc::new(TimeoutSource::new(FileSource::new(), timeout)),
            (None, None) => Rc::new(FileSource::new()),
        };
        let instantiator = HostInstantiator::new(resolver.clone(), source, self.evaluator)
            .with_json_modules(self.config.json_modules);

        let mut builder = Loader::builder(resolver.clone(), instantiator);
        if let Some(observer) = self.on_load {
            builder = builder.with_on_load(observer);
        }
        Ok(Host {
            loader: builder.build(),
            resolver,
        })
    }
}

/// A loader wired to the host resolver and instantiator
#[derive(Clone)]
pub struct Host {
    loader: Loader,
    resolver: HostResolver,
}

impl Host {
    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn resolver(&self) -> &HostResolver {
        &self.resolver
    }

    /// Import a module relative to the base URL
    pub fn import(
        &self,
        specifier: &str,
    ) -> LocalBoxFuture<'static, Result<Namespace, SharedError>> {
        self.loader.import(specifier, None)
    }

    /// Compose another import map onto the current one
    pub fn add_import_map(&self, content: &str, base: &Url) -> Result<(), ConfigError> {
        self.resolver.extend_import_map(content, base)
    }
}
