//! Per-module context (`import.meta`-like).

use std::fmt;
use std::rc::Rc;

use futures_util::future::{self, FutureExt, LocalBoxFuture};

use crate::error::{InstantiationFailure, LoaderError, SharedError};
use crate::loader::WeakLoader;
use crate::namespace::Namespace;

/// Handed to `declare` so a module can resolve and import relative to itself
#[derive(Clone)]
pub struct ModuleContext {
    url: String,
    loader: WeakLoader,
}

impl ModuleContext {
    pub(crate) fn new(url: &str, loader: WeakLoader) -> Self {
        Self {
            url: url.to_string(),
            loader,
        }
    }

    /// Identifier of the module this context belongs to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolve `specifier` with this module as the referrer
    pub fn resolve(&self, specifier: &str) -> LocalBoxFuture<'static, Result<String, SharedError>> {
        let result = match self.loader.upgrade() {
            Some(loader) => loader.resolve(specifier, Some(&self.url)),
            None => Err(self.detached(specifier)),
        };
        future::ready(result).boxed_local()
    }

    /// Dynamically import `specifier` with this module as the referrer
    pub fn import(
        &self,
        specifier: &str,
    ) -> LocalBoxFuture<'static, Result<Namespace, SharedError>> {
        match self.loader.upgrade() {
            Some(loader) => loader.import(specifier, Some(&self.url)),
            None => future::ready(Err(self.detached(specifier))).boxed_local(),
        }
    }

    fn detached(&self, specifier: &str) -> SharedError {
        Rc::new(LoaderError::instantiation(
            specifier,
            Some(&self.url),
            InstantiationFailure::LoaderDropped,
        ))
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext").field("url", &self.url).finish()
    }
}
