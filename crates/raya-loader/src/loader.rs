//! The loader façade: registry, `import`, and the registration hook.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::context::ModuleContext;
use crate::error::{LoaderError, SharedError};
use crate::executor;
use crate::host::{Instantiator, Resolver};
use crate::linker;
use crate::namespace::Namespace;
use crate::record::{LoadPhase, LoadRecord};
use crate::registration::{Declaration, Exporter, Registration};
use crate::value::Value;

/// Reported once per record when it reaches a terminal state
#[derive(Debug, Clone)]
pub struct LoadEvent {
    /// Identifier of the record
    pub id: String,
    /// The error the record failed with, `None` on success
    pub error: Option<SharedError>,
    /// Identifiers of the linked dependencies (empty if linking never
    /// finished)
    pub dependencies: Vec<String>,
    /// Whether this record is where the error originated, as opposed to
    /// inheriting it from a dependency
    pub is_error_source: bool,
}

type LoadObserver = Box<dyn Fn(&LoadEvent)>;

pub(crate) struct LoaderInner {
    resolver: Box<dyn Resolver>,
    pub(crate) instantiator: Box<dyn Instantiator>,
    registry: RefCell<FxHashMap<String, Rc<LoadRecord>>>,
    registrations: RefCell<Vec<Option<Registration>>>,
    on_load: Option<LoadObserver>,
}

/// Module loader.
///
/// Owns the registry of load records (one per resolved identifier, for the
/// loader's lifetime) and drives instantiation, linking and execution.
/// `Loader` is a cheap handle: clones share the same registry.
#[derive(Clone)]
pub struct Loader {
    pub(crate) inner: Rc<LoaderInner>,
}

/// Non-owning loader handle, for futures and contexts that must not keep the
/// registry alive
#[derive(Clone)]
pub struct WeakLoader(Weak<LoaderInner>);

impl WeakLoader {
    pub fn upgrade(&self) -> Option<Loader> {
        self.0.upgrade().map(|inner| Loader { inner })
    }
}

/// Builder for [`Loader`]
pub struct LoaderBuilder {
    resolver: Box<dyn Resolver>,
    instantiator: Box<dyn Instantiator>,
    on_load: Option<LoadObserver>,
}

impl LoaderBuilder {
    /// Observe records reaching a terminal state
    pub fn with_on_load<F>(mut self, observer: F) -> Self
    where
        F: Fn(&LoadEvent) + 'static,
    {
        self.on_load = Some(Box::new(observer));
        self
    }

    pub fn build(self) -> Loader {
        Loader {
            inner: Rc::new(LoaderInner {
                resolver: self.resolver,
                instantiator: self.instantiator,
                registry: RefCell::new(FxHashMap::default()),
                registrations: RefCell::new(Vec::new()),
                on_load: self.on_load,
            }),
        }
    }
}

impl Loader {
    /// Create a loader from a resolver and an instantiator
    pub fn new<R, I>(resolver: R, instantiator: I) -> Self
    where
        R: Resolver + 'static,
        I: Instantiator + 'static,
    {
        Self::builder(resolver, instantiator).build()
    }

    pub fn builder<R, I>(resolver: R, instantiator: I) -> LoaderBuilder
    where
        R: Resolver + 'static,
        I: Instantiator + 'static,
    {
        LoaderBuilder {
            resolver: Box::new(resolver),
            instantiator: Box::new(instantiator),
            on_load: None,
        }
    }

    /// Resolve a specifier as the loader would for `import`
    pub fn resolve(&self, specifier: &str, referrer: Option<&str>) -> Result<String, SharedError> {
        self.inner
            .resolver
            .resolve(specifier, referrer)
            .map_err(Rc::new)
    }

    /// Import a module and everything it depends on.
    ///
    /// Resolves to the module's namespace once its whole graph has executed.
    /// Concurrent imports of the same identifier share one load; a record
    /// that failed rejects every later import with the same error.
    pub fn import(
        &self,
        specifier: &str,
        referrer: Option<&str>,
    ) -> LocalBoxFuture<'static, Result<Namespace, SharedError>> {
        let loader = self.clone();
        let specifier = specifier.to_string();
        let referrer = referrer.map(str::to_string);
        async move {
            let id = loader.resolve(&specifier, referrer.as_deref())?;
            let record = loader.get_or_create(&id, referrer.as_deref());
            loader.top_level_load(&record).await
        }
        .boxed_local()
    }

    /// Context for a module: its identifier plus resolve/import relative to it
    pub fn create_context(&self, id: &str) -> ModuleContext {
        ModuleContext::new(id, self.downgrade())
    }

    /// Hand a registration to the innermost open [`RegistrationScope`].
    ///
    /// Fails with [`LoaderError::ReentrantRegistration`] when no
    /// instantiation is waiting for one.
    pub fn register<I, S, F>(&self, dependencies: I, declare: F) -> Result<(), LoaderError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Exporter, ModuleContext) -> Declaration + 'static,
    {
        let mut registrations = self.inner.registrations.borrow_mut();
        match registrations.last_mut() {
            Some(slot) => {
                if slot.is_some() {
                    debug!("module registered twice during one evaluation; keeping the last");
                }
                *slot = Some(Registration::new(dependencies, declare));
                Ok(())
            }
            None => Err(LoaderError::ReentrantRegistration),
        }
    }

    /// Open a scope collecting the next [`Loader::register`] call
    pub fn registration_scope(&self) -> RegistrationScope {
        let mut registrations = self.inner.registrations.borrow_mut();
        registrations.push(None);
        RegistrationScope {
            loader: self.clone(),
            depth: registrations.len(),
            closed: false,
        }
    }

    /// Namespace of an evaluated module
    pub fn get(&self, id: &str) -> Option<Namespace> {
        self.record(id)
            .filter(|record| record.phase() == LoadPhase::Evaluated)
            .map(|record| record.namespace.clone())
    }

    /// Whether an evaluated module is registered under `id`
    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Install an already-available namespace under `id`.
    ///
    /// If `id` is already registered the bindings are published through the
    /// normal export path, so importers observe them.
    pub fn set<K, I>(&self, id: &str, bindings: I) -> Namespace
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let record = match self.record(id) {
            Some(record) => record,
            None => {
                let record = LoadRecord::evaluated(id);
                self.inner
                    .registry
                    .borrow_mut()
                    .insert(id.to_string(), record.clone());
                debug!("installed namespace {}", id);
                record
            }
        };
        record.export_batch(bindings);
        record.namespace.clone()
    }

    /// Every evaluated module, sorted by identifier
    pub fn entries(&self) -> Vec<(String, Namespace)> {
        let mut entries: Vec<(String, Namespace)> = self
            .inner
            .registry
            .borrow()
            .values()
            .filter(|record| record.phase() == LoadPhase::Evaluated)
            .map(|record| (record.id.clone(), record.namespace.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Lifecycle phase of a registered identifier
    pub fn phase(&self, id: &str) -> Option<LoadPhase> {
        self.record(id).map(|record| record.phase())
    }

    /// Number of load records in the registry
    pub fn len(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.borrow().is_empty()
    }

    /// Resolver call keeping the error unshared, so linking can wrap it
    pub(crate) fn resolve_unshared(
        &self,
        specifier: &str,
        referrer: &str,
    ) -> Result<String, LoaderError> {
        self.inner.resolver.resolve(specifier, Some(referrer))
    }

    pub fn downgrade(&self) -> WeakLoader {
        WeakLoader(Rc::downgrade(&self.inner))
    }

    pub(crate) fn record(&self, id: &str) -> Option<Rc<LoadRecord>> {
        self.inner.registry.borrow().get(id).cloned()
    }

    /// The only place records are created. The instantiate and link phases
    /// are memoized on the record immediately, before any await.
    pub(crate) fn get_or_create(&self, id: &str, referrer: Option<&str>) -> Rc<LoadRecord> {
        if let Some(record) = self.record(id) {
            return record;
        }
        let record = LoadRecord::new(id, referrer);
        self.inner
            .registry
            .borrow_mut()
            .insert(id.to_string(), record.clone());

        let instantiated = linker::instantiate(self.downgrade(), Rc::downgrade(&record))
            .boxed_local()
            .shared();
        let linked = linker::link(self.downgrade(), Rc::downgrade(&record), instantiated.clone())
            .boxed_local()
            .shared();
        record.set_outcomes(instantiated, linked);
        debug!("created load record {}", id);
        record
    }

    fn top_level_load(
        &self,
        record: &Rc<LoadRecord>,
    ) -> LocalBoxFuture<'static, Result<Namespace, SharedError>> {
        if let Some(error) = record.error() {
            return future::ready(Err(error)).boxed_local();
        }
        if record.phase() == LoadPhase::Evaluated {
            return future::ready(Ok(record.namespace.clone())).boxed_local();
        }
        let completion = match record.completion() {
            Some(completion) => completion,
            None => {
                let completion = executor::top_level_load(
                    self.downgrade(),
                    Rc::downgrade(record),
                    record.id.clone(),
                )
                .boxed_local()
                .shared();
                record.set_completion(completion.clone());
                completion
            }
        };
        let keep_alive = self.clone();
        async move {
            let result = completion.await;
            drop(keep_alive);
            result
        }
        .boxed_local()
    }

    /// Attach `error` to `record` and report it, unless the record already
    /// settled
    pub(crate) fn record_failed(
        &self,
        record: &LoadRecord,
        error: SharedError,
        is_error_source: bool,
    ) {
        if record.fail(error.clone()) {
            warn!("{} failed: {}", record.id, error);
            self.emit(LoadEvent {
                id: record.id.clone(),
                error: Some(error),
                dependencies: record.dependency_ids(),
                is_error_source,
            });
        }
    }

    pub(crate) fn record_evaluated(&self, record: &LoadRecord) {
        record.complete();
        debug!("evaluated {}", record.id);
        self.emit(LoadEvent {
            id: record.id.clone(),
            error: None,
            dependencies: record.dependency_ids(),
            is_error_source: false,
        });
    }

    fn emit(&self, event: LoadEvent) {
        if let Some(observer) = &self.inner.on_load {
            observer(&event);
        }
    }

    fn close_registration_scope(&self, depth: usize) -> Option<Registration> {
        let mut registrations = self.inner.registrations.borrow_mut();
        if registrations.len() < depth {
            return None;
        }
        registrations.truncate(depth);
        registrations.pop().flatten()
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader").field("records", &self.len()).finish()
    }
}

/// Collects the registration produced while evaluating one module.
///
/// Scopes nest; [`Loader::register`] always fills the innermost one. Dropping
/// a scope without calling [`RegistrationScope::finish`] discards it.
pub struct RegistrationScope {
    loader: Loader,
    depth: usize,
    closed: bool,
}

impl RegistrationScope {
    /// Close the scope and take the registration, if one arrived
    pub fn finish(mut self) -> Option<Registration> {
        self.closed = true;
        self.loader.close_registration_scope(self.depth)
    }
}

impl Drop for RegistrationScope {
    fn drop(&mut self) {
        if !self.closed {
            self.loader.close_registration_scope(self.depth);
        }
    }
}
