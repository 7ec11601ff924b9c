//! Shared fixtures: an in-memory module table acting as resolver and
//! instantiator.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures_util::future::{FutureExt, LocalBoxFuture};
use raya_loader::{
    Declaration, Execution, Exporter, InstantiationFailure, Instantiator, LoadEvent, Loader,
    LoaderError, Namespace, Registration, Resolver, Value,
};

/// Ordered log of what modules did
pub type Trace = Rc<RefCell<Vec<String>>>;

type Factory = Rc<dyn Fn() -> Result<Registration, LoaderError>>;

#[derive(Default)]
struct Table {
    factories: RefCell<HashMap<String, Factory>>,
    calls: RefCell<HashMap<String, usize>>,
    trace: Trace,
}

/// Module table. Specifiers are identifiers; a specifier starting with
/// `unresolved:` fails to resolve.
#[derive(Clone, Default)]
pub struct TestHost {
    table: Rc<Table>,
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

impl TestHost {
    pub fn new() -> Self {
        init_logging();
        Self::default()
    }

    /// Register a module factory under `id`
    pub fn define<F>(&self, id: &str, factory: F)
    where
        F: Fn() -> Registration + 'static,
    {
        self.table
            .factories
            .borrow_mut()
            .insert(id.to_string(), Rc::new(move || Ok(factory())));
    }

    /// A module whose instantiation fails
    pub fn define_failing(&self, id: &str, message: &str) {
        let id_owned = id.to_string();
        let message = message.to_string();
        self.table.factories.borrow_mut().insert(
            id.to_string(),
            Rc::new(move || {
                Err(LoaderError::instantiation(
                    &id_owned,
                    None,
                    InstantiationFailure::Io(message.clone()),
                ))
            }),
        );
    }

    /// A module with dependencies (no setters) that logs its id when it
    /// runs and exports `bindings` from its body
    pub fn define_plain(
        &self,
        id: &str,
        dependencies: &[&str],
        bindings: Vec<(&'static str, Value)>,
    ) {
        let trace = self.trace();
        let deps: Vec<String> = dependencies.iter().map(|d| d.to_string()).collect();
        let id_owned = id.to_string();
        self.define(id, move || {
            let trace = trace.clone();
            let id = id_owned.clone();
            let bindings = bindings.clone();
            Registration::new(deps.clone(), move |exports: Exporter, _ctx| {
                // Missing setter slots behave like side-effect imports
                Declaration::new().with_execute(move || {
                    trace.borrow_mut().push(id);
                    exports.export_all(bindings);
                    Ok(Execution::Complete)
                })
            })
        });
    }

    pub fn calls(&self, id: &str) -> usize {
        self.table.calls.borrow().get(id).copied().unwrap_or(0)
    }

    pub fn trace(&self) -> Trace {
        self.table.trace.clone()
    }

    pub fn traced(&self) -> Vec<String> {
        self.table.trace.borrow().clone()
    }

    pub fn loader(&self) -> Loader {
        Loader::new(self.clone(), self.clone())
    }

    /// Loader that records every load event
    pub fn observed_loader(&self) -> (Loader, Rc<RefCell<Vec<LoadEvent>>>) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let loader = Loader::builder(self.clone(), self.clone())
            .with_on_load(move |event| sink.borrow_mut().push(event.clone()))
            .build();
        (loader, events)
    }
}

impl Resolver for TestHost {
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> Result<String, LoaderError> {
        if specifier.starts_with("unresolved:") {
            return Err(LoaderError::unresolved(specifier, referrer));
        }
        Ok(specifier.to_string())
    }
}

impl Instantiator for TestHost {
    fn instantiate(
        &self,
        id: &str,
        referrer: Option<&str>,
        _loader: &Loader,
    ) -> LocalBoxFuture<'static, Result<Registration, LoaderError>> {
        *self.table.calls.borrow_mut().entry(id.to_string()).or_insert(0) += 1;
        let factory = self.table.factories.borrow().get(id).cloned();
        let id = id.to_string();
        let referrer = referrer.map(str::to_string);
        async move {
            // Instantiation is never synchronous in a real host
            tokio::task::yield_now().await;
            match factory {
                Some(factory) => factory(),
                None => Err(LoaderError::instantiation(
                    &id,
                    referrer.as_deref(),
                    InstantiationFailure::Fetch {
                        status: 404,
                        status_text: "Not Found".to_string(),
                    },
                )),
            }
        }
        .boxed_local()
    }
}

/// A setter slot that remembers the last namespace pushed to it
#[derive(Clone, Default)]
pub struct Captured(Rc<RefCell<Option<Namespace>>>);

impl Captured {
    pub fn setter(&self) -> impl Fn(&Namespace) + 'static {
        let slot = self.0.clone();
        move |ns: &Namespace| *slot.borrow_mut() = Some(ns.clone())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().as_ref().and_then(|ns| ns.get(name))
    }

    pub fn namespace(&self) -> Option<Namespace> {
        self.0.borrow().clone()
    }
}
