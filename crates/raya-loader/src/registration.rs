//! Registrations: what an instantiated module hands to the loader.
//!
//! A [`Registration`] is the ordered list of dependency specifiers plus a
//! `declare` factory. The loader calls `declare` once with an [`Exporter`]
//! and a [`ModuleContext`]; the returned [`Declaration`] carries one optional
//! setter per dependency and the module's execute step.

use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures_util::future::{FutureExt, LocalBoxFuture};

use crate::context::ModuleContext;
use crate::error::ModuleError;
use crate::namespace::Namespace;
use crate::record::LoadRecord;
use crate::value::Value;

/// Receives a dependency's namespace whenever its exports change
pub type Setter = Rc<dyn Fn(&Namespace)>;

/// The deferred part of a module body (top-level await)
pub type Completion = LocalBoxFuture<'static, Result<(), ModuleError>>;

/// A module body
pub type ExecuteFn = Box<dyn FnOnce() -> Result<Execution, ModuleError>>;

/// The `declare` factory of a registration
pub type DeclareFn = Box<dyn FnOnce(Exporter, ModuleContext) -> Declaration>;

/// Result of running a module body
pub enum Execution {
    /// The body ran to completion synchronously
    Complete,
    /// The body suspended; the module is done when the completion resolves
    Pending(Completion),
}

impl Execution {
    /// Wrap an async tail of a module body
    pub fn pending<F>(completion: F) -> Self
    where
        F: Future<Output = Result<(), ModuleError>> + 'static,
    {
        Execution::Pending(completion.boxed_local())
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Execution::Complete => write!(f, "Complete"),
            Execution::Pending(_) => write!(f, "Pending"),
        }
    }
}

/// What `declare` returns
#[derive(Default)]
pub struct Declaration {
    /// One entry per dependency specifier, in order
    pub setters: Vec<Option<Setter>>,
    /// The module body; `None` behaves like an empty body
    pub execute: Option<ExecuteFn>,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a setter for the next dependency
    pub fn with_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Namespace) + 'static,
    {
        self.setters.push(Some(Rc::new(setter)));
        self
    }

    /// Skip the next dependency (imported for side effects only)
    pub fn without_setter(mut self) -> Self {
        self.setters.push(None);
        self
    }

    /// Set the module body
    pub fn with_execute<F>(mut self, execute: F) -> Self
    where
        F: FnOnce() -> Result<Execution, ModuleError> + 'static,
    {
        self.execute = Some(Box::new(execute));
        self
    }
}

/// Dependency specifiers plus the factory declaring the module
pub struct Registration {
    dependencies: Vec<String>,
    declare: DeclareFn,
}

impl Registration {
    pub fn new<I, S, F>(dependencies: I, declare: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Exporter, ModuleContext) -> Declaration + 'static,
    {
        Self {
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            declare: Box::new(declare),
        }
    }

    /// A registration for a namespace synthesized from host values: no
    /// dependencies, every binding published during `declare`, no body.
    pub fn from_bindings<K, I>(bindings: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let bindings: Vec<(String, Value)> =
            bindings.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::new(Vec::<String>::new(), move |exports: Exporter, _ctx| {
            exports.export_all(bindings);
            Declaration::new()
        })
    }

    /// Dependency specifiers, in declaration order
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub(crate) fn declare(
        self,
        exporter: Exporter,
        context: ModuleContext,
    ) -> (Vec<String>, Declaration) {
        let declaration = (self.declare)(exporter, context);
        (self.dependencies, declaration)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// The export function handed to `declare`.
///
/// Every call that changes a binding pushes the namespace to all importers.
#[derive(Clone)]
pub struct Exporter {
    record: Weak<LoadRecord>,
}

impl Exporter {
    pub(crate) fn new(record: &Rc<LoadRecord>) -> Self {
        Self {
            record: Rc::downgrade(record),
        }
    }

    /// Bind one export, returning the value
    pub fn export(&self, name: &str, value: impl Into<Value>) -> Value {
        let value = value.into();
        if let Some(record) = self.record.upgrade() {
            record.export(name, value.clone());
        }
        value
    }

    /// Bind several exports at once
    pub fn export_all<K, I>(&self, bindings: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        if let Some(record) = self.record.upgrade() {
            record.export_batch(bindings);
        }
    }

    /// The namespace being populated
    pub fn namespace(&self) -> Option<Namespace> {
        self.record.upgrade().map(|record| record.namespace.clone())
    }
}
