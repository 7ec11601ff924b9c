//! Per-module load state.
//!
//! A [`LoadRecord`] exists once per resolved identifier and is shared by every
//! importer of that identifier. All fields are behind `RefCell`/`Cell`: the
//! loader is single threaded and re-entrancy only comes from interleaved
//! awaits, so no borrow is ever held across a call into module code.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures_util::future::{LocalBoxFuture, Shared};
use log::trace;

use crate::error::SharedError;
use crate::namespace::Namespace;
use crate::registration::{Declaration, ExecuteFn, Execution, Setter};
use crate::value::Value;

/// A memoized asynchronous phase of a record
pub(crate) type Outcome = Shared<LocalBoxFuture<'static, Result<(), SharedError>>>;

/// A memoized top-level load resolving to the record's namespace
pub(crate) type NamespaceOutcome = Shared<LocalBoxFuture<'static, Result<Namespace, SharedError>>>;

/// Lifecycle of a load record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// The instantiator has been (or is about to be) asked for a registration
    Instantiating,
    /// The registration was declared; dependencies are not linked yet
    Instantiated,
    /// Every dependency record exists and setters are wired
    Linked,
    /// The post-order walk reached the record; its body runs or waits on
    /// dependencies
    Evaluating,
    /// The body completed and the namespace is ready
    Evaluated,
    /// A terminal error is attached
    Failed,
}

/// A live-binding edge from an imported record back to one setter slot of
/// its importer.
///
/// The importer owns the setter; the imported record only keeps this
/// non-owning reference to it.
#[derive(Clone)]
pub(crate) struct Subscription {
    importer: Weak<LoadRecord>,
    slot: usize,
}

impl Subscription {
    pub(crate) fn new(importer: &Rc<LoadRecord>, slot: usize) -> Self {
        Self {
            importer: Rc::downgrade(importer),
            slot,
        }
    }

    /// Push a namespace to the subscribed setter, if the importer is alive
    pub(crate) fn notify(&self, namespace: &Namespace) {
        if let Some(importer) = self.importer.upgrade() {
            if let Some(setter) = importer.setter(self.slot) {
                trace!(
                    "binding update {} -> {}[{}]",
                    namespace.id(),
                    importer.id,
                    self.slot
                );
                setter(namespace);
            }
        }
    }
}

pub(crate) struct LoadRecord {
    pub(crate) id: String,
    pub(crate) namespace: Namespace,
    referrer: Option<String>,
    state: RefCell<LoadState>,
    setters: RefCell<Vec<Option<Setter>>>,
    importer_setters: RefCell<Vec<Subscription>>,
}

struct LoadState {
    phase: LoadPhase,
    dependency_specifiers: Vec<String>,
    dependency_loads: Option<Vec<Rc<LoadRecord>>>,
    execute: Option<ExecuteFn>,
    hoisted_exports: bool,
    error: Option<SharedError>,
    instantiate: Option<Outcome>,
    link: Option<Outcome>,
    evaluation: Option<Outcome>,
    completion: Option<NamespaceOutcome>,
}

impl LoadRecord {
    /// A record about to be instantiated
    pub(crate) fn new(id: &str, referrer: Option<&str>) -> Rc<Self> {
        Rc::new(Self {
            id: id.to_string(),
            namespace: Namespace::new(id),
            referrer: referrer.map(str::to_string),
            state: RefCell::new(LoadState {
                phase: LoadPhase::Instantiating,
                dependency_specifiers: Vec::new(),
                dependency_loads: None,
                execute: None,
                hoisted_exports: false,
                error: None,
                instantiate: None,
                link: None,
                evaluation: None,
                completion: None,
            }),
            setters: RefCell::new(Vec::new()),
            importer_setters: RefCell::new(Vec::new()),
        })
    }

    /// A record whose namespace is already available: nothing to
    /// instantiate, link or execute
    pub(crate) fn evaluated(id: &str) -> Rc<Self> {
        let record = Self::new(id, None);
        {
            let mut state = record.state.borrow_mut();
            state.phase = LoadPhase::Evaluated;
            state.dependency_loads = Some(Vec::new());
        }
        record.namespace.mark_ready();
        record
    }

    pub(crate) fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    pub(crate) fn phase(&self) -> LoadPhase {
        self.state.borrow().phase
    }

    pub(crate) fn error(&self) -> Option<SharedError> {
        self.state.borrow().error.clone()
    }

    pub(crate) fn has_hoisted_exports(&self) -> bool {
        self.state.borrow().hoisted_exports
    }

    pub(crate) fn set_outcomes(&self, instantiate: Outcome, link: Outcome) {
        let mut state = self.state.borrow_mut();
        state.instantiate = Some(instantiate);
        state.link = Some(link);
    }

    pub(crate) fn pending_instantiation(&self) -> Option<Outcome> {
        self.state.borrow().instantiate.clone()
    }

    pub(crate) fn pending_link(&self) -> Option<Outcome> {
        self.state.borrow().link.clone()
    }

    pub(crate) fn pending_evaluation(&self) -> Option<Outcome> {
        self.state.borrow().evaluation.clone()
    }

    pub(crate) fn set_pending_evaluation(&self, outcome: Outcome) {
        self.state.borrow_mut().evaluation = Some(outcome);
    }

    pub(crate) fn completion(&self) -> Option<NamespaceOutcome> {
        self.state.borrow().completion.clone()
    }

    pub(crate) fn set_completion(&self, outcome: NamespaceOutcome) {
        self.state.borrow_mut().completion = Some(outcome);
    }

    pub(crate) fn clear_completion(&self) {
        self.state.borrow_mut().completion = None;
    }

    /// Store what `declare` produced. A declaration without an execute step
    /// still gets an empty one so the record goes through evaluation.
    pub(crate) fn declared(&self, dependencies: Vec<String>, declaration: Declaration) {
        let Declaration { setters, execute } = declaration;
        *self.setters.borrow_mut() = setters;
        let empty: ExecuteFn = Box::new(|| Ok(Execution::Complete));
        let mut state = self.state.borrow_mut();
        state.dependency_specifiers = dependencies;
        state.execute = Some(execute.unwrap_or(empty));
        if state.phase == LoadPhase::Instantiating {
            state.phase = LoadPhase::Instantiated;
        }
    }

    pub(crate) fn dependency_specifiers(&self) -> Vec<String> {
        self.state.borrow().dependency_specifiers.clone()
    }

    pub(crate) fn set_dependency_loads(&self, loads: Vec<Rc<LoadRecord>>) {
        let mut state = self.state.borrow_mut();
        state.dependency_loads = Some(loads);
        if state.phase == LoadPhase::Instantiated {
            state.phase = LoadPhase::Linked;
        }
    }

    /// Dependency records in declaration order; empty until linked
    pub(crate) fn dependency_loads(&self) -> Vec<Rc<LoadRecord>> {
        self.state
            .borrow()
            .dependency_loads
            .clone()
            .unwrap_or_default()
    }

    pub(crate) fn dependency_ids(&self) -> Vec<String> {
        self.state
            .borrow()
            .dependency_loads
            .as_ref()
            .map(|loads| loads.iter().map(|load| load.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Take the execute step, leaving it absent for good
    pub(crate) fn take_execute(&self) -> Option<ExecuteFn> {
        let mut state = self.state.borrow_mut();
        let execute = state.execute.take();
        if execute.is_some() {
            state.phase = LoadPhase::Evaluating;
        }
        execute
    }

    /// Attach a terminal error. Returns `false` when the record already
    /// failed (the first error is kept) or had already been evaluated.
    pub(crate) fn fail(&self, error: SharedError) -> bool {
        let mut state = self.state.borrow_mut();
        if state.error.is_some() || state.phase == LoadPhase::Evaluated {
            return false;
        }
        state.error = Some(error);
        state.execute = None;
        state.phase = LoadPhase::Failed;
        true
    }

    /// Terminal success: mark the namespace ready and release the memoized
    /// phases
    pub(crate) fn complete(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.phase = LoadPhase::Evaluated;
            state.instantiate = None;
            state.link = None;
            state.evaluation = None;
        }
        self.namespace.mark_ready();
    }

    pub(crate) fn setter(&self, slot: usize) -> Option<Setter> {
        self.setters.borrow().get(slot).cloned().flatten()
    }

    pub(crate) fn subscribe(&self, subscription: Subscription) {
        self.importer_setters.borrow_mut().push(subscription);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.importer_setters.borrow().len()
    }

    /// Publish one binding. Importers are notified only if the value changed.
    pub(crate) fn export(&self, name: &str, value: Value) -> bool {
        let changed = self.namespace.set(name, value);
        if changed {
            self.mark_exported();
            self.notify_importers();
        }
        changed
    }

    /// Publish several bindings, notifying importers at most once
    pub(crate) fn export_batch<K, I>(&self, bindings: I) -> bool
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut changed = false;
        for (name, value) in bindings {
            changed |= self.namespace.set(name.as_ref(), value);
        }
        if changed {
            self.mark_exported();
            self.notify_importers();
        }
        changed
    }

    /// Only exports made before execution finished count as hoisted
    fn mark_exported(&self) {
        let mut state = self.state.borrow_mut();
        if state.phase != LoadPhase::Evaluated {
            state.hoisted_exports = true;
        }
    }

    fn notify_importers(&self) {
        let subscriptions = self.importer_setters.borrow().clone();
        for subscription in &subscriptions {
            subscription.notify(&self.namespace);
        }
    }
}
