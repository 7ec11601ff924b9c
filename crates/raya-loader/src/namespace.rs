//! Live module namespaces.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// The live export container of one module.
///
/// A namespace is created together with its load record and its identity
/// never changes: importers may hold a clone before the module has executed
/// and will observe every later export through it. Mutation happens only
/// through the loader's export path ([`crate::Exporter`]).
#[derive(Clone)]
pub struct Namespace(Rc<NamespaceData>);

struct NamespaceData {
    id: String,
    bindings: RefCell<BTreeMap<String, Value>>,
    ready: Cell<bool>,
}

impl Namespace {
    pub(crate) fn new(id: &str) -> Self {
        Namespace(Rc::new(NamespaceData {
            id: id.to_string(),
            bindings: RefCell::new(BTreeMap::new()),
            ready: Cell::new(false),
        }))
    }

    /// Identifier of the module owning this namespace
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Current value of an export
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.bindings.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.bindings.borrow().contains_key(name)
    }

    /// Export names, sorted
    pub fn keys(&self) -> Vec<String> {
        self.0.bindings.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.bindings.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.bindings.borrow().is_empty()
    }

    /// Copy of every binding at this point in time
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.0.bindings.borrow().clone()
    }

    /// Whether the owning module finished executing successfully
    pub fn is_ready(&self) -> bool {
        self.0.ready.get()
    }

    /// Whether two handles refer to the same namespace
    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Bind `name` to `value`. Returns `false` when the binding already held
    /// the same value.
    pub(crate) fn set(&self, name: &str, value: Value) -> bool {
        let mut bindings = self.0.bindings.borrow_mut();
        match bindings.get(name) {
            Some(current) if current.same_value(&value) => false,
            _ => {
                bindings.insert(name.to_string(), value);
                true
            }
        }
    }

    pub(crate) fn mark_ready(&self) {
        self.0.ready.set(true);
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("id", &self.0.id)
            .field("exports", &self.keys())
            .field("ready", &self.is_ready())
            .finish()
    }
}
