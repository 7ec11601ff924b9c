//! Dynamic values carried by module namespaces.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::ModuleError;
use crate::namespace::Namespace;

/// Signature of a host-provided callable
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, ModuleError>;

/// A value bound to a namespace export.
///
/// Reference variants (`Array`, `Object`, `Function`, `Namespace`) are shared
/// and compared by identity; see [`Value::same_value`].
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<BTreeMap<String, Value>>>),
    Function(Rc<NativeFn>),
    Namespace(Namespace),
}

impl Value {
    /// Create an object value from key/value pairs
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Object(Rc::new(RefCell::new(map)))
    }

    /// Create an array value
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// Wrap a host closure as a callable value
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ModuleError> + 'static,
    {
        Value::Function(Rc::new(f))
    }

    /// Identity comparison used to decide whether an export changed.
    ///
    /// Primitives compare by value (numbers by bit pattern, so `NaN` equals
    /// itself and `0.0` differs from `-0.0`); reference variants compare by
    /// pointer.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_namespace(&self) -> Option<&Namespace> {
        match self {
            Value::Namespace(ns) => Some(ns),
            _ => None,
        }
    }

    /// Read a property of an object value
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned(),
            Value::Namespace(ns) => ns.get(key),
            _ => None,
        }
    }

    /// Invoke a callable value
    pub fn call(&self, args: &[Value]) -> Result<Value, ModuleError> {
        match self {
            Value::Function(f) => f(args),
            other => Err(ModuleError::new(format!("{} is not a function", other))),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(map) => f.debug_map().entries(map.borrow().iter()).finish(),
            Value::Function(_) => write!(f, "Function"),
            Value::Namespace(ns) => write!(f, "Namespace({})", ns.id()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(_) => write!(f, "[array]"),
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(_) => write!(f, "[function]"),
            Value::Namespace(_) => write!(f, "[object Module]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<Namespace> for Value {
    fn from(ns: Namespace) -> Self {
        Value::Namespace(ns)
    }
}
