//! Host intrinsic modules
//!
//! Maps allow-listed identifiers (conventionally `std:xxx`) to namespaces
//! built from host values. Intrinsics never go through a source provider.

use std::collections::BTreeMap;

use log::{error, info, warn};
use raya_loader::{ModuleError, Value};
use rustc_hash::FxHashMap;

/// Registry of intrinsic modules plus the host global object
pub struct IntrinsicTable {
    /// Map from identifier to exported bindings
    modules: FxHashMap<String, BTreeMap<String, Value>>,
    global: Value,
}

impl IntrinsicTable {
    /// An empty table with an empty global object
    pub fn new() -> Self {
        Self {
            modules: FxHashMap::default(),
            global: Value::object(Vec::<(String, Value)>::new()),
        }
    }

    /// A table with the standard intrinsics registered
    pub fn with_std() -> Self {
        let mut table = Self::new();
        table.insert("std:math", math_bindings());
        table.insert("std:logger", logger_bindings());
        table
    }

    /// Register (or replace) an intrinsic module
    pub fn insert<K, I>(&mut self, name: &str, bindings: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let bindings = bindings.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.modules.insert(name.to_string(), bindings);
    }

    /// Bindings of an intrinsic module
    pub fn get(&self, name: &str) -> Option<&BTreeMap<String, Value>> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Check if a specifier uses the standard intrinsic prefix
    pub fn is_std_import(specifier: &str) -> bool {
        specifier.starts_with("std:")
    }

    /// Get all registered identifiers, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The host global object
    pub fn global(&self) -> &Value {
        &self.global
    }

    /// Define a property on the global object
    pub fn set_global(&self, name: &str, value: Value) {
        if let Value::Object(properties) = &self.global {
            properties.borrow_mut().insert(name.to_string(), value);
        }
    }

    /// Bindings of the global namespace: every own property of the global
    /// object plus `default` bound to the object itself
    pub fn global_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = match &self.global {
            Value::Object(properties) => properties
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        };
        bindings.push(("default".to_string(), self.global.clone()));
        bindings
    }
}

impl Default for IntrinsicTable {
    fn default() -> Self {
        Self::new()
    }
}

fn number_arg(args: &[Value], index: usize) -> Result<f64, ModuleError> {
    args.get(index)
        .and_then(Value::as_number)
        .ok_or_else(|| ModuleError::new(format!("argument {} must be a number", index)))
}

fn math_bindings() -> Vec<(&'static str, Value)> {
    vec![
        ("PI", Value::from(std::f64::consts::PI)),
        ("E", Value::from(std::f64::consts::E)),
        ("abs", Value::function(|args: &[Value]| Ok(Value::from(number_arg(args, 0)?.abs())))),
        ("floor", Value::function(|args: &[Value]| Ok(Value::from(number_arg(args, 0)?.floor())))),
        ("sqrt", Value::function(|args: &[Value]| Ok(Value::from(number_arg(args, 0)?.sqrt())))),
        (
            "max",
            Value::function(|args: &[Value]| {
                let mut max = f64::NEG_INFINITY;
                for index in 0..args.len() {
                    max = max.max(number_arg(args, index)?);
                }
                Ok(Value::from(max))
            }),
        ),
    ]
}

fn message(args: &[Value]) -> String {
    args.iter().map(|arg| arg.to_string()).collect::<Vec<_>>().join(" ")
}

fn logger_bindings() -> Vec<(&'static str, Value)> {
    vec![
        (
            "info",
            Value::function(|args: &[Value]| {
                info!(target: "raya::module", "{}", message(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "warn",
            Value::function(|args: &[Value]| {
                warn!(target: "raya::module", "{}", message(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "error",
            Value::function(|args: &[Value]| {
                error!(target: "raya::module", "{}", message(args));
                Ok(Value::Undefined)
            }),
        ),
    ]
}
