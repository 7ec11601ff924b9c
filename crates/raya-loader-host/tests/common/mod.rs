//! Test evaluator: a line-based module format.
//!
//! ```text
//! import ./dep.js as dep     dependency, bound under `dep`
//! hoist name = 1             export bound while declaring
//! export name = "text"       export bound when the body runs
//! export name = dep.value    copy of an imported binding, read when the body runs
//! throw message              the body fails
//! noregister                 evaluation never calls `register`
//! ```

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use raya_loader::{Declaration, Execution, Exporter, Loader, ModuleError, Namespace, Value};
use raya_loader_host::Evaluator;
use url::Url;

pub type Trace = Rc<RefCell<Vec<String>>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone)]
enum Expr {
    Literal(Value),
    Imported { alias: String, name: String },
}

#[derive(Default)]
struct Script {
    imports: Vec<(String, String)>,
    hoisted: Vec<(String, Value)>,
    exports: Vec<(String, Expr)>,
    throws: Option<String>,
    registers: bool,
}

fn literal(text: &str) -> Option<Value> {
    if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Some(Value::from(inner));
    }
    match text {
        "true" => Some(Value::from(true)),
        "false" => Some(Value::from(false)),
        "null" => Some(Value::Null),
        _ => text.parse::<f64>().ok().map(Value::from),
    }
}

fn binding(rest: &str) -> Result<(String, &str), ModuleError> {
    let (name, expr) = rest
        .split_once('=')
        .ok_or_else(|| ModuleError::new(format!("expected '=' in '{}'", rest)))?;
    Ok((name.trim().to_string(), expr.trim()))
}

impl Script {
    fn parse(source: &str) -> Result<Self, ModuleError> {
        let mut script = Script {
            registers: true,
            ..Script::default()
        };
        for line in source.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(rest) = line.strip_prefix("import ") {
                let (specifier, alias) = rest
                    .split_once(" as ")
                    .ok_or_else(|| ModuleError::new(format!("expected 'as' in '{}'", line)))?;
                script.imports.push((specifier.trim().to_string(), alias.trim().to_string()));
            } else if let Some(rest) = line.strip_prefix("hoist ") {
                let (name, expr) = binding(rest)?;
                let value = literal(expr)
                    .ok_or_else(|| ModuleError::new(format!("bad literal '{}'", expr)))?;
                script.hoisted.push((name, value));
            } else if let Some(rest) = line.strip_prefix("export ") {
                let (name, expr) = binding(rest)?;
                let expr = match literal(expr) {
                    Some(value) => Expr::Literal(value),
                    None => {
                        let (alias, imported) = expr
                            .split_once('.')
                            .ok_or_else(|| ModuleError::new(format!("bad expression '{}'", expr)))?;
                        Expr::Imported {
                            alias: alias.to_string(),
                            name: imported.to_string(),
                        }
                    }
                };
                script.exports.push((name, expr));
            } else if let Some(message) = line.strip_prefix("throw ") {
                script.throws = Some(message.to_string());
            } else if line == "noregister" {
                script.registers = false;
            } else {
                return Err(ModuleError::new(format!("syntax error: '{}'", line)));
            }
        }
        Ok(script)
    }
}

/// Evaluates the line format and logs each module URL as its body runs
#[derive(Clone, Default)]
pub struct ScriptEvaluator {
    trace: Trace,
}

impl ScriptEvaluator {
    pub fn new() -> Self {
        init_logging();
        Self::default()
    }

    pub fn trace(&self) -> Trace {
        self.trace.clone()
    }

    pub fn traced(&self) -> Vec<String> {
        self.trace.borrow().clone()
    }
}

impl Evaluator for ScriptEvaluator {
    fn evaluate(&self, source: &str, url: &Url, loader: &Loader) -> Result<(), ModuleError> {
        let script = Script::parse(source)?;
        if !script.registers {
            return Ok(());
        }
        let trace = self.trace.clone();
        let id = url.to_string();
        let dependencies: Vec<String> = script.imports.iter().map(|(s, _)| s.clone()).collect();

        loader
            .register(dependencies, move |exports: Exporter, _ctx| {
                for (name, value) in &script.hoisted {
                    exports.export(name, value.clone());
                }
                let imported: Rc<RefCell<HashMap<String, Namespace>>> = Rc::default();
                let mut declaration = Declaration::new();
                for (_, alias) in &script.imports {
                    let alias = alias.clone();
                    let imported = imported.clone();
                    declaration = declaration.with_setter(move |ns: &Namespace| {
                        imported.borrow_mut().insert(alias.clone(), ns.clone());
                    });
                }
                declaration.with_execute(move || {
                    trace.borrow_mut().push(id);
                    if let Some(message) = script.throws {
                        return Err(ModuleError::new(message));
                    }
                    for (name, expr) in script.exports {
                        let value = match expr {
                            Expr::Literal(value) => value,
                            Expr::Imported { alias, name } => imported
                                .borrow()
                                .get(&alias)
                                .and_then(|ns| ns.get(&name))
                                .unwrap_or_default(),
                        };
                        exports.export(&name, value);
                    }
                    Ok(Execution::Complete)
                })
            })
            .map_err(|e| ModuleError::new(e.to_string()))
    }
}
