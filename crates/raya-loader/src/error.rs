//! Loader error types.

use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

use crate::value::Value;

/// An error attached to a load record.
///
/// Once a record fails, the same allocation is handed to every caller that
/// touches the record afterwards, so identity can be checked with
/// [`Rc::ptr_eq`].
pub type SharedError = Rc<LoaderError>;

/// Errors that can occur while resolving, instantiating, linking or executing
/// a module graph
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The resolver could not produce an identifier for a specifier
    #[error("Unable to resolve specifier '{specifier}'{}", from_referrer(.referrer))]
    UnresolvedSpecifier {
        specifier: String,
        referrer: Option<String>,
    },

    /// Fetching, evaluating or registering a module failed
    #[error("Error loading {id}{}: {reason}", from_referrer(.referrer))]
    Instantiation {
        id: String,
        referrer: Option<String>,
        #[source]
        reason: InstantiationFailure,
    },

    /// A dependency specifier of `importer` could not be resolved
    #[error("Unable to link {importer}: dependency '{specifier}' failed: {source}")]
    Link {
        importer: String,
        specifier: String,
        #[source]
        source: Box<LoaderError>,
    },

    /// A module body failed, synchronously or through its completion
    #[error("Error executing {id}: {source}")]
    Execution {
        id: String,
        #[source]
        source: ModuleError,
    },

    /// `register` was called while no instantiation was waiting for it
    #[error("Module registration received outside of a loader-initiated instantiation")]
    ReentrantRegistration,
}

impl LoaderError {
    /// Build an [`LoaderError::UnresolvedSpecifier`]
    pub fn unresolved(specifier: &str, referrer: Option<&str>) -> Self {
        LoaderError::UnresolvedSpecifier {
            specifier: specifier.to_string(),
            referrer: referrer.map(str::to_string),
        }
    }

    /// Build an [`LoaderError::Instantiation`]
    pub fn instantiation(id: &str, referrer: Option<&str>, reason: InstantiationFailure) -> Self {
        LoaderError::Instantiation {
            id: id.to_string(),
            referrer: referrer.map(str::to_string),
            reason,
        }
    }
}

fn from_referrer(referrer: &Option<String>) -> String {
    match referrer {
        Some(referrer) => format!(" from {}", referrer),
        None => String::new(),
    }
}

/// Why an instantiation failed
#[derive(Debug, Error)]
pub enum InstantiationFailure {
    /// The source provider answered with a non-2xx status
    #[error("fetch error: {status} {status_text}")]
    Fetch { status: u16, status_text: String },

    /// The response carried a content type the host cannot instantiate
    #[error("unsupported content type {}", .0.as_deref().unwrap_or("<none>"))]
    ContentType(Option<String>),

    /// The source was fetched but evaluating it failed
    #[error("{0}")]
    Evaluation(#[source] ModuleError),

    /// Evaluation finished without handing a registration to the loader
    #[error("module did not instantiate")]
    NotRegistered,

    /// The source provider gave up waiting
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Reading the source failed
    #[error("{0}")]
    Io(String),

    /// The source could not be decoded (bad UTF-8, malformed JSON, ...)
    #[error("{0}")]
    Parse(String),

    /// The owning loader was dropped while the instantiation was pending
    #[error("loader was dropped")]
    LoaderDropped,
}

/// A failure raised by a module body.
///
/// Carries a human readable message and, optionally, the value the module
/// threw.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ModuleError {
    message: String,
    thrown: Option<Value>,
}

impl ModuleError {
    /// Create an error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            thrown: None,
        }
    }

    /// Create an error carrying the value a module threw
    pub fn thrown(value: Value) -> Self {
        Self {
            message: value.to_string(),
            thrown: Some(value),
        }
    }

    /// The error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The thrown value, if the module threw one
    pub fn value(&self) -> Option<&Value> {
        self.thrown.as_ref()
    }
}
