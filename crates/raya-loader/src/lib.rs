//! Raya module loader
//!
//! Loads a graph of modules starting from a root identifier:
//! - Resolution of specifiers through a pluggable [`Resolver`]
//! - Instantiation through a pluggable [`Instantiator`], memoized per
//!   identifier
//! - Linking with live bindings: importers subscribe to their dependencies'
//!   namespaces and observe every later export
//! - Dependency-first execution that tolerates cycles and modules that
//!   complete asynchronously (top-level await)
//!
//! Everything runs on one thread; asynchrony is plain futures driven by the
//! host's executor.
//!
//! ```ignore
//! let loader = Loader::new(resolver, instantiator);
//! let ns = loader.import("./main.js", None).await?;
//! ```

mod context;
mod error;
mod executor;
mod host;
mod linker;
mod loader;
mod namespace;
mod record;
mod registration;
mod value;

pub use context::ModuleContext;
pub use error::{InstantiationFailure, LoaderError, ModuleError, SharedError};
pub use host::{Instantiator, Resolver};
pub use loader::{LoadEvent, Loader, LoaderBuilder, RegistrationScope, WeakLoader};
pub use namespace::Namespace;
pub use record::LoadPhase;
pub use registration::{
    Completion, DeclareFn, Declaration, ExecuteFn, Execution, Exporter, Registration, Setter,
};
pub use value::{NativeFn, Value};
