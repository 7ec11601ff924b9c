//! The evaluator seam
//!
//! An [`Evaluator`] runs fetched script text. Evaluation must hand the
//! module's registration to the loader by calling [`Loader::register`]
//! before it returns; the instantiator collects it.

use raya_loader::{Loader, ModuleError};
use url::Url;

/// Runs module source text
pub trait Evaluator {
    fn evaluate(&self, source: &str, url: &Url, loader: &Loader) -> Result<(), ModuleError>;
}

impl<F> Evaluator for F
where
    F: Fn(&str, &Url, &Loader) -> Result<(), ModuleError>,
{
    fn evaluate(&self, source: &str, url: &Url, loader: &Loader) -> Result<(), ModuleError> {
        self(source, url, loader)
    }
}
