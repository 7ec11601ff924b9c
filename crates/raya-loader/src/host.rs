//! Host seams: how identifiers are resolved and how modules are produced.

use futures_util::future::LocalBoxFuture;

use crate::error::LoaderError;
use crate::loader::Loader;
use crate::registration::Registration;

/// Maps a specifier, seen from a referrer, to an absolute identifier.
///
/// Implementations must be pure with respect to their own state at call
/// time: the same inputs against the same tables give the same identifier.
pub trait Resolver {
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> Result<String, LoaderError>;
}

impl<F> Resolver for F
where
    F: Fn(&str, Option<&str>) -> Result<String, LoaderError>,
{
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> Result<String, LoaderError> {
        self(specifier, referrer)
    }
}

/// Produces the registration for an absolute identifier.
///
/// The loader calls this at most once per identifier. Hosts whose evaluator
/// cannot return a value directly evaluate inside
/// [`Loader::registration_scope`] and collect what the module handed to
/// [`Loader::register`].
pub trait Instantiator {
    fn instantiate(
        &self,
        id: &str,
        referrer: Option<&str>,
        loader: &Loader,
    ) -> LocalBoxFuture<'static, Result<Registration, LoaderError>>;
}

impl<F> Instantiator for F
where
    F: Fn(
        &str,
        Option<&str>,
        &Loader,
    ) -> LocalBoxFuture<'static, Result<Registration, LoaderError>>,
{
    fn instantiate(
        &self,
        id: &str,
        referrer: Option<&str>,
        loader: &Loader,
    ) -> LocalBoxFuture<'static, Result<Registration, LoaderError>> {
        self(id, referrer, loader)
    }
}
