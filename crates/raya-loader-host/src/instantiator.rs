//! Host instantiation
//!
//! Dispatches on the [`ModuleKind`] of an identifier:
//! - `Global` and `Intrinsic` namespaces are synthesized from host values
//! - `Source` modules are fetched, checked, and then either evaluated
//!   (JavaScript content types) or parsed (JSON)

use std::rc::Rc;

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use log::debug;
use raya_loader::{
    InstantiationFailure, Instantiator, Loader, LoaderError, Registration, Value, WeakLoader,
};
use url::Url;

use crate::evaluator::Evaluator;
use crate::resolver::{HostResolver, ModuleKind};
use crate::source::{FetchError, FetchResponse, SourceProvider};

impl From<FetchError> for InstantiationFailure {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Timeout(limit) => InstantiationFailure::Timeout(limit),
            other => InstantiationFailure::Io(other.to_string()),
        }
    }
}

/// Whether a media type is a script the evaluator runs
pub fn is_javascript(content_type: &str) -> bool {
    matches!(
        content_type,
        "application/javascript"
            | "text/javascript"
            | "application/x-javascript"
            | "text/x-javascript"
            | "application/ecmascript"
            | "text/ecmascript"
    )
}

/// Convert a parsed JSON document to a module value
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => Value::array(items.iter().map(json_to_value)),
        serde_json::Value::Object(entries) => {
            Value::object(entries.iter().map(|(k, v)| (k.clone(), json_to_value(v))))
        }
    }
}

/// Instantiator for global, intrinsic and fetched modules
pub struct HostInstantiator {
    resolver: HostResolver,
    source: Rc<dyn SourceProvider>,
    evaluator: Rc<dyn Evaluator>,
    json_modules: bool,
}

impl HostInstantiator {
    pub fn new(
        resolver: HostResolver,
        source: Rc<dyn SourceProvider>,
        evaluator: Rc<dyn Evaluator>,
    ) -> Self {
        Self {
            resolver,
            source,
            evaluator,
            json_modules: true,
        }
    }

    /// Enable or disable loading `application/json` responses as modules
    pub fn with_json_modules(mut self, enabled: bool) -> Self {
        self.json_modules = enabled;
        self
    }
}

impl Instantiator for HostInstantiator {
    fn instantiate(
        &self,
        id: &str,
        referrer: Option<&str>,
        loader: &Loader,
    ) -> LocalBoxFuture<'static, Result<Registration, LoaderError>> {
        match self.resolver.classify(id) {
            Some(ModuleKind::Global) => {
                let bindings = self.resolver.intrinsics().global_bindings();
                future::ready(Ok(Registration::from_bindings(bindings))).boxed_local()
            }
            Some(ModuleKind::Intrinsic(name)) => {
                let result = match self.resolver.intrinsics().get(&name) {
                    Some(bindings) => Ok(Registration::from_bindings(bindings.clone())),
                    None => Err(LoaderError::instantiation(
                        id,
                        referrer,
                        InstantiationFailure::NotRegistered,
                    )),
                };
                future::ready(result).boxed_local()
            }
            Some(ModuleKind::Source(url)) => {
                let fetch = SourceFetch {
                    id: id.to_string(),
                    referrer: referrer.map(str::to_string),
                    url,
                    loader: loader.downgrade(),
                    evaluator: self.evaluator.clone(),
                    json_modules: self.json_modules,
                };
                let response = self.source.fetch(&fetch.url);
                async move {
                    let response = response.await.map_err(|e| fetch.fail(e.into()))?;
                    fetch.instantiate(response)
                }
                .boxed_local()
            }
            None => {
                let reason = InstantiationFailure::Parse(format!("'{}' is not a module URL", id));
                future::ready(Err(LoaderError::instantiation(id, referrer, reason))).boxed_local()
            }
        }
    }
}

/// One in-flight fetch of a source module
struct SourceFetch {
    id: String,
    referrer: Option<String>,
    url: Url,
    loader: WeakLoader,
    evaluator: Rc<dyn Evaluator>,
    json_modules: bool,
}

impl SourceFetch {
    fn fail(&self, reason: InstantiationFailure) -> LoaderError {
        LoaderError::instantiation(&self.id, self.referrer.as_deref(), reason)
    }

    fn instantiate(self, response: FetchResponse) -> Result<Registration, LoaderError> {
        if !response.is_success() {
            return Err(self.fail(InstantiationFailure::Fetch {
                status: response.status,
                status_text: response.status_text,
            }));
        }

        let content_type = response.content_type();
        debug!("fetched {} ({})", self.url, content_type.as_deref().unwrap_or("no content type"));
        match content_type.as_deref() {
            Some(media) if is_javascript(media) => self.evaluate(response.body),
            Some("application/json") if self.json_modules => {
                let document: serde_json::Value = serde_json::from_slice(&response.body)
                    .map_err(|e| self.fail(InstantiationFailure::Parse(e.to_string())))?;
                Ok(Registration::from_bindings([("default", json_to_value(&document))]))
            }
            _ => Err(self.fail(InstantiationFailure::ContentType(content_type.clone()))),
        }
    }

    fn evaluate(self, body: Vec<u8>) -> Result<Registration, LoaderError> {
        let source = String::from_utf8(body)
            .map_err(|e| self.fail(InstantiationFailure::Parse(e.to_string())))?;
        let loader = self
            .loader
            .upgrade()
            .ok_or_else(|| self.fail(InstantiationFailure::LoaderDropped))?;

        let scope = loader.registration_scope();
        self.evaluator
            .evaluate(&source, &self.url, &loader)
            .map_err(|e| self.fail(InstantiationFailure::Evaluation(e)))?;
        scope.finish().ok_or_else(|| self.fail(InstantiationFailure::NotRegistered))
    }
}
