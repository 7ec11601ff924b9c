//! Host resolution
//!
//! Resolution order for `resolve(specifier, referrer)`:
//! 1. The reserved global identifier is returned unchanged
//! 2. Intrinsic identifiers are returned unchanged; any other `std:`
//!    specifier is unresolved
//! 3. `/`, `./`, `../` and absolute URLs are resolved against the referrer
//!    (or the base URL)
//! 4. The result goes through the import map; an unmapped absolute URL maps
//!    to itself, an unmapped bare specifier is unresolved

use std::cell::RefCell;
use std::rc::Rc;

use raya_loader::{LoaderError, Resolver};
use url::Url;

use crate::import_map::{resolve_url_like, ImportMap};
use crate::intrinsics::IntrinsicTable;

/// Default identifier of the host global object
pub const GLOBAL_IDENTIFIER: &str = "@global";

/// Shape of a resolved module, decided once from its identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleKind {
    /// The host global object
    Global,
    /// An allow-listed intrinsic
    Intrinsic(String),
    /// A module fetched from a URL
    Source(Url),
}

/// Resolver backed by an import map and an intrinsic table.
///
/// Clones share the same import map, so maps added after the loader was
/// built apply to later resolutions.
#[derive(Clone)]
pub struct HostResolver {
    base_url: Url,
    global_identifier: Rc<str>,
    import_map: Rc<RefCell<ImportMap>>,
    intrinsics: Rc<IntrinsicTable>,
}

impl HostResolver {
    pub fn new(base_url: Url, import_map: ImportMap, intrinsics: IntrinsicTable) -> Self {
        Self {
            base_url,
            global_identifier: Rc::from(GLOBAL_IDENTIFIER),
            import_map: Rc::new(RefCell::new(import_map)),
            intrinsics: Rc::new(intrinsics),
        }
    }

    /// Reserve a different identifier for the global object
    pub fn with_global_identifier(mut self, identifier: &str) -> Self {
        self.global_identifier = Rc::from(identifier);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn global_identifier(&self) -> &str {
        &self.global_identifier
    }

    pub fn intrinsics(&self) -> &IntrinsicTable {
        &self.intrinsics
    }

    /// Compose a JSON import map onto the current one
    pub fn extend_import_map(&self, content: &str, base: &Url) -> Result<(), crate::ConfigError> {
        self.import_map.borrow_mut().extend_json(content, base)
    }

    /// Snapshot of the current import map
    pub fn import_map(&self) -> ImportMap {
        self.import_map.borrow().clone()
    }

    /// Classify a resolved identifier
    pub fn classify(&self, id: &str) -> Option<ModuleKind> {
        if id == &*self.global_identifier {
            return Some(ModuleKind::Global);
        }
        if self.intrinsics.contains(id) {
            return Some(ModuleKind::Intrinsic(id.to_string()));
        }
        Url::parse(id).ok().map(ModuleKind::Source)
    }
}

impl Resolver for HostResolver {
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> Result<String, LoaderError> {
        if specifier == &*self.global_identifier || self.intrinsics.contains(specifier) {
            return Ok(specifier.to_string());
        }
        if IntrinsicTable::is_std_import(specifier) {
            return Err(LoaderError::unresolved(specifier, referrer));
        }

        let parent = referrer.unwrap_or_else(|| self.base_url.as_str());
        let parent_url = Url::parse(parent).unwrap_or_else(|_| self.base_url.clone());
        let resolved_or_plain = resolve_url_like(specifier, &parent_url)
            .map(String::from)
            .unwrap_or_else(|| specifier.to_string());

        self.import_map
            .borrow()
            .resolve(&resolved_or_plain, Some(parent))
            .ok_or_else(|| LoaderError::unresolved(specifier, referrer))
    }
}
