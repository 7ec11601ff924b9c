//! Import maps
//!
//! Remaps bare and URL specifiers through `imports` and `scopes` tables.
//! Keys and targets are resolved against the base URL of the map that
//! declared them, and a map added later is composed through the maps already
//! installed.
//!
//! Matching rules:
//! - an exact key wins, otherwise the longest key ending in `/` that prefixes
//!   the specifier
//! - a `null` target blocks the specifier
//! - a prefix key whose target does not end in `/` cannot remap a longer
//!   specifier (a warning is logged and the entry is skipped)
//! - scopes are tried innermost first and walk outward before the top-level
//!   `imports`

use std::collections::BTreeMap;

use log::warn;
use serde::Deserialize;
use url::Url;

use crate::config::ConfigError;

/// Specifier key to target URL; `None` blocks the key
pub type Packages = BTreeMap<String, Option<String>>;

/// An import map document as written (JSON or TOML)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImportMapDocument {
    #[serde(default)]
    pub imports: Packages,

    #[serde(default)]
    pub scopes: BTreeMap<String, Packages>,
}

impl ImportMapDocument {
    /// Parse an import map from JSON
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }
}

/// The composed import map: every key and target is an absolute URL or a
/// bare specifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportMap {
    imports: Packages,
    scopes: BTreeMap<String, Packages>,
}

/// Outcome of looking a specifier up in one table
enum Applied {
    Mapped(String),
    Blocked,
    NoMatch,
}

impl ImportMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from a single document
    pub fn from_document(document: &ImportMapDocument, base: &Url) -> Self {
        let mut map = Self::new();
        map.extend(document, base);
        map
    }

    /// Parse and compose a JSON import map onto this one
    pub fn extend_json(&mut self, content: &str, base: &Url) -> Result<(), ConfigError> {
        let document = ImportMapDocument::from_json(content)?;
        self.extend(&document, base);
        Ok(())
    }

    /// Compose `document` onto this map.
    ///
    /// Targets are resolved through the map as it stands, so a later map can
    /// refer to bare names an earlier one defined.
    pub fn extend(&mut self, document: &ImportMapDocument, base: &Url) {
        let imports = self.compose_packages(&document.imports, base, None);
        self.imports.extend(imports);

        for (scope, packages) in &document.scopes {
            let Some(scope_url) = resolve_url(scope, base) else {
                warn!("Ignoring import map scope '{}': not a valid URL", scope);
                continue;
            };
            let scope_url = scope_url.to_string();
            let composed = self.compose_packages(packages, base, Some(&scope_url));
            self.scopes.entry(scope_url).or_default().extend(composed);
        }
    }

    fn compose_packages(&self, packages: &Packages, base: &Url, parent: Option<&str>) -> Packages {
        let mut composed = Packages::new();
        for (key, target) in packages {
            let resolved_key = resolve_url_like(key, base)
                .map(String::from)
                .unwrap_or_else(|| key.clone());
            let Some(target) = target else {
                composed.insert(resolved_key, None);
                continue;
            };
            let resolved_target = resolve_url_like(target, base)
                .map(String::from)
                .unwrap_or_else(|| target.clone());
            match self.resolve(&resolved_target, parent) {
                Some(mapped) => {
                    composed.insert(resolved_key, Some(mapped));
                }
                None => warn!("Invalid import map target '{}' for '{}'", target, key),
            }
        }
        composed
    }

    /// Map an already URL-resolved specifier (or a bare one).
    ///
    /// Returns `None` when the specifier is blocked, or is bare and unmapped.
    /// An unmapped absolute URL maps to itself.
    pub fn resolve(&self, specifier: &str, parent: Option<&str>) -> Option<String> {
        let mut scope = parent.and_then(|parent| get_match(parent, &self.scopes));
        while let Some(scope_url) = scope {
            match apply_packages(specifier, &self.scopes[scope_url]) {
                Applied::Mapped(url) => return Some(url),
                Applied::Blocked => return None,
                Applied::NoMatch => {}
            }
            let outer = &scope_url[..scope_url.rfind('/').unwrap_or(0)];
            scope = get_match(outer, &self.scopes);
        }
        match apply_packages(specifier, &self.imports) {
            Applied::Mapped(url) => Some(url),
            Applied::Blocked => None,
            Applied::NoMatch if is_absolute_url(specifier) => Some(specifier.to_string()),
            Applied::NoMatch => None,
        }
    }

    pub fn imports(&self) -> &Packages {
        &self.imports
    }

    pub fn scopes(&self) -> &BTreeMap<String, Packages> {
        &self.scopes
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.scopes.is_empty()
    }
}

/// Exact key, else the longest key ending in `/` that prefixes `path`
fn get_match<'a, V>(path: &str, table: &'a BTreeMap<String, V>) -> Option<&'a str> {
    if let Some((key, _)) = table.get_key_value(path) {
        return Some(key);
    }
    let mut end = path.len();
    while let Some(separator) = path[..end].rfind('/') {
        if let Some((key, _)) = table.get_key_value(&path[..=separator]) {
            return Some(key);
        }
        end = separator;
    }
    None
}

fn apply_packages(specifier: &str, packages: &Packages) -> Applied {
    let Some(key) = get_match(specifier, packages) else {
        return Applied::NoMatch;
    };
    match &packages[key] {
        None => Applied::Blocked,
        Some(target) if specifier.len() > key.len() && !target.ends_with('/') => {
            warn!(
                "Import map entry '{}' -> '{}' cannot remap '{}': target must end in '/'",
                key, target, specifier
            );
            Applied::NoMatch
        }
        Some(target) => Applied::Mapped(format!("{}{}", target, &specifier[key.len()..])),
    }
}

/// Resolve `/`, `./`, `../` against `base` and parse absolute URLs.
///
/// Returns `None` for bare specifiers.
pub(crate) fn resolve_url_like(specifier: &str, base: &Url) -> Option<Url> {
    if specifier.starts_with('/') || specifier.starts_with("./") || specifier.starts_with("../") {
        return base.join(specifier).ok();
    }
    Url::parse(specifier).ok()
}

/// Like [`resolve_url_like`], but a bare name is taken as a relative path
fn resolve_url(specifier: &str, base: &Url) -> Option<Url> {
    resolve_url_like(specifier, base).or_else(|| base.join(&format!("./{}", specifier)).ok())
}

pub(crate) fn is_absolute_url(specifier: &str) -> bool {
    Url::parse(specifier).is_ok()
}
