//! Integration tests for loading modules through the host layer

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::ScriptEvaluator;
use futures_util::future::{self, FutureExt, LocalBoxFuture};
use raya_loader::{InstantiationFailure, LoaderError, Value};
use raya_loader_host::{
    FetchError, FetchResponse, Host, HostBuilder, HostConfig, IntrinsicTable, MemorySource,
    SourceProvider,
};
use url::Url;

const BASE: &str = r#"base_url = "https://app.test/""#;

fn memory_host(config: &str, source: MemorySource) -> (Host, ScriptEvaluator) {
    let evaluator = ScriptEvaluator::new();
    let config = HostConfig::from_str(config).unwrap();
    let host = HostBuilder::new(config, evaluator.clone())
        .with_source(source)
        .build()
        .unwrap();
    (host, evaluator)
}

fn instantiation_reason(err: &LoaderError) -> &InstantiationFailure {
    match err {
        LoaderError::Instantiation { reason, .. } => reason,
        other => panic!("expected an instantiation error, got: {other}"),
    }
}

#[tokio::test]
async fn test_relative_graph() {
    let source = MemorySource::new();
    source.insert_script(
        "https://app.test/main.js",
        "import ./lib/dep.js as dep\nexport copied = dep.value",
    );
    source.insert_script("https://app.test/lib/dep.js", "export value = 42");
    let (host, evaluator) = memory_host(BASE, source);

    let ns = host.import("./main.js").await.unwrap();
    assert_eq!(ns.id(), "https://app.test/main.js");
    assert_eq!(ns.get("copied").unwrap().as_number(), Some(42.0));
    assert_eq!(
        evaluator.traced(),
        vec!["https://app.test/lib/dep.js", "https://app.test/main.js"]
    );
}

#[tokio::test]
async fn test_bare_specifier_through_import_map() {
    let source = MemorySource::new();
    source.insert_script("https://app.test/main.js", "import lodash as _\nexport v = _.version");
    source.insert_script("https://app.test/vendor/lodash.js", r#"export version = "4.17""#);
    let config = format!("{}\n[imports]\n\"lodash\" = \"./vendor/lodash.js\"\n", BASE);
    let (host, _) = memory_host(&config, source);

    let ns = host.import("./main.js").await.unwrap();
    assert_eq!(ns.get("v").unwrap().as_str(), Some("4.17"));
    assert!(host.loader().has("https://app.test/vendor/lodash.js"));
}

#[tokio::test]
async fn test_scoped_import_map() {
    let source = MemorySource::new();
    source.insert_script(
        "https://app.test/main.js",
        concat!(
            "import ./legacy/old.js as old\n",
            "import dep as dep\n",
            "export current = dep.v\n",
            "export legacy = old.v",
        ),
    );
    source.insert_script("https://app.test/legacy/old.js", "import dep as dep\nexport v = dep.v");
    source.insert_script("https://app.test/dep-v2.js", "export v = 2");
    source.insert_script("https://app.test/dep-v1.js", "export v = 1");
    let config = format!(
        concat!(
            "{}\n",
            "[imports]\n\"dep\" = \"./dep-v2.js\"\n",
            "[scopes.\"./legacy/\"]\n\"dep\" = \"./dep-v1.js\"\n",
        ),
        BASE
    );
    let (host, _) = memory_host(&config, source);

    let ns = host.import("./main.js").await.unwrap();
    assert_eq!(ns.get("current").unwrap().as_number(), Some(2.0));
    assert_eq!(ns.get("legacy").unwrap().as_number(), Some(1.0));
}

#[tokio::test]
async fn test_unmapped_bare_specifier() {
    let source = MemorySource::new();
    source.insert_script("https://app.test/main.js", "import react as r");
    let (host, _) = memory_host(BASE, source);

    let err = host.import("./main.js").await.unwrap_err();
    match &*err {
        LoaderError::Link { importer, specifier, source } => {
            assert_eq!(importer, "https://app.test/main.js");
            assert_eq!(specifier, "react");
            assert!(matches!(**source, LoaderError::UnresolvedSpecifier { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_import_map_added_after_build() {
    let source = MemorySource::new();
    source.insert_script("https://app.test/main.js", "import ui as ui\nexport name = ui.name");
    source.insert_script("https://app.test/components/ui.js", r#"export name = "button""#);
    let (host, _) = memory_host(BASE, source);

    let base = Url::parse("https://app.test/components/").unwrap();
    host.add_import_map(r#"{ "imports": { "ui": "./ui.js" } }"#, &base).unwrap();
    let ns = host.import("./main.js").await.unwrap();
    assert_eq!(ns.get("name").unwrap().as_str(), Some("button"));
}

#[tokio::test]
async fn test_intrinsic_module() {
    let source = MemorySource::new();
    source.insert_script(
        "https://app.test/main.js",
        "import std:math as math\nexport pi = math.PI",
    );
    let (host, _) = memory_host(BASE, source);

    let ns = host.import("./main.js").await.unwrap();
    assert_eq!(ns.get("pi").unwrap().as_number(), Some(std::f64::consts::PI));
    let math = host.loader().get("std:math").unwrap();
    assert!(math.contains("max"));
}

#[tokio::test]
async fn test_global_module() {
    let source = MemorySource::new();
    source.insert_script("https://app.test/main.js", "import @host as g\nexport answer = g.answer");
    let intrinsics = IntrinsicTable::new();
    intrinsics.set_global("answer", Value::from(42));
    let evaluator = ScriptEvaluator::new();
    let config = HostConfig::from_str(&format!("{}\nglobal_identifier = \"@host\"", BASE)).unwrap();
    let host = HostBuilder::new(config, evaluator)
        .with_source(source)
        .with_intrinsics(intrinsics)
        .build()
        .unwrap();

    let ns = host.import("./main.js").await.unwrap();
    assert_eq!(ns.get("answer").unwrap().as_number(), Some(42.0));
    let global = host.loader().get("@host").unwrap();
    assert!(global.contains("default"));
}

#[tokio::test]
async fn test_json_module() {
    let source = MemorySource::new();
    source.insert_script(
        "https://app.test/main.js",
        "import ./package.json as pkg\nexport manifest = pkg.default",
    );
    source.insert(
        "https://app.test/package.json",
        "application/json; charset=utf-8",
        r#"{ "name": "demo", "version": "1.0.0" }"#,
    );
    let (host, _) = memory_host(BASE, source);

    let ns = host.import("./main.js").await.unwrap();
    let manifest = ns.get("manifest").unwrap();
    assert_eq!(manifest.get("name").unwrap().as_str(), Some("demo"));
}

#[tokio::test]
async fn test_json_modules_disabled() {
    let source = MemorySource::new();
    source.insert("https://app.test/data.json", "application/json", "{}");
    let (host, _) = memory_host(&format!("{}\njson_modules = false", BASE), source);

    let err = host.import("./data.json").await.unwrap_err();
    match instantiation_reason(&err) {
        InstantiationFailure::ContentType(content_type) => {
            assert_eq!(content_type.as_deref(), Some("application/json"))
        }
        other => panic!("unexpected reason: {other}"),
    }
}

#[tokio::test]
async fn test_malformed_json() {
    let source = MemorySource::new();
    source.insert("https://app.test/data.json", "application/json", "{ nope");
    let (host, _) = memory_host(BASE, source);

    let err = host.import("./data.json").await.unwrap_err();
    assert!(matches!(instantiation_reason(&err), InstantiationFailure::Parse(_)));
}

#[tokio::test]
async fn test_fetch_status_is_reported() {
    let source = MemorySource::new();
    source.insert_response("https://app.test/private.js", FetchResponse::status(403, "Forbidden"));
    let (host, _) = memory_host(BASE, source);

    let missing = host.import("./missing.js").await.unwrap_err();
    match instantiation_reason(&missing) {
        InstantiationFailure::Fetch { status, status_text } => {
            assert_eq!(*status, 404);
            assert_eq!(status_text, "Not Found");
        }
        other => panic!("unexpected reason: {other}"),
    }
    let forbidden = host.import("./private.js").await.unwrap_err();
    assert!(matches!(
        instantiation_reason(&forbidden),
        InstantiationFailure::Fetch { status: 403, .. }
    ));
    assert!(forbidden.to_string().contains("403 Forbidden"));
}

#[tokio::test]
async fn test_unsupported_content_type() {
    let source = MemorySource::new();
    source.insert("https://app.test/style.css", "text/css", "body {}");
    let (host, _) = memory_host(BASE, source);

    let err = host.import("./style.css").await.unwrap_err();
    match instantiation_reason(&err) {
        InstantiationFailure::ContentType(content_type) => {
            assert_eq!(content_type.as_deref(), Some("text/css"))
        }
        other => panic!("unexpected reason: {other}"),
    }
}

#[tokio::test]
async fn test_evaluation_error() {
    let source = MemorySource::new();
    source.insert_script("https://app.test/broken.js", "this is not a module");
    let (host, _) = memory_host(BASE, source);

    let err = host.import("./broken.js").await.unwrap_err();
    match instantiation_reason(&err) {
        InstantiationFailure::Evaluation(thrown) => {
            assert!(thrown.message().contains("syntax error"))
        }
        other => panic!("unexpected reason: {other}"),
    }
}

#[tokio::test]
async fn test_script_without_registration() {
    let source = MemorySource::new();
    source.insert_script("https://app.test/silent.js", "noregister");
    let (host, _) = memory_host(BASE, source);

    let err = host.import("./silent.js").await.unwrap_err();
    assert!(matches!(instantiation_reason(&err), InstantiationFailure::NotRegistered));
    // The registration hook is closed again once the instantiation is over
    let late = host
        .loader()
        .register(Vec::<String>::new(), |_exports, _ctx| raya_loader::Declaration::new());
    assert!(matches!(late, Err(LoaderError::ReentrantRegistration)));
}

#[tokio::test]
async fn test_execution_error_from_script() {
    let source = MemorySource::new();
    source.insert_script("https://app.test/main.js", "import ./bad.js as bad\nexport ok = true");
    source.insert_script("https://app.test/bad.js", "throw kaboom");
    let (host, evaluator) = memory_host(BASE, source);

    let err = host.import("./main.js").await.unwrap_err();
    match &*err {
        LoaderError::Execution { id, source } => {
            assert_eq!(id, "https://app.test/bad.js");
            assert_eq!(source.message(), "kaboom");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(evaluator.traced(), vec!["https://app.test/bad.js"]);
}

#[tokio::test]
async fn test_hoisted_export_breaks_cycle() {
    let source = MemorySource::new();
    source.insert_script(
        "https://app.test/a.js",
        "import ./b.js as b\nhoist id = \"a\"\nexport fromB = b.seen",
    );
    source.insert_script("https://app.test/b.js", "import ./a.js as a\nexport seen = a.id");
    let (host, evaluator) = memory_host(BASE, source);

    let ns = host.import("./a.js").await.unwrap();
    assert_eq!(ns.get("fromB").unwrap().as_str(), Some("a"));
    assert_eq!(evaluator.traced(), vec!["https://app.test/b.js", "https://app.test/a.js"]);
}

struct NeverSource;

impl SourceProvider for NeverSource {
    fn fetch(&self, _url: &Url) -> LocalBoxFuture<'static, Result<FetchResponse, FetchError>> {
        future::pending().boxed_local()
    }
}

#[tokio::test]
async fn test_fetch_timeout() {
    let evaluator = ScriptEvaluator::new();
    let config = HostConfig::from_str(&format!("{}\nfetch_timeout_ms = 20", BASE)).unwrap();
    let host = HostBuilder::new(config, evaluator)
        .with_source(NeverSource)
        .build()
        .unwrap();

    let err = host.import("./slow.js").await.unwrap_err();
    assert!(matches!(instantiation_reason(&err), InstantiationFailure::Timeout(_)));
}

#[tokio::test]
async fn test_host_reports_load_events() {
    let source = MemorySource::new();
    source.insert_script("https://app.test/main.js", "import ./dep.js as dep");
    source.insert_script("https://app.test/dep.js", "export x = 1");
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    let host = HostBuilder::new(HostConfig::from_str(BASE).unwrap(), ScriptEvaluator::new())
        .with_source(source)
        .with_on_load(move |event| sink.borrow_mut().push(event.id.clone()))
        .build()
        .unwrap();

    host.import("./main.js").await.unwrap();
    assert_eq!(
        *events.borrow(),
        vec!["https://app.test/dep.js".to_string(), "https://app.test/main.js".to_string()]
    );
}
