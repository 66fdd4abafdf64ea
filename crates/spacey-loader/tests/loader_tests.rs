//! Loader Integration Tests
//!
//! End-to-end loading through the in-memory and filesystem script hosts.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use spacey_loader::{
    Bootstrap, CatalogHost, DefineScope, Domain, DomainConfig, Factory, FsHost, LoaderError,
    ReadyState, ScriptElement, ScriptHost, ScriptRequest, Setup, Status,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn domain_with(host: &CatalogHost, base_url: &str) -> Domain {
    let config = DomainConfig {
        base_url: base_url.to_string(),
        ..DomainConfig::default()
    };
    Domain::new(config, Arc::new(host.clone())).unwrap()
}

fn leaf(name: &'static str) -> Factory {
    Factory::new("function(require, exports){}", move |_, exports, _| {
        exports.set("name", json!(name));
        Ok(None)
    })
}

#[tokio::test]
async fn test_factory_runs_once() {
    let host = CatalogHost::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    host.register(
        "/app/a.js",
        Factory::new(
            "function(require, exports){ exports.b = require('./b').name }",
            move |require, exports, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                let b = require.get("./b")?;
                exports.set("b", b.get("name").unwrap_or_default());
                Ok(None)
            },
        ),
    );
    host.register("/app/b.js", leaf("b"));
    let domain = domain_with(&host, "/app/");

    let first = timeout(WAIT, domain.load("a")).await.unwrap().unwrap();
    let second = timeout(WAIT, domain.load("a")).await.unwrap().unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(first[0].ptr_eq(&second[0]));
    assert_eq!(first[0].get("b"), Some(json!("b")));
    assert_eq!(domain.module("/app/a.js").unwrap().status(), Status::Executed);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let host = CatalogHost::new();
    host.register("/x.js", leaf("x"));
    let domain = domain_with(&host, "/");

    let (tx, mut rx) = mpsc::unbounded_channel();
    for _ in 0..2 {
        let tx = tx.clone();
        domain
            .run("x", move |result| {
                let _ = tx.send(result);
            })
            .unwrap();
    }

    for _ in 0..2 {
        let exports = timeout(WAIT, rx.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(exports[0].get("name"), Some(json!("x")));
    }
    assert_eq!(host.fetch_count("/x.js"), 1);
}

#[tokio::test]
async fn test_duplicate_references_share_a_module() {
    let host = CatalogHost::new();
    host.register(
        "/main.js",
        Factory::inert("function(require){ require('a'); require('b'); require('a') }"),
    );
    host.register("/a.js", leaf("a"));
    host.register("/b.js", leaf("b"));
    let domain = domain_with(&host, "/");

    let exports = timeout(WAIT, domain.load(["a", "b", "a"]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exports.len(), 3);
    assert!(exports[0].ptr_eq(&exports[2]));
    assert!(!exports[0].ptr_eq(&exports[1]));

    timeout(WAIT, domain.load("main")).await.unwrap().unwrap();
    let main = domain.module("/main.js").unwrap();
    assert_eq!(main.references(), vec!["a", "b", "a"]);
    let dependencies = main.dependencies();
    assert_eq!(dependencies.len(), 3);
    assert!(Arc::ptr_eq(&dependencies[0], &dependencies[2]));
    assert_eq!(dependencies[1].url(), "/b.js");
    assert_eq!(host.fetch_count("/a.js"), 1);
}

#[tokio::test]
async fn test_fetch_failure_propagates() {
    let host = CatalogHost::new();
    host.register("/main.js", Factory::inert("function(require){ require('./mid') }"));
    host.register("/mid.js", Factory::inert("function(require){ require('./missing') }"));
    let domain = domain_with(&host, "/");

    let err = timeout(WAIT, domain.load("main")).await.unwrap().unwrap_err();
    assert!(matches!(err, LoaderError::Fetch { ref url, .. } if url == "/missing.js"));

    for url in ["/missing.js", "/mid.js", "/main.js"] {
        let module = domain.module(url).unwrap();
        assert_eq!(module.status(), Status::Error, "{url}");
        assert_eq!(module.exports().unwrap_err(), err);
    }
}

#[tokio::test]
async fn test_registered_failure_is_reported() {
    let host = CatalogHost::new();
    host.register_failure("/broken.js", "HTTP 500");
    let domain = domain_with(&host, "/");

    let err = timeout(WAIT, domain.load("broken")).await.unwrap().unwrap_err();
    assert!(matches!(err, LoaderError::Fetch { ref url, .. } if url == "/broken.js"));
}

#[tokio::test]
async fn test_cycle_is_detected() {
    let host = CatalogHost::new();
    host.register("/a.js", Factory::inert("function(require){ require('./b') }"));
    host.register("/b.js", Factory::inert("function(require){ require('./a') }"));
    let domain = domain_with(&host, "/");

    let err = timeout(WAIT, domain.load("a")).await.unwrap().unwrap_err();
    match err {
        LoaderError::Cycle { path } => {
            assert!(path.contains("/a.js"));
            assert!(path.contains("/b.js"));
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert_eq!(domain.module("/a.js").unwrap().status(), Status::Error);
    assert_eq!(domain.module("/b.js").unwrap().status(), Status::Error);
}

#[tokio::test]
async fn test_self_dependency_is_a_cycle() {
    let host = CatalogHost::new();
    host.register("/self.js", Factory::inert("function(require){ require('./self') }"));
    let domain = domain_with(&host, "/");

    let err = timeout(WAIT, domain.load("self")).await.unwrap().unwrap_err();
    assert_eq!(
        err,
        LoaderError::Cycle {
            path: "/self.js -> /self.js".to_string()
        }
    );
}

#[tokio::test]
async fn test_undeclared_require_is_not_found() {
    let host = CatalogHost::new();
    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    host.register(
        "/main.js",
        Factory::new("function(require){}", move |require, _, _| {
            *slot.lock() = require.get("./elsewhere").err();
            Ok(None)
        }),
    );
    let domain = domain_with(&host, "/");

    timeout(WAIT, domain.load("main")).await.unwrap().unwrap();
    assert_eq!(
        seen.lock().clone(),
        Some(LoaderError::DependencyNotFound {
            reference: "./elsewhere".to_string(),
            url: "/main.js".to_string(),
        })
    );
}

#[tokio::test]
async fn test_exports_before_loaded() {
    let host = CatalogHost::new();
    host.register("/slow.js", leaf("slow"));
    let domain = domain_with(&host, "/");

    let (tx, rx) = tokio::sync::oneshot::channel();
    domain
        .run("slow", move |result| {
            let _ = tx.send(result);
        })
        .unwrap();

    let module = domain.module("/slow.js").unwrap();
    assert_eq!(
        module.exports().unwrap_err(),
        LoaderError::NotLoaded {
            url: "/slow.js".to_string(),
            status: Status::Fetching,
        }
    );
    timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_factory_failure() {
    let host = CatalogHost::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    host.register(
        "/bad.js",
        Factory::new("function(){ throw new Error('boom') }", move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("boom"))
        }),
    );
    let domain = domain_with(&host, "/");

    let err = timeout(WAIT, domain.load("bad")).await.unwrap().unwrap_err();
    assert!(matches!(err, LoaderError::Factory { ref message, .. } if message.contains("boom")));

    let module = domain.module("/bad.js").unwrap();
    assert_eq!(module.status(), Status::Error);
    assert!(module.exports().is_err());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_returned_value_replaces_exports() {
    let host = CatalogHost::new();
    host.register(
        "/answer.js",
        Factory::new("function(){ return 42 }", |_, _, _| Ok(Some(json!(42)))),
    );
    let domain = domain_with(&host, "/");

    let exports = timeout(WAIT, domain.load("answer")).await.unwrap().unwrap();
    assert_eq!(exports[0].value(), json!(42));
}

#[tokio::test]
async fn test_legacy_host_polls_ready_state() {
    let host = CatalogHost::legacy();
    host.register("/lib/old.js", leaf("old"));
    let config = DomainConfig {
        poll_interval_ms: 5,
        ..DomainConfig::default()
    };
    let domain = Domain::new(config, Arc::new(host.clone())).unwrap();

    let exports = timeout(WAIT, domain.load("lib/old")).await.unwrap().unwrap();
    assert_eq!(exports[0].get("name"), Some(json!("old")));
}

#[tokio::test]
async fn test_elements_are_removed() {
    let host = CatalogHost::new();
    host.register("/a.js", Factory::inert("function(require){ require('./b') }"));
    host.register("/b.js", leaf("b"));
    host.register_failure("/c.js", "404");
    let domain = domain_with(&host, "/");

    timeout(WAIT, domain.load("a")).await.unwrap().unwrap();
    assert!(timeout(WAIT, domain.load("c")).await.unwrap().is_err());
    assert_eq!(host.attached(), 0);
    assert_eq!(host.fetch_count("/b.js"), 1);
}

#[tokio::test]
async fn test_silent_script_loads_without_dependencies() {
    let host = CatalogHost::new();
    host.register_silent("/plain.js");
    let domain = domain_with(&host, "/");

    let exports = timeout(WAIT, domain.load("plain")).await.unwrap().unwrap();
    assert_eq!(exports[0].value(), json!({}));
    assert!(!domain.module("/plain.js").unwrap().has_factory());
}

#[tokio::test]
async fn test_require_load_async_is_relative_to_module() {
    let host = CatalogHost::new();
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Mutex::new(Some(tx));
    host.register(
        "/app/main.js",
        Factory::new("function(require){}", move |require, _, _| {
            let tx = tx.lock().take();
            require.load_async("./lazy", move |result| {
                if let Some(tx) = tx {
                    let _ = tx.send(result);
                }
            })?;
            Ok(None)
        }),
    );
    host.register("/app/lazy.js", leaf("lazy"));
    let domain = domain_with(&host, "/");

    timeout(WAIT, domain.load("app/main")).await.unwrap().unwrap();
    let lazy = timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
    assert_eq!(lazy[0].get("name"), Some(json!("lazy")));
    assert!(domain.module("/app/lazy.js").is_some());
}

#[tokio::test]
async fn test_require_resolve_is_relative_to_module() {
    let host = CatalogHost::new();
    let resolved = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&resolved);
    host.register(
        "/sub/main.js",
        Factory::new("function(require){}", move |require, _, _| {
            let mut slot = slot.lock();
            slot.push(require.resolve("./x")?);
            slot.push(require.resolve("../top")?);
            slot.push(require.resolve("lib/y")?);
            Ok(None)
        }),
    );
    let domain = domain_with(&host, "/app/");

    timeout(WAIT, domain.load("/sub/main")).await.unwrap().unwrap();
    assert_eq!(
        *resolved.lock(),
        vec!["/sub/x.js", "/top.js", "/app/lib/y.js"]
    );
    assert!(domain.module("/sub/x.js").is_none());
}

#[tokio::test]
async fn test_reentrant_exports_read_sees_object_in_progress() {
    let host = CatalogHost::new();
    let observed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    host.register(
        "/live.js",
        Factory::new("function(require, exports){}", move |require, exports, _| {
            exports.set("early", json!(true));
            let during = require.module().exports()?;
            assert_eq!(require.module().status(), Status::Executing);
            *slot.lock() = Some((during.ptr_eq(exports), during.get("early")));
            exports.set("late", json!(true));
            Ok(None)
        }),
    );
    let domain = domain_with(&host, "/");

    let exports = timeout(WAIT, domain.load("live")).await.unwrap().unwrap();
    assert_eq!(*observed.lock(), Some((true, Some(json!(true)))));
    assert_eq!(exports[0].get("late"), Some(json!(true)));
}

/// Host that keeps every define scope and element attribute it sees
#[derive(Default)]
struct RecordingHost {
    scopes: Mutex<Vec<DefineScope>>,
    attributes: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl ScriptHost for RecordingHost {
    async fn insert(&self, request: ScriptRequest) -> spacey_loader::Result<ScriptElement> {
        let (element, ready) = ScriptElement::new(request.url.clone());
        self.scopes.lock().push(request.scope.clone());
        self.attributes
            .lock()
            .push((request.charset.clone(), request.crossorigin.clone()));
        request.scope.define(Factory::inert("function(){}"))?;
        ready.set(ReadyState::Complete);
        Ok(element)
    }

    fn remove(&self, _element: &ScriptElement) {}
}

#[tokio::test]
async fn test_stale_define_scope_is_rejected() {
    let host = Arc::new(RecordingHost::default());
    let domain = Domain::new(DomainConfig::default(), host.clone()).unwrap();

    timeout(WAIT, domain.load("once")).await.unwrap().unwrap();
    let scope = host.scopes.lock()[0].clone();
    let err = scope.define(Factory::inert("function(){}")).unwrap_err();
    assert!(matches!(err, LoaderError::Argument(_)));
}

#[tokio::test]
async fn test_element_attributes_follow_config() {
    let host = Arc::new(RecordingHost::default());
    let config = DomainConfig {
        charset: "gbk".to_string(),
        crossorigin: Some("anonymous".to_string()),
        ..DomainConfig::default()
    };
    let domain = Domain::new(config, host.clone()).unwrap();

    timeout(WAIT, domain.load("styled")).await.unwrap().unwrap();
    assert_eq!(
        *host.attributes.lock(),
        vec![("gbk".to_string(), Some("anonymous".to_string()))]
    );

    domain
        .configure(Setup {
            charset: Some("utf-8".to_string()),
            ..Setup::default()
        })
        .unwrap();
    timeout(WAIT, domain.load("plain")).await.unwrap().unwrap();
    assert_eq!(
        host.attributes.lock()[1],
        ("utf-8".to_string(), Some("anonymous".to_string()))
    );
}

#[tokio::test]
async fn test_define_rejects_empty_factory() {
    let host = Arc::new(RecordingHost::default());
    let domain = Domain::new(DomainConfig::default(), host.clone()).unwrap();
    timeout(WAIT, domain.load("x")).await.unwrap().unwrap();

    let scope = host.scopes.lock()[0].clone();
    assert!(matches!(
        scope.define(Factory::inert("  ")),
        Err(LoaderError::Argument(_))
    ));
}

#[tokio::test]
async fn test_fs_host_walks_graph() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("lib")).unwrap();
    std::fs::write(
        dir.path().join("main.js"),
        "define(function(require) { var util = require('./lib/util'); })",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("lib/util.js"),
        "define(function(require) { return require('../shared'); })",
    )
    .unwrap();
    std::fs::write(dir.path().join("shared.js"), "").unwrap();

    let host = FsHost::new(dir.path(), "/app/");
    let config = DomainConfig {
        base_url: "/app/".to_string(),
        ..DomainConfig::default()
    };
    let domain = Domain::new(config, Arc::new(host.clone())).unwrap();

    timeout(WAIT, domain.load("main")).await.unwrap().unwrap();
    assert_eq!(
        domain.registry().urls(),
        vec!["/app/main.js", "/app/lib/util.js", "/app/shared.js"]
    );
    assert!(
        domain
            .modules()
            .iter()
            .all(|module| module.status().has_reached(Status::Loaded))
    );
    assert_eq!(host.attached(), 0);
}

#[tokio::test]
async fn test_fs_host_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let host = FsHost::new(dir.path(), "/");
    let domain = Domain::new(DomainConfig::default(), Arc::new(host)).unwrap();

    let err = timeout(WAIT, domain.load("nothing")).await.unwrap().unwrap_err();
    assert!(matches!(err, LoaderError::Fetch { ref url, .. } if url == "/nothing.js"));
}

#[tokio::test]
async fn test_bootstrap_configures_and_runs_main() {
    let host = CatalogHost::new();
    host.register("/static/app.js", leaf("app"));
    let domain = domain_with(&host, "/");

    let bootstrap = Bootstrap::from_attributes(|name| match name {
        "data-baseurl" => Some("/static/".to_string()),
        "data-main" => Some("app".to_string()),
        _ => None,
    });
    bootstrap.apply(&domain).unwrap();
    assert_eq!(domain.base_url(), "/static/");

    let exports = timeout(WAIT, domain.load("app")).await.unwrap().unwrap();
    assert_eq!(exports[0].get("name"), Some(json!("app")));
    assert_eq!(host.fetch_count("/static/app.js"), 1);
}

#[tokio::test]
async fn test_configure_rejects_empty_charset() {
    let domain = domain_with(&CatalogHost::new(), "/");
    let setup = Setup {
        charset: Some(String::new()),
        ..Setup::default()
    };
    assert!(matches!(domain.configure(setup), Err(LoaderError::Config(_))));
}

#[tokio::test]
async fn test_empty_reference_is_rejected() {
    let domain = domain_with(&CatalogHost::new(), "/");
    assert!(matches!(
        domain.run(vec!["a", ""], |_| {}),
        Err(LoaderError::Argument(_))
    ));
}

#[test]
fn test_domain_needs_runtime() {
    let err = Domain::new(DomainConfig::default(), Arc::new(CatalogHost::new())).unwrap_err();
    assert!(matches!(err, LoaderError::Runtime(_)));
}
