//! End-to-end pipeline scenarios over a real engine and a scratch root.

use ds_cache::store::{ArtifactStore, StorePolicy};
use ds_core::config::RootConfig;
use ds_core::layout::{RootLayout, CACHE_SUBDIRS};
use ds_core::secrets::SecretsVault;
use ds_engine::pool::EnginePool;
use ds_report::registry::ReportRegistry;
use ds_runtime::Dispatcher;
use std::sync::Arc;
use std::time::Duration;

struct TestRoot {
    _dir: tempfile::TempDir,
    dispatcher: Arc<Dispatcher>,
}

fn make_root(reports: &[(&str, &str)]) -> TestRoot {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.toml"), "name = 'demo'\n").unwrap();
    for name in ["reports", "composites"] {
        std::fs::create_dir_all(dir.path().join(name)).unwrap();
    }
    for name in CACHE_SUBDIRS {
        std::fs::create_dir_all(dir.path().join("cache").join(name)).unwrap();
    }
    for (rel, sql) in reports {
        let path = dir.path().join("reports").join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, sql).unwrap();
    }

    let config = RootConfig::load_from_dir(dir.path()).unwrap();
    let layout = RootLayout::validate(dir.path()).unwrap();
    let registry = Arc::new(ReportRegistry::open(&layout.reports).unwrap());
    let store = ArtifactStore::new(
        layout,
        StorePolicy {
            default_ttl: Duration::from_secs(300),
            soft_timeout: Duration::from_secs(30),
            hard_timeout: Duration::from_secs(300),
            stale_while_revalidate: false,
        },
    );
    let pool = Arc::new(EnginePool::new(4));
    let vault = Arc::new(SecretsVault::empty());

    TestRoot {
        dispatcher: Arc::new(Dispatcher::new(config, registry, store, pool, vault)),
        _dir: dir,
    }
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const ROLLING_LATENCY: &str = "/***PARAMS\nRegion:\n  type: Optional[str]\n  scope: data\nDayWindow:\n  type: Optional[int]\n  scope: data\n***/\nWITH base AS MATERIALIZE (\n  SELECT n AS day, 10 * n AS latency, CASE WHEN n % 2 = 0 THEN 'north' ELSE 'south' END AS region\n  FROM range(6) t(n)\n)\nSELECT day, latency FROM base\nWHERE ({{param Region}} IS NULL OR region = {{param Region}})\n  AND ({{param DayWindow}} IS NULL OR day < {{param DayWindow}});\n";

const SEGMENT_FOCUS: &str = "/***PARAMS\nSegment:\n  type: str\n  scope: data\nShard:\n  type: Optional[int]\n  scope: hybrid\n***/\n/***BINDINGS\n- id: segment_label\n  source: lookup\n  key_param: Segment\n  key_column: segment\n  value_column: label\n  kind: demo\n***/\nWITH lookup AS MATERIALIZE_CLOSED (\n  SELECT * FROM (VALUES ('alpha', 'Fast lane'), ('beta', 'Slow lane')) AS t(segment, label)\n)\nSELECT s.shard, {{bind segment_label}} AS label\nFROM (SELECT n AS shard FROM range(4) t(n)) s\nWHERE {{param Shard}} IS NULL OR s.shard = {{param Shard}};\n";

/// Rolling latency demo: identical URLs within the TTL reuse the artifact
/// byte-for-byte (the file is not rewritten).
#[test]
fn test_identical_requests_reuse_artifact() {
    let root = make_root(&[("deep_demos/speed/rolling_latency.sql", ROLLING_LATENCY)]);
    let params = pairs(&[("Region", "north"), ("DayWindow", "2")]);

    let first = root
        .dispatcher
        .dispatch("deep_demos/speed/rolling_latency", &params)
        .unwrap();
    assert!(first.base_parquet.starts_with("cache/artifacts/"));
    assert!(first.materialize.contains_key("base"));

    let base_abs = root
        .dispatcher
        .store()
        .layout()
        .root
        .join(&first.base_parquet);
    let mtime_before = std::fs::metadata(&base_abs).unwrap().modified().unwrap();
    let copies_before = root.dispatcher.pool().executions();

    let second = root
        .dispatcher
        .dispatch("deep_demos/speed/rolling_latency", &params)
        .unwrap();
    assert_eq!(first.base_parquet, second.base_parquet);
    assert_eq!(first.materialize, second.materialize);
    assert_eq!(
        std::fs::metadata(&base_abs).unwrap().modified().unwrap(),
        mtime_before,
        "cache hit must not rewrite the artifact"
    );
    assert_eq!(root.dispatcher.pool().executions(), copies_before);
}

/// Binding demo: the manifest carries the looked-up label and the base is
/// filtered server-side.
#[test]
fn test_binding_resolves_partition() {
    let root = make_root(&[("deep_demos/bindings/segment_focus.sql", SEGMENT_FOCUS)]);

    let manifest = root
        .dispatcher
        .dispatch(
            "deep_demos/bindings/segment_focus",
            &pairs(&[("Segment", "alpha"), ("Shard", "2")]),
        )
        .unwrap();

    assert_eq!(
        manifest.bindings.get("segment_label"),
        Some(&"Fast lane".to_string())
    );

    let session = root.dispatcher.pool().acquire().unwrap();
    let path = root
        .dispatcher
        .store()
        .layout()
        .root
        .join(&manifest.base_parquet);
    let count = session
        .query_count(&format!(
            "SELECT * FROM parquet_scan('{}')",
            path.to_string_lossy()
        ))
        .unwrap();
    assert_eq!(count, 1, "only the shard=2 row is in the base");
}

/// Client-only hint: `__client__Shard` leaves the base artifact untouched
/// and surfaces the value through client_params.
#[test]
fn test_client_hint_preserves_base() {
    let root = make_root(&[("deep_demos/bindings/segment_focus.sql", SEGMENT_FOCUS)]);

    let server_only = root
        .dispatcher
        .dispatch(
            "deep_demos/bindings/segment_focus",
            &pairs(&[("Segment", "alpha")]),
        )
        .unwrap();
    let with_hint = root
        .dispatcher
        .dispatch(
            "deep_demos/bindings/segment_focus",
            &pairs(&[("Segment", "alpha"), ("__client__Shard", "2")]),
        )
        .unwrap();

    assert_eq!(server_only.base_parquet, with_hint.base_parquet);
    assert_eq!(with_hint.client_params.get("Shard"), Some(&"2".to_string()));
    assert!(server_only.client_params.is_empty());
}

/// Import fan-out: the shared base is built once and reused by the parent.
#[test]
fn test_import_fan_out() {
    let shared = "WITH stories AS (\n  SELECT * FROM (VALUES ('routing', 'alpha'), ('routing', 'beta'), ('ingest', 'alpha')) AS t(topic, variant)\n)\nSELECT * FROM stories;\n";
    let drilldown = "/***PARAMS\nTopic:\n  type: Optional[str]\n  scope: data\nFocusVariant:\n  type: Optional[str]\n  scope: data\n***/\n/***IMPORTS\n- id: stories\n  report: deep_demos/imports/shared_base\n  pass_params: []\n***/\nWITH pulled AS (\n  SELECT * FROM parquet_scan({{import stories}})\n)\nSELECT topic, variant FROM pulled\nWHERE ({{param Topic}} IS NULL OR topic = {{param Topic}})\n  AND ({{param FocusVariant}} IS NULL OR variant = {{param FocusVariant}});\n";
    let root = make_root(&[
        ("deep_demos/imports/shared_base.sql", shared),
        ("deep_demos/imports/topic_drilldown.sql", drilldown),
    ]);

    let routing = root
        .dispatcher
        .dispatch(
            "deep_demos/imports/topic_drilldown",
            &pairs(&[("Topic", "routing"), ("FocusVariant", "beta")]),
        )
        .unwrap();
    let copies_after_first = root.dispatcher.pool().executions();

    // a second parent with different params reuses the child's base: only
    // the parent's own base is rebuilt
    let ingest = root
        .dispatcher
        .dispatch(
            "deep_demos/imports/topic_drilldown",
            &pairs(&[("Topic", "ingest")]),
        )
        .unwrap();
    assert_ne!(routing.base_parquet, ingest.base_parquet);
    assert_eq!(
        root.dispatcher.pool().executions(),
        copies_after_first + 1,
        "the imported base is reused, not rebuilt"
    );
}

/// Single-flight: many concurrent identical requests invoke the engine at
/// most once per plan node.
#[test]
fn test_single_flight_under_concurrent_requests() {
    let root = make_root(&[("deep_demos/speed/rolling_latency.sql", ROLLING_LATENCY)]);
    let params = pairs(&[("Region", "north"), ("DayWindow", "2")]);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let dispatcher = Arc::clone(&root.dispatcher);
        let params = params.clone();
        handles.push(std::thread::spawn(move || {
            dispatcher.dispatch("deep_demos/speed/rolling_latency", &params)
        }));
    }
    let manifests: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    let first = &manifests[0];
    for manifest in &manifests {
        assert_eq!(manifest.base_parquet, first.base_parquet);
    }

    // two plan nodes: the materialization and the base
    assert_eq!(
        root.dispatcher.pool().executions(),
        2,
        "one engine invocation per plan node"
    );
}

/// Deterministic fingerprints: URL parameter order is irrelevant.
#[test]
fn test_param_order_does_not_change_artifact() {
    let root = make_root(&[("deep_demos/speed/rolling_latency.sql", ROLLING_LATENCY)]);

    let a = root
        .dispatcher
        .dispatch(
            "deep_demos/speed/rolling_latency",
            &pairs(&[("Region", "north"), ("DayWindow", "2")]),
        )
        .unwrap();
    let b = root
        .dispatcher
        .dispatch(
            "deep_demos/speed/rolling_latency",
            &pairs(&[("DayWindow", "2"), ("Region", "north")]),
        )
        .unwrap();
    assert_eq!(a.base_parquet, b.base_parquet);
}

/// Unknown reports surface the 404-shaped error.
#[test]
fn test_unknown_report_not_found() {
    let root = make_root(&[]);
    let err = root.dispatcher.dispatch("nope/missing", &[]).unwrap_err();
    assert_eq!(err.code(), "ReportNotFound");
}
