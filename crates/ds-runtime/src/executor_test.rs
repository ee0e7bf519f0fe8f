use crate::dispatch::Dispatcher;
use ds_cache::store::{ArtifactStore, StorePolicy};
use ds_core::config::RootConfig;
use ds_core::error::CoreError;
use ds_core::layout::{RootLayout, CACHE_SUBDIRS};
use ds_core::secrets::SecretsVault;
use ds_engine::pool::EnginePool;
use ds_report::registry::ReportRegistry;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    _dir: tempfile::TempDir,
    dispatcher: Dispatcher,
}

fn harness(reports: &[(&str, &str)]) -> Harness {
    harness_with_config(reports, "")
}

fn harness_with_config(reports: &[(&str, &str)], config_extra: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        format!("name = 'demo'\n{config_extra}"),
    )
    .unwrap();
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

    let mut secret_names: Vec<String> = Vec::new();
    for record in registry.snapshot().records() {
        if let Ok(report) = &record.parsed {
            secret_names.extend(report.blocks.secrets.iter().cloned());
        }
    }
    secret_names.sort();
    secret_names.dedup();
    let vault = Arc::new(
        SecretsVault::load(
            &secret_names,
            config.secrets_file_path(&layout.root).as_deref(),
        )
        .unwrap(),
    );

    let store = ArtifactStore::new(
        layout,
        StorePolicy {
            default_ttl: Duration::from_secs(config.cache.ttl_seconds),
            soft_timeout: Duration::from_secs(config.limits.soft_timeout_seconds),
            hard_timeout: Duration::from_secs(config.limits.hard_timeout_seconds),
            stale_while_revalidate: config.cache.stale_while_revalidate,
        },
    );
    let pool = Arc::new(EnginePool::new(2));

    Harness {
        dispatcher: Dispatcher::new(config, registry, store, pool, vault),
        _dir: dir,
    }
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn read_parquet(harness: &Harness, relative: &str) -> Vec<Vec<String>> {
    let root = harness.dispatcher.store().layout().root.clone();
    let session = harness.dispatcher.pool().acquire().unwrap();
    let path = root.join(relative);
    let sql = format!(
        "SELECT * FROM parquet_scan('{}') ",
        path.to_string_lossy().replace('\'', "''")
    );
    // one column per test fixture keeps row reading simple
    session
        .query_strings(&sql)
        .unwrap()
        .into_iter()
        .map(|v| vec![v])
        .collect()
}

const FILTER_REPORT: &str = "/***PARAMS\nWidget:\n  type: Optional[int]\n  scope: data\n***/\nWITH base AS (\n  SELECT * FROM (VALUES (1),(2)) AS t(id)\n)\nSELECT id FROM base WHERE {{param Widget}} IS NULL OR id = {{param Widget}};\n";

#[test]
fn test_param_splice_filters_rows() {
    let h = harness(&[("demo/example.sql", FILTER_REPORT)]);

    let manifest = h
        .dispatcher
        .dispatch("demo/example", &pairs(&[("Widget", "2")]))
        .unwrap();
    let rows = read_parquet(&h, &manifest.base_parquet);
    assert_eq!(rows, vec![vec!["2".to_string()]]);
}

#[test]
fn test_absent_param_splices_null() {
    let h = harness(&[("demo/example.sql", FILTER_REPORT)]);

    let manifest = h.dispatcher.dispatch("demo/example", &[]).unwrap();
    let rows = read_parquet(&h, &manifest.base_parquet);
    assert_eq!(rows.len(), 2, "NULL filter keeps every row");
}

#[test]
fn test_different_params_different_artifacts() {
    let h = harness(&[("demo/example.sql", FILTER_REPORT)]);

    let one = h
        .dispatcher
        .dispatch("demo/example", &pairs(&[("Widget", "1")]))
        .unwrap();
    let two = h
        .dispatcher
        .dispatch("demo/example", &pairs(&[("Widget", "2")]))
        .unwrap();
    assert_ne!(one.base_parquet, two.base_parquet);
}

#[test]
fn test_materialization_published_and_referenced() {
    let sql = "/***PARAMS\nDayWindow:\n  type: Optional[int]\n  scope: data\n***/\nWITH rolling AS MATERIALIZE (\n  SELECT n, {{param DayWindow}} AS w FROM range(4) t(n)\n)\nSELECT n FROM rolling WHERE w IS NULL OR n < w;\n";
    let h = harness(&[("speed/rolling_latency.sql", sql)]);

    let manifest = h
        .dispatcher
        .dispatch("speed/rolling_latency", &pairs(&[("DayWindow", "2")]))
        .unwrap();

    assert!(manifest.base_parquet.starts_with("cache/artifacts/"));
    let mat_path = manifest.materialize.get("rolling").unwrap();
    assert!(mat_path.starts_with("cache/materialize/"));

    let rows = read_parquet(&h, &manifest.base_parquet);
    assert_eq!(rows.len(), 2);
}

#[test]
fn test_binding_resolves_value_from_materialization() {
    let sql = "/***PARAMS\nSegment:\n  type: str\n  scope: data\n***/\n/***BINDINGS\n- id: segment_label\n  source: lookup\n  key_param: Segment\n  key_column: segment\n  value_column: label\n  kind: demo\n***/\nWITH lookup AS MATERIALIZE_CLOSED (\n  SELECT * FROM (VALUES ('alpha', 'Fast lane'), ('beta', 'Slow lane')) AS t(segment, label)\n)\nSELECT {{bind segment_label}} AS label;\n";
    let h = harness(&[("bindings/segment_focus.sql", sql)]);

    let manifest = h
        .dispatcher
        .dispatch("bindings/segment_focus", &pairs(&[("Segment", "alpha")]))
        .unwrap();

    assert_eq!(
        manifest.bindings.get("segment_label"),
        Some(&"Fast lane".to_string())
    );
    let rows = read_parquet(&h, &manifest.base_parquet);
    assert_eq!(rows, vec![vec!["Fast lane".to_string()]]);
}

#[test]
fn test_binding_without_server_param_fails() {
    let sql = "/***PARAMS\nSegment:\n  type: Optional[str]\n  scope: data\n***/\n/***BINDINGS\n- id: label\n  source: lookup\n  key_param: Segment\n  key_column: segment\n  value_column: label\n  kind: demo\n***/\nWITH lookup AS MATERIALIZE_CLOSED (\n  SELECT 'alpha' AS segment, 'Fast lane' AS label\n)\nSELECT {{bind label}};\n";
    let h = harness(&[("bindings/missing_key.sql", sql)]);

    let err = h.dispatcher.dispatch("bindings/missing_key", &[]).unwrap_err();
    assert!(matches!(err, CoreError::SqlExecutionError { .. }));
    assert!(err.to_string().contains("requires server parameter"));
}

#[test]
fn test_binding_key_sql_mode() {
    let sql = "/***PARAMS\nBarcode:\n  type: str\n  scope: data\n***/\n/***BINDINGS\n- id: key_lookup\n  source: lookup\n  key_sql: \"SELECT substr({{param Barcode}}, 1, 3) AS key\"\n  key_column: key\n  value_column: value\n  kind: demo\n***/\nWITH lookup AS MATERIALIZE_CLOSED (\n  SELECT * FROM (VALUES ('ABC', 'alpha'), ('XYZ', 'omega')) AS t(key, value)\n)\nSELECT {{bind key_lookup}} AS bound;\n";
    let h = harness(&[("bindings/key_sql.sql", sql)]);

    let manifest = h
        .dispatcher
        .dispatch("bindings/key_sql", &pairs(&[("Barcode", "ABC-123")]))
        .unwrap();
    assert_eq!(manifest.bindings.get("key_lookup"), Some(&"alpha".to_string()));
}

#[test]
fn test_binding_key_sql_list_mode() {
    let sql = "/***PARAMS\nBarcode:\n  type: str\n  scope: data\n***/\n/***BINDINGS\n- id: files\n  source: lookup\n  key_sql: \"SELECT substr({{param Barcode}}, 1, 2) || suffix AS key FROM (VALUES ('01'), ('02')) AS t(suffix)\"\n  key_column: key\n  value_column: file_path\n  value_mode: list\n  kind: demo\n***/\nWITH lookup AS MATERIALIZE_CLOSED (\n  SELECT * FROM (VALUES ('AA01', 'file1.parquet'), ('AA02', 'file2.parquet')) AS t(key, file_path)\n)\nSELECT {{bind files}} AS selected;\n";
    let h = harness(&[("bindings/list_mode.sql", sql)]);

    let manifest = h
        .dispatcher
        .dispatch("bindings/list_mode", &pairs(&[("Barcode", "AA999")]))
        .unwrap();
    let value = manifest.bindings.get("files").unwrap();
    assert!(value.contains("file1.parquet") && value.contains("file2.parquet"));
}

#[test]
fn test_binding_multiple_values_single_mode_rejected() {
    let sql = "/***PARAMS\nKey:\n  type: str\n  scope: data\n***/\n/***BINDINGS\n- id: multi\n  source: lookup\n  key_param: Key\n  key_column: k\n  value_column: v\n  kind: demo\n***/\nWITH lookup AS MATERIALIZE_CLOSED (\n  SELECT * FROM (VALUES ('AB', 'first'), ('AB', 'second')) AS t(k, v)\n)\nSELECT {{bind multi}};\n";
    let h = harness(&[("bindings/multi.sql", sql)]);

    let err = h
        .dispatcher
        .dispatch("bindings/multi", &pairs(&[("Key", "AB")]))
        .unwrap_err();
    assert!(err.to_string().contains("Multiple binding values"));
}

#[test]
fn test_literal_source_distinct_values() {
    let sql = "/***LITERAL_SOURCES\n- id: regions\n  from_cte: lookup\n  value_column: region\n***/\nWITH lookup AS MATERIALIZE_CLOSED (\n  SELECT * FROM (VALUES ('north'), ('north'), ('south')) AS t(region)\n)\nSELECT region FROM lookup;\n";
    let h = harness(&[("facets/regions.sql", sql)]);

    let manifest = h.dispatcher.dispatch("facets/regions", &[]).unwrap();
    let rel = manifest.literal_sources.get("regions").unwrap();
    assert!(rel.starts_with("cache/literal_sources/"));

    let mut rows: Vec<String> = read_parquet(&h, rel).into_iter().map(|r| r[0].clone()).collect();
    rows.sort();
    assert_eq!(rows, vec!["north".to_string(), "south".to_string()]);
}

#[test]
fn test_config_constant_spliced_as_literal() {
    let sql = "/***CONFIG\nLABEL: str\n***/\nSELECT {{config LABEL}} AS label;\n";
    let h = harness_with_config(
        &[("config/label.sql", sql)],
        "[constants]\nLABEL = 'demo-label'\n",
    );

    let manifest = h.dispatcher.dispatch("config/label", &[]).unwrap();
    let rows = read_parquet(&h, &manifest.base_parquet);
    assert_eq!(rows, vec![vec!["demo-label".to_string()]]);
}

#[test]
fn test_missing_config_constant_rejected() {
    let sql = "/***CONFIG\nDATA_ROOT: InjectedPathStr\n***/\nSELECT {{config DATA_ROOT}};\n";
    let h = harness(&[("config/missing.sql", sql)]);

    let err = h.dispatcher.dispatch("config/missing", &[]).unwrap_err();
    assert_eq!(err.code(), "ConfigError");
}

#[test]
fn test_import_reuses_child_base() {
    let child = "WITH rows AS (\n  SELECT * FROM (VALUES ('routing', 1), ('ingest', 2)) AS t(topic, n)\n)\nSELECT * FROM rows;\n";
    let parent = "/***PARAMS\nTopic:\n  type: Optional[str]\n  scope: data\n***/\n/***IMPORTS\n- id: stories\n  report: imports/shared_base\n  pass_params: []\n***/\nWITH pulled AS (\n  SELECT * FROM parquet_scan({{import stories}})\n)\nSELECT topic FROM pulled WHERE {{param Topic}} IS NULL OR topic = {{param Topic}};\n";
    let h = harness(&[
        ("imports/shared_base.sql", child),
        ("imports/topic_drilldown.sql", parent),
    ]);

    let manifest = h
        .dispatcher
        .dispatch("imports/topic_drilldown", &pairs(&[("Topic", "routing")]))
        .unwrap();
    let rows = read_parquet(&h, &manifest.base_parquet);
    assert_eq!(rows, vec![vec!["routing".to_string()]]);

    // the child's base landed in the shared cache and is reused
    let copies_after_first = h.dispatcher.pool().executions();
    let again = h
        .dispatcher
        .dispatch("imports/topic_drilldown", &pairs(&[("Topic", "routing")]))
        .unwrap();
    assert_eq!(manifest.base_parquet, again.base_parquet);
    assert_eq!(
        h.dispatcher.pool().executions(),
        copies_after_first,
        "a warm dispatch re-runs nothing"
    );
}

#[test]
fn test_sql_error_carries_report_and_node() {
    let sql = "SELECT definitely_missing_column FROM nonexistent_table;\n";
    let h = harness(&[("broken/query.sql", sql)]);

    let err = h.dispatcher.dispatch("broken/query", &[]).unwrap_err();
    match err {
        CoreError::SqlExecutionError { report, node, .. } => {
            assert_eq!(report, "broken/query");
            assert_eq!(node, "base");
        }
        other => panic!("expected SqlExecutionError, got {other}"),
    }
}

#[test]
fn test_secret_value_never_in_manifest() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "name = 'demo'\nsecrets_file = 'secrets.env'\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("secrets.env"), "API_TOKEN=hunter2-value\n").unwrap();
    for name in ["reports/secure", "composites"] {
        std::fs::create_dir_all(dir.path().join(name)).unwrap();
    }
    for name in CACHE_SUBDIRS {
        std::fs::create_dir_all(dir.path().join("cache").join(name)).unwrap();
    }
    std::fs::write(
        dir.path().join("reports/secure/probe.sql"),
        "/***SECRETS\n- API_TOKEN\n***/\nSELECT {{secret API_TOKEN}} = {{secret API_TOKEN}} AS authed;\n",
    )
    .unwrap();

    let config = RootConfig::load_from_dir(dir.path()).unwrap();
    let layout = RootLayout::validate(dir.path()).unwrap();
    let registry = Arc::new(ReportRegistry::open(&layout.reports).unwrap());
    let vault = Arc::new(
        SecretsVault::load(
            &["API_TOKEN".to_string()],
            config.secrets_file_path(&layout.root).as_deref(),
        )
        .unwrap(),
    );
    let store = ArtifactStore::new(
        layout,
        StorePolicy {
            default_ttl: Duration::from_secs(300),
            soft_timeout: Duration::from_secs(30),
            hard_timeout: Duration::from_secs(300),
            stale_while_revalidate: false,
        },
    );
    let dispatcher = Dispatcher::new(config, registry, store, Arc::new(EnginePool::new(2)), vault);

    let manifest = dispatcher.dispatch("secure/probe", &[]).unwrap();
    let rendered = serde_json::to_string(&manifest).unwrap();
    assert!(!rendered.contains("hunter2-value"));

    // the secret feeds the engine but never the fingerprint inputs: the
    // base artifact lands under a fingerprint computed from the reference
    // name, which lives in the report source
    assert!(manifest.base_parquet.starts_with("cache/artifacts/"));
}
