use super::*;
use ds_report::report::parse_report_text;

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn hybrid_report() -> Report {
    parse_report_text(
        "demo/hybrid",
        "/***PARAMS\nWidget:\n  type: Optional[int]\n  scope: hybrid\n***/\nWITH base AS (\n  SELECT * FROM (VALUES (1),(2)) AS t(id)\n)\nSELECT id FROM base WHERE {{param Widget}} IS NULL OR id = {{param Widget}}\n",
    )
    .unwrap()
}

#[test]
fn test_data_param_routes_server() {
    let report = parse_report_text(
        "demo/data",
        "/***PARAMS\nRegion:\n  type: str\n  scope: data\n***/\nSELECT {{param Region}}\n",
    )
    .unwrap();

    let resolved = resolve_params(&report, &pairs(&[("Region", "north")]), 256).unwrap();
    assert_eq!(
        resolved.server_value("Region"),
        Some(&ParamValue::Str("north".to_string()))
    );
    assert!(resolved.client.is_empty());
}

#[test]
fn test_case_insensitive_key_folding() {
    let report = hybrid_report();
    let resolved = resolve_params(&report, &pairs(&[("widget", "2")]), 256).unwrap();
    assert_eq!(resolved.server_value("Widget"), Some(&ParamValue::Int(2)));
}

#[test]
fn test_duplicate_casing_rejected() {
    let report = hybrid_report();
    let err = resolve_params(
        &report,
        &pairs(&[("Widget", "1"), ("widget", "2")]),
        256,
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateParamCasing { .. }));
}

#[test]
fn test_client_prefix_on_data_param_rejected() {
    let report = parse_report_text(
        "demo/data",
        "/***PARAMS\nRegion:\n  type: str\n  scope: data\n***/\nSELECT {{param Region}}\n",
    )
    .unwrap();

    let err = resolve_params(&report, &pairs(&[("__client__Region", "north")]), 256).unwrap_err();
    assert!(matches!(err, CoreError::BadScopeRouting { .. }));
}

#[test]
fn test_hybrid_client_value_stays_client() {
    let report = hybrid_report();
    let resolved = resolve_params(&report, &pairs(&[("__client__Widget", "2")]), 256).unwrap();

    assert_eq!(resolved.server_value("Widget"), Some(&ParamValue::Absent));
    assert_eq!(resolved.client.get("Widget"), Some(&"2".to_string()));
}

#[test]
fn test_hybrid_bare_value_goes_server() {
    let report = hybrid_report();
    let resolved = resolve_params(&report, &pairs(&[("Widget", "2")]), 256).unwrap();

    assert_eq!(resolved.server_value("Widget"), Some(&ParamValue::Int(2)));
    assert!(resolved.client.is_empty());
}

#[test]
fn test_force_server_promotes_hybrid_client_values() {
    let report = hybrid_report();
    let resolved = resolve_params(
        &report,
        &pairs(&[("__client__Widget", "2"), ("__force_server", "1")]),
        256,
    )
    .unwrap();

    assert!(resolved.force_server);
    assert_eq!(resolved.server_value("Widget"), Some(&ParamValue::Int(2)));
}

#[test]
fn test_view_param_never_reaches_server() {
    let report = parse_report_text(
        "demo/view",
        "/***PARAMS\nHighlight:\n  type: str\n  scope: view\n***/\nSELECT 1\n",
    )
    .unwrap();

    let resolved = resolve_params(
        &report,
        &pairs(&[("__server__Highlight", "on"), ("__force_server", "1")]),
        256,
    )
    .unwrap();
    assert!(resolved.server.is_empty());
    assert_eq!(resolved.client.get("Highlight"), Some(&"on".to_string()));
}

#[test]
fn test_hybrid_param_in_materialization_promoted() {
    let report = parse_report_text(
        "demo/mat",
        "/***PARAMS\nDayWindow:\n  type: Optional[int]\n  scope: hybrid\n***/\nWITH rolling AS MATERIALIZE (\n  SELECT {{param DayWindow}} AS w\n)\nSELECT * FROM rolling\n",
    )
    .unwrap();

    let resolved =
        resolve_params(&report, &pairs(&[("__client__DayWindow", "2")]), 256).unwrap();
    assert_eq!(resolved.server_value("DayWindow"), Some(&ParamValue::Int(2)));
}

#[test]
fn test_hybrid_param_with_limit_promoted() {
    let report = parse_report_text(
        "demo/limit",
        "/***PARAMS\nWidget:\n  type: Optional[int]\n  scope: hybrid\n***/\nSELECT id FROM t WHERE {{param Widget}} IS NULL OR id = {{param Widget}} LIMIT 10\n",
    )
    .unwrap();

    let resolved = resolve_params(&report, &pairs(&[("__client__Widget", "2")]), 256).unwrap();
    assert_eq!(resolved.server_value("Widget"), Some(&ParamValue::Int(2)));
}

#[test]
fn test_hybrid_value_set_over_cap_promoted() {
    let report = parse_report_text(
        "demo/list",
        "/***PARAMS\nIds:\n  type: List[int]\n  scope: hybrid\n***/\nSELECT id FROM t WHERE id IN {{param Ids}}\n",
    )
    .unwrap();

    let resolved = resolve_params(&report, &pairs(&[("__client__Ids", "1,2,3")]), 2).unwrap();
    assert_eq!(
        resolved.server_value("Ids"),
        Some(&ParamValue::List(vec![
            ParamValue::Int(1),
            ParamValue::Int(2),
            ParamValue::Int(3)
        ]))
    );
}

#[test]
fn test_list_accepts_repeated_keys() {
    let report = parse_report_text(
        "demo/list",
        "/***PARAMS\nIds:\n  type: List[int]\n  scope: data\n***/\nSELECT id FROM t WHERE id IN {{param Ids}}\n",
    )
    .unwrap();

    let resolved = resolve_params(
        &report,
        &pairs(&[("Ids", "1"), ("Ids", "2"), ("Ids", "3,4")]),
        256,
    )
    .unwrap();
    assert_eq!(
        resolved.server_value("Ids"),
        Some(&ParamValue::List(vec![
            ParamValue::Int(1),
            ParamValue::Int(2),
            ParamValue::Int(3),
            ParamValue::Int(4)
        ]))
    );
}

#[test]
fn test_default_applied_when_absent() {
    let report = parse_report_text(
        "demo/default",
        "/***PARAMS\nWindow:\n  type: int\n  scope: data\n  default: 7\n***/\nSELECT {{param Window}}\n",
    )
    .unwrap();

    let resolved = resolve_params(&report, &[], 256).unwrap();
    assert_eq!(resolved.server_value("Window"), Some(&ParamValue::Int(7)));
}

#[test]
fn test_bad_type_rejected() {
    let report = hybrid_report();
    let err = resolve_params(&report, &pairs(&[("Widget", "soon")]), 256).unwrap_err();
    assert!(matches!(err, CoreError::BadParamType { .. }));
}

#[test]
fn test_undeclared_keys_ignored() {
    let report = hybrid_report();
    let resolved = resolve_params(&report, &pairs(&[("Mystery", "1")]), 256).unwrap();
    assert_eq!(resolved.server_value("Widget"), Some(&ParamValue::Absent));
}

#[test]
fn test_pass_param_to_import_promotes_hybrid() {
    let report = parse_report_text(
        "demo/import",
        "/***PARAMS\nTopic:\n  type: Optional[str]\n  scope: hybrid\n***/\n/***IMPORTS\n- id: stories\n  report: shared_base\n  pass_params: [Topic]\n***/\nWITH x AS (SELECT * FROM parquet_scan({{import stories}}))\nSELECT * FROM x WHERE {{param Topic}} IS NULL OR topic = {{param Topic}}\n",
    )
    .unwrap();

    let resolved = resolve_params(&report, &pairs(&[("__client__Topic", "routing")]), 256).unwrap();
    assert_eq!(
        resolved.server_value("Topic"),
        Some(&ParamValue::Str("routing".to_string()))
    );
}
