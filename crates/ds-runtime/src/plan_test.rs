use super::*;
use crate::params::resolve_params;
use ds_report::report::parse_report_text;
use ds_report::types::ParamValue;

const BINDING_REPORT: &str = "/***PARAMS\nSegment:\n  type: str\n  scope: data\n***/\n/***BINDINGS\n- id: segment_label\n  source: lookup\n  key_param: Segment\n  key_column: segment\n  value_column: label\n  kind: demo\n***/\nWITH lookup AS MATERIALIZE_CLOSED (\n  SELECT * FROM (VALUES ('alpha', 'Fast lane')) AS t(segment, label)\n),\nrolling AS MATERIALIZE (\n  SELECT segment FROM lookup\n)\nSELECT {{param Segment}}, {{bind segment_label}} AS label FROM rolling\n";

fn plan_for(sql: &str, raw: &[(&str, &str)]) -> (Plan, ds_report::report::Report) {
    let report = parse_report_text("demo/plan", sql).unwrap();
    let pairs: Vec<(String, String)> = raw
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let resolved = resolve_params(&report, &pairs, 256).unwrap();
    let ctx = PlanContext {
        report: &report,
        resolved: &resolved,
        deployment_id: "test",
        config_values: &BTreeMap::new(),
        import_fingerprints: &BTreeMap::new(),
    };
    let plan = build_plan(&ctx).unwrap();
    (plan, report)
}

#[test]
fn test_topological_order() {
    let (plan, _) = plan_for(BINDING_REPORT, &[("Segment", "alpha")]);

    let pos = |kind: &NodeKind, name: &str| {
        plan.nodes
            .iter()
            .position(|n| n.kind == *kind && n.name == name)
            .unwrap_or_else(|| panic!("missing node {name}"))
    };

    let lookup = pos(&NodeKind::Materialize, "lookup");
    let binding = pos(&NodeKind::Binding, "segment_label");
    let rolling = pos(&NodeKind::Materialize, "rolling");
    let base = pos(&NodeKind::Base, "base");

    assert!(lookup < binding, "binding reads its source materialization");
    assert!(lookup < rolling, "rolling references lookup");
    assert!(binding < base);
    assert!(rolling < base);
    assert_eq!(base, plan.nodes.len() - 1);
}

#[test]
fn test_base_fingerprint_changes_with_data_param() {
    let (alpha, _) = plan_for(BINDING_REPORT, &[("Segment", "alpha")]);
    let (beta, _) = plan_for(BINDING_REPORT, &[("Segment", "beta")]);
    assert_ne!(alpha.base().fingerprint, beta.base().fingerprint);
}

#[test]
fn test_fingerprints_deterministic() {
    let (a, _) = plan_for(BINDING_REPORT, &[("Segment", "alpha")]);
    let (b, _) = plan_for(BINDING_REPORT, &[("Segment", "alpha")]);
    assert_eq!(a.base().fingerprint, b.base().fingerprint);
}

#[test]
fn test_closed_materialization_frozen_against_params() {
    let (alpha, _) = plan_for(BINDING_REPORT, &[("Segment", "alpha")]);
    let (beta, _) = plan_for(BINDING_REPORT, &[("Segment", "beta")]);

    let fp = |plan: &Plan| plan.node(&NodeKind::Materialize, "lookup").unwrap().fingerprint;
    assert_eq!(fp(&alpha), fp(&beta), "closed lookup ignores the key param");

    let bind_fp = |plan: &Plan| plan.node(&NodeKind::Binding, "segment_label").unwrap().fingerprint;
    assert_ne!(bind_fp(&alpha), bind_fp(&beta), "binding keys differ");
}

#[test]
fn test_open_materialization_tracks_its_params() {
    const SQL: &str = "/***PARAMS\nDayWindow:\n  type: Optional[int]\n  scope: data\n***/\nWITH rolling AS MATERIALIZE (\n  SELECT {{param DayWindow}} AS w\n)\nSELECT * FROM rolling\n";

    let (two, _) = plan_for(SQL, &[("DayWindow", "2")]);
    let (nine, _) = plan_for(SQL, &[("DayWindow", "9")]);

    let fp = |plan: &Plan| plan.node(&NodeKind::Materialize, "rolling").unwrap().fingerprint;
    assert_ne!(fp(&two), fp(&nine));
}

#[test]
fn test_view_params_never_touch_fingerprints() {
    const SQL: &str = "/***PARAMS\nRegion:\n  type: str\n  scope: data\nTheme:\n  type: str\n  scope: view\n***/\nSELECT {{param Region}}\n";

    let (plain, _) = plan_for(SQL, &[("Region", "north")]);
    let (themed, _) = plan_for(SQL, &[("Region", "north"), ("Theme", "dark")]);
    assert_eq!(plain.base().fingerprint, themed.base().fingerprint);
}

#[test]
fn test_client_routed_hybrid_leaves_base_unchanged() {
    const SQL: &str = "/***PARAMS\nShard:\n  type: Optional[int]\n  scope: hybrid\n***/\nSELECT id FROM t WHERE {{param Shard}} IS NULL OR id = {{param Shard}}\n";

    let (bare, _) = plan_for(SQL, &[]);
    let (client, _) = plan_for(SQL, &[("__client__Shard", "2")]);
    let (server, _) = plan_for(SQL, &[("Shard", "2")]);

    assert_eq!(bare.base().fingerprint, client.base().fingerprint);
    assert_ne!(bare.base().fingerprint, server.base().fingerprint);
}

#[test]
fn test_import_fingerprint_flows_into_base() {
    const SQL: &str = "/***IMPORTS\n- id: stories\n  report: shared_base\n***/\nWITH x AS (SELECT * FROM parquet_scan({{import stories}}))\nSELECT * FROM x\n";

    let report = parse_report_text("demo/import", SQL).unwrap();
    let resolved = resolve_params(&report, &[], 256).unwrap();

    let mut imports_a = BTreeMap::new();
    imports_a.insert(
        "stories".to_string(),
        ds_core::fingerprint::Fingerprint::of_bytes(b"child-a"),
    );
    let mut imports_b = BTreeMap::new();
    imports_b.insert(
        "stories".to_string(),
        ds_core::fingerprint::Fingerprint::of_bytes(b"child-b"),
    );

    let base_fp = |imports: &BTreeMap<String, ds_core::fingerprint::Fingerprint>| {
        let ctx = PlanContext {
            report: &report,
            resolved: &resolved,
            deployment_id: "test",
            config_values: &BTreeMap::new(),
            import_fingerprints: imports,
        };
        build_plan(&ctx).unwrap().base().fingerprint
    };

    assert_ne!(base_fp(&imports_a), base_fp(&imports_b));
}

#[test]
fn test_deployment_id_salts_every_node() {
    let report = parse_report_text("demo/salt", "SELECT 1\n").unwrap();
    let resolved = resolve_params(&report, &[], 256).unwrap();
    let empty = BTreeMap::new();

    let fp = |deployment: &str| {
        let ctx = PlanContext {
            report: &report,
            resolved: &resolved,
            deployment_id: deployment,
            config_values: &empty,
            import_fingerprints: &empty_fps(),
        };
        build_plan(&ctx).unwrap().base().fingerprint
    };
    assert_ne!(fp("dev"), fp("prod"));

    fn empty_fps() -> BTreeMap<String, ds_core::fingerprint::Fingerprint> {
        BTreeMap::new()
    }
}

#[test]
fn test_binding_cycle_rejected() {
    // a materialization whose body consumes a binding that reads from it
    const SQL: &str = "/***PARAMS\nKey:\n  type: str\n  scope: data\n***/\n/***BINDINGS\n- id: loop\n  source: twisted\n  key_param: Key\n  key_column: k\n  value_column: v\n  kind: demo\n***/\nWITH twisted AS MATERIALIZE_CLOSED (\n  SELECT {{bind loop}} AS k, 'v' AS v\n)\nSELECT {{param Key}} FROM twisted\n";

    let report = parse_report_text("demo/cycle", SQL).unwrap();
    let resolved = resolve_params(
        &report,
        &[("Key".to_string(), "x".to_string())],
        256,
    )
    .unwrap();
    let ctx = PlanContext {
        report: &report,
        resolved: &resolved,
        deployment_id: "test",
        config_values: &BTreeMap::new(),
        import_fingerprints: &BTreeMap::new(),
    };
    let err = build_plan(&ctx).unwrap_err();
    assert!(matches!(err, CoreError::ImportCycle { .. }));
}

#[test]
fn test_resolved_absent_param_still_fingerprints() {
    const SQL: &str = "/***PARAMS\nWidget:\n  type: Optional[int]\n  scope: data\n***/\nSELECT {{param Widget}}\n";

    let (absent, _) = plan_for(SQL, &[]);
    let (present, _) = plan_for(SQL, &[("Widget", "2")]);
    assert_ne!(absent.base().fingerprint, present.base().fingerprint);
    // the absent marker itself is stable
    let (absent_again, _) = plan_for(SQL, &[]);
    assert_eq!(absent.base().fingerprint, absent_again.base().fingerprint);
}

#[test]
fn test_param_value_canonicalization_used() {
    // 2 as int and "2" as str must not collide thanks to typed encoding
    let int_bytes = ParamValue::Int(2).canonical_bytes();
    let str_bytes = ParamValue::Str("2".to_string()).canonical_bytes();
    assert_ne!(int_bytes, str_bytes);
}
