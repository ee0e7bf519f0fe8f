use super::*;

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_select_import_params_filters_by_pass_list() {
    let raw = pairs(&[
        ("Topic", "routing"),
        ("FocusVariant", "beta"),
        ("__force_server", "1"),
    ]);
    let selected = select_import_params(&raw, &["Topic".to_string()]);

    assert_eq!(
        selected,
        pairs(&[("Topic", "routing"), ("__force_server", "1")])
    );
}

#[test]
fn test_select_import_params_keeps_routing_prefixes() {
    let raw = pairs(&[("__client__Topic", "routing"), ("__server__Other", "x")]);
    let selected = select_import_params(&raw, &["Topic".to_string()]);
    assert_eq!(selected, pairs(&[("__client__Topic", "routing")]));
}

#[test]
fn test_select_import_params_case_insensitive() {
    let raw = pairs(&[("topic", "routing")]);
    let selected = select_import_params(&raw, &["Topic".to_string()]);
    assert_eq!(selected, pairs(&[("topic", "routing")]));
}
