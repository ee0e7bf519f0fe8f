use super::*;

#[test]
fn test_parse_primitives() {
    assert_eq!(ParamType::parse("int").unwrap(), ParamType::Int);
    assert_eq!(ParamType::parse("datetime").unwrap(), ParamType::DateTime);
    assert_eq!(ParamType::parse("InjectedStr").unwrap(), ParamType::InjectedStr);
    assert!(ParamType::parse("tuple").is_err());
}

#[test]
fn test_parse_nested_combinators() {
    let ty = ParamType::parse("Optional[Literal['A','B']]").unwrap();
    let ParamType::Optional(inner) = &ty else {
        panic!("expected Optional");
    };
    let ParamType::Literal(values) = inner.as_ref() else {
        panic!("expected Literal");
    };
    assert_eq!(
        values,
        &vec![
            LiteralValue::Str("A".to_string()),
            LiteralValue::Str("B".to_string())
        ]
    );

    let ty = ParamType::parse("List[int]").unwrap();
    assert_eq!(ty, ParamType::List(Box::new(ParamType::Int)));
}

#[test]
fn test_parse_ident_allowlist_braced_and_quoted() {
    let braced = ParamType::parse("InjectedIdentLiteral[{region,shard}]").unwrap();
    assert_eq!(
        braced,
        ParamType::InjectedIdentLiteral(vec!["region".to_string(), "shard".to_string()])
    );

    let quoted = ParamType::parse("InjectedIdentLiteral['value']").unwrap();
    assert_eq!(
        quoted,
        ParamType::InjectedIdentLiteral(vec!["value".to_string()])
    );
}

#[test]
fn test_parse_rejects_bad_ident_allowlist() {
    assert!(ParamType::parse("InjectedIdentLiteral[{1bad}]").is_err());
    assert!(ParamType::parse("InjectedIdentLiteral[{}]").is_err());
}

#[test]
fn test_display_parse_round_trip() {
    for spec in [
        "int",
        "Optional[int]",
        "List[str]",
        "Literal['a','b',2,true]",
        "InjectedIdentLiteral[{region,shard}]",
        "Optional[List[float]]",
        "InjectedPathStr",
    ] {
        let ty = ParamType::parse(spec).unwrap();
        let rendered = ty.to_string();
        let reparsed = ParamType::parse(&rendered).unwrap();
        assert_eq!(ty, reparsed, "round trip failed for {spec}");
        assert_eq!(rendered, reparsed.to_string());
    }
}

#[test]
fn test_coerce_scalars() {
    let v = ParamType::Int.coerce(&["42".to_string()], "N").unwrap();
    assert_eq!(v, ParamValue::Int(42));

    let v = ParamType::Bool.coerce(&["yes".to_string()], "B").unwrap();
    assert_eq!(v, ParamValue::Bool(true));

    let v = ParamType::Date.coerce(&["2026-08-02".to_string()], "D").unwrap();
    assert!(matches!(v, ParamValue::Date(_)));

    assert!(ParamType::Int.coerce(&["x".to_string()], "N").is_err());
    assert!(ParamType::Date.coerce(&["02/08/2026".to_string()], "D").is_err());
}

#[test]
fn test_coerce_absent() {
    assert_eq!(
        ParamType::Optional(Box::new(ParamType::Int)).coerce(&[], "N").unwrap(),
        ParamValue::Absent
    );
    assert_eq!(ParamType::Int.coerce(&[], "N").unwrap(), ParamValue::Absent);
}

#[test]
fn test_coerce_list() {
    let raw = vec!["1".to_string(), "2".to_string()];
    let v = ParamType::List(Box::new(ParamType::Int)).coerce(&raw, "Ids").unwrap();
    assert_eq!(v, ParamValue::List(vec![ParamValue::Int(1), ParamValue::Int(2)]));
    assert_eq!(v.arity(), 2);
}

#[test]
fn test_coerce_literal_casts_string_input() {
    let ty = ParamType::Literal(vec![LiteralValue::Int(2), LiteralValue::Str("alpha".into())]);
    assert_eq!(ty.coerce(&["2".to_string()], "L").unwrap(), ParamValue::Int(2));
    assert_eq!(
        ty.coerce(&["alpha".to_string()], "L").unwrap(),
        ParamValue::Str("alpha".to_string())
    );
    assert!(ty.coerce(&["beta".to_string()], "L").is_err());
}

#[test]
fn test_injected_path_str_never_from_url() {
    let err = ParamType::InjectedPathStr.coerce(&["/etc".to_string()], "P").unwrap_err();
    assert!(matches!(err, ds_core::CoreError::BadParamType { .. }));
}

#[test]
fn test_sql_literal_rendering() {
    assert_eq!(ParamValue::Absent.sql_literal(), "NULL");
    assert_eq!(ParamValue::Int(7).sql_literal(), "7");
    assert_eq!(ParamValue::Bool(false).sql_literal(), "FALSE");
    assert_eq!(
        ParamValue::Str("it's".to_string()).sql_literal(),
        "'it''s'"
    );
    assert_eq!(
        ParamValue::List(vec![ParamValue::Int(1), ParamValue::Str("a".into())]).sql_literal(),
        "(1, 'a')"
    );
    assert_eq!(ParamValue::List(vec![]).sql_literal(), "(NULL)");
}

#[test]
fn test_ident_literal_rendering() {
    assert_eq!(ParamValue::Ident("region".to_string()).ident_literal(), "region");
    assert_eq!(ParamValue::Str("shard_2".to_string()).ident_literal(), "shard_2");
    assert_eq!(ParamValue::Str("no; drop".to_string()).ident_literal(), "NULL");
    assert_eq!(ParamValue::Int(1).ident_literal(), "NULL");
}

#[test]
fn test_canonical_encoding_distinguishes_types() {
    let as_int = ParamValue::Int(1).canonical_bytes();
    let as_str = ParamValue::Str("1".to_string()).canonical_bytes();
    assert_ne!(as_int, as_str);

    let ab_c = {
        let mut out = Vec::new();
        ParamValue::Str("ab".to_string()).canonical_encode(&mut out);
        ParamValue::Str("c".to_string()).canonical_encode(&mut out);
        out
    };
    let a_bc = {
        let mut out = Vec::new();
        ParamValue::Str("a".to_string()).canonical_encode(&mut out);
        ParamValue::Str("bc".to_string()).canonical_encode(&mut out);
        out
    };
    assert_ne!(ab_c, a_bc);
}
