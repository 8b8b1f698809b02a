//! Unit tests for fanpoll-rdbc named parameter binding

use fanpoll_rdbc::params::{bind_named, BoundQuery};
use fanpoll_rdbc::types::{Param, ParamType, Value};

#[test]
fn test_plain_query() {
    assert_eq!(
        bind_named("SELECT * FROM readings", &[]).unwrap(),
        BoundQuery::plain("SELECT * FROM readings")
    );
}

#[test]
fn test_values_stay_out_of_statement_text() {
    let params = vec![Param::typed(
        "note",
        ParamType::NVarChar,
        Value::from("'); DROP TABLE log; --"),
    )
    .unwrap()];
    let bound = bind_named("SELECT @note AS note", &params).unwrap();

    assert!(!bound.sql.contains("DROP TABLE"));
    assert_eq!(bound.values.len(), 1);
    assert!(bound.sql.ends_with("@note = @P1"));
}

#[test]
fn test_positional_slots_follow_parameter_order() {
    let params = vec![
        Param::typed("b", ParamType::BigInt, Value::Int32(2)).unwrap(),
        Param::typed("a", ParamType::BigInt, Value::Int32(1)).unwrap(),
    ];
    let bound = bind_named("SELECT @a, @b", &params).unwrap();

    assert!(bound.sql.contains("N'@b bigint, @a bigint'"));
    assert!(bound.sql.contains("@b = @P1, @a = @P2"));
    assert_eq!(bound.values, vec![Value::Int64(2), Value::Int64(1)]);
}

#[test]
fn test_invalid_parameter_name() {
    let params = vec![Param::typed("1st", ParamType::Int, Value::Int32(1)).unwrap()];
    assert!(bind_named("SELECT 1", &params).is_err());
}
