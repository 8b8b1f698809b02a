//! Unit tests for fanpoll-rdbc types module

use chrono::NaiveDate;
use fanpoll_rdbc::types::{Param, ParamType, Table, Value};
use rust_decimal::Decimal;
use std::str::FromStr;

#[test]
fn test_value_null() {
    assert!(Value::Null.is_null());
    assert!(!Value::Int32(0).is_null());
    assert_eq!(Value::Null.sql_type(), "NULL");
}

#[test]
fn test_value_from_option() {
    assert_eq!(Value::from(Some(5i32)), Value::Int32(5));
    assert_eq!(Value::from(None::<i32>), Value::Null);
    assert_eq!(Value::from(Some("x")), Value::String("x".into()));
}

#[test]
fn test_value_as_i64() {
    assert_eq!(Value::Int16(3).as_i64(), Some(3));
    assert_eq!(Value::Int32(-7).as_i64(), Some(-7));
    assert_eq!(Value::String(" 12 ".into()).as_i64(), Some(12));
    assert_eq!(Value::Decimal(Decimal::from(40)).as_i64(), Some(40));
    assert_eq!(Value::Decimal(Decimal::from_str("1.5").unwrap()).as_i64(), None);
    assert_eq!(Value::Null.as_i64(), None);
}

#[test]
fn test_value_as_datetime_from_string() {
    let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(12, 30, 0)
        .unwrap();
    assert_eq!(
        Value::from("2024-03-01 12:30:00").as_datetime(),
        Some(expected)
    );
    assert_eq!(
        Value::from("2024-03-01T12:30:00").as_datetime(),
        Some(expected)
    );
    assert_eq!(
        Value::from("2024-03-01").as_datetime(),
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0)
    );
}

#[test]
fn test_table_builders() {
    let table = Table::new(["logRowId", "reqId"])
        .with_row(vec![Value::Int64(1), Value::Int32(10)])
        .with_row(vec![Value::Int64(2), Value::Int32(10)]);

    assert_eq!(table.len(), 2);
    assert!(!table.is_empty());
    assert_eq!(table.column_index("reqid"), Some(1));
    assert_eq!(table.get(1, 0), Some(&Value::Int64(2)));
    assert_eq!(table.get(5, 0), None);
}

#[test]
fn test_param_type_codes() {
    assert_eq!(ParamType::from_code(0).unwrap(), ParamType::BigInt);
    assert_eq!(ParamType::from_code(8).unwrap(), ParamType::Int);
    assert_eq!(ParamType::from_code(12).unwrap(), ParamType::NVarChar);
    assert_eq!(ParamType::from_code(33).unwrap(), ParamType::DateTime2);
    assert!(ParamType::from_code(24).is_err());
    assert!(ParamType::from_code(99).is_err());
}

#[test]
fn test_param_coercion() {
    let p = Param::typed("@day", ParamType::Date, Value::from("2024-01-31")).unwrap();
    assert_eq!(
        p.value,
        Value::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
    );
    assert_eq!(p.bare_name(), "day");

    let p = Param::typed("amount", ParamType::Decimal, Value::from("12.50")).unwrap();
    assert_eq!(p.value, Value::Decimal(Decimal::from_str("12.50").unwrap()));

    let p = Param::typed("flag", ParamType::Bit, Value::Int32(1)).unwrap();
    assert_eq!(p.value, Value::Bool(true));

    let p = Param::typed("maybe", ParamType::Int, Value::Null).unwrap();
    assert!(p.value.is_null());
}

#[test]
fn test_param_coercion_failure() {
    let err = Param::typed("site", ParamType::Int, Value::from("north")).unwrap_err();
    assert!(err.to_string().contains("int"));

    assert!(Param::typed("id", ParamType::UniqueIdentifier, Value::from("nope")).is_err());
}
