//! Value types for fanpoll-rdbc
//!
//! - `Value`: a single scalar as it travels between a point, the control store
//!   and a destination table
//! - `Table`: one materialized result set (column names + rows)
//! - `ParamType` / `Param`: typed, named query parameters

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// SQL value type that can hold any scalar column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value (BIT)
    Bool(bool),
    /// 16-bit signed integer (SMALLINT, TINYINT)
    Int16(i16),
    /// 32-bit signed integer (INT)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 32-bit floating point (REAL)
    Float32(f32),
    /// 64-bit floating point (FLOAT)
    Float64(f64),
    /// Fixed precision decimal (DECIMAL, NUMERIC, MONEY)
    Decimal(Decimal),
    /// Text string (VARCHAR, NVARCHAR, CHAR, TEXT, XML)
    String(String),
    /// Binary data (VARBINARY, IMAGE)
    Bytes(Vec<u8>),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Time without date (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (DATETIME, DATETIME2, SMALLDATETIME)
    DateTime(NaiveDateTime),
    /// Timestamp with offset (DATETIMEOFFSET)
    DateTimeTz(DateTime<Utc>),
    /// UNIQUEIDENTIFIER
    Uuid(Uuid),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get SQL type name
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BIT",
            Self::Int16(_) => "SMALLINT",
            Self::Int32(_) => "INT",
            Self::Int64(_) => "BIGINT",
            Self::Float32(_) => "REAL",
            Self::Float64(_) => "FLOAT",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "NVARCHAR",
            Self::Bytes(_) => "VARBINARY",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "DATETIME2",
            Self::DateTimeTz(_) => "DATETIMEOFFSET",
            Self::Uuid(_) => "UNIQUEIDENTIFIER",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int16(n) => Some(*n != 0),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int16(n) => Some(i64::from(*n)),
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::Decimal(d) if d.fract().is_zero() => d.to_string().parse().ok(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int16(n) => Some(f64::from(*n)),
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::Float32(n) => Some(f64::from(*n)),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::Null | Self::Bytes(_) => None,
            Self::String(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int16(n) => Some(n.to_string()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float32(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Self::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
            Self::DateTime(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::DateTimeTz(dt) => Some(dt.to_rfc3339()),
            Self::Uuid(u) => Some(u.to_string()),
        }
    }

    /// Try to convert to a timestamp without timezone
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::DateTimeTz(dt) => Some(dt.naive_utc()),
            Self::Date(d) => d.and_hms_opt(0, 0, 0),
            Self::String(s) => {
                let s = s.trim();
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                    .ok()
                    .or_else(|| {
                        NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .ok()
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                    })
            }
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A materialized result set
///
/// Columns are shared by every row; rows are stored positionally so a table
/// can be handed to a bulk loader that maps by ordinal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// A table with no columns and no rows
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a row (builder form)
    pub fn with_row(mut self, values: Vec<Value>) -> Self {
        self.push_row(values);
        self
    }

    /// Append a row
    pub fn push_row(&mut self, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.push(values);
    }

    /// Column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in load order
    #[inline]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ordinal of a column, compared case-insensitively
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Ordinal of a column that must exist
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| Error::schema(format!("result set has no column '{}'", name)))
    }

    /// Value at (row, column ordinal)
    pub fn get(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Insert a constant column at ordinal 0, shifting existing columns right
    pub fn prepend_column(&mut self, name: impl Into<String>, value: Value) {
        self.columns.insert(0, name.into());
        for row in &mut self.rows {
            row.insert(0, value.clone());
        }
    }
}

/// Declared parameter type
///
/// Variants mirror the control store's integer type codes; `from_code`
/// accepts the same numbering the store was populated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ParamType {
    BigInt,
    Binary,
    Bit,
    Char,
    DateTime,
    Decimal,
    Float,
    Image,
    Int,
    Money,
    NChar,
    NText,
    NVarChar,
    Real,
    UniqueIdentifier,
    SmallDateTime,
    SmallInt,
    SmallMoney,
    Text,
    Timestamp,
    TinyInt,
    VarBinary,
    VarChar,
    Variant,
    Xml,
    Date,
    Time,
    DateTime2,
    DateTimeOffset,
}

impl ParamType {
    /// Resolve a stored type code
    pub fn from_code(code: i64) -> Result<Self> {
        Ok(match code {
            0 => Self::BigInt,
            1 => Self::Binary,
            2 => Self::Bit,
            3 => Self::Char,
            4 => Self::DateTime,
            5 => Self::Decimal,
            6 => Self::Float,
            7 => Self::Image,
            8 => Self::Int,
            9 => Self::Money,
            10 => Self::NChar,
            11 => Self::NText,
            12 => Self::NVarChar,
            13 => Self::Real,
            14 => Self::UniqueIdentifier,
            15 => Self::SmallDateTime,
            16 => Self::SmallInt,
            17 => Self::SmallMoney,
            18 => Self::Text,
            19 => Self::Timestamp,
            20 => Self::TinyInt,
            21 => Self::VarBinary,
            22 => Self::VarChar,
            23 => Self::Variant,
            25 => Self::Xml,
            31 => Self::Date,
            32 => Self::Time,
            33 => Self::DateTime2,
            34 => Self::DateTimeOffset,
            other => {
                return Err(Error::type_conversion(format!(
                    "unknown parameter type code {}",
                    other
                )))
            }
        })
    }

    /// Type as written in a parameter declaration list
    pub fn declaration(&self) -> &'static str {
        match self {
            Self::BigInt => "bigint",
            Self::Binary => "binary(8000)",
            Self::Bit => "bit",
            Self::Char => "char(8000)",
            Self::DateTime => "datetime",
            Self::Decimal => "decimal(38, 10)",
            Self::Float => "float",
            Self::Image => "image",
            Self::Int => "int",
            Self::Money => "money",
            Self::NChar => "nchar(4000)",
            Self::NText => "ntext",
            Self::NVarChar => "nvarchar(max)",
            Self::Real => "real",
            Self::UniqueIdentifier => "uniqueidentifier",
            Self::SmallDateTime => "smalldatetime",
            Self::SmallInt => "smallint",
            Self::SmallMoney => "smallmoney",
            Self::Text => "text",
            Self::Timestamp => "binary(8)",
            Self::TinyInt => "tinyint",
            Self::VarBinary => "varbinary(max)",
            Self::VarChar => "varchar(max)",
            Self::Variant => "sql_variant",
            Self::Xml => "xml",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime2 => "datetime2",
            Self::DateTimeOffset => "datetimeoffset",
        }
    }

    /// Convert a stored value into the representation this type binds as
    ///
    /// NULL passes through unchanged for every type.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }
        let source_type = value.sql_type();
        let coerced = match self {
            Self::Bit => value.as_bool().map(Value::Bool),
            Self::TinyInt | Self::SmallInt => value
                .as_i64()
                .and_then(|n| i16::try_from(n).ok())
                .map(Value::Int16),
            Self::Int => value
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Value::Int32),
            Self::BigInt => value.as_i64().map(Value::Int64),
            Self::Real => value.as_f64().map(|n| Value::Float32(n as f32)),
            Self::Float => value.as_f64().map(Value::Float64),
            Self::Decimal | Self::Money | Self::SmallMoney => match &value {
                Value::Decimal(d) => Some(Value::Decimal(*d)),
                other => other
                    .as_string()
                    .and_then(|s| Decimal::from_str(s.trim()).ok())
                    .map(Value::Decimal),
            },
            Self::Char
            | Self::NChar
            | Self::NText
            | Self::NVarChar
            | Self::Text
            | Self::VarChar
            | Self::Xml => value.as_string().map(Value::String),
            Self::Binary | Self::Image | Self::VarBinary | Self::Timestamp => match value {
                Value::Bytes(b) => Some(Value::Bytes(b)),
                Value::String(s) => Some(Value::Bytes(s.into_bytes())),
                _ => None,
            },
            Self::UniqueIdentifier => match &value {
                Value::Uuid(u) => Some(Value::Uuid(*u)),
                other => other
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s.trim()).ok())
                    .map(Value::Uuid),
            },
            Self::Date => value.as_datetime().map(|dt| Value::Date(dt.date())),
            Self::Time => match &value {
                Value::Time(t) => Some(Value::Time(*t)),
                Value::DateTime(dt) => Some(Value::Time(dt.time())),
                other => other
                    .as_str()
                    .and_then(|s| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok())
                    .map(Value::Time),
            },
            Self::DateTime | Self::SmallDateTime | Self::DateTime2 => {
                value.as_datetime().map(Value::DateTime)
            }
            Self::DateTimeOffset => match &value {
                Value::DateTimeTz(dt) => Some(Value::DateTimeTz(*dt)),
                Value::DateTime(dt) => Some(Value::DateTimeTz(dt.and_utc())),
                other => other
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                    .map(|dt| Value::DateTimeTz(dt.with_timezone(&Utc))),
            },
            Self::Variant => Some(value),
        };
        coerced.ok_or_else(|| {
            Error::type_conversion(format!(
                "cannot bind {} value as {}",
                source_type,
                self.declaration()
            ))
        })
    }
}

/// A named, typed query parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name, with or without the leading `@`
    pub name: String,
    /// Declared type
    pub ty: ParamType,
    /// Value to bind
    pub value: Value,
}

impl Param {
    /// Create a parameter, coercing the value to the declared type
    pub fn typed(name: impl Into<String>, ty: ParamType, value: Value) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            value: ty.coerce(value)?,
            ty,
        })
    }

    /// Parameter name without the leading `@`
    pub fn bare_name(&self) -> &str {
        self.name.trim_start_matches('@')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepend_column_shifts_existing() {
        let mut table = Table::new(["a", "b"])
            .with_row(vec![Value::Int32(1), Value::from("x")])
            .with_row(vec![Value::Int32(2), Value::from("y")]);

        table.prepend_column("logRowId", Value::Int64(7));
        table.prepend_column("id", Value::Null);

        assert_eq!(table.columns(), &["id", "logRowId", "a", "b"]);
        assert_eq!(table.get(1, 0), Some(&Value::Null));
        assert_eq!(table.get(1, 1), Some(&Value::Int64(7)));
        assert_eq!(table.get(1, 3), Some(&Value::from("y")));
    }

    #[test]
    fn test_prepend_column_on_empty_table_keeps_zero_rows() {
        let mut table = Table::empty();
        table.prepend_column("logRowId", Value::Int64(1));

        assert_eq!(table.columns().len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let table = Table::new(["reqId", "dstTable"]);
        assert_eq!(table.column_index("REQID"), Some(0));
        assert!(table.require_column("missing").is_err());
    }

    #[test]
    fn test_coerce_int_from_string() {
        let v = ParamType::Int.coerce(Value::from(" 42 ")).unwrap();
        assert_eq!(v, Value::Int32(42));
    }

    #[test]
    fn test_coerce_rejects_overflow() {
        assert!(ParamType::SmallInt.coerce(Value::Int64(100_000)).is_err());
    }
}
