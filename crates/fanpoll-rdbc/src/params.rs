//! Named parameter binding
//!
//! Point queries refer to their parameters by name (`@from`, `@site`). The
//! wire protocol only binds positional parameters (`@P1`, `@P2`, ...), so a
//! query with parameters is wrapped in `sp_executesql`, which declares the
//! named parameters and maps each one to a positional slot:
//!
//! ```text
//! EXEC sp_executesql N'<query>', N'@from datetime2, @site int',
//!      @from = @P1, @site = @P2
//! ```
//!
//! Values are never spliced into the statement text.

use crate::error::{Error, Result};
use crate::security::{escape_string_literal, validate_sql_identifier};
use crate::types::{Param, Value};

/// A statement ready to execute: text plus positional values
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    /// Statement text
    pub sql: String,
    /// Values for `@P1..@Pn`, in order
    pub values: Vec<Value>,
}

impl BoundQuery {
    /// A statement without parameters
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Vec::new(),
        }
    }
}

/// Bind named parameters to a query
///
/// A query without parameters is returned unchanged. Parameter names are
/// validated as identifiers and must be unique (compared case-insensitively,
/// as the server does).
pub fn bind_named(query: &str, params: &[Param]) -> Result<BoundQuery> {
    if params.is_empty() {
        return Ok(BoundQuery::plain(query));
    }

    let mut seen = std::collections::HashSet::with_capacity(params.len());
    let mut declarations = Vec::with_capacity(params.len());
    let mut assignments = Vec::with_capacity(params.len());
    let mut values = Vec::with_capacity(params.len());

    for (i, param) in params.iter().enumerate() {
        let name = param.bare_name();
        validate_sql_identifier(name)?;
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(Error::config(format!("duplicate parameter '@{}'", name)));
        }
        declarations.push(format!("@{} {}", name, param.ty.declaration()));
        assignments.push(format!("@{} = @P{}", name, i + 1));
        values.push(param.value.clone());
    }

    let sql = format!(
        "EXEC sp_executesql N'{}', N'{}', {}",
        escape_string_literal(query),
        declarations.join(", "),
        assignments.join(", ")
    );

    Ok(BoundQuery { sql, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamType;

    #[test]
    fn test_no_params_passes_query_through() {
        let bound = bind_named("SELECT 1", &[]).unwrap();
        assert_eq!(bound.sql, "SELECT 1");
        assert!(bound.values.is_empty());
    }

    #[test]
    fn test_named_params_wrap_in_sp_executesql() {
        let params = vec![
            Param::typed("@site", ParamType::Int, Value::Int64(12)).unwrap(),
            Param::typed("tag", ParamType::NVarChar, Value::from("a'b")).unwrap(),
        ];
        let bound = bind_named("SELECT * FROM t WHERE site = @site AND tag = @tag AND x = 'y'", &params)
            .unwrap();

        assert_eq!(
            bound.sql,
            "EXEC sp_executesql N'SELECT * FROM t WHERE site = @site AND tag = @tag AND x = ''y''', \
             N'@site int, @tag nvarchar(max)', @site = @P1, @tag = @P2"
        );
        assert_eq!(bound.values, vec![Value::Int32(12), Value::from("a'b")]);
    }

    #[test]
    fn test_rejects_duplicate_and_invalid_names() {
        let dup = vec![
            Param::typed("a", ParamType::Int, Value::Int32(1)).unwrap(),
            Param::typed("@A", ParamType::Int, Value::Int32(2)).unwrap(),
        ];
        assert!(bind_named("SELECT @a", &dup).is_err());

        let bad = vec![Param::typed("a;--", ParamType::Int, Value::Int32(1)).unwrap()];
        assert!(bind_named("SELECT 1", &bad).is_err());
    }
}
