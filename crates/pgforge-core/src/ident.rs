//! PostgreSQL identifier validation (4.A).
//!
//! First-line defense against SQL injection wherever a name is
//! composed into DDL/DML by string substitution rather than bind
//! parameters (table names in `EXECUTE format(...)`, function names in
//! generated `cron.job` SQL calls, etc). An identifier accepted here
//! is safe to inline; one rejected here must never be passed through.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::error::{Error, Result};

const UNQUALIFIED_MAX_LEN: usize = 63;

/// PostgreSQL reserved keywords (SQL Keywords appendix, "reserved" and
/// "reserved (can't be function or type)" categories) plus the
/// SQL:2023/2016/92 reserved column-name keyword set, plus built-in
/// data type names. `TIMESTAMP` is intentionally omitted: the event
/// store this crate backs uses `timestamp` as a column name.
static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Reserved SQL keywords
        "ALL", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ASYMMETRIC",
        "BOTH", "CASE", "CAST", "CHECK", "COLLATE", "COLUMN", "CONSTRAINT", "CREATE",
        "CURRENT_CATALOG", "CURRENT_DATE", "CURRENT_ROLE", "CURRENT_TIME", "CURRENT_USER",
        "DEFAULT", "DEFERRABLE", "DESC", "DISTINCT", "DO", "ELSE", "END", "EXCEPT",
        "FALSE", "FETCH", "FOR", "FOREIGN", "FROM", "GRANT", "GROUP", "HAVING", "IN",
        "INITIALLY", "INTERSECT", "INTO", "LATERAL", "LEADING", "LIMIT", "LOCALTIME",
        "LOCALTIMESTAMP", "NOT", "NULL", "OFFSET", "ON", "ONLY", "OR", "ORDER", "PLACING",
        "PRIMARY", "REFERENCES", "RETURNING", "SELECT", "SESSION_USER", "SOME",
        "SYMMETRIC", "TABLE", "THEN", "TO", "TRAILING", "TRUE", "UNION", "UNIQUE", "USER",
        "USING", "VARIADIC", "WHEN", "WHERE", "WINDOW", "WITH",
        // SQL:2023 / 2016 / 92 reserved column keywords (superset beyond Postgres-reserved)
        "ABSOLUTE", "ACTION", "ADD", "ALLOCATE", "ALTER", "ARE", "AUTHORIZATION", "BEGIN",
        "BETWEEN", "BIT", "BY", "CASCADE", "CASCADED", "CATALOG", "CLOSE", "COALESCE",
        "COMMIT", "CONNECT", "CONNECTION", "CONTINUE", "CORRESPONDING", "COUNT", "CROSS",
        "CURRENT", "CURSOR", "DAY", "DEALLOCATE", "DECLARE", "DELETE", "DESCRIBE",
        "DIAGNOSTICS", "DISCONNECT", "DOMAIN", "DROP", "ELSE", "ESCAPE", "EXCEPTION",
        "EXEC", "EXECUTE", "EXISTS", "EXTERNAL", "EXTRACT", "FIRST", "FOUND", "FULL",
        "GET", "GLOBAL", "GO", "GOTO", "HOUR", "IDENTITY", "IMMEDIATE", "INDICATOR",
        "INNER", "INPUT", "INSENSITIVE", "INSERT", "INTERVAL", "ISOLATION", "JOIN",
        "KEY", "LANGUAGE", "LAST", "LEFT", "LEVEL", "LOWER", "MATCH", "MINUTE", "MODULE",
        "MONTH", "NAMES", "NATIONAL", "NATURAL", "NEXT", "NO", "OCTET_LENGTH", "OF",
        "OPEN", "OPTION", "OUTER", "OUTPUT", "OVERLAPS", "PAD", "PARTIAL", "PREPARE",
        "PRESERVE", "PRIOR", "PRIVILEGES", "PROCEDURE", "PUBLIC", "READ", "REAL",
        "RELATIVE", "RESTRICT", "REVOKE", "RIGHT", "ROLLBACK", "ROWS", "SCHEMA",
        "SCROLL", "SECOND", "SECTION", "SESSION", "SET", "SIZE", "SPACE", "SQL",
        "SQLCODE", "SQLERROR", "SQLSTATE", "SUBSTRING", "SUM", "SYSTEM_USER", "TEMPORARY",
        "TRANSACTION", "TRANSLATE", "TRANSLATION", "TRIM", "UNKNOWN", "UPDATE", "UPPER",
        "USAGE", "VALUE", "VALUES", "VARYING", "VIEW", "WHENEVER", "WORK", "WRITE",
        "YEAR", "ZONE",
        // Built-in PostgreSQL data types
        "BIGINT", "BIGSERIAL", "BOOLEAN", "BOX", "BYTEA", "CHAR", "CHARACTER", "CIDR",
        "CIRCLE", "DATE", "DECIMAL", "DOUBLE", "FLOAT4", "FLOAT8", "INET", "INT",
        "INT2", "INT4", "INT8", "INTEGER", "JSON", "JSONB", "LINE", "LSEG", "MACADDR",
        "MACADDR8", "MONEY", "NUMERIC", "PATH", "PG_LSN", "POINT", "POLYGON", "PRECISION",
        "SERIAL", "SERIAL2", "SERIAL4", "SERIAL8", "SMALLINT", "SMALLSERIAL", "TEXT",
        "TIME", "TSQUERY", "TSVECTOR", "TXID_SNAPSHOT", "UUID", "VARBIT", "VARCHAR",
        "XML",
    ]
    .into_iter()
    .collect()
});

fn is_unquoted_identifier_shape(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_reserved(name: &str) -> bool {
    RESERVED.contains(name.trim().to_ascii_uppercase().as_str())
}

/// Validate a name intended for use as a table or column identifier.
///
/// `context` is an optional human-readable label (e.g. `"TTL target
/// table"`) folded into the error message to help diagnose which call
/// site rejected the name.
pub fn check_is_valid_table_or_column_name(name: &str, context: Option<&str>) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(match context {
            Some(ctx) => Error::invalid_identifier_in(name, ctx),
            None => Error::invalid_identifier(name),
        });
    }
    if is_reserved(trimmed) || !is_unquoted_identifier_shape(trimmed) {
        return Err(match context {
            Some(ctx) => Error::invalid_identifier_in(name, ctx),
            None => Error::invalid_identifier(name),
        });
    }
    Ok(())
}

/// Whether `name` is safe to use, unquoted, as a PostgreSQL function
/// name, in either unqualified (`fn`) or schema-qualified (`schema.fn`)
/// form. Each half is independently bound to 63 characters and may not
/// be reserved.
pub fn is_valid_function_name(name: &str) -> bool {
    fn half_is_valid(half: &str) -> bool {
        let trimmed = half.trim();
        !trimmed.is_empty()
            && trimmed.len() <= UNQUALIFIED_MAX_LEN
            && is_unquoted_identifier_shape(trimmed)
            && !is_reserved(trimmed)
    }

    match name.split_once('.') {
        Some((schema, func)) => {
            !func.contains('.') && half_is_valid(schema) && half_is_valid(func)
        }
        None => half_is_valid(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(check_is_valid_table_or_column_name("events", None).is_ok());
        assert!(check_is_valid_table_or_column_name("_internal_audit", None).is_ok());
        assert!(check_is_valid_table_or_column_name("created_at", None).is_ok());
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(check_is_valid_table_or_column_name("", None).is_err());
        assert!(check_is_valid_table_or_column_name("   ", None).is_err());
    }

    #[test]
    fn rejects_reserved_keywords_case_insensitively() {
        for candidate in ["select", "SELECT", "Table", "union", "integer", "Boolean"] {
            assert!(
                check_is_valid_table_or_column_name(candidate, None).is_err(),
                "expected {candidate} to be rejected"
            );
        }
    }

    #[test]
    fn timestamp_is_intentionally_not_reserved() {
        assert!(check_is_valid_table_or_column_name("timestamp", None).is_ok());
    }

    #[test]
    fn rejects_malformed_shapes() {
        assert!(check_is_valid_table_or_column_name("9leading_digit", None).is_err());
        assert!(check_is_valid_table_or_column_name("has space", None).is_err());
        assert!(check_is_valid_table_or_column_name("has-dash", None).is_err());
        assert!(check_is_valid_table_or_column_name("schema.table", None).is_err());
    }

    #[test]
    fn accepts_names_longer_than_the_function_name_cap() {
        // Unlike `is_valid_function_name`, the table/column check has no
        // length bound in the spec's rule set.
        let long = "a".repeat(64);
        assert!(check_is_valid_table_or_column_name(&long, None).is_ok());
    }

    #[test]
    fn function_name_accepts_unqualified() {
        assert!(is_valid_function_name("pgforge_ttl_delete"));
        assert!(!is_valid_function_name("select"));
    }

    #[test]
    fn function_name_accepts_qualified_when_both_halves_valid() {
        assert!(is_valid_function_name("app.fn_insert_5"));
        assert!(!is_valid_function_name("app.select"));
        assert!(!is_valid_function_name("select.fn_insert_5"));
        assert!(!is_valid_function_name("a.b.c"));
    }

    #[test]
    fn function_name_enforces_length_per_half() {
        let long = "a".repeat(64);
        assert!(!is_valid_function_name(&long));
        assert!(!is_valid_function_name(&format!("{long}.fn")));
        assert!(!is_valid_function_name(&format!("schema.{long}")));
    }
}
