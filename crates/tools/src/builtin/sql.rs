//! SQL tool family over a SQLite database.
//!
//! Gated on `REEF_SQLITE_PATH`: the tools are only registered when the
//! variable points at a database file. Queries are read-only; writes
//! go through the separate `sql_execute` tool.

use rcore::{Error, ParamSpec, ParamType, Result, ToolSchema};
use rusqlite::Connection;
use serde_json::Value;

use super::required_str;
use crate::Registry;

/// Environment variable naming the database file.
pub const DB_PATH_VAR: &str = "REEF_SQLITE_PATH";

pub fn register(registry: &Registry) -> Result<()> {
    registry.register_fn(
        ToolSchema::new("sql_tables", "List the tables in the database"),
        |_ctx, _params| async move {
            blocking(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names: Vec<String> = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<_, _>>()?;
                Ok(names.join("\n"))
            })
            .await
        },
    )?;

    registry.register_fn(
        ToolSchema::new("sql_describe", "Describe the columns of a table").param(
            "table",
            ParamSpec::required(ParamType::String, "Table name"),
        ),
        |_ctx, params| async move {
            let table = required_str(&params, "table")?.to_string();
            if !table.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(Error::validation("table", "invalid table name"));
            }
            blocking(move |conn| {
                let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
                let rows: Vec<String> = stmt
                    .query_map([], |row| {
                        let name: String = row.get(1)?;
                        let kind: String = row.get(2)?;
                        Ok(format!("{name} {kind}"))
                    })?
                    .collect::<std::result::Result<_, _>>()?;
                Ok(rows.join("\n"))
            })
            .await
        },
    )?;

    registry.register_fn(
        ToolSchema::new("sql_query", "Run a read-only SQL query and return rows as JSON")
            .param("sql", ParamSpec::required(ParamType::String, "A SELECT statement")),
        |_ctx, params| async move {
            let sql = required_str(&params, "sql")?.trim().to_string();
            let head = sql.to_lowercase();
            if !head.starts_with("select") && !head.starts_with("with") {
                return Err(Error::validation("sql", "only SELECT queries are allowed here"));
            }
            blocking(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|c| c.to_string()).collect();
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut object = serde_json::Map::new();
                    for (i, column) in columns.iter().enumerate() {
                        object.insert(column.clone(), cell_to_json(row, i));
                    }
                    out.push(Value::Object(object));
                }
                Ok(serde_json::to_string_pretty(&out).unwrap_or_default())
            })
            .await
        },
    )?;

    registry.register_fn(
        ToolSchema::new("sql_execute", "Run a write statement (INSERT/UPDATE/DELETE/DDL)")
            .param("sql", ParamSpec::required(ParamType::String, "The statement to execute")),
        |_ctx, params| async move {
            let sql = required_str(&params, "sql")?.to_string();
            blocking(move |conn| {
                let affected = conn.execute(&sql, [])?;
                Ok(format!("{affected} rows affected"))
            })
            .await
        },
    )?;

    Ok(())
}

async fn blocking<F>(f: F) -> Result<String>
where
    F: FnOnce(&Connection) -> rusqlite::Result<String> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let path = std::env::var(DB_PATH_VAR)
            .map_err(|_| Error::Auth(format!("{DB_PATH_VAR} is not set")))?;
        let conn = Connection::open(&path).map_err(|e| Error::tool("sql", e))?;
        f(&conn).map_err(|e| Error::tool("sql", e))
    })
    .await
    .map_err(|e| Error::tool("sql", std::io::Error::other(e)))?
}

fn cell_to_json(row: &rusqlite::Row<'_>, index: usize) -> Value {
    use rusqlite::types::ValueRef;
    match row.get_ref(index) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Integer(i)) => Value::from(i),
        Ok(ValueRef::Real(f)) => Value::from(f),
        Ok(ValueRef::Text(t)) => Value::String(String::from_utf8_lossy(t).into_owned()),
        Ok(ValueRef::Blob(b)) => Value::String(format!("<{} bytes>", b.len())),
        Err(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_guard_rejects_writes() {
        let head = "DELETE FROM users".trim().to_lowercase();
        assert!(!head.starts_with("select") && !head.starts_with("with"));
    }
}
