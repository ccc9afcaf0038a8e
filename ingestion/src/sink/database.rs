//! SQL table sink over the `sqlx` Any driver (Postgres or SQLite).

use serde_json::Value;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{Any, AnyPool, Transaction};
use tracing::{debug, info};

use super::{SaveReport, DEFAULT_CHUNK_ROWS};
use crate::config::{SinkConfig, SinkMode};
use crate::error::{ConfigError, SinkError, SinkResult};
use crate::table::value::as_f64;
use crate::table::Table;

/// Bind parameters allowed in one statement (below the SQLite and Postgres limits).
const MAX_BIND_PARAMS: usize = 30_000;

/// SQL flavour, chosen from the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> SinkResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            let scheme = url.split(':').next().unwrap_or_default();
            Err(SinkError::Config(ConfigError::InvalidValue {
                field: "database url".to_string(),
                message: format!("unsupported scheme '{}'", scheme),
            }))
        }
    }

    /// Placeholder for the `n`th (1-based) bind parameter.
    fn placeholder(&self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${}", n),
            Self::Sqlite => "?".to_string(),
        }
    }
}

/// Column type inferred from the non-null values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    BigInt,
    Double,
    Boolean,
    Text,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Boolean => "BOOLEAN",
            Self::Text => "TEXT",
        }
    }

    /// Narrowest type holding every value of `column`; all-null is text.
    pub fn infer(table: &Table, column: &str) -> Self {
        let mut inferred: Option<Self> = None;
        for row in table.rows() {
            let kind = match Table::get(row, column) {
                Value::Null => continue,
                Value::Bool(_) => Self::Boolean,
                Value::Number(n) if n.is_i64() => Self::BigInt,
                Value::Number(_) => Self::Double,
                _ => return Self::Text,
            };
            inferred = Some(match (inferred, kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(Self::BigInt), Self::Double) | (Some(Self::Double), Self::BigInt) => {
                    Self::Double
                }
                _ => return Self::Text,
            });
        }
        inferred.unwrap_or(Self::Text)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn table_exists(
    tx: &mut Transaction<'_, Any>,
    dialect: Dialect,
    name: &str,
) -> SinkResult<bool> {
    let sql = match dialect {
        Dialect::Postgres => {
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = $1"
        }
        Dialect::Sqlite => "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
    };
    let count: i64 = sqlx::query_scalar(sql).bind(name).fetch_one(&mut **tx).await?;
    Ok(count > 0)
}

fn create_statement(name: &str, columns: &[(String, SqlType)], if_not_exists: bool) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|(c, t)| format!("{} {}", quote_ident(c), t.as_sql()))
        .collect();
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote_ident(name),
        defs.join(", ")
    )
}

fn insert_statement(dialect: Dialect, name: &str, columns: &[(String, SqlType)], rows: usize) -> String {
    let names: Vec<String> = columns.iter().map(|(c, _)| quote_ident(c)).collect();
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", quote_ident(name), names.join(", "));
    let mut n = 0;
    for r in 0..rows {
        if r > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for c in 0..columns.len() {
            if c > 0 {
                sql.push_str(", ");
            }
            n += 1;
            sql.push_str(&dialect.placeholder(n));
        }
        sql.push(')');
    }
    sql
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Write `table` into the SQL table `sink.name` in one transaction.
pub async fn save_with_pool(
    pool: &AnyPool,
    dialect: Dialect,
    table: &Table,
    sink: &SinkConfig,
) -> SinkResult<SaveReport> {
    let columns: Vec<(String, SqlType)> = table
        .columns()
        .iter()
        .map(|c| (c.clone(), SqlType::infer(table, c)))
        .collect();

    let mut tx = pool.begin().await?;
    match sink.mode {
        SinkMode::Fail => {
            if table_exists(&mut tx, dialect, &sink.name).await? {
                return Err(SinkError::AlreadyExists(sink.name.clone()));
            }
            sqlx::query(&create_statement(&sink.name, &columns, false))
                .execute(&mut *tx)
                .await?;
        }
        SinkMode::Replace => {
            let drop = format!("DROP TABLE IF EXISTS {}", quote_ident(&sink.name));
            sqlx::query(&drop).execute(&mut *tx).await?;
            sqlx::query(&create_statement(&sink.name, &columns, false))
                .execute(&mut *tx)
                .await?;
        }
        SinkMode::Append => {
            sqlx::query(&create_statement(&sink.name, &columns, true))
                .execute(&mut *tx)
                .await?;
        }
    }

    if !columns.is_empty() {
        let limit = (MAX_BIND_PARAMS / columns.len()).max(1);
        let chunk_rows = sink.chunksize.unwrap_or(DEFAULT_CHUNK_ROWS).min(limit);
        for (i, chunk) in table.rows().chunks(chunk_rows).enumerate() {
            let sql = insert_statement(dialect, &sink.name, &columns, chunk.len());
            let mut query = sqlx::query(&sql);
            for row in chunk {
                for (c, kind) in &columns {
                    let v = Table::get(row, c);
                    query = match kind {
                        SqlType::BigInt => query.bind(v.as_i64()),
                        SqlType::Double => query.bind(as_f64(v)),
                        SqlType::Boolean => query.bind(v.as_bool()),
                        SqlType::Text => query.bind(text(v)),
                    };
                }
            }
            query.execute(&mut *tx).await?;
            debug!(chunk = i, rows = chunk.len(), "batch inserted");
        }
    }
    tx.commit().await?;

    info!("Saved {} rows to table {}", table.len(), sink.name);
    Ok(SaveReport {
        rows: table.len(),
        location: format!("table {}", sink.name),
    })
}

/// Connect to `url` and save.
pub async fn save(table: &Table, sink: &SinkConfig, url: &str) -> SinkResult<SaveReport> {
    let dialect = Dialect::from_url(url)?;
    install_default_drivers();
    let pool = AnyPoolOptions::new().max_connections(1).connect(url).await?;
    let report = save_with_pool(&pool, dialect, table, sink).await;
    pool.close().await;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkKind;
    use serde_json::json;

    fn sample() -> Table {
        Table::from_values(vec![
            json!({ "date": "2021-01-01", "lga_name": "Sydney (C)", "case_count": 3, "rate": 0.5 }),
            json!({ "date": "2021-01-02", "lga_name": null, "case_count": 1, "rate": 2 }),
        ])
    }

    fn sink(mode: SinkMode) -> SinkConfig {
        SinkConfig {
            kind: SinkKind::Postgres,
            name: "cases".to_string(),
            mode,
            chunksize: Some(1),
            uri_env: "TEST_DB".to_string(),
        }
    }

    async fn memory_pool() -> AnyPool {
        install_default_drivers();
        AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn count(pool: &AnyPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM cases")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn test_infer_types() {
        let t = sample();
        assert_eq!(SqlType::infer(&t, "case_count"), SqlType::BigInt);
        assert_eq!(SqlType::infer(&t, "rate"), SqlType::Double);
        assert_eq!(SqlType::infer(&t, "lga_name"), SqlType::Text);
        assert_eq!(SqlType::infer(&t, "missing"), SqlType::Text);
    }

    #[test]
    fn test_statements() {
        let cols = vec![("a".to_string(), SqlType::BigInt), ("b\"c".to_string(), SqlType::Text)];
        assert_eq!(
            create_statement("t", &cols, true),
            r#"CREATE TABLE IF NOT EXISTS "t" ("a" BIGINT, "b""c" TEXT)"#
        );
        assert_eq!(
            insert_statement(Dialect::Postgres, "t", &cols, 2),
            r#"INSERT INTO "t" ("a", "b""c") VALUES ($1, $2), ($3, $4)"#
        );
        assert_eq!(
            insert_statement(Dialect::Sqlite, "t", &cols, 1),
            r#"INSERT INTO "t" ("a", "b""c") VALUES (?, ?)"#
        );
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("postgresql://u@h/db").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::from_url("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert!(Dialect::from_url("mysql://h/db").is_err());
    }

    #[tokio::test]
    async fn test_modes_against_sqlite() {
        let pool = memory_pool().await;

        save_with_pool(&pool, Dialect::Sqlite, &sample(), &sink(SinkMode::Fail)).await.unwrap();
        assert_eq!(count(&pool).await, 2);

        let err = save_with_pool(&pool, Dialect::Sqlite, &sample(), &sink(SinkMode::Fail))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::AlreadyExists(_)));

        save_with_pool(&pool, Dialect::Sqlite, &sample(), &sink(SinkMode::Append)).await.unwrap();
        assert_eq!(count(&pool).await, 4);

        save_with_pool(&pool, Dialect::Sqlite, &sample(), &sink(SinkMode::Replace)).await.unwrap();
        assert_eq!(count(&pool).await, 2);

        let (name, cases): (String, i64) =
            sqlx::query_as("SELECT lga_name, case_count FROM cases WHERE lga_name IS NOT NULL")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(name, "Sydney (C)");
        assert_eq!(cases, 3);
    }

    #[tokio::test]
    async fn test_save_to_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("covid.db").display());
        let report = save(&sample(), &sink(SinkMode::Replace), &url).await.unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.location, "table cases");
    }
}
