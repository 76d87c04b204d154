// pgvault/src/restore/db_restore.rs
use anyhow::{Context, Result};
use sqlx::{Connection, PgConnection};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use crate::config::DbConfig;
use crate::errors::ToolError;
use crate::utils::find_executable;

// Relations of one kind (`$1` is a pg_class.relkind letter) in the default
// schema, skipping extension members and sequences owned by a column.
const RELATIONS_OF_KIND: &str = "SELECT c.relname::text FROM pg_class c
     JOIN pg_namespace n ON n.oid = c.relnamespace
     WHERE n.nspname = current_schema() AND c.relkind::text = $1
       AND NOT EXISTS (SELECT 1 FROM pg_depend d
                       WHERE d.classid = 'pg_class'::regclass AND d.objid = c.oid
                         AND d.deptype IN ('e', 'a', 'i'))
     ORDER BY c.relname";

// Functions and procedures rendered as `name(argtypes)`, quoted as needed.
const ROUTINES: &str = "SELECT p.oid::regprocedure::text FROM pg_proc p
     JOIN pg_namespace n ON n.oid = p.pronamespace
     WHERE n.nspname = current_schema() AND p.prokind IN ('f', 'p')
       AND NOT EXISTS (SELECT 1 FROM pg_depend d
                       WHERE d.classid = 'pg_proc'::regclass AND d.objid = p.oid AND d.deptype = 'e')
     ORDER BY 1";

// Enums, domains, ranges and standalone composite types. Row types of
// tables and array types go away with their owners.
const TYPES: &str = "SELECT t.oid::regtype::text FROM pg_type t
     JOIN pg_namespace n ON n.oid = t.typnamespace
     LEFT JOIN pg_class c ON c.oid = t.typrelid
     WHERE n.nspname = current_schema()
       AND (t.typtype IN ('e', 'd', 'r') OR (t.typtype = 'c' AND c.relkind = 'c'))
       AND NOT EXISTS (SELECT 1 FROM pg_depend d
                       WHERE d.classid = 'pg_type'::regclass AND d.objid = t.oid AND d.deptype = 'e')
     ORDER BY 1";

/// Objects of the default schema that a plain-format dump recreates with
/// bare `CREATE` statements.
///
/// Table, view and sequence entries are raw names; routines and types are
/// already rendered by the catalog as SQL (`f(integer)`, `"Mood"`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaObjects {
    pub tables: Vec<String>,
    pub views: Vec<String>,
    pub materialized_views: Vec<String>,
    pub sequences: Vec<String>,
    pub routines: Vec<String>,
    pub types: Vec<String>,
}

impl SchemaObjects {
    pub fn count(&self) -> usize {
        self.tables.len()
            + self.views.len()
            + self.materialized_views.len()
            + self.sequences.len()
            + self.routines.len()
            + self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// DROP statements, tables first. Every statement uses IF EXISTS so
    /// objects already removed by an earlier CASCADE are skipped.
    pub fn drop_statements(&self) -> Vec<String> {
        let quoted = |names: &[String]| names.iter().map(|n| quote_identifier(n)).collect::<Vec<_>>();
        [
            drop_statement("TABLE", quoted(&self.tables)),
            drop_statement("VIEW", quoted(&self.views)),
            drop_statement("MATERIALIZED VIEW", quoted(&self.materialized_views)),
            drop_statement("SEQUENCE", quoted(&self.sequences)),
            drop_statement("ROUTINE", self.routines.clone()),
            drop_statement("TYPE", self.types.clone()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Base tables of the connection's default schema, in name order.
pub async fn list_tables(conn: &mut PgConnection) -> Result<Vec<String>> {
    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT table_name::text FROM information_schema.tables
         WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
         ORDER BY table_name",
    )
    .fetch_all(conn)
    .await
    .context("Failed to fetch table list from information_schema")?;

    Ok(tables.into_iter().map(|(name,)| name).collect())
}

async fn fetch_names(conn: &mut PgConnection, query: &str, relkind: Option<&str>, what: &str) -> Result<Vec<String>> {
    let mut statement = sqlx::query_as::<_, (String,)>(query);
    if let Some(relkind) = relkind {
        statement = statement.bind(relkind.to_string());
    }
    let rows = statement
        .fetch_all(conn)
        .await
        .with_context(|| format!("Failed to list {} in the default schema", what))?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Catalog introspection of everything `clear_database` removes.
pub async fn list_schema_objects(conn: &mut PgConnection) -> Result<SchemaObjects> {
    Ok(SchemaObjects {
        tables: list_tables(&mut *conn).await?,
        views: fetch_names(&mut *conn, RELATIONS_OF_KIND, Some("v"), "views").await?,
        materialized_views: fetch_names(&mut *conn, RELATIONS_OF_KIND, Some("m"), "materialized views").await?,
        sequences: fetch_names(&mut *conn, RELATIONS_OF_KIND, Some("S"), "sequences").await?,
        routines: fetch_names(&mut *conn, ROUTINES, None, "functions").await?,
        types: fetch_names(&mut *conn, TYPES, None, "types").await?,
    })
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn drop_statement(kind: &str, names: Vec<String>) -> Option<String> {
    if names.is_empty() {
        return None;
    }
    Some(format!("DROP {} IF EXISTS {} CASCADE", kind, names.join(", ")))
}

/// One statement dropping every table with CASCADE, so foreign keys and
/// dependent objects need no manual ordering.
pub fn drop_tables_statement(tables: &[String]) -> Option<String> {
    drop_statement("TABLE", tables.iter().map(|t| quote_identifier(t)).collect())
}

/// Drops the tables, views, sequences, routines and types of the default
/// schema inside one transaction, so the dump can be replayed on top.
/// An empty schema is a no-op. Returns what was dropped.
pub async fn clear_database(conn: &mut PgConnection) -> Result<SchemaObjects> {
    let objects = list_schema_objects(conn).await?;
    if objects.is_empty() {
        println!("🫙 Database has no tables, nothing to clear");
        return Ok(objects);
    }

    tracing::debug!(?objects, "dropping schema objects");
    let mut tx = conn.begin().await.context("Failed to begin transaction for clearing tables")?;
    for statement in objects.drop_statements() {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", statement))?;
    }
    tx.commit().await.context("Failed to commit schema clear")?;

    println!(
        "😳 Database cleared ({} tables, {} other objects dropped)",
        objects.tables.len(),
        objects.count() - objects.tables.len()
    );
    Ok(objects)
}

/// psql invocation for a dump replay. Statement errors are reported on
/// stderr without aborting the load; psql exits nonzero only when it
/// cannot connect or read the file.
fn psql_args(db_url: &str, sql_file_path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-X", "-q", "--no-password", "-d", db_url, "-f"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(sql_file_path.as_os_str().to_owned());
    args
}

/// Executes a SQL file against the target database with `psql`.
pub fn load_sql_file(database: &DbConfig, sql_file_path: &Path) -> Result<()> {
    if !sql_file_path.is_file() {
        return Err(ToolError::MissingSqlFile(sql_file_path.display().to_string()).into());
    }

    let psql_path = find_executable("psql")?;
    let db_url = database.connection_url()?;
    tracing::debug!(
        psql = %psql_path.display(),
        database = %database.redacted_url(),
        file = %sql_file_path.display(),
        "executing SQL file"
    );

    let status = Command::new(psql_path)
        .args(psql_args(db_url.as_str(), sql_file_path))
        .status()
        .with_context(|| format!("Failed to execute psql for file: {}", sql_file_path.display()))?;

    if !status.success() {
        return Err(ToolError::command("psql", status).into());
    }
    Ok(())
}
