//! Catalog introspection for PostgreSQL.
//!
//! Each scan reads flat, pre-sorted rows from `information_schema` (foreign
//! keys from `pg_constraint`) and folds contiguous runs of the same `(schema, name)` into one entity. The ORDER BY
//! of every scan is what keeps those runs contiguous; without it the fold
//! silently produces duplicate, fragmented entities.

use crate::db::{
    ColumnMetadata, ConnectionTestResult, DatabaseMetadata, ForeignKeyMetadata,
    ParameterDirection, ParameterMetadata, RoutineKind, StoredProcedureMetadata, TableMetadata,
    ViewMetadata,
};
use crate::error::{Result, SqlCmdrError};
use sqlx::postgres::PgConnection;
use sqlx::{Column as SqlxColumn, Connection, Executor, Statement, TypeInfo};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for describing a routine's output shape.
const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

const TABLE_COLUMNS_SQL: &str = r#"
    SELECT
        c.table_schema::text,
        c.table_name::text,
        c.column_name::text,
        CASE c.data_type
            WHEN 'character varying' THEN 'varchar'
            WHEN 'character' THEN 'char'
            WHEN 'USER-DEFINED' THEN c.udt_name::text
            WHEN 'ARRAY' THEN c.udt_name::text
            ELSE c.data_type::text
        END AS data_type,
        (c.is_nullable = 'YES') AS is_nullable,
        CASE
            WHEN c.data_type = 'character varying' AND c.character_maximum_length IS NULL THEN -1
            ELSE c.character_maximum_length::int4
        END AS max_length,
        c.numeric_precision::int4,
        c.numeric_scale::int4
    FROM information_schema.tables t
    JOIN information_schema.columns c
        ON c.table_schema = t.table_schema
        AND c.table_name = t.table_name
    WHERE t.table_type = 'BASE TABLE'
        AND t.table_schema NOT IN ('pg_catalog', 'information_schema')
        AND t.table_schema NOT LIKE 'pg_toast%'
    ORDER BY c.table_schema, c.table_name, c.ordinal_position
"#;

const VIEW_COLUMNS_SQL: &str = r#"
    SELECT
        c.table_schema::text,
        c.table_name::text,
        c.column_name::text,
        CASE c.data_type
            WHEN 'character varying' THEN 'varchar'
            WHEN 'character' THEN 'char'
            WHEN 'USER-DEFINED' THEN c.udt_name::text
            WHEN 'ARRAY' THEN c.udt_name::text
            ELSE c.data_type::text
        END AS data_type,
        (c.is_nullable = 'YES') AS is_nullable,
        CASE
            WHEN c.data_type = 'character varying' AND c.character_maximum_length IS NULL THEN -1
            ELSE c.character_maximum_length::int4
        END AS max_length,
        c.numeric_precision::int4,
        c.numeric_scale::int4
    FROM information_schema.views v
    JOIN information_schema.columns c
        ON c.table_schema = v.table_schema
        AND c.table_name = v.table_name
    WHERE v.table_schema NOT IN ('pg_catalog', 'information_schema')
    ORDER BY c.table_schema, c.table_name, c.ordinal_position
"#;

// A routine without parameters still yields one row, with NULL parameter
// columns, from the LEFT JOIN.
const ROUTINES_SQL: &str = r#"
    SELECT
        r.routine_schema::text,
        r.routine_name::text,
        r.routine_type::text,
        COALESCE(p.parameter_name::text, '$' || p.ordinal_position::text) AS parameter_name,
        CASE p.data_type
            WHEN 'character varying' THEN 'varchar'
            WHEN 'character' THEN 'char'
            WHEN 'USER-DEFINED' THEN p.udt_name::text
            WHEN 'ARRAY' THEN p.udt_name::text
            ELSE p.data_type::text
        END AS data_type,
        p.parameter_mode::text,
        p.character_maximum_length::int4,
        p.numeric_precision::int4,
        p.numeric_scale::int4,
        r.routine_definition::text
    FROM information_schema.routines r
    LEFT JOIN information_schema.parameters p
        ON p.specific_schema = r.specific_schema
        AND p.specific_name = r.specific_name
    WHERE r.routine_type IN ('PROCEDURE', 'FUNCTION')
        AND r.routine_schema NOT IN ('pg_catalog', 'information_schema')
    ORDER BY r.routine_schema, r.routine_name, r.specific_name, p.ordinal_position
"#;

// Constraint names are only unique per table, so pairs are read from
// pg_constraint rather than joined by name through information_schema.
const FOREIGN_KEYS_SQL: &str = r#"
    SELECT
        con.conname::text,
        pn.nspname::text,
        pc.relname::text,
        pa.attname::text,
        rn.nspname::text,
        rc.relname::text,
        ra.attname::text
    FROM pg_constraint con
    CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
        WITH ORDINALITY AS k(parent_attnum, referenced_attnum, ordinal)
    JOIN pg_class pc ON pc.oid = con.conrelid
    JOIN pg_namespace pn ON pn.oid = pc.relnamespace
    JOIN pg_attribute pa ON pa.attrelid = con.conrelid AND pa.attnum = k.parent_attnum
    JOIN pg_class rc ON rc.oid = con.confrelid
    JOIN pg_namespace rn ON rn.oid = rc.relnamespace
    JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.referenced_attnum
    WHERE con.contype = 'f'
        AND pn.nspname NOT IN ('pg_catalog', 'information_schema')
        AND pn.nspname NOT LIKE 'pg_toast%'
    ORDER BY pn.nspname, pc.relname, con.conname, k.ordinal
"#;

type ColumnTuple = (
    String,
    String,
    String,
    String,
    bool,
    Option<i32>,
    Option<i32>,
    Option<i32>,
);

type RoutineTuple = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i32>,
    Option<i32>,
    Option<i32>,
    Option<String>,
);

type ForeignKeyTuple = (String, String, String, String, String, String, String);

/// Tests connections and builds catalog snapshots.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataService;

impl MetadataService {
    pub fn new() -> Self {
        Self
    }

    /// Opens a connection and reports server version, database and user.
    ///
    /// Failures are returned in the result, never as an error; only a blank
    /// connection string is rejected.
    pub async fn test_connection(&self, connection_string: &str) -> Result<ConnectionTestResult> {
        validate_connection_string(connection_string)?;

        let mut conn = match connect(connection_string).await {
            Ok(conn) => conn,
            Err(e) => return Ok(ConnectionTestResult::failed(e.driver_message())),
        };

        let result = match describe_session(&mut conn).await {
            Ok((server_version, database_name, user_name)) => {
                ConnectionTestResult::connected(server_version, database_name, user_name)
            }
            Err(e) => ConnectionTestResult::failed(e.driver_message()),
        };

        close(conn).await;
        Ok(result)
    }

    /// Reads tables, views, routines and foreign keys over one connection.
    ///
    /// Connection and scan failures are returned as errors. Failing to
    /// describe a routine's output never is; that routine's `output_columns`
    /// stays empty.
    pub async fn get_metadata(&self, connection_string: &str) -> Result<DatabaseMetadata> {
        validate_connection_string(connection_string)?;

        let mut conn = connect(connection_string).await?;

        let tables = fetch_tables(&mut conn).await?;
        let views = fetch_views(&mut conn).await?;
        let stored_procedures = fetch_routines(&mut conn).await?;
        let foreign_keys = fetch_foreign_keys(&mut conn).await?;

        close(conn).await;

        let metadata = DatabaseMetadata {
            tables,
            views,
            stored_procedures,
            foreign_keys,
        };
        info!("Catalog loaded: {}", metadata.summary());
        Ok(metadata)
    }
}

fn validate_connection_string(connection_string: &str) -> Result<()> {
    if connection_string.trim().is_empty() {
        return Err(SqlCmdrError::invalid_argument(
            "Connection string cannot be null or empty.",
        ));
    }
    Ok(())
}

/// Opens a single connection, retrying transient failures with backoff.
async fn connect(connection_string: &str) -> Result<PgConnection> {
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
    let mut attempt = 1;

    loop {
        debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

        match PgConnection::connect(connection_string).await {
            Ok(conn) => {
                debug!("Successfully connected to database");
                return Ok(conn);
            }
            Err(e) if attempt < MAX_RETRY_ATTEMPTS && is_transient_error(&e) => {
                warn!(
                    "Connection attempt {} failed (transient error), retrying in {:?}",
                    attempt, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2; // Exponential backoff
                attempt += 1;
            }
            Err(e) => return Err(SqlCmdrError::connection(driver_message(&e))),
        }
    }
}

async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "Error while closing catalog connection");
    }
}

async fn describe_session(conn: &mut PgConnection) -> Result<(String, String, String)> {
    let (server_version, database_name): (String, String) =
        sqlx::query_as("SELECT current_setting('server_version'), current_database()::text")
            .fetch_one(&mut *conn)
            .await
            .map_err(query_error)?;

    let user_name: Option<String> = sqlx::query_scalar("SELECT session_user::text")
        .fetch_one(&mut *conn)
        .await
        .map_err(query_error)?;

    Ok((
        server_version,
        database_name,
        user_name.unwrap_or_else(|| "Unknown".to_string()),
    ))
}

async fn fetch_tables(conn: &mut PgConnection) -> Result<Vec<TableMetadata>> {
    let rows: Vec<ColumnTuple> = sqlx::query_as(TABLE_COLUMNS_SQL)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| SqlCmdrError::query(format!("Failed to fetch tables: {}", driver_message(&e))))?;

    Ok(fold_tables(rows.into_iter().map(ColumnRow::from)))
}

async fn fetch_views(conn: &mut PgConnection) -> Result<Vec<ViewMetadata>> {
    let rows: Vec<ColumnTuple> = sqlx::query_as(VIEW_COLUMNS_SQL)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| SqlCmdrError::query(format!("Failed to fetch views: {}", driver_message(&e))))?;

    Ok(fold_views(rows.into_iter().map(ColumnRow::from)))
}

async fn fetch_routines(conn: &mut PgConnection) -> Result<Vec<StoredProcedureMetadata>> {
    let rows: Vec<RoutineTuple> = sqlx::query_as(ROUTINES_SQL)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| {
            SqlCmdrError::query(format!("Failed to fetch routines: {}", driver_message(&e)))
        })?;

    let mut routines = fold_routines(rows.into_iter().map(RoutineRow::from));

    for routine in &mut routines {
        match describe_output_columns(conn, routine).await {
            Ok(columns) => routine.output_columns = columns,
            Err(e) => debug!(
                routine = %routine.full_name(),
                error = %e,
                "Output shape unavailable"
            ),
        }
    }

    Ok(routines)
}

async fn fetch_foreign_keys(conn: &mut PgConnection) -> Result<Vec<ForeignKeyMetadata>> {
    let rows: Vec<ForeignKeyTuple> = sqlx::query_as(FOREIGN_KEYS_SQL)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| {
            SqlCmdrError::query(format!("Failed to fetch foreign keys: {}", driver_message(&e)))
        })?;

    Ok(rows
        .into_iter()
        .map(
            |(
                name,
                parent_schema,
                parent_table,
                parent_column,
                referenced_schema,
                referenced_table,
                referenced_column,
            )| ForeignKeyMetadata {
                name,
                parent_schema,
                parent_table,
                parent_column,
                referenced_schema,
                referenced_table,
                referenced_column,
            },
        )
        .collect())
}

/// Prepares (without executing) the routine's describe statement and reads the
/// shape of its result.
async fn describe_output_columns(
    conn: &mut PgConnection,
    routine: &StoredProcedureMetadata,
) -> Result<Vec<ColumnMetadata>> {
    let statement_sql = routine.describe_sql();

    let statement = tokio::time::timeout(
        DESCRIBE_TIMEOUT,
        (&mut *conn).prepare(statement_sql.as_str()),
    )
    .await
    .map_err(|_| {
        SqlCmdrError::query(format!(
            "Describing {} timed out after {} seconds",
            routine.full_name(),
            DESCRIBE_TIMEOUT.as_secs()
        ))
    })?
    .map_err(query_error)?;

    Ok(statement
        .columns()
        .iter()
        .map(|col| ColumnMetadata::new(col.name(), col.type_info().name().to_lowercase()))
        .collect())
}

/// A catalog row that belongs to the object identified by `(schema, name)`.
trait CatalogRow {
    fn object_key(&self) -> (&str, &str);
}

/// Folds contiguous rows with the same object key into one entity.
///
/// `start` creates the entity from the first row of a run; `append` adds each
/// row's child fact (including the first row's) to the current entity.
fn group_runs<R, E>(
    rows: impl IntoIterator<Item = R>,
    mut start: impl FnMut(&R) -> E,
    mut append: impl FnMut(&mut E, R),
) -> Vec<E>
where
    R: CatalogRow,
{
    let mut grouped = Vec::new();
    let mut current: Option<((String, String), E)> = None;

    for row in rows {
        let starts_run = match &current {
            Some(((schema, name), _)) => row.object_key() != (schema.as_str(), name.as_str()),
            None => true,
        };

        if starts_run {
            let (schema, name) = row.object_key();
            let key = (schema.to_string(), name.to_string());
            if let Some((_, finished)) = current.replace((key, start(&row))) {
                grouped.push(finished);
            }
        }

        if let Some((_, entity)) = current.as_mut() {
            append(entity, row);
        }
    }

    if let Some((_, finished)) = current {
        grouped.push(finished);
    }

    grouped
}

struct ColumnRow {
    schema: String,
    object: String,
    column: ColumnMetadata,
}

impl From<ColumnTuple> for ColumnRow {
    fn from(
        (schema, object, name, data_type, is_nullable, max_length, precision, scale): ColumnTuple,
    ) -> Self {
        Self {
            schema,
            object,
            column: ColumnMetadata::new(name, data_type)
                .nullable(is_nullable)
                .with_length(max_length)
                .with_precision(precision, scale),
        }
    }
}

impl CatalogRow for ColumnRow {
    fn object_key(&self) -> (&str, &str) {
        (&self.schema, &self.object)
    }
}

struct RoutineRow {
    schema: String,
    name: String,
    kind: RoutineKind,
    definition: Option<String>,
    parameter: Option<ParameterMetadata>,
}

impl From<RoutineTuple> for RoutineRow {
    fn from(
        (
            schema,
            name,
            routine_type,
            parameter_name,
            data_type,
            parameter_mode,
            max_length,
            precision,
            scale,
            definition,
        ): RoutineTuple,
    ) -> Self {
        let parameter = match (parameter_name, data_type) {
            (Some(parameter_name), Some(data_type)) => Some(
                ParameterMetadata::new(
                    parameter_name,
                    data_type,
                    ParameterDirection::from_mode(parameter_mode.as_deref().unwrap_or("IN")),
                )
                .with_length(max_length)
                .with_precision(precision, scale),
            ),
            _ => None,
        };

        Self {
            schema,
            name,
            kind: RoutineKind::parse(&routine_type).unwrap_or(RoutineKind::Function),
            definition,
            parameter,
        }
    }
}

impl CatalogRow for RoutineRow {
    fn object_key(&self) -> (&str, &str) {
        (&self.schema, &self.name)
    }
}

fn fold_tables(rows: impl IntoIterator<Item = ColumnRow>) -> Vec<TableMetadata> {
    group_runs(
        rows,
        |row| TableMetadata::new(&row.schema, &row.object),
        |table, row| table.columns.push(row.column),
    )
}

fn fold_views(rows: impl IntoIterator<Item = ColumnRow>) -> Vec<ViewMetadata> {
    group_runs(
        rows,
        |row| ViewMetadata::new(&row.schema, &row.object),
        |view, row| view.columns.push(row.column),
    )
}

fn fold_routines(rows: impl IntoIterator<Item = RoutineRow>) -> Vec<StoredProcedureMetadata> {
    group_runs(
        rows,
        |row| {
            StoredProcedureMetadata::new(&row.schema, &row.name, row.kind)
                .with_definition(row.definition.clone())
        },
        |routine, row| {
            if let Some(parameter) = row.parameter {
                routine.parameters.push(parameter);
            }
        },
    )
}

fn query_error(error: sqlx::Error) -> SqlCmdrError {
    SqlCmdrError::query(driver_message(&error))
}

/// Returns the server's own message for database errors, or the driver's
/// display text otherwise.
fn driver_message(error: &sqlx::Error) -> String {
    match error.as_database_error() {
        Some(db_error) => db_error.message().to_string(),
        None => error.to_string(),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    // Authentication and database-not-found errors are not transient
    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}
