use crate::error::ApiError;
use crate::sql;
use crate::stream::ColumnInfo;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

/// Report the named table's columns as (name, declared type) pairs.
///
/// A table with no columns, including one that does not exist, yields an
/// empty list rather than an error; that is the natural shape of
/// `PRAGMA table_info`. The table name is interpolated into the pragma
/// (pragma arguments cannot be bound), so hardened mode applies the
/// identifier allow-list first.
pub async fn describe(
    pool: &SqlitePool,
    table: &str,
    hardened: bool,
) -> Result<Vec<ColumnInfo>, ApiError> {
    if hardened {
        sql::check_identifier(table).map_err(ApiError::Validation)?;
    }

    let query = format!("PRAGMA table_info({})", table);
    let rows = sqlx::query(&query)
        .fetch_all(pool)
        .await
        .map_err(ApiError::Query)?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        columns.push(ColumnInfo {
            name: row.try_get::<String, _>("name").map_err(ApiError::Query)?,
            type_name: row.try_get::<String, _>("type").map_err(ApiError::Query)?,
        });
    }
    Ok(columns)
}
