use crate::error::ApiError;
use crate::sql::CompiledStatement;
use bytes::Bytes;
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::convert::Infallible;
use tokio::sync::mpsc;

/// Column name and store-reported declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// One newline-delimited unit of the streaming response.
///
/// The header frame (columns + total) is emitted exactly once, before any
/// data frame. Data frames carry row batches. An error frame terminates a
/// stream that failed mid-scan, so clients can tell a truncated result from
/// a complete one.
#[derive(Debug, Serialize)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Frame {
    /// Header frame. A failed count probe (`total: None`) is reported as
    /// zero on the wire; the count is advisory either way.
    pub fn header(columns: Vec<ColumnInfo>, total: Option<i64>) -> Self {
        Self {
            columns: Some(columns),
            rows: None,
            total: Some(total.unwrap_or(0)),
            error: None,
        }
    }

    pub fn data(rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: None,
            rows: Some(rows),
            total: None,
            error: None,
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self {
            columns: None,
            rows: None,
            total: None,
            error: Some(message.into()),
        }
    }

    /// Serialize to one NDJSON line, newline included.
    pub fn to_line(&self) -> Bytes {
        let mut buf = serde_json::to_vec(self).unwrap_or_default();
        buf.push(b'\n');
        Bytes::from(buf)
    }
}

/// Accumulates rows for the current data frame, tracking an approximate
/// size. Exact byte counting is not worth the bookkeeping; a flat per-row
/// overhead keeps batch boundaries deterministic.
pub struct RowBatcher {
    rows: Vec<Vec<Value>>,
    approx: usize,
    row_overhead: usize,
    threshold: usize,
}

impl RowBatcher {
    pub fn new(row_overhead: usize, threshold: usize) -> Self {
        Self {
            rows: Vec::new(),
            approx: 0,
            row_overhead,
            threshold,
        }
    }

    /// Add a row; returns the full batch once the estimate reaches the
    /// threshold.
    pub fn push(&mut self, row: Vec<Value>) -> Option<Vec<Vec<Value>>> {
        self.rows.push(row);
        self.approx += self.row_overhead;
        if self.approx >= self.threshold {
            self.approx = 0;
            Some(std::mem::take(&mut self.rows))
        } else {
            None
        }
    }

    /// Remaining rows, if any, for the final data frame.
    pub fn finish(self) -> Option<Vec<Vec<Value>>> {
        if self.rows.is_empty() {
            None
        } else {
            Some(self.rows)
        }
    }
}

/// Prepare the statement to learn the result shape before execution. This
/// also surfaces a rejected statement while a clean 400 is still possible,
/// and yields column metadata even for an empty result set.
pub async fn prepare_columns(
    pool: &SqlitePool,
    sql_text: &str,
) -> Result<Vec<ColumnInfo>, ApiError> {
    let prepared = pool.prepare(sql_text).await.map_err(ApiError::Query)?;
    Ok(prepared
        .columns()
        .iter()
        .map(|c| ColumnInfo {
            name: c.name().to_string(),
            type_name: c.type_info().name().to_string(),
        })
        .collect())
}

/// Best-effort row count for the header frame. Errors are swallowed; the
/// count is advisory and must never fail the request.
pub async fn total_rows(pool: &SqlitePool, table: &str, where_clause: &str) -> Option<i64> {
    let mut sql = format!("SELECT COUNT(*) FROM {}", table);
    if !where_clause.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(where_clause);
    }
    match sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!("count probe failed for {}: {}", table, e);
            None
        }
    }
}

/// Execute the compiled statement and write response frames into `tx`.
///
/// The header frame goes out before any row is fetched. Rows are consumed
/// one at a time and batched; a scan failure mid-stream emits a trailing
/// error frame and stops. A send failure means the client disconnected, in
/// which case iteration is abandoned immediately.
pub async fn stream_result(
    pool: SqlitePool,
    statement: CompiledStatement,
    header: Frame,
    row_overhead: usize,
    chunk_bytes: usize,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
) {
    if tx.send(Ok(header.to_line())).await.is_err() {
        return;
    }

    let mut query = sqlx::query(statement.text.as_str());
    for arg in &statement.args {
        query = bind_value(query, arg);
    }

    let mut batcher = RowBatcher::new(row_overhead, chunk_bytes);
    let mut rows = query.fetch(&pool);
    loop {
        match rows.try_next().await {
            Ok(Some(row)) => {
                if let Some(batch) = batcher.push(decode_row(&row)) {
                    if tx.send(Ok(Frame::data(batch).to_line())).await.is_err() {
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("row scan failed mid-stream: {}", e);
                let _ = tx
                    .send(Ok(Frame::error(format!("row scan failed: {}", e)).to_line()))
                    .await;
                return;
            }
        }
    }

    if let Some(batch) = batcher.finish() {
        let _ = tx.send(Ok(Frame::data(batch).to_line())).await;
    }
}

/// Decode a row into transport values: null, integer, float, text or
/// boolean. Blobs are coerced to (lossy) text.
pub fn decode_row(row: &SqliteRow) -> Vec<Value> {
    (0..row.len()).map(|i| decode_cell(row, i)).collect()
}

fn decode_cell(row: &SqliteRow, i: usize) -> Value {
    let raw = match row.try_get_raw(i) {
        Ok(raw) => raw,
        Err(_) => return Value::Null,
    };
    if raw.is_null() {
        return Value::Null;
    }
    let info = raw.type_info();
    match info.name() {
        "INTEGER" => row
            .try_get::<i64, _>(i)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(i)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOLEAN" => row
            .try_get::<bool, _>(i)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "TEXT" => row
            .try_get::<String, _>(i)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(i)
            .map(|bytes| Value::from(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<i64, _>(i)
            .map(Value::from)
            .or_else(|_| row.try_get::<f64, _>(i).map(Value::from))
            .or_else(|_| row.try_get::<String, _>(i).map(Value::from))
            .unwrap_or(Value::Null),
    }
}

fn bind_value<'q>(
    q: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    v: &Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match v {
        Value::Null => q.bind::<Option<String>>(None),
        Value::Bool(b) => q.bind(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(u) = n.as_u64() {
                q.bind(u as i64)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q
            }
        }
        Value::String(s) => q.bind(s.clone()),
        other => q.bind(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(n: i64) -> Vec<Value> {
        vec![Value::from(n)]
    }

    #[test]
    fn header_frame_shape() {
        let columns = vec![ColumnInfo {
            name: "id".to_string(),
            type_name: "INTEGER".to_string(),
        }];
        let line = Frame::header(columns, Some(3)).to_line();
        assert_eq!(
            line.as_ref(),
            b"{\"columns\":[{\"name\":\"id\",\"type\":\"INTEGER\"}],\"total\":3}\n"
        );
    }

    #[test]
    fn failed_count_probe_reports_zero() {
        let line = Frame::header(Vec::new(), None).to_line();
        assert_eq!(line.as_ref(), b"{\"columns\":[],\"total\":0}\n");
    }

    #[test]
    fn data_frame_carries_only_rows() {
        let line = Frame::data(vec![vec![json!(1), json!("a")]]).to_line();
        assert_eq!(line.as_ref(), b"{\"rows\":[[1,\"a\"]]}\n");
    }

    #[test]
    fn error_frame_shape() {
        let line = Frame::error("boom").to_line();
        assert_eq!(line.as_ref(), b"{\"error\":\"boom\"}\n");
    }

    #[test]
    fn batch_flushes_when_estimate_crosses_threshold() {
        let mut batcher = RowBatcher::new(100, 300);
        assert!(batcher.push(row(1)).is_none());
        assert!(batcher.push(row(2)).is_none());
        let batch = batcher.push(row(3)).expect("third row crosses 300");
        assert_eq!(batch, vec![row(1), row(2), row(3)]);
        // the next batch starts fresh
        assert!(batcher.push(row(4)).is_none());
        assert_eq!(batcher.finish(), Some(vec![row(4)]));
    }

    #[test]
    fn empty_batcher_finishes_with_nothing() {
        let batcher = RowBatcher::new(100, 300);
        assert_eq!(batcher.finish(), None);
    }

    #[test]
    fn batch_boundaries_are_deterministic() {
        // 64 KiB threshold with the 100-byte estimate flushes every 656 rows
        let mut batcher = RowBatcher::new(100, 64 * 1024);
        let mut first_flush = None;
        for n in 1..=1000 {
            if let Some(batch) = batcher.push(row(n)) {
                first_flush = Some((n, batch.len()));
                break;
            }
        }
        assert_eq!(first_flush, Some((656, 656)));
    }
}
