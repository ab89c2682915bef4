use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::registry::StoreRegistry;
use crate::stream::{ColumnInfo, Frame};
use crate::{schema, sql, stream};
use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<StoreRegistry>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    #[serde(default)]
    banquet_url: String,
}

#[derive(Debug, Deserialize)]
struct SchemaParams {
    #[serde(default)]
    db: String,
}

#[derive(Debug, Serialize)]
struct SchemaResponse {
    columns: Vec<ColumnInfo>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(handle_query))
        .route("/schema/{table}", get(handle_schema))
        .route("/schema", get(missing_table))
        .route("/schema/", get(missing_table))
        .route("/health", get(handle_health))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Permissive CORS on every response; OPTIONS short-circuits with an empty
/// 200 before any handler or store access.
async fn cors(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return with_cors_headers(StatusCode::OK.into_response());
    }
    with_cors_headers(next.run(req).await)
}

fn with_cors_headers(mut res: Response) -> Response {
    let headers = res.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    res
}

async fn handle_health() -> &'static str {
    "OK"
}

async fn missing_table() -> ApiError {
    ApiError::Validation("table name required".to_string())
}

/// `POST /query`: compile the dataset URL and stream the result set back as
/// NDJSON frames, header first.
async fn handle_query(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    let req: QueryRequest = serde_json::from_str(&body)
        .map_err(|e| ApiError::Validation(format!("invalid request: {}", e)))?;

    tracing::info!("parsing banquet url: {}", req.banquet_url);
    let banquet = banquet_parser::parse_banquet(&req.banquet_url)?;

    let db_path = resolve_dataset_path(&banquet.dataset_path);
    let pool = state.registry.resolve(&db_path).await?;

    let statement = sql::compile(&banquet, &state.config.sql()).map_err(ApiError::Validation)?;
    tracing::info!("executing sql: {}", statement.text);

    // Prepare up front: column metadata survives an empty result set, and a
    // rejected statement still gets a clean 400 here. After this point the
    // 200 is committed and failures can only surface as an error frame.
    let columns = stream::prepare_columns(&pool, &statement.text).await?;

    let total = if banquet.table.is_empty() {
        None
    } else {
        stream::total_rows(&pool, &banquet.table, &banquet.where_clause).await
    };
    let header = Frame::header(columns, total);

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);
    let config = state.config.clone();
    tokio::spawn(stream::stream_result(
        pool,
        statement,
        header,
        config.row_overhead,
        config.chunk_bytes,
        tx,
    ));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header("x-content-type-options", "nosniff")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ApiError::Validation(e.to_string()))
}

/// `GET /schema/{table}?db=<path>`: column name/type pairs for one table.
async fn handle_schema(
    State(state): State<AppState>,
    UrlPath(table): UrlPath<String>,
    Query(params): Query<SchemaParams>,
) -> Result<Json<SchemaResponse>, ApiError> {
    if table.is_empty() {
        return Err(ApiError::Validation("table name required".to_string()));
    }
    if params.db.is_empty() {
        return Err(ApiError::Validation(
            "database path required (db query parameter)".to_string(),
        ));
    }

    let pool = state.registry.resolve(&params.db).await?;
    let columns = schema::describe(&pool, &table, state.config.hardened_sql).await?;
    Ok(Json(SchemaResponse { columns }))
}

/// The UI sends dataset paths without a leading slash; root them. The
/// `:memory:` sentinel must pass through untouched.
fn resolve_dataset_path(path: &str) -> String {
    if path.is_empty() || path.starts_with('/') || path == ":memory:" {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Thin bind-and-serve wrapper around the router.
pub struct HttpServer {
    addr: String,
    port_file: Option<PathBuf>,
    router: Router,
}

impl HttpServer {
    pub fn new(addr: String, port_file: Option<PathBuf>, router: Router) -> Self {
        Self {
            addr,
            port_file,
            router,
        }
    }

    pub async fn start(&self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        let local = listener.local_addr()?;
        tracing::info!("listening on {}", local);

        if let Some(path) = &self.port_file {
            // clients discover an OS-assigned port through this file
            if let Err(e) = std::fs::write(path, local.port().to_string()) {
                tracing::warn!("could not write port file {}: {}", path.display(), e);
            } else {
                tracing::info!("port written to {}", path.display());
            }
        }

        axum::serve(listener, self.router.clone()).await
    }
}
