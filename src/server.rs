//! Read-only HTTP API over the result store.
//!
//! - `GET /db/:table/:id` one row, `404` when absent
//! - `GET /db/stats?table=rMN` aggregate statistics (default table from config)
//! - `GET /index.html` static page, `404` when missing
//!
//! Table names are resolved against the fixed family list before the store is
//! touched; anything else is a `400`. Store calls are blocking SQLite work and
//! run on tokio's blocking pool, never on a runtime worker.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::counter::CountedResult;
use crate::error::{QueryValidationError, StoreError};
use crate::ramsey::ParameterPair;
use crate::store::{Aggregate, ResultStore};

pub struct AppState {
    store: Mutex<ResultStore>,
    static_dir: PathBuf,
    default_table: ParameterPair,
}

impl AppState {
    pub fn new(store: ResultStore, static_dir: PathBuf, default_table: ParameterPair) -> Self {
        Self {
            store: Mutex::new(store),
            static_dir,
            default_table,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(QueryValidationError),
    NotFound(String),
    Internal(String),
}

impl From<QueryValidationError> for ApiError {
    fn from(err: QueryValidationError) -> Self {
        Self::BadRequest(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound("Row not found".to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(err) => {
                warn!(%err, "rejected query");
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            Self::Internal(detail) => {
                error!(%detail, "store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/db/stats", get(stats))
        .route("/db/:table/:id", get(read_row))
        .route("/index.html", get(index))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> io::Result<()> {
    info!("HTTP API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

async fn read_row(
    State(state): State<Arc<AppState>>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<CountedResult>, ApiError> {
    let pair = ParameterPair::from_table_name(&table)?;
    let id = id
        .parse::<u64>()
        .map_err(|_| QueryValidationError::MalformedId(id.clone()))?;
    let row = with_store(&state, move |store| store.get(pair, id)).await?;
    Ok(Json(row))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    table: Option<String>,
}

async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Aggregate>, ApiError> {
    let pair = match query.table.as_deref() {
        Some(name) => ParameterPair::from_table_name(name)?,
        None => state.default_table,
    };
    let aggregate = with_store(&state, move |store| store.aggregate(pair)).await?;
    Ok(Json(aggregate))
}

/// Run `op` against the store on the blocking pool.
async fn with_store<T, F>(state: &Arc<AppState>, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut ResultStore) -> Result<T, StoreError> + Send + 'static,
{
    let state = Arc::clone(state);
    let result = tokio::task::spawn_blocking(move || {
        let mut store = state.store.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut *store)
    })
    .await
    .map_err(|err| ApiError::Internal(format!("store task failed: {err}")))?;
    Ok(result?)
}

async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let path = state.static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Ok(Html(body)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(ApiError::NotFound("index.html not found".to_string()))
        }
        Err(err) => Err(ApiError::Internal(format!("{}: {err}", path.display()))),
    }
}
