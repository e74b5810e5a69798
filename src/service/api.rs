use std::{fmt::Display, path::PathBuf, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::middleware::{self, RunRequest};

use super::{
    error::RequestError,
    grading::{
        models::{CaseResult, Status},
        Grader,
    },
    pg_pool::PostgresConnectionManager,
};

#[derive(Clone)]
pub struct AppState {
    pub(crate) grader: Arc<Grader<PostgresConnectionManager>>,
    pub(crate) assets_dir: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    ok: bool,
    overall: Status,
    problem_text: String,
    cases: Vec<CaseResult>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/run", post(run))
        .fallback(static_asset)
        .with_state(state)
}

fn reject(status: StatusCode, error: impl Display) -> Response {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: error.to_string(),
        }),
    )
        .into_response()
}

async fn run(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return reject(
                StatusCode::BAD_REQUEST,
                RequestError::InvalidBody(rejection.body_text()),
            )
        }
    };

    let admitted = match middleware::run_request_interceptor(request) {
        Ok(admitted) => admitted,
        Err(e) => {
            debug!("Rejected run request: {}", e);
            return reject(StatusCode::BAD_REQUEST, e);
        }
    };

    match state.grader.run(admitted.query, admitted.cases).await {
        Ok(result) => Json(RunResponse {
            ok: true,
            overall: result.overall,
            problem_text: admitted.problem_text,
            cases: result.cases,
        })
        .into_response(),
        Err(e) => {
            error!("Grading run failed: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// Serves the browser client out of the assets directory
async fn static_asset(State(state): State<AppState>, uri: Uri) -> Response {
    let path = match asset_path(uri.path()) {
        Some(path) => path,
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    match tokio::fs::read(state.assets_dir.join(path)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(path))], bytes).into_response(),
        Err(e) => {
            trace!("No asset at {}: {}", path, e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Relative asset path for a request path, refusing anything that could
/// leave the assets directory
fn asset_path(request_path: &str) -> Option<&str> {
    let path = request_path.trim_start_matches('/');
    if path.contains('\\') || path.split('/').any(|segment| segment == "..") {
        return None;
    }

    match path {
        "" => Some("index.html"),
        path => Some(path),
    }
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
