// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use codebox_protocol::{
    ExecChunk, ExecRequest, HealthReply, LegacyExecuteRequest, LegacyExecuteResult, RemoteFile,
};
use futures::stream;
use serde::Deserialize;
use tracing::instrument;

use crate::{error::ApiError, state::AppState};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/exec", post(exec_handler))
        .route("/files/upload", post(upload_handler))
        .route("/files/download/:name", get(download_handler))
        .route("/code/execute", post(legacy_execute_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_handler() -> Json<HealthReply> {
    Json(HealthReply::default())
}

/// Every request in this gateway's surface is scoped to one session,
/// identified by a query parameter. A production deployment's reverse
/// proxy is what turns `/codebox/{session_id}/...` into this shape (see
/// SPEC_FULL.md §6).
#[derive(Deserialize)]
pub struct SessionQuery {
    #[serde(default = "default_session_id")]
    pub session: String,
}

fn default_session_id() -> String {
    "default".to_string()
}

#[instrument(skip(state, req))]
async fn exec_handler(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
    Json(req): Json<ExecRequest>,
) -> Result<Response, ApiError> {
    let session = state.sessions.get_or_create(&q.session, &state.config.working_dir_root)?;
    let timeout = req.timeout.map(Duration::from_secs_f64);
    let cwd_override = req.cwd.as_deref().map(std::path::Path::new);
    let chunks = session.exec(&req.code, req.kernel, timeout, cwd_override)?;

    let (tx, rx) = tokio::sync::mpsc::channel::<ExecChunk>(64);
    tokio::task::spawn_blocking(move || {
        for chunk in chunks {
            if tx.blocking_send(chunk).is_err() {
                break;
            }
        }
    });

    let body_stream = stream::unfold(rx, |mut rx| async {
        rx.recv().await.map(|chunk| {
            let mut frame = String::new();
            chunk.write_frame(&mut frame);
            (Ok::<_, std::io::Error>(frame), rx)
        })
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(body_stream))
        .expect("building streamed response"))
}

#[instrument(skip(state, multipart))]
async fn upload_handler(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
    mut multipart: Multipart,
) -> Result<Json<RemoteFile>, ApiError> {
    let session = state.sessions.get_or_create(&q.session, &state.config.working_dir_root)?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| codebox_engine::EngineError::BadRequest(e.to_string()))?
        .ok_or_else(|| codebox_engine::EngineError::BadRequest("missing file field".to_string()))?;
    let name = field
        .file_name()
        .map(|s| s.to_string())
        .ok_or_else(|| codebox_engine::EngineError::BadRequest("missing file name".to_string()))?;
    let data = field.bytes().await.map_err(|e| codebox_engine::EngineError::BadRequest(e.to_string()))?;

    let file = session.upload(&name, &data)?;
    Ok(Json(file))
}

#[instrument(skip(state))]
async fn download_handler(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.get_or_create(&q.session, &state.config.working_dir_root)?;
    let bytes = session.download(&name)?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}

/// Deprecated surface, preserved byte-for-byte for existing consumers (see
/// SPEC_FULL.md §10.5). Delegates to the modern `exec` path and reshapes
/// the collected result into the legacy `properties` envelope.
#[instrument(skip(state, req))]
async fn legacy_execute_handler(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
    Json(req): Json<LegacyExecuteRequest>,
) -> Result<Json<LegacyExecuteResult>, ApiError> {
    let session = state.sessions.get_or_create(&q.session, &state.config.working_dir_root)?;
    let chunks = session.exec(&req.properties.code, codebox_protocol::Kernel::Interp, None, None)?;
    let collected: Vec<ExecChunk> = chunks.into_iter().collect();
    let result = codebox_protocol::ExecResult::from_chunks(collected);
    Ok(Json(result.into()))
}
