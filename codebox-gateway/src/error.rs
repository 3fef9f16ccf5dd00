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

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use codebox_engine::EngineError;
use serde_json::json;

/// Wraps an [`EngineError`] so it can be returned directly from an axum
/// handler. Status codes follow the mapping in SPEC_FULL.md §7.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::FileNotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            EngineError::UploadRejected(m) | EngineError::BadRequest(m) => {
                (StatusCode::BAD_REQUEST, m.clone())
            }
            EngineError::UsageConstraintViolation(m) => (StatusCode::CONFLICT, m.clone()),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
