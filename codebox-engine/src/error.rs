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

use thiserror::Error;

/// The typed error taxonomy for codebox-engine. Anything that crosses a
/// kernel, filesystem, or session boundary resolves to one of these, so
/// that callers (in particular codebox-gateway) can map failures onto a
/// specific response rather than a bare string.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation did not finish within its deadline. The currently
    /// running cell is cancelled; the session remains usable.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// The interpreter subprocess died and could not be restarted.
    #[error("kernel crashed and could not be recovered: {0}")]
    KernelCrash(String),

    /// A normal interpreter-level error (syntax error or raised exception).
    /// Never fatal; always surfaced to the caller as an `err` chunk.
    #[error("{0}")]
    SyntaxOrRuntime(String),

    /// A network failure talking to a remote engine backend.
    #[error("transport error: {0}")]
    TransportError(String),

    /// A requested file does not exist in the session's working directory.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// An upload was rejected (e.g. a path escaping the working directory).
    #[error("upload rejected: {0}")]
    UploadRejected(String),

    /// The caller's request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A usage constraint was violated, e.g. constructing a second
    /// in-process engine within one host process.
    #[error("usage constraint violated: {0}")]
    UsageConstraintViolation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
