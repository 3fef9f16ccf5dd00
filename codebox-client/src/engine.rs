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

//! The shared capability surface every backend (in-process, docker,
//! remote) implements identically. A factory hands callers a `dyn Engine`
//! rather than dispatching on backend kind inline (see DESIGN.md's
//! "Factory-via-constructor" note).

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use codebox_protocol::{ExecChunk, ExecResult, Kernel, RemoteFile};
use futures::Stream;

use crate::error::Result;

pub type ExecStream = Pin<Box<dyn Stream<Item = Result<ExecChunk>> + Send>>;

#[async_trait]
pub trait Engine: Send + Sync {
    async fn exec(
        &self,
        code: &str,
        kernel: Kernel,
        timeout: Option<Duration>,
        cwd: Option<&str>,
    ) -> Result<ExecStream>;

    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<RemoteFile>;

    async fn download(&self, name: &str) -> Result<Vec<u8>>;

    async fn list(&self) -> Result<Vec<RemoteFile>>;

    async fn restart(&self) -> Result<()>;
}

/// Runs `code` to completion and collects its output into one [`ExecResult`],
/// for callers that don't need incremental delivery.
pub async fn exec_collect(
    engine: &dyn Engine,
    code: &str,
    kernel: Kernel,
    timeout: Option<Duration>,
    cwd: Option<&str>,
) -> Result<ExecResult> {
    use futures::StreamExt;

    let mut stream = engine.exec(code, kernel, timeout, cwd).await?;
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk?);
    }
    Ok(ExecResult::from_chunks(chunks))
}
