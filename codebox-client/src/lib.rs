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

//! Client Runtime (C6): a stable API over whichever engine backend is in
//! play (in-process, container-confined local, or remote service), picked
//! once at construction by [`CodeBox::create`].

pub mod backend;
pub mod engine;
pub mod error;
pub mod helpers;

use std::{path::PathBuf, sync::Arc};

use codebox_protocol::{ExecResult, Kernel, LegacyExecuteResult, RemoteFile};

pub use engine::Engine;
pub use error::{ClientError, Result};

use backend::{docker::DockerEngine, local::LocalEngine, remote::RemoteEngine};

/// The async facade. Every operation here is a thin pass-through to the
/// selected [`Engine`] implementation.
pub struct AsyncCodeBox {
    engine: Arc<dyn Engine>,
}

impl AsyncCodeBox {
    /// Chooses a backend from `CODEBOX_API_KEY`: `"local"` (default, also
    /// the value when unset) runs in-process, `"docker"` launches a
    /// container, anything else is treated as a remote API key (see
    /// SPEC_FULL.md §4.6's factory rule).
    pub async fn create() -> Result<Self> {
        let api_key = std::env::var("CODEBOX_API_KEY").unwrap_or_else(|_| "local".to_string());
        let engine: Arc<dyn Engine> = match api_key.as_str() {
            "local" => Arc::new(LocalEngine::new(default_working_dir())?),
            "docker" => Arc::new(DockerEngine::start("codebox:latest", (8069, 8169)).await?),
            _ => {
                let base_url = std::env::var("CODEBOX_BASE_URL")
                    .unwrap_or_else(|_| "https://codeboxapi.com/api/v2".to_string());
                let factory_id = std::env::var("CODEBOX_FACTORY_ID").unwrap_or_else(|_| "default".to_string());
                let session_id = uuid::Uuid::new_v4().to_string();
                Arc::new(RemoteEngine::new(base_url, api_key, factory_id, session_id))
            }
        };
        Ok(AsyncCodeBox { engine })
    }

    pub fn with_engine(engine: Arc<dyn Engine>) -> Self {
        AsyncCodeBox { engine }
    }

    pub async fn exec(&self, code: &str, kernel: Kernel) -> Result<ExecResult> {
        engine::exec_collect(self.engine.as_ref(), code, kernel, None, None).await
    }

    pub async fn exec_stream(&self, code: &str, kernel: Kernel) -> Result<engine::ExecStream> {
        self.engine.exec(code, kernel, None, None).await
    }

    pub async fn upload(&self, name: &str, content: Vec<u8>) -> Result<RemoteFile> {
        self.engine.upload(name, content).await
    }

    pub async fn download(&self, name: &str) -> Result<Vec<u8>> {
        self.engine.download(name).await
    }

    pub async fn list(&self) -> Result<Vec<RemoteFile>> {
        self.engine.list().await
    }

    pub async fn restart(&self) -> Result<()> {
        self.engine.restart().await
    }

    pub async fn install(&self, packages: &[&str]) -> Result<()> {
        helpers::install(self.engine.as_ref(), packages).await
    }

    pub async fn list_packages(&self) -> Result<Vec<String>> {
        helpers::list_packages(self.engine.as_ref()).await
    }

    pub async fn list_files(&self) -> Result<Vec<helpers::FileSizeEntry>> {
        helpers::list_files(self.engine.as_ref()).await
    }

    pub async fn show_variables(&self) -> Result<String> {
        helpers::show_variables(self.engine.as_ref()).await
    }

    pub async fn healthcheck(&self) -> Result<bool> {
        helpers::healthcheck(self.engine.as_ref()).await
    }

    pub fn keep_alive(&self, minutes: u32) -> tokio::task::JoinHandle<()> {
        helpers::keep_alive(self.engine.clone(), minutes)
    }

    /// Deprecated: delegates to [`Self::exec`] and reshapes the result into
    /// the legacy `{properties: {stdout, stderr, result}}` envelope,
    /// preserved byte-for-byte for existing consumers (SPEC_FULL.md §9).
    pub async fn run(&self, code: &str) -> Result<LegacyExecuteResult> {
        let result = self.exec(code, Kernel::Interp).await?;
        Ok(result.into())
    }

    /// Deprecated no-op; the engine starts itself on construction.
    pub async fn start(&self) -> Result<bool> {
        self.healthcheck().await
    }

    /// Deprecated no-op, preserved for compatibility.
    pub async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Deprecated; equivalent to [`Self::healthcheck`].
    pub async fn status(&self) -> Result<bool> {
        self.healthcheck().await
    }
}

/// The synchronous facade, mechanically derived from [`AsyncCodeBox`] by
/// running every call to completion on a captive, per-client Tokio
/// runtime (never a caller-supplied one), per SPEC_FULL.md §4.6's
/// sync/async parity requirement.
pub struct CodeBox {
    inner: AsyncCodeBox,
    runtime: tokio::runtime::Runtime,
}

impl CodeBox {
    pub fn create() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(ClientError::Io)?;
        let inner = runtime.block_on(AsyncCodeBox::create())?;
        Ok(CodeBox { inner, runtime })
    }

    pub fn exec(&self, code: &str, kernel: Kernel) -> Result<ExecResult> {
        self.runtime.block_on(self.inner.exec(code, kernel))
    }

    pub fn upload(&self, name: &str, content: Vec<u8>) -> Result<RemoteFile> {
        self.runtime.block_on(self.inner.upload(name, content))
    }

    pub fn download(&self, name: &str) -> Result<Vec<u8>> {
        self.runtime.block_on(self.inner.download(name))
    }

    pub fn list(&self) -> Result<Vec<RemoteFile>> {
        self.runtime.block_on(self.inner.list())
    }

    pub fn restart(&self) -> Result<()> {
        self.runtime.block_on(self.inner.restart())
    }

    pub fn install(&self, packages: &[&str]) -> Result<()> {
        self.runtime.block_on(self.inner.install(packages))
    }

    pub fn list_packages(&self) -> Result<Vec<String>> {
        self.runtime.block_on(self.inner.list_packages())
    }

    pub fn list_files(&self) -> Result<Vec<helpers::FileSizeEntry>> {
        self.runtime.block_on(self.inner.list_files())
    }

    pub fn show_variables(&self) -> Result<String> {
        self.runtime.block_on(self.inner.show_variables())
    }

    pub fn healthcheck(&self) -> Result<bool> {
        self.runtime.block_on(self.inner.healthcheck())
    }
}

fn default_working_dir() -> PathBuf {
    std::env::var("CODEBOX_WORKING_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(".codebox"))
}
