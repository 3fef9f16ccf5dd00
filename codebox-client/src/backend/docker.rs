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

//! Container-confined local backend: launches `codebox-server` in a Docker
//! container and talks to it the same way the remote backend talks to any
//! other gateway.

use std::{
    net::TcpListener,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use codebox_protocol::{Kernel, RemoteFile};
use tokio::process::Command;

use crate::{
    backend::remote::RemoteEngine,
    engine::{Engine, ExecStream},
    error::{ClientError, Result},
};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DockerEngine {
    inner: RemoteEngine,
    container_id: String,
}

impl DockerEngine {
    pub async fn start(image: &str, port_range: (u16, u16)) -> Result<Self> {
        let port = find_free_port(port_range)?;
        let output = Command::new("docker")
            .args([
                "run",
                "-d",
                "--rm",
                "-e",
                "CODEBOX_TIMEOUT=none",
                "-p",
                &format!("{}:8080", port),
                image,
            ])
            .output()
            .await
            .map_err(|e| ClientError::Docker(format!("failed to spawn docker: {e}")))?;

        if !output.status.success() {
            return Err(ClientError::Docker(format!(
                "docker run failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let base_url = format!("http://localhost:{port}");
        let inner = RemoteEngine::new_unauthenticated(base_url);
        wait_for_startup(&inner).await?;

        Ok(DockerEngine { inner, container_id })
    }
}

impl Drop for DockerEngine {
    fn drop(&mut self) {
        let id = self.container_id.clone();
        tokio::spawn(async move {
            let _ = Command::new("docker").args(["stop", &id]).output().await;
        });
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn exec(
        &self,
        code: &str,
        kernel: Kernel,
        timeout: Option<Duration>,
        cwd: Option<&str>,
    ) -> Result<ExecStream> {
        self.inner.exec(code, kernel, timeout, cwd).await
    }

    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<RemoteFile> {
        self.inner.upload(name, content).await
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        self.inner.download(name).await
    }

    async fn list(&self) -> Result<Vec<RemoteFile>> {
        self.inner.list().await
    }

    async fn restart(&self) -> Result<()> {
        self.inner.restart().await
    }
}

fn find_free_port(range: (u16, u16)) -> Result<u16> {
    for port in range.0..=range.1 {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    Err(ClientError::Docker("no free ports available on the specified range".to_string()))
}

async fn wait_for_startup(engine: &RemoteEngine) -> Result<()> {
    let deadline = Instant::now() + STARTUP_TIMEOUT;
    loop {
        if engine.healthcheck().await.is_ok() {
            return Ok(());
        }
        if Instant::now() > deadline {
            return Err(ClientError::Docker("container did not become healthy in time".to_string()));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
