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

//! In-process backend: runs the kernel inside this same operating system
//! process. Not isolated from the host and not scalable across users; the
//! default when no `CODEBOX_API_KEY` is set, same tradeoff the reference
//! implementation's `LocalBox` documents.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use codebox_engine::Session;
use codebox_protocol::{Kernel, RemoteFile};
use futures::stream;

use crate::{
    engine::{Engine, ExecStream},
    error::Result,
};

pub struct LocalEngine {
    session: Arc<Session>,
}

impl LocalEngine {
    pub fn new(working_dir_root: PathBuf) -> Result<Self> {
        let session = Session::new_local_singleton(working_dir_root)?;
        session.start()?;
        Ok(LocalEngine { session: Arc::new(session) })
    }
}

#[async_trait]
impl Engine for LocalEngine {
    async fn exec(
        &self,
        code: &str,
        kernel: Kernel,
        timeout: Option<Duration>,
        cwd: Option<&str>,
    ) -> Result<ExecStream> {
        let session = self.session.clone();
        let code = code.to_string();
        let cwd = cwd.map(PathBuf::from);
        let receiver = tokio::task::spawn_blocking(move || {
            session.exec(&code, kernel, timeout, cwd.as_deref())
        })
        .await
        .expect("exec task panicked")?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::task::spawn_blocking(move || {
            for chunk in receiver {
                if tx.blocking_send(Ok(chunk)).is_err() {
                    break;
                }
            }
        });
        let out = stream::unfold(rx, |mut rx| async { rx.recv().await.map(|item| (item, rx)) });
        Ok(Box::pin(out))
    }

    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<RemoteFile> {
        let session = self.session.clone();
        let name = name.to_string();
        let file = tokio::task::spawn_blocking(move || session.upload(&name, &content))
            .await
            .expect("upload task panicked")?;
        Ok(file)
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        let session = self.session.clone();
        let name = name.to_string();
        let bytes = tokio::task::spawn_blocking(move || session.download(&name))
            .await
            .expect("download task panicked")?;
        Ok(bytes)
    }

    async fn list(&self) -> Result<Vec<RemoteFile>> {
        let session = self.session.clone();
        let files = tokio::task::spawn_blocking(move || session.list_files())
            .await
            .expect("list task panicked")?;
        Ok(files)
    }

    async fn restart(&self) -> Result<()> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.restart())
            .await
            .expect("restart task panicked")?;
        Ok(())
    }
}
