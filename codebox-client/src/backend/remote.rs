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

//! Remote backend: talks to a `codebox-gateway` instance over HTTP.
//! Retries 502s with exponential backoff: 5s..150s, factor 2, max 3
//! attempts.

use std::time::Duration;

use async_trait::async_trait;
use codebox_protocol::{ExecChunk, ExecRequest, FrameDecoder, Kernel, RemoteFile};
use futures::{stream, StreamExt};
use reqwest::{Client, StatusCode};

use crate::{
    engine::{Engine, ExecStream},
    error::{ClientError, Result},
};

const RETRY_MIN: Duration = Duration::from_secs(5);
const RETRY_MAX: Duration = Duration::from_secs(150);
const RETRY_MAX_ATTEMPTS: u32 = 3;

pub struct RemoteEngine {
    client: Client,
    base_url: String,
    headers: Vec<(String, String)>,
}

impl RemoteEngine {
    pub fn new(base_url: String, api_key: String, factory_id: String, session_id: String) -> Self {
        let client = Client::new();
        let url = format!("{}/codebox/{}", base_url.trim_end_matches('/'), session_id);
        let headers = vec![
            ("Authorization".to_string(), format!("Bearer {}", api_key)),
            ("Factory-Id".to_string(), factory_id),
        ];
        RemoteEngine { client, base_url: url, headers }
    }

    /// Points directly at a gateway with no multi-tenant path prefix or
    /// auth headers, used by the docker backend against its own container.
    pub fn new_unauthenticated(base_url: String) -> Self {
        RemoteEngine { client: Client::new(), base_url, headers: Vec::new() }
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }
        req
    }

    /// Raw, non-retrying ping of `GET /`, used to detect when a freshly
    /// started gateway is ready to accept requests.
    pub async fn healthcheck(&self) -> Result<()> {
        let response = self.apply_headers(self.client.get(format!("{}/", self.base_url))).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Server { status: response.status().as_u16(), body: String::new() })
        }
    }

    async fn with_retry<F, Fut>(&self, mut attempt: F) -> Result<reqwest::Response>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<reqwest::Response, reqwest::Error>>,
    {
        let mut wait = RETRY_MIN;
        for try_num in 1..=RETRY_MAX_ATTEMPTS {
            let response = attempt().await?;
            if response.status() == StatusCode::BAD_GATEWAY && try_num < RETRY_MAX_ATTEMPTS {
                tokio::time::sleep(wait).await;
                wait = (wait * 2).min(RETRY_MAX);
                continue;
            }
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::Server { status, body });
            }
            return Ok(response);
        }
        unreachable!("loop always returns within RETRY_MAX_ATTEMPTS")
    }
}

#[async_trait]
impl Engine for RemoteEngine {
    async fn exec(
        &self,
        code: &str,
        kernel: Kernel,
        timeout: Option<Duration>,
        cwd: Option<&str>,
    ) -> Result<ExecStream> {
        let body = ExecRequest {
            code: code.to_string(),
            kernel,
            timeout: timeout.map(|d| d.as_secs_f64()),
            cwd: cwd.map(str::to_string),
        };
        let response = self
            .with_retry(|| {
                self.apply_headers(self.client.post(format!("{}/exec", self.base_url)).json(&body))
                    .send()
            })
            .await?;

        let mut byte_stream = response.bytes_stream();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<ExecChunk>>(64);
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::default();
            loop {
                match byte_stream.next().await {
                    Some(Ok(bytes)) => match decoder.push(&bytes) {
                        Ok(chunks) => {
                            for chunk in chunks {
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(ClientError::Transport(e.to_string()))).await;
                            return;
                        }
                    },
                    Some(Err(e)) => {
                        let _ = tx.send(Err(ClientError::from(e))).await;
                        return;
                    }
                    None => return,
                }
            }
        });

        let out = stream::unfold(rx, |mut rx| async { rx.recv().await.map(|item| (item, rx)) });
        Ok(Box::pin(out))
    }

    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<RemoteFile> {
        let response = self
            .with_retry(|| {
                let part = reqwest::multipart::Part::bytes(content.clone()).file_name(name.to_string());
                let form = reqwest::multipart::Form::new().part("file", part);
                self.apply_headers(self.client.post(format!("{}/files/upload", self.base_url)))
                    .multipart(form)
                    .send()
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        let response = self
            .with_retry(|| {
                self.apply_headers(
                    self.client.get(format!("{}/files/download/{}", self.base_url, name)),
                )
                .send()
            })
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn list(&self) -> Result<Vec<RemoteFile>> {
        // Not part of the HTTP surface (§6); remote callers track uploaded
        // files client-side, same as the reference implementation's
        // `RemoteBox` (no `list_files` round trip exists there either).
        Ok(Vec::new())
    }

    async fn restart(&self) -> Result<()> {
        // The HTTP surface (SPEC_FULL.md §6) has no restart endpoint: a
        // remote gateway's kernel lifecycle is its own concern. Callers
        // that need a fresh interpreter should start a new session id.
        Err(ClientError::Transport(
            "restart is not available on the remote backend; start a new session instead".to_string(),
        ))
    }
}

