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

use codebox_gateway::{routes::build_router, AppState, Config};

async fn spawn_test_gateway(working_dir: std::path::PathBuf) -> String {
    let config = Config {
        port: 0,
        idle_timeout: Some(Duration::from_secs(900)),
        working_dir_root: working_dir,
    };
    let state = AppState::new(config);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let base_url = spawn_test_gateway(dir.path().to_path_buf()).await;

    let client = reqwest::Client::new();
    let response = client.get(format!("{base_url}/")).send().await.unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn download_of_missing_file_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let base_url = spawn_test_gateway(dir.path().to_path_buf()).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base_url}/files/download/does-not-exist.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_then_download_round_trips_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let base_url = spawn_test_gateway(dir.path().to_path_buf()).await;

    let client = reqwest::Client::new();
    let part = reqwest::multipart::Part::bytes(b"hello gateway".to_vec()).file_name("t.txt");
    let form = reqwest::multipart::Form::new().part("file", part);
    let upload_response =
        client.post(format!("{base_url}/files/upload")).multipart(form).send().await.unwrap();
    assert!(upload_response.status().is_success());

    let download_response =
        client.get(format!("{base_url}/files/download/t.txt")).send().await.unwrap();
    assert!(download_response.status().is_success());
    let bytes = download_response.bytes().await.unwrap();
    assert_eq!(&bytes[..], b"hello gateway");
}
