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

//! Session Gateway (C4): the HTTP front door over the engine. Binds a TCP
//! listener, serves the routes in [`routes`], and runs the idle-shutdown
//! loop in [`idle`] alongside it.

pub mod config;
pub mod error;
pub mod idle;
pub mod routes;
pub mod state;

pub use config::Config;
pub use state::AppState;

use tracing::info;

/// Reads configuration from the environment, binds a listener, and serves
/// forever (or until the idle-shutdown loop exits the process).
pub async fn run_from_env() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let state = AppState::new(config);

    tokio::spawn(idle::run(state.clone()));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "codebox gateway listening");

    let router = routes::build_router(state);
    axum::serve(listener, router).await?;
    Ok(())
}
