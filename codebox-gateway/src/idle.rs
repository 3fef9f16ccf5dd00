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

use tracing::info;

use crate::state::AppState;

const TICK: Duration = Duration::from_secs(1);

/// Runs until a session has been idle longer than the configured timeout,
/// at which point the whole process exits. A `CODEBOX_TIMEOUT` of `"none"`
/// disables this loop entirely (the caller should not spawn it).
pub async fn run(state: AppState) {
    let Some(timeout) = state.config.idle_timeout else {
        return;
    };
    loop {
        tokio::time::sleep(TICK).await;
        if state.sessions.is_empty() {
            if state.started_at.elapsed() > timeout {
                info!("no sessions created before idle timeout, shutting down");
                std::process::exit(0);
            }
            continue;
        }
        let idle = state.sessions.idle_sessions(timeout);
        if !idle.is_empty() {
            info!(?idle, "idle timeout reached, shutting down");
            std::process::exit(0);
        }
    }
}
