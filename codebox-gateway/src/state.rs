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

use std::{sync::Arc, time::Instant};

use codebox_engine::SessionTable;

use crate::config::Config;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionTable>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        AppState { sessions: Arc::new(SessionTable::new()), config: Arc::new(config), started_at: Instant::now() }
    }
}
