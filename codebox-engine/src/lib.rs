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

//! codebox-engine implements the sandboxed code-execution broker's core:
//! the kernel driver that runs interpreter/shell code, the working
//! directory manager for file transfer, and the session that binds them
//! together with an idle-interaction clock.

pub mod error;
pub mod kernel;
pub mod session;
pub mod workdir;

pub use error::{EngineError, Result};
pub use session::{Session, SessionState, SessionTable};
