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

//! Session (C3): binds a Kernel Driver and a Working-Dir Manager into one
//! lifecycle, with an idle-interaction clock and concurrency guarantees.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{self, Instant},
};

use codebox_protocol::{ExecChunk, Kernel, RemoteFile};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    error::{EngineError, Result},
    kernel::KernelDriver,
    workdir::WorkDir,
};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SessionState {
    Starting,
    Running,
    Stopped,
}

/// One in-process ("local") engine is allowed per host process. A second
/// construction attempt is a usage error rather than a silent reuse of the
/// existing instance (see DESIGN.md's resolution of the singleton open
/// question).
static LOCAL_SESSION_CREATED: AtomicBool = AtomicBool::new(false);

/// Bound on the outer forwarding channel `exec` hands back to callers.
/// Independent of the kernel driver's own internal channel bound.
const EXEC_FORWARD_BOUND: usize = 64;

pub struct Session {
    pub id: String,
    kernel: KernelDriver,
    workdir: WorkDir,
    last_interaction: Mutex<Instant>,
    state: Mutex<SessionState>,
    /// Serializes `exec` calls: at most one in flight per session.
    exec_lock: Mutex<()>,
    is_local_singleton: bool,
}

impl Session {
    /// Create a session backed by a working directory under `root`. Lazily
    /// starts the kernel on first use by the caller (via [`Session::start`]).
    pub fn new(root: PathBuf) -> Result<Self> {
        Ok(Session {
            id: Uuid::new_v4().to_string(),
            kernel: KernelDriver::new(),
            workdir: WorkDir::new(root)?,
            last_interaction: Mutex::new(Instant::now()),
            state: Mutex::new(SessionState::Starting),
            exec_lock: Mutex::new(()),
            is_local_singleton: false,
        })
    }

    /// Create the one allowed in-process session for this host process.
    pub fn new_local_singleton(root: PathBuf) -> Result<Self> {
        if LOCAL_SESSION_CREATED.swap(true, Ordering::SeqCst) {
            return Err(EngineError::UsageConstraintViolation(
                "an in-process codebox session already exists in this process".to_string(),
            ));
        }
        let mut session = Self::new(root)?;
        session.is_local_singleton = true;
        Ok(session)
    }

    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        self.kernel.start(self.workdir.root())?;
        *self.state.lock().unwrap() = SessionState::Running;
        Ok(())
    }

    pub fn touch(&self) {
        *self.last_interaction.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> time::Duration {
        self.last_interaction.lock().unwrap().elapsed()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Runs `code` and returns a channel of output chunks.
    ///
    /// `exec_lock` is acquired here and held by a forwarding thread for as
    /// long as the returned channel has a live sender, not just for the
    /// duration of this call: a second overlapping `exec` blocks acquiring
    /// the lock until the first one's stream is fully drained, instead of
    /// racing it on the kernel's stdin.
    #[instrument(skip(self, code))]
    pub fn exec(
        self: &Arc<Self>,
        code: &str,
        kernel: Kernel,
        timeout: Option<time::Duration>,
        cwd_override: Option<&std::path::Path>,
    ) -> Result<crossbeam_channel::Receiver<ExecChunk>> {
        self.touch();
        if self.state() == SessionState::Stopped {
            return Err(EngineError::KernelCrash("session has stopped".to_string()));
        }
        let session = Arc::clone(self);
        let code = code.to_string();
        let timeout_owned = timeout;
        let cwd_owned = cwd_override.map(|p| p.to_path_buf());
        let (tx, rx) = crossbeam_channel::bounded(EXEC_FORWARD_BOUND);
        thread::spawn(move || {
            let _guard = session.exec_lock.lock().unwrap();
            let inner = match session.kernel.exec(&code, kernel, timeout_owned, cwd_owned.as_deref()) {
                Ok(inner) => inner,
                Err(e) => {
                    let _ = tx.send(ExecChunk::err(e.to_string()));
                    return;
                }
            };
            for chunk in inner {
                if tx.send(chunk).is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    #[instrument(skip(self))]
    pub fn restart(&self) -> Result<()> {
        self.touch();
        self.kernel.restart()
    }

    #[instrument(skip(self, data))]
    pub fn upload(&self, name: &str, data: &[u8]) -> Result<RemoteFile> {
        self.touch();
        self.workdir.upload(name, data)
    }

    #[instrument(skip(self))]
    pub fn download(&self, name: &str) -> Result<Vec<u8>> {
        self.touch();
        self.workdir.download(name)
    }

    #[instrument(skip(self))]
    pub fn list_files(&self) -> Result<Vec<RemoteFile>> {
        self.touch();
        self.workdir.list()
    }

    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<()> {
        self.kernel.stop()?;
        *self.state.lock().unwrap() = SessionState::Stopped;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.is_local_singleton {
            LOCAL_SESSION_CREATED.store(false, Ordering::SeqCst);
        }
    }
}

/// A gateway-side registry mapping session ids to sessions. Entries are
/// inserted lazily on first use and removed on stop or idle eviction.
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable::default()
    }

    /// Fetch the session for `id`, creating one rooted at
    /// `working_dir_root.join(id)` if none exists yet.
    pub fn get_or_create(&self, id: &str, working_dir_root: &std::path::Path) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get(id) {
            return Ok(Arc::clone(session));
        }
        let mut session = Session::new(working_dir_root.join(id))?;
        session.id = id.to_string();
        session.start()?;
        let session = Arc::new(session);
        sessions.insert(id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().remove(id)
    }

    /// Session ids whose `last_interaction` exceeds `timeout`.
    pub fn idle_sessions(&self, timeout: time::Duration) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.idle_for() > timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn touch_resets_idle_clock() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf()).unwrap();
        std::thread::sleep(time::Duration::from_millis(5));
        session.touch();
        assert!(session.idle_for() < time::Duration::from_millis(5));
    }

    #[test]
    fn session_table_reuses_existing_session_id() {
        let dir = tempfile::tempdir().unwrap();
        // Avoid actually starting a real interpreter subprocess in this
        // unit test by exercising the table logic directly would require
        // a fake kernel; instead this asserts the id-keying contract using
        // the public id field once start() succeeds in an environment with
        // python3 on PATH. Skipped gracefully otherwise.
        if which_python3().is_none() {
            return;
        }
        let table = SessionTable::new();
        let a = table.get_or_create("abc", dir.path()).unwrap();
        let b = table.get_or_create("abc", dir.path()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    fn which_python3() -> Option<PathBuf> {
        std::env::var_os("PATH").and_then(|paths| {
            std::env::split_paths(&paths).map(|p| p.join("python3")).find(|p| p.is_file())
        })
    }
}
