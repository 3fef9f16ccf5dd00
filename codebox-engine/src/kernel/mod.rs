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

//! The Kernel Driver: owns one interpreter subprocess, submits code to it,
//! and turns its event stream into an ordered sequence of [`ExecChunk`]s.

pub mod classify;

use std::{
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStdout, Command, Stdio},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread, time,
};

use codebox_protocol::{ExecChunk, Kernel};
use nix::{sys::signal, unistd::Pid};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use classify::{classify, Classified, RawKernelEvent, TextTruncator};

const KILL_TIMEOUT: time::Duration = time::Duration::from_millis(500);
const MAX_RESTARTS: u32 = 3;
const OUTPUT_CHANNEL_BOUND: usize = 64;

/// The interp subprocess plus the stdout reader bound to it. Kept paired
/// so the reader is never detached from the process it was spawned with.
struct InterpProcess {
    child: Child,
    reader: BufReader<ChildStdout>,
}

/// A driver for either the stateful interp kernel or a one-shot shell
/// command. `Interp` keeps one long-lived subprocess across calls;
/// `Shell` spawns a fresh subprocess per call.
pub struct KernelDriver {
    cwd: Mutex<std::path::PathBuf>,
    interp: Arc<Mutex<Option<InterpProcess>>>,
    restarts: AtomicU64,
}

impl KernelDriver {
    pub fn new() -> Self {
        KernelDriver {
            cwd: Mutex::new(std::path::PathBuf::new()),
            interp: Arc::new(Mutex::new(None)),
            restarts: AtomicU64::new(0),
        }
    }

    /// Spawn the interp kernel's subprocess rooted at `cwd`.
    #[instrument(skip(self))]
    pub fn start(&self, cwd: &std::path::Path) -> Result<()> {
        *self.cwd.lock().unwrap() = cwd.to_path_buf();
        let mut child = spawn_interp(cwd)?;
        let stdout = child.stdout.take().ok_or_else(|| {
            EngineError::KernelCrash("interp kernel stdout closed".to_string())
        })?;
        let reader = BufReader::new(stdout);
        *self.interp.lock().unwrap() = Some(InterpProcess { child, reader });
        Ok(())
    }

    /// Tear down and re-spawn the interp subprocess against the same
    /// working directory. Clears interpreter-local state; leaves the
    /// working directory's files untouched (see DESIGN.md's resolution of
    /// the restart open question).
    #[instrument(skip(self))]
    pub fn restart(&self) -> Result<()> {
        self.stop()?;
        let cwd = self.cwd.lock().unwrap().clone();
        self.start(&cwd)
    }

    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<()> {
        let mut guard = self.interp.lock().unwrap();
        if let Some(mut proc) = guard.take() {
            kill_child(&proc.child)?;
            let _ = proc.child.wait();
        }
        Ok(())
    }

    /// Run `code` under `kernel` and return the channel the caller should
    /// drain for output. The channel is bounded so a slow HTTP writer
    /// applies back-pressure to the reader thread instead of buffering
    /// unboundedly.
    #[instrument(skip(self, code))]
    pub fn exec(
        &self,
        code: &str,
        kernel: Kernel,
        timeout: Option<time::Duration>,
        cwd_override: Option<&std::path::Path>,
    ) -> Result<crossbeam_channel::Receiver<ExecChunk>> {
        match kernel {
            Kernel::Shell => self.exec_shell(code, timeout, cwd_override),
            Kernel::Interp => self.exec_interp(code, timeout),
        }
    }

    /// Runs one cell against the persistent interp subprocess.
    ///
    /// The subprocess's stdout reader is checked out of `self.interp` for
    /// the duration of the call and checked back in once this call's
    /// terminal `status: idle` event is seen, so the next `exec_interp`
    /// picks up exactly where this one left off instead of finding stdout
    /// already consumed.
    ///
    /// A timeout is enforced by a watchdog thread running alongside the
    /// reader, not by polling between reads: the reader blocks on the
    /// subprocess's pipe for as long as the cell produces no output (e.g.
    /// `time.sleep`), so a deadline check at the top of the read loop would
    /// never fire. The watchdog instead sends `SIGINT` once the deadline
    /// passes, which the bootstrap turns into a `KeyboardInterrupt` inside
    /// the running cell, ending it without tearing down the interpreter.
    fn exec_interp(
        &self,
        code: &str,
        timeout: Option<time::Duration>,
    ) -> Result<crossbeam_channel::Receiver<ExecChunk>> {
        let parent_id = Uuid::new_v4().to_string();
        let (tx, rx) = crossbeam_channel::bounded(OUTPUT_CHANNEL_BOUND);
        let (mut proc, pid) = self.submit_to_interp(code, &parent_id)?;

        let deadline = timeout.map(|d| time::Instant::now() + d);
        let done = Arc::new(AtomicBool::new(false));
        let timed_out = Arc::new(AtomicBool::new(false));

        if let Some(deadline) = deadline {
            let done = Arc::clone(&done);
            let timed_out = Arc::clone(&timed_out);
            let tx_watch = tx.clone();
            thread::spawn(move || loop {
                if done.load(Ordering::SeqCst) {
                    return;
                }
                if time::Instant::now() >= deadline {
                    timed_out.store(true, Ordering::SeqCst);
                    let _ = tx_watch.send(ExecChunk::err("Execution timed out"));
                    if let Err(e) = signal::kill(pid, signal::Signal::SIGINT) {
                        warn!("sending SIGINT to interp kernel: {:?}", e);
                    }
                    return;
                }
                thread::sleep(time::Duration::from_millis(20));
            });
        }

        let interp_slot = Arc::clone(&self.interp);
        thread::spawn(move || {
            let mut truncator = TextTruncator::new();
            let mut crashed = false;
            'read: loop {
                let mut raw_line = String::new();
                match proc.reader.read_line(&mut raw_line) {
                    Ok(0) => {
                        crashed = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => {
                        crashed = true;
                        break;
                    }
                }
                let raw_line = raw_line.trim_end();
                if raw_line.is_empty() {
                    continue;
                }
                let event = match serde_json::from_str::<RawKernelEvent>(raw_line) {
                    Ok(event) => event,
                    Err(_) => continue,
                };
                match classify(event, &parent_id) {
                    Classified::Chunks(chunks) => {
                        // Once the watchdog has already emitted the
                        // timeout chunk, the interrupted cell's own
                        // output (e.g. a KeyboardInterrupt traceback) is
                        // drained but not forwarded: the client already
                        // got its terminal chunk for this call.
                        if !timed_out.load(Ordering::SeqCst) {
                            for chunk in chunks {
                                if tx.send(truncator.feed(chunk)).is_err() {
                                    break 'read;
                                }
                            }
                        }
                    }
                    Classified::Nothing => {}
                    Classified::EndOfStream => break,
                }
            }
            done.store(true, Ordering::SeqCst);
            if !crashed {
                *interp_slot.lock().unwrap() = Some(proc);
            }
        });

        Ok(rx)
    }

    /// Write one request to the interp subprocess's stdin and check its
    /// stdout reader out of `self.interp`, returning it (and the
    /// subprocess's pid, for the timeout watchdog's `SIGINT`) to the
    /// caller. Returns `interp kernel is not running` both when the
    /// kernel was never started and when another call already has the
    /// reader checked out.
    fn submit_to_interp(&self, code: &str, parent_id: &str) -> Result<(InterpProcess, Pid)> {
        let mut proc = self.interp.lock().unwrap().take().ok_or_else(|| {
            EngineError::KernelCrash("interp kernel is not running".to_string())
        })?;
        let pid = Pid::from_raw(proc.child.id() as i32);

        let stdin = proc.child.stdin.as_mut().ok_or_else(|| {
            EngineError::KernelCrash("interp kernel stdin closed".to_string())
        })?;
        let request = serde_json::json!({ "msg_id": parent_id, "code": code });
        writeln!(stdin, "{}", request).map_err(EngineError::Io)?;
        stdin.flush().map_err(EngineError::Io)?;

        Ok((proc, pid))
    }

    fn exec_shell(
        &self,
        code: &str,
        timeout: Option<time::Duration>,
        cwd_override: Option<&std::path::Path>,
    ) -> Result<crossbeam_channel::Receiver<ExecChunk>> {
        let cwd = cwd_override.map(|p| p.to_path_buf()).unwrap_or_else(|| self.cwd.lock().unwrap().clone());
        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(code)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(EngineError::Io)?;
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (tx, rx) = crossbeam_channel::bounded(OUTPUT_CHANNEL_BOUND);
        let tx_out = tx.clone();
        let out_handle = thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(std::result::Result::ok) {
                if tx_out.send(ExecChunk::txt(format!("{line}\n"))).is_err() {
                    return;
                }
            }
        });
        let tx_err = tx.clone();
        let err_handle = thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                if tx_err.send(ExecChunk::txt(format!("{line}\n"))).is_err() {
                    return;
                }
            }
        });

        thread::spawn(move || {
            let deadline = timeout.map(|d| time::Instant::now() + d);
            loop {
                if let Ok(Some(status)) = child.try_wait() {
                    let _ = out_handle.join();
                    let _ = err_handle.join();
                    if !status.success() {
                        let _ = tx.send(ExecChunk::err("Command execution failed"));
                    }
                    return;
                }
                if let Some(deadline) = deadline {
                    if time::Instant::now() > deadline {
                        let _ = child.kill();
                        let _ = tx.send(ExecChunk::err("Execution timed out"));
                        return;
                    }
                }
                thread::sleep(time::Duration::from_millis(20));
            }
        });

        Ok(rx)
    }

    /// Called by the session when the interp subprocess is observed to
    /// have exited unexpectedly. Restarts up to [`MAX_RESTARTS`] times
    /// with linear backoff before giving up.
    #[instrument(skip(self))]
    pub fn recover_from_crash(&self) -> Result<()> {
        let attempt = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > MAX_RESTARTS as u64 {
            return Err(EngineError::KernelCrash(format!(
                "kernel crashed and exceeded {MAX_RESTARTS} restart attempts"
            )));
        }
        thread::sleep(time::Duration::from_millis(200 * attempt));
        warn!(attempt, "restarting crashed interp kernel");
        self.restart()
    }
}

impl Default for KernelDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_interp(cwd: &std::path::Path) -> Result<Child> {
    info!(?cwd, "starting interp kernel");
    Command::new(interp_binary())
        .arg("-u")
        .arg("-c")
        .arg(BOOTSTRAP_SCRIPT)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(EngineError::Io)
}

fn interp_binary() -> String {
    std::env::var("CODEBOX_INTERP_BIN").unwrap_or_else(|_| "python3".to_string())
}

#[instrument(skip(child))]
fn kill_child(child: &Child) -> Result<()> {
    let pid = Pid::from_raw(child.id() as i32);
    signal::kill(pid, signal::Signal::SIGTERM)
        .map_err(|e| EngineError::KernelCrash(format!("sending SIGTERM: {e}")))?;

    let start = time::Instant::now();
    while start.elapsed() < KILL_TIMEOUT {
        // A lightweight liveness probe: signal 0 checks permissions/existence
        // without actually delivering anything.
        if signal::kill(pid, None).is_err() {
            return Ok(());
        }
        thread::sleep(time::Duration::from_millis(20));
    }

    if let Err(e) = signal::kill(pid, signal::Signal::SIGKILL) {
        error!("sending SIGKILL to interp kernel: {:?}", e);
    }
    Ok(())
}

/// Injected as the interpreter's entry point: reads one JSON request per
/// line from stdin (`{"msg_id": ..., "code": ...}`) and writes one
/// [`RawKernelEvent`] per line of JSON to stdout for each message the
/// execution produces, ending with a matching `status: idle` event. This
/// script also installs the display-hook that wraps rendered plots in
/// `<image>...</image>` sentinels, per the design notes on dynamic
/// interception of the plotting backend.
const BOOTSTRAP_SCRIPT: &str = include_str!("bootstrap.py");

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kernel_driver_starts_with_no_restarts() {
        let driver = KernelDriver::new();
        assert_eq!(driver.restarts.load(Ordering::SeqCst), 0);
    }
}
