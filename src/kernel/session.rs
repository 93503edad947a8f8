// src/kernel/session.rs
//! Persistent execution sessions
//!
//! A session is an owned, stateful connection to one isolated interpreter.
//! Variable bindings persist across `execute` calls for the lifetime of the
//! session, which is what lets a job's repair attempts build on earlier setup
//! work instead of re-running it.
//!
//! The production implementation spawns the interpreter with an inline
//! bootstrap harness (see `language.rs`): code blocks go to stdin terminated
//! by a sentinel line, and the harness replies with one marker-prefixed JSON
//! frame per block carrying separated stdout/stderr, the last expression's
//! value, and any raised error.

use crate::kernel::language::{Language, END_OF_BLOCK, FRAME_MARKER};
use crate::kernel::outcome::{RaisedError, SessionOutcome};
use crate::pool::limits::CgroupLimiter;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// How long a freshly spawned interpreter may take to report ready
const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Grace period after SIGTERM before the process is killed outright
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Recent interpreter stderr lines kept for failure diagnostics
const STDERR_TAIL_LINES: usize = 32;

/// Handle to a persistent, isolated execution session
#[async_trait]
pub trait ExecutionSession: Send + Sync {
    /// Interpreter language this session runs
    fn language(&self) -> Language;

    /// Execute one code block and wait for its reply, up to `timeout`.
    ///
    /// `Err(EngineError::ExecutionTimeout)` means the block is still running;
    /// the caller must interrupt and report the session as corrupted.
    async fn execute(&self, code: &str, timeout: Duration) -> Result<SessionOutcome>;

    /// Best-effort interrupt of an in-flight execution
    async fn interrupt(&self);

    /// Health probe: run the language no-op and expect a clean reply
    async fn probe(&self, timeout: Duration) -> Result<()>;

    /// Tear the session down. Idempotent.
    async fn shutdown(&self);
}

/// Provisions sessions for the container pool
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn provision(&self, language: Language) -> Result<Arc<dyn ExecutionSession>>;
}

/// One frame emitted by a bootstrap harness
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Frame {
    Ready,
    Result {
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default)]
        value: Option<serde_json::Value>,
        #[serde(default)]
        value_repr: Option<String>,
        #[serde(default)]
        error: Option<RaisedError>,
    },
}

/// Production session backed by a spawned interpreter process
pub struct InterpreterSession {
    language: Language,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
    stderr_tail: Arc<parking_lot::Mutex<VecDeque<String>>>,
    limiter: Option<CgroupLimiter>,
    pid: AtomicU32,
}

impl InterpreterSession {
    /// Spawn the interpreter with its bootstrap harness and wait for the
    /// ready frame.
    pub async fn spawn(language: Language, limiter: Option<CgroupLimiter>) -> Result<Self> {
        let executable = language.executable()?;
        debug!(%language, "spawning interpreter session");

        let mut command = Command::new(executable);
        command
            .args(language.launch_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("failed to spawn {language}: {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| EngineError::Spawn(format!("{language} exited before startup")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Spawn("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Spawn("failed to capture stderr".into()))?;

        let stderr_tail = Arc::new(parking_lot::Mutex::new(VecDeque::new()));
        tokio::spawn(drain_stderr(stderr, Arc::clone(&stderr_tail)));

        if let Some(limiter) = &limiter {
            limiter.apply(pid);
        }

        let session = Self {
            language,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(Some(BufReader::new(stdout))),
            stderr_tail,
            limiter,
            pid: AtomicU32::new(pid),
        };

        session.wait_ready().await?;
        debug!(%language, pid, "interpreter session ready");
        Ok(session)
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    async fn wait_ready(&self) -> Result<()> {
        let ready = async {
            let mut guard = self.stdout.lock().await;
            let reader = guard
                .as_mut()
                .ok_or_else(|| EngineError::Session("stdout closed".into()))?;
            let mut line = String::new();
            loop {
                line.clear();
                let n = reader
                    .read_line(&mut line)
                    .await
                    .map_err(|e| EngineError::Transport(format!("read failed: {e}")))?;
                if n == 0 {
                    return Err(EngineError::Provision(format!(
                        "{} exited during startup: {}",
                        self.language,
                        self.stderr_tail()
                    )));
                }
                if let Some(payload) = line.trim_end().strip_prefix(FRAME_MARKER) {
                    if matches!(serde_json::from_str::<Frame>(payload), Ok(Frame::Ready)) {
                        return Ok(());
                    }
                }
            }
        };

        tokio::time::timeout(READY_TIMEOUT, ready)
            .await
            .map_err(|_| {
                EngineError::Provision(format!("{} did not report ready", self.language))
            })?
    }

    async fn read_result(&self) -> Result<SessionOutcome> {
        let mut guard = self.stdout.lock().await;
        let reader = guard
            .as_mut()
            .ok_or_else(|| EngineError::Session("session is shut down".into()))?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| EngineError::Transport(format!("read failed: {e}")))?;
            if n == 0 {
                return self.closed_while_reading().await;
            }

            let trimmed = line.trim_end();
            let Some(payload) = trimmed.strip_prefix(FRAME_MARKER) else {
                // Interpreter noise outside the protocol
                trace!(%trimmed, "non-frame output ignored");
                continue;
            };

            match serde_json::from_str::<Frame>(payload) {
                Ok(Frame::Ready) => continue,
                Ok(Frame::Result {
                    stdout,
                    stderr,
                    value,
                    value_repr,
                    error,
                }) => {
                    return Ok(SessionOutcome {
                        stdout,
                        stderr,
                        value,
                        value_repr,
                        error,
                    })
                }
                Err(e) => {
                    return Err(EngineError::Transport(format!("malformed frame: {e}")));
                }
            }
        }
    }

    /// The harness stream ended mid-execution. A SIGKILLed interpreter is
    /// reported as a resource breach; anything else is a transport failure.
    async fn closed_while_reading(&self) -> Result<SessionOutcome> {
        let status = {
            let mut guard = self.child.lock().await;
            match guard.as_mut() {
                Some(child) => child.try_wait().ok().flatten(),
                None => None,
            }
        };

        if let Some(status) = status {
            use std::os::unix::process::ExitStatusExt;
            if status.signal() == Some(Signal::SIGKILL as i32) {
                warn!(language = %self.language, "interpreter killed mid-execution");
                return Ok(SessionOutcome {
                    error: Some(RaisedError {
                        ename: "ProcessKilled".into(),
                        evalue: "interpreter terminated by SIGKILL (resource limit breach likely)"
                            .into(),
                        traceback: None,
                    }),
                    ..Default::default()
                });
            }
        }

        Err(EngineError::Transport(format!(
            "session closed unexpectedly: {}",
            self.stderr_tail()
        )))
    }

    fn stderr_tail(&self) -> String {
        let tail = self.stderr_tail.lock();
        if tail.is_empty() {
            "(no stderr)".into()
        } else {
            tail.iter().cloned().collect::<Vec<_>>().join(" | ")
        }
    }
}

#[async_trait]
impl ExecutionSession for InterpreterSession {
    fn language(&self) -> Language {
        self.language
    }

    async fn execute(&self, code: &str, timeout: Duration) -> Result<SessionOutcome> {
        {
            let mut guard = self.stdin.lock().await;
            let stdin = guard
                .as_mut()
                .ok_or_else(|| EngineError::Session("session is shut down".into()))?;

            let transport = |e: std::io::Error| EngineError::Transport(format!("write failed: {e}"));
            stdin.write_all(code.as_bytes()).await.map_err(transport)?;
            if !code.ends_with('\n') {
                stdin.write_all(b"\n").await.map_err(transport)?;
            }
            stdin
                .write_all(format!("{END_OF_BLOCK}\n").as_bytes())
                .await
                .map_err(transport)?;
            stdin.flush().await.map_err(transport)?;
        }

        match tokio::time::timeout(timeout, self.read_result()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::ExecutionTimeout),
        }
    }

    async fn interrupt(&self) {
        if let Some(pid) = self.pid() {
            debug!(pid, "interrupting in-flight execution");
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                warn!(pid, "interrupt failed: {e}");
            }
        }
    }

    async fn probe(&self, timeout: Duration) -> Result<()> {
        let outcome = self.execute(self.language.noop(), timeout).await?;
        match outcome.error {
            None => Ok(()),
            Some(raised) => Err(EngineError::Session(format!(
                "health probe raised {}: {}",
                raised.ename, raised.evalue
            ))),
        }
    }

    async fn shutdown(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let pid = self.pid.swap(0, Ordering::Relaxed);
            debug!(pid, language = %self.language, "shutting down interpreter session");

            if pid != 0 {
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }

            match tokio::time::timeout(TERM_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(pid, %status, "interpreter exited"),
                Ok(Err(e)) => warn!(pid, "error waiting for interpreter: {e}"),
                Err(_) => {
                    warn!(pid, "interpreter ignored SIGTERM, killing");
                    let _ = child.kill().await;
                }
            }

            if let (Some(limiter), true) = (&self.limiter, pid != 0) {
                limiter.cleanup(pid);
            }
        }

        *self.stdin.lock().await = None;
        *self.stdout.lock().await = None;
    }
}

/// Collect interpreter stderr so transport failures can report it
async fn drain_stderr(stderr: ChildStderr, tail: Arc<parking_lot::Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut tail = tail.lock();
        if tail.len() >= STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

/// Factory spawning interpreter sessions with the configured resource limits
pub struct InterpreterFactory {
    limiter: CgroupLimiter,
}

impl InterpreterFactory {
    pub fn new(limits: crate::pool::limits::ResourceLimits) -> Self {
        Self {
            limiter: CgroupLimiter::new(limits),
        }
    }
}

#[async_trait]
impl SessionFactory for InterpreterFactory {
    async fn provision(&self, language: Language) -> Result<Arc<dyn ExecutionSession>> {
        let session = InterpreterSession::spawn(language, Some(self.limiter.clone())).await?;
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn python() -> InterpreterSession {
        InterpreterSession::spawn(Language::Python, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_returns_last_expression() {
        let session = python().await;
        let outcome = session
            .execute("x = 40\nx + 2", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.value, Some(serde_json::json!(42)));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_persists_across_executes() {
        let session = python().await;
        session
            .execute("counter = 10", Duration::from_secs(10))
            .await
            .unwrap();
        let outcome = session
            .execute("counter + 1", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.value, Some(serde_json::json!(11)));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_streams_are_separated() {
        let session = python().await;
        let outcome = session
            .execute(
                "import sys\nprint('to stdout')\nsys.stderr.write('to stderr')",
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert!(outcome.stdout.contains("to stdout"));
        assert!(outcome.stderr.contains("to stderr"));
        assert!(!outcome.stdout.contains("to stderr"));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_raised_error_is_reported() {
        let session = python().await;
        let outcome = session
            .execute("1 / 0", Duration::from_secs(10))
            .await
            .unwrap();
        let raised = outcome.error.unwrap();
        assert_eq!(raised.ename, "ZeroDivisionError");
        assert!(raised.traceback.is_some());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_syntax_error_is_reported() {
        let session = python().await;
        let outcome = session
            .execute("def broken(:", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.error.unwrap().ename, "SyntaxError");
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let session = python().await;
        let result = session
            .execute("import time\ntime.sleep(30)", Duration::from_millis(300))
            .await;
        assert!(matches!(result, Err(EngineError::ExecutionTimeout)));
        session.interrupt().await;
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_probe_healthy_session() {
        let session = python().await;
        assert!(session.probe(Duration::from_secs(10)).await.is_ok());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let session = python().await;
        session.shutdown().await;
        session.shutdown().await;
        let result = session.execute("1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(EngineError::Session(_))));
    }
}
