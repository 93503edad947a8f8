// src/testing.rs
//! Scripted test doubles
//!
//! In-memory stand-ins for interpreter sessions and the repair collaborator,
//! so pool/scheduler/recovery semantics are tested without spawning
//! processes. Each scripted session replays a queue of steps, one per
//! `execute` call; an exhausted queue succeeds with an empty outcome.

use crate::kernel::language::Language;
use crate::kernel::outcome::{ExecutionError, RaisedError, SessionOutcome};
use crate::kernel::session::{ExecutionSession, SessionFactory};
use crate::recovery::classifier::ErrorKind;
use crate::recovery::repair::CodeRepairer;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted reply to an `execute` call
#[derive(Debug, Clone, Copy)]
pub(crate) enum ScriptStep {
    /// Clean, empty outcome
    Succeed,
    /// Clean outcome with stdout text
    SucceedWith { stdout: &'static str },
    /// Busy for the given duration, then succeed
    Work(Duration),
    /// Raised interpreter error
    Raise {
        ename: &'static str,
        evalue: &'static str,
    },
    /// Never finishes within any timeout
    Hang,
    /// Transport failure
    Fail,
}

pub(crate) struct ScriptedSession {
    language: Language,
    steps: parking_lot::Mutex<VecDeque<ScriptStep>>,
    executed: parking_lot::Mutex<Vec<String>>,
    interrupts: AtomicU32,
    probe_ok: AtomicBool,
    shut_down: AtomicBool,
}

impl ScriptedSession {
    pub(crate) fn healthy(language: Language) -> Self {
        Self::scripted(language, Vec::new())
    }

    pub(crate) fn scripted(language: Language, steps: Vec<ScriptStep>) -> Self {
        Self {
            language,
            steps: parking_lot::Mutex::new(steps.into()),
            executed: parking_lot::Mutex::new(Vec::new()),
            interrupts: AtomicU32::new(0),
            probe_ok: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_probes(&self) {
        self.probe_ok.store(false, Ordering::Relaxed);
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Relaxed)
    }

    pub(crate) fn interrupts(&self) -> u32 {
        self.interrupts.load(Ordering::Relaxed)
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl ExecutionSession for ScriptedSession {
    fn language(&self) -> Language {
        self.language
    }

    async fn execute(&self, code: &str, timeout: Duration) -> Result<SessionOutcome> {
        if self.is_shut_down() {
            return Err(EngineError::Session("scripted session is shut down".into()));
        }
        self.executed.lock().push(code.to_string());

        let step = self.steps.lock().pop_front().unwrap_or(ScriptStep::Succeed);
        match step {
            ScriptStep::Succeed => Ok(SessionOutcome::default()),
            ScriptStep::SucceedWith { stdout } => Ok(SessionOutcome {
                stdout: stdout.into(),
                ..Default::default()
            }),
            ScriptStep::Work(duration) => {
                tokio::time::sleep(duration).await;
                Ok(SessionOutcome::default())
            }
            ScriptStep::Raise { ename, evalue } => Ok(SessionOutcome {
                error: Some(RaisedError {
                    ename: ename.into(),
                    evalue: evalue.into(),
                    traceback: Some("Traceback (scripted)".into()),
                }),
                ..Default::default()
            }),
            ScriptStep::Hang => {
                tokio::time::sleep(timeout).await;
                Err(EngineError::ExecutionTimeout)
            }
            ScriptStep::Fail => Err(EngineError::Transport("scripted transport failure".into())),
        }
    }

    async fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    async fn probe(&self, _timeout: Duration) -> Result<()> {
        if self.probe_ok.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(EngineError::Session("scripted probe failure".into()))
        }
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Relaxed);
    }
}

/// Factory provisioning scripted sessions in order. Scripts queued with
/// `push_script` feed sessions first-come-first-served; later sessions get an
/// empty (always-succeeding) script.
pub(crate) struct ScriptedFactory {
    scripts: parking_lot::Mutex<VecDeque<Vec<ScriptStep>>>,
    sessions: parking_lot::Mutex<Vec<Arc<ScriptedSession>>>,
    fail_provisions: AtomicU32,
    provisions: AtomicU32,
}

impl ScriptedFactory {
    pub(crate) fn new() -> Self {
        Self {
            scripts: parking_lot::Mutex::new(VecDeque::new()),
            sessions: parking_lot::Mutex::new(Vec::new()),
            fail_provisions: AtomicU32::new(0),
            provisions: AtomicU32::new(0),
        }
    }

    pub(crate) fn push_script(&self, steps: Vec<ScriptStep>) {
        self.scripts.lock().push_back(steps);
    }

    pub(crate) fn fail_next_provisions(&self, count: u32) {
        self.fail_provisions.store(count, Ordering::Relaxed);
    }

    pub(crate) fn sessions(&self) -> Vec<Arc<ScriptedSession>> {
        self.sessions.lock().clone()
    }

    pub(crate) fn provision_count(&self) -> u32 {
        self.provisions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn provision(&self, language: Language) -> Result<Arc<dyn ExecutionSession>> {
        let remaining = self.fail_provisions.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_provisions.store(remaining - 1, Ordering::Relaxed);
            return Err(EngineError::Provision("scripted provisioning failure".into()));
        }

        self.provisions.fetch_add(1, Ordering::Relaxed);
        let steps = self.scripts.lock().pop_front().unwrap_or_default();
        let session = Arc::new(ScriptedSession::scripted(language, steps));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// How a scripted repairer answers `propose_fix`
#[derive(Debug, Clone, Copy)]
pub(crate) enum RepairMode {
    /// Always refuse
    Refuse,
    /// Always return this candidate
    Fixed(&'static str),
    /// Return a fresh, distinct candidate per call
    Sequence,
}

pub(crate) struct ScriptedRepairer {
    mode: RepairMode,
    calls: AtomicU32,
}

impl ScriptedRepairer {
    pub(crate) fn new(mode: RepairMode) -> Self {
        Self {
            mode,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CodeRepairer for ScriptedRepairer {
    async fn propose_fix(
        &self,
        _code: &str,
        _kind: ErrorKind,
        _error: &ExecutionError,
    ) -> anyhow::Result<Option<String>> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(match self.mode {
            RepairMode::Refuse => None,
            RepairMode::Fixed(candidate) => Some(candidate.to_string()),
            RepairMode::Sequence => Some(format!("candidate_{call}")),
        })
    }
}
