// src/kernel/language.rs
//! Supported interpreter languages
//!
//! Each language knows how to launch its interpreter with the inline bootstrap
//! harness that drives the framed execution protocol (see `session.rs`).

use crate::utils::errors::{EngineError, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Marker prefix on protocol frames emitted by the bootstrap harness
pub const FRAME_MARKER: &str = "__HELIX__";

/// Sentinel line terminating one submitted code block
pub const END_OF_BLOCK: &str = "__HELIX_EOB__";

/// Bootstrap harness for the Python interpreter.
///
/// Reads sentinel-terminated code blocks from stdin, executes them in one
/// persistent namespace, and replies with a single marker-prefixed JSON frame
/// carrying captured stdout/stderr, the last expression's value, and any
/// raised error's type/message/traceback.
const PYTHON_HARNESS: &str = r#"
import sys, io, json, ast, traceback
from contextlib import redirect_stdout, redirect_stderr
ns = {"__name__": "__main__"}
def emit(obj):
    sys.__stdout__.write("__HELIX__" + json.dumps(obj) + "\n")
    sys.__stdout__.flush()
emit({"event": "ready"})
buf = []
for line in sys.stdin:
    if line.rstrip("\n") != "__HELIX_EOB__":
        buf.append(line)
        continue
    src = "".join(buf)
    buf = []
    out = io.StringIO()
    err = io.StringIO()
    value = None
    raised = None
    try:
        tree = ast.parse(src)
        tail = None
        if tree.body and isinstance(tree.body[-1], ast.Expr):
            tail = ast.Expression(tree.body.pop().value)
        with redirect_stdout(out), redirect_stderr(err):
            exec(compile(tree, "<cell>", "exec"), ns)
            if tail is not None:
                value = eval(compile(tail, "<cell>", "eval"), ns)
    except BaseException as exc:
        raised = {"ename": type(exc).__name__, "evalue": str(exc), "traceback": traceback.format_exc()}
    value_json = None
    value_repr = None
    if value is not None:
        value_repr = repr(value)
        try:
            value_json = json.loads(json.dumps(value))
        except Exception:
            value_json = None
    emit({"event": "result", "stdout": out.getvalue(), "stderr": err.getvalue(), "value": value_json, "value_repr": value_repr, "error": raised})
"#;

/// Bootstrap harness for the Node.js interpreter.
///
/// Same protocol as the Python harness; blocks run in one persistent `vm`
/// context, stream writes are captured for the duration of the block.
const NODE_HARNESS: &str = r#"
const vm = require('vm');
const readline = require('readline');
const ctx = vm.createContext({ require, console, process, Buffer, setTimeout, clearTimeout });
const emit = (o) => process.stdout.write('__HELIX__' + JSON.stringify(o) + '\n');
emit({ event: 'ready' });
let buf = [];
const rl = readline.createInterface({ input: process.stdin, terminal: false });
rl.on('line', (line) => {
  if (line !== '__HELIX_EOB__') { buf.push(line); return; }
  const src = buf.join('\n');
  buf = [];
  const outChunks = [];
  const errChunks = [];
  const realOut = process.stdout.write.bind(process.stdout);
  const realErr = process.stderr.write.bind(process.stderr);
  process.stdout.write = (c) => { outChunks.push(String(c)); return true; };
  process.stderr.write = (c) => { errChunks.push(String(c)); return true; };
  let value;
  let error = null;
  try {
    value = vm.runInContext(src, ctx, { filename: '<cell>' });
  } catch (e) {
    error = {
      ename: (e && e.name) || 'Error',
      evalue: String((e && e.message) || e),
      traceback: (e && e.stack) || null,
    };
  }
  process.stdout.write = realOut;
  process.stderr.write = realErr;
  let valueJson = null;
  let valueRepr = null;
  if (value !== undefined && value !== null) {
    valueRepr = String(value);
    try { valueJson = JSON.parse(JSON.stringify(value)); } catch (e) { valueJson = null; }
  }
  emit({ event: 'result', stdout: outChunks.join(''), stderr: errChunks.join(''), value: valueJson, value_repr: valueRepr, error });
});
"#;

/// Supported interpreter languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Primary interpreter (python3)
    Python,
    /// Secondary interpreter (node)
    Node,
}

impl Language {
    /// Interpreter command name
    pub fn command(&self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::Node => "node",
        }
    }

    /// Arguments launching the interpreter with the bootstrap harness
    pub fn launch_args(&self) -> Vec<&'static str> {
        match self {
            // Unbuffered so frames flush promptly
            Language::Python => vec!["-u", "-c", PYTHON_HARNESS],
            Language::Node => vec!["-e", NODE_HARNESS],
        }
    }

    /// Trivial code fragment used by health probes
    pub fn noop(&self) -> &'static str {
        match self {
            Language::Python => "pass",
            Language::Node => "null",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
        }
    }

    /// Locate the interpreter executable, caching the lookup
    pub fn executable(&self) -> Result<PathBuf> {
        static CACHE: Lazy<Mutex<HashMap<Language, PathBuf>>> =
            Lazy::new(|| Mutex::new(HashMap::new()));

        if let Some(path) = CACHE.lock().get(self) {
            return Ok(path.clone());
        }

        let command = self.command();
        match which::which(command) {
            Ok(path) => {
                info!("found {} at {:?}", command, path);
                CACHE.lock().insert(*self, path.clone());
                Ok(path)
            }
            Err(e) => Err(EngineError::Spawn(format!(
                "executable '{command}' not found in PATH: {e}"
            ))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
