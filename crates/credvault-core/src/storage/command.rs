//! Subprocess plumbing for the CLI-backed stores.
//!
//! Backends describe what to run with a [`CommandSpec`] and hand it to a
//! [`CommandRunner`]. The system runner bounds every call with a timeout and
//! drains stdout/stderr on detached threads, so a hung or chatty tool cannot
//! pin the calling thread.

use std::fmt;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::VaultError;

/// Default upper bound on a single CLI call
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for the output pipes after the child has exited.
/// A grandchild holding the pipe open must not stall the caller.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// One subprocess invocation.
#[derive(Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Zeroizing<Vec<u8>>>,
    pub clear_env: bool,
    pub timeout: Duration,
}

// Never print arguments: `security -w` carries the secret in argv.
impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args.len())
            .field("stdin", &self.stdin.is_some())
            .field("clear_env", &self.clear_env)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            stdin: None,
            clear_env: false,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: &[u8]) -> Self {
        self.stdin = Some(Zeroizing::new(input.to_vec()));
        self
    }

    /// Start the child with an empty environment.
    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Value of the argument following `flag`, if any.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let pos = self.args.iter().position(|a| a == flag)?;
        self.args.get(pos + 1).map(String::as_str)
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Default)]
pub struct CommandOutput {
    /// `None` when the child was terminated by a signal
    pub code: Option<i32>,
    pub stdout: Zeroizing<Vec<u8>>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn with_stdout(stdout: &[u8]) -> Self {
        Self {
            code: Some(0),
            stdout: Zeroizing::new(stdout.to_vec()),
            stderr: String::new(),
        }
    }

    /// Stdout as UTF-8 with surrounding whitespace removed.
    pub fn stdout_trimmed(&self) -> Zeroizing<String> {
        Zeroizing::new(String::from_utf8_lossy(&self.stdout).trim().to_string())
    }

    pub fn describe(&self) -> String {
        let code = self
            .code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit status {}", code)
        } else {
            format!("exit status {}: {}", code, stderr)
        }
    }
}

/// Executes subprocesses for the CLI-backed stores.
///
/// `Err` means the process could not be run to completion (spawn failure or
/// timeout). A non-zero exit is a normal `Ok` result.
pub trait CommandRunner: fmt::Debug + Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, VaultError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, VaultError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if spec.clear_env {
            cmd.env_clear();
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| VaultError::subprocess(&spec.program, format!("spawn failed: {}", e)))?;

        if let (Some(input), Some(mut pipe)) = (spec.stdin.clone(), child.stdin.take()) {
            // Dropping the pipe at the end of the thread closes the child's stdin.
            let _ = thread::Builder::new()
                .name("credvault-stdin".to_string())
                .spawn(move || {
                    let _ = pipe.write_all(&input);
                });
        }
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + spec.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(program = %spec.program, timeout_ms = spec.timeout.as_millis() as u64, "Subprocess timed out");
                    return Err(VaultError::subprocess(
                        &spec.program,
                        format!("timed out after {:?}", spec.timeout),
                    ));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(VaultError::subprocess(&spec.program, format!("wait failed: {}", e)));
                }
            }
        };

        let stdout = collect(&stdout, DRAIN_GRACE).map_err(|e| {
            warn!(program = %spec.program, error = %e, "Subprocess stdout not drained");
            VaultError::subprocess(&spec.program, format!("stdout {}", e))
        })?;
        let stderr = collect(&stderr, DRAIN_GRACE).unwrap_or_else(|e| {
            warn!(program = %spec.program, error = %e, "Subprocess stderr not drained");
            Vec::new()
        });
        let output = CommandOutput {
            code: status.code(),
            stdout: Zeroizing::new(stdout),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };
        debug!(program = %spec.program, code = ?output.code, "Subprocess finished");
        Ok(output)
    }
}

/// Read a pipe to the end on a detached thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    match pipe {
        Some(mut pipe) => {
            let _ = thread::Builder::new()
                .name("credvault-drain".to_string())
                .spawn(move || {
                    let mut buf = Vec::new();
                    let _ = pipe.read_to_end(&mut buf);
                    let _ = tx.send(buf);
                });
        }
        None => {
            let _ = tx.send(Vec::new());
        }
    }
    rx
}

/// Wait up to `grace` for a drained pipe. A pipe still held open by a
/// grandchild, or a drain thread that never started, is an error.
fn collect(rx: &mpsc::Receiver<Vec<u8>>, grace: Duration) -> Result<Vec<u8>, String> {
    rx.recv_timeout(grace).map_err(|e| match e {
        mpsc::RecvTimeoutError::Timeout => format!("not closed within {:?}", grace),
        mpsc::RecvTimeoutError::Disconnected => "reader thread failed".to_string(),
    })
}
