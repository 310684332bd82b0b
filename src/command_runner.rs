//! Command execution for pipeline steps
//!
//! `CommandRunner` is the single seam through which the orchestrator touches
//! the outside world. `ShellRunner` is the production implementation:
//!
//! - Every command runs under `bash -c` in its own process group
//!   (`in_new_process_group`) and is registered with `ChildRegistry`
//! - Privileged commands run behind an elevation prefix (`sudo -S -k -p ''`) and
//!   receive the credential on stdin, followed by a newline, then EOF
//! - Each call honours `ExecLimits`: an optional timeout and a `CancelToken`.
//!   On either, the whole process group gets SIGTERM, then SIGKILL
//!
//! A non-zero exit status is a normal `Ok(CommandOutput)`. `Err(RunnerError)`
//! means the command could not be run to completion at all.

use crate::credential::Credential;
use crate::process_guard::{ChildRegistry, CommandProcessGroup, signal_group};
use nix::sys::signal::Signal;
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounds applied to a single command invocation
#[derive(Debug, Clone, Default)]
pub struct ExecLimits {
    /// Wall-clock limit; `None` waits forever
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl ExecLimits {
    /// No timeout, fresh cancel token
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was terminated by a signal
    pub exit_status: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
}

impl CommandOutput {
    pub fn new(exit_status: Option<i32>, output: impl Into<String>) -> Self {
        Self {
            exit_status,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Reasons a command could not be run to completion
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The process could not be created (missing shell, missing sudo, ...)
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("cancelled before completion")]
    Cancelled,

    #[error("I/O error while running command: {0}")]
    Io(#[from] io::Error),
}

impl RunnerError {
    /// Short diagnostic class used as the report's failure reason prefix
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn failure",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io failure",
        }
    }
}

/// Executes opaque shell commands on behalf of the orchestrator
pub trait CommandRunner: Send + Sync {
    /// Run `command` unprivileged
    fn execute(&self, command: &str, limits: &ExecLimits) -> Result<CommandOutput, RunnerError>;

    /// Run `command` behind the elevation mechanism, feeding `secret` to its stdin
    fn execute_privileged(
        &self,
        command: &str,
        secret: &Credential,
        limits: &ExecLimits,
    ) -> Result<CommandOutput, RunnerError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn execute(&self, command: &str, limits: &ExecLimits) -> Result<CommandOutput, RunnerError> {
        (**self).execute(command, limits)
    }

    fn execute_privileged(
        &self,
        command: &str,
        secret: &Credential,
        limits: &ExecLimits,
    ) -> Result<CommandOutput, RunnerError> {
        (**self).execute_privileged(command, secret, limits)
    }
}

/// Default argv prefix for privileged commands: read the password from
/// stdin, print no prompt, and ignore cached credentials so sudo always
/// consumes the line we write
pub fn default_elevation() -> Vec<String> {
    ["sudo", "-S", "-k", "-p", "", "--"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Production runner: `bash -c` in an isolated process group
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    elevation: Vec<String>,
    poll_interval: Duration,
    kill_grace: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            elevation: default_elevation(),
            poll_interval: Duration::from_millis(25),
            kill_grace: Duration::from_secs(2),
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the elevation prefix. An empty prefix runs privileged commands
    /// directly (useful when already root, and in tests) while still
    /// delivering the secret on stdin.
    pub fn with_elevation(mut self, elevation: Vec<String>) -> Self {
        self.elevation = elevation;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Time a process group gets between SIGTERM and SIGKILL
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    fn run(
        &self,
        argv: Vec<String>,
        stdin_payload: Option<&str>,
        limits: &ExecLimits,
    ) -> Result<CommandOutput, RunnerError> {
        if limits.cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RunnerError::Io(io::Error::other("empty argument vector")))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin_payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();

        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: program.clone(),
            source,
        })?;
        let _registration = Registration::new(child.id());
        let started = Instant::now();

        if let (Some(payload), Some(mut stdin)) = (stdin_payload, child.stdin.take()) {
            // The child may exit without reading (e.g. sudo invoked by root)
            let written = stdin
                .write_all(payload.as_bytes())
                .and_then(|_| stdin.write_all(b"\n"));
            if let Err(e) = written {
                tracing::debug!(error = %e, "child closed stdin before the credential was written");
            }
            // stdin dropped here: EOF
        }

        let (tx, rx) = mpsc::channel();
        let mut pending = 0;
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(pipe, Stream::Stdout, tx.clone());
            pending += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_reader(pipe, Stream::Stderr, tx);
            pending += 1;
        }

        let status = self.wait(&mut child, limits, started)?;
        // Background jobs may keep the pipes open after the shell exits
        let (mut output, err_text) = self.collect(&rx, pending, child.id(), limits, started)?;

        if !err_text.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&err_text);
        }

        Ok(CommandOutput::new(status.code(), output))
    }

    fn wait(
        &self,
        child: &mut Child,
        limits: &ExecLimits,
        started: Instant,
    ) -> Result<ExitStatus, RunnerError> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }

            if limits.cancel.is_cancelled() {
                tracing::warn!(pid = child.id(), "cancelling running command");
                self.kill_group(child);
                return Err(RunnerError::Cancelled);
            }

            if let Some(timeout) = limits.timeout {
                if started.elapsed() >= timeout {
                    tracing::warn!(pid = child.id(), ?timeout, "command timed out");
                    self.kill_group(child);
                    return Err(RunnerError::Timeout(timeout));
                }
            }

            thread::sleep(self.poll_interval);
        }
    }

    /// Drain both reader threads under the same deadline and cancel token as
    /// `wait`. The group leader is already reaped here, so leftovers are
    /// killed by process group id.
    fn collect(
        &self,
        rx: &Receiver<(Stream, Vec<u8>)>,
        mut pending: usize,
        pgid: u32,
        limits: &ExecLimits,
        started: Instant,
    ) -> Result<(String, String), RunnerError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        while pending > 0 {
            if limits.cancel.is_cancelled() {
                tracing::warn!(pgid, "cancelling background jobs of finished command");
                kill_orphans(pgid);
                return Err(RunnerError::Cancelled);
            }
            if let Some(timeout) = limits.timeout {
                if started.elapsed() >= timeout {
                    tracing::warn!(pgid, ?timeout, "background jobs outlived the step timeout");
                    kill_orphans(pgid);
                    return Err(RunnerError::Timeout(timeout));
                }
            }

            match rx.recv_timeout(self.poll_interval) {
                Ok((Stream::Stdout, bytes)) => {
                    stdout = bytes;
                    pending -= 1;
                }
                Ok((Stream::Stderr, bytes)) => {
                    stderr = bytes;
                    pending -= 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        ))
    }

    fn kill_group(&self, child: &mut Child) {
        let pgid = child.id();
        if let Err(e) = signal_group(pgid, Signal::SIGTERM) {
            tracing::debug!(pgid, error = %e, "SIGTERM to process group failed");
        }

        let deadline = Instant::now() + self.kill_grace;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            thread::sleep(self.poll_interval);
        }

        let _ = signal_group(pgid, Signal::SIGKILL);
        let _ = child.wait();
    }
}

impl CommandRunner for ShellRunner {
    fn execute(&self, command: &str, limits: &ExecLimits) -> Result<CommandOutput, RunnerError> {
        tracing::debug!(command, "execute");
        let argv = vec![self.shell.clone(), "-c".to_string(), command.to_string()];
        self.run(argv, None, limits)
    }

    fn execute_privileged(
        &self,
        command: &str,
        secret: &Credential,
        limits: &ExecLimits,
    ) -> Result<CommandOutput, RunnerError> {
        tracing::debug!(command, "execute privileged");
        let mut argv = self.elevation.clone();
        argv.extend([self.shell.clone(), "-c".to_string(), command.to_string()]);
        self.run(argv, Some(secret.expose_secret()), limits)
    }
}

/// Keeps a PID in the global registry for exactly as long as the child runs
struct Registration(u32);

impl Registration {
    fn new(pid: u32) -> Self {
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }
        Self(pid)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(self.0);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    stream: Stream,
    tx: Sender<(Stream, Vec<u8>)>,
) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((stream, buf));
    });
}

fn kill_orphans(pgid: u32) {
    if let Err(e) = signal_group(pgid, Signal::SIGKILL) {
        tracing::debug!(pgid, error = %e, "process group already gone");
    }
}

/// Runner for `--dry-run`: logs every command and reports success without
/// executing anything
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn execute(&self, command: &str, _limits: &ExecLimits) -> Result<CommandOutput, RunnerError> {
        tracing::debug!(command, "[DRY RUN] skipped");
        Ok(CommandOutput::new(Some(0), format!("[DRY RUN] Skipped: {}", command)))
    }

    fn execute_privileged(
        &self,
        command: &str,
        _secret: &Credential,
        _limits: &ExecLimits,
    ) -> Result<CommandOutput, RunnerError> {
        tracing::debug!(command, "[DRY RUN] skipped (privileged)");
        Ok(CommandOutput::new(
            Some(0),
            format!("[DRY RUN] Skipped (privileged): {}", command),
        ))
    }
}
