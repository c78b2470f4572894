//! External command execution with timeouts and bounded output capture

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::sanitize::sanitize_output;
use crate::models::deployment::{StepName, StepResult};
use crate::utils::tail_chars;

/// Exit code reported when a command was killed for exceeding its timeout
pub const EXIT_CODE_TIMEOUT: i32 = 124;

/// Exit code reported when a command could not be started
pub const EXIT_CODE_SPAWN_FAILED: i32 = 127;

/// Bytes of output retained per stream while a command runs
pub const DEFAULT_CAPTURE_BYTES: usize = 64 * 1024;

/// How long output readers may linger after the process is gone
const READER_GRACE: Duration = Duration::from_secs(5);

/// A command line to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,

    /// Variables layered over the inherited process environment
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    /// `<bin> compose <step args>` in `cwd`
    pub fn compose(bin: &str, step: StepName, cwd: PathBuf, env: HashMap<String, String>) -> Self {
        let mut args = vec!["compose".to_string()];
        args.extend(step.compose_args().iter().map(|a| a.to_string()));
        Self {
            program: bin.to_string(),
            args,
            cwd,
            env,
        }
    }
}

/// What happened when a command ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration: Duration,

    /// Tail of standard output alone
    pub stdout: String,

    /// Tail of stdout and stderr interleaved in arrival order
    pub output: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Capability to run external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec`, killing it once `timeout` elapses
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> CommandOutcome;
}

/// Runs commands as child processes of the deployer
pub struct ProcessRunner {
    capture_bytes: usize,
}

impl ProcessRunner {
    pub fn new(capture_bytes: usize) -> Self {
        Self { capture_bytes }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_BYTES)
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> CommandOutcome {
        let started = Instant::now();
        debug!("Running {} {:?} in {}", spec.program, spec.args, spec.cwd.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", spec.program, e);
                let message = format!("failed to start {}: {}", spec.program, e);
                return CommandOutcome {
                    exit_code: EXIT_CODE_SPAWN_FAILED,
                    timed_out: false,
                    duration: started.elapsed(),
                    stdout: String::new(),
                    output: message,
                };
            }
        };

        let combined = Arc::new(Mutex::new(TailBuffer::new(self.capture_bytes)));
        let stdout_only = Arc::new(Mutex::new(TailBuffer::new(self.capture_bytes)));

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain(
                stdout,
                vec![combined.clone(), stdout_only.clone()],
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain(stderr, vec![combined.clone()])));
        }

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (exit_code_of(status), false),
            Ok(Err(e)) => {
                warn!("Failed to wait for {}: {}", spec.program, e);
                (-1, false)
            }
            Err(_) => {
                info!("{} exceeded {:?}, killing", spec.program, timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", spec.program, e);
                }
                (EXIT_CODE_TIMEOUT, true)
            }
        };

        // Grandchildren may still hold the pipes open after a kill.
        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
                abort.abort();
            }
        }

        let mut output = lock_text(&combined);
        if timed_out {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&format!("timeout after {}s", timeout.as_secs()));
        }

        CommandOutcome {
            exit_code,
            timed_out,
            duration: started.elapsed(),
            stdout: lock_text(&stdout_only),
            output,
        }
    }
}

/// Runs one pipeline step and turns the outcome into a [`StepResult`]
pub struct StepExecutor {
    runner: Arc<dyn CommandRunner>,
    tail_limit: usize,
}

/// A finished step plus its raw stdout tail
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub result: StepResult,
    pub stdout: String,
}

impl StepExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, tail_limit: usize) -> Self {
        Self { runner, tail_limit }
    }

    /// Run `spec` as `step`; `secrets` are masked out of the tail
    pub async fn run(
        &self,
        step: StepName,
        spec: &CommandSpec,
        timeout: Duration,
        secrets: &[String],
    ) -> StepOutput {
        let outcome = self.runner.run(spec, timeout).await;
        let duration_ms = outcome.duration.as_millis().min(u64::MAX as u128) as u64;
        let tail = tail_chars(&sanitize_output(&outcome.output, secrets), self.tail_limit);

        if outcome.timed_out {
            info!(
                event = "step_timeout",
                step = step.as_str(),
                duration_ms,
                "Step {} timed out after {:?}",
                step,
                timeout
            );
        } else {
            info!(
                event = "step",
                step = step.as_str(),
                ok = outcome.success(),
                exit_code = outcome.exit_code,
                duration_ms,
                "Step {} finished",
                step
            );
        }

        StepOutput {
            result: StepResult {
                name: step,
                ok: outcome.success(),
                duration_ms,
                tail,
                exit_code: outcome.exit_code,
            },
            stdout: outcome.stdout,
        }
    }
}

/// Byte ring keeping only the most recent `capacity` bytes
struct TailBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
}

impl TailBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity.min(8192)),
            capacity,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let chunk = if chunk.len() > self.capacity {
            &chunk[chunk.len() - self.capacity..]
        } else {
            chunk
        };
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.capacity);
        self.bytes.drain(..overflow);
        self.bytes.extend(chunk);
    }

    fn to_text(&self) -> String {
        let (front, back) = self.bytes.as_slices();
        let mut raw = Vec::with_capacity(front.len() + back.len());
        raw.extend_from_slice(front);
        raw.extend_from_slice(back);
        String::from_utf8_lossy(&raw).into_owned()
    }
}

fn lock_text(buffer: &Mutex<TailBuffer>) -> String {
    buffer.lock().unwrap_or_else(|e| e.into_inner()).to_text()
}

async fn drain<R>(mut reader: R, sinks: Vec<Arc<Mutex<TailBuffer>>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for sink in &sinks {
                    sink.lock().unwrap_or_else(|e| e.into_inner()).push(&buf[..n]);
                }
            }
            Err(e) => {
                debug!("Output stream closed: {}", e);
                break;
            }
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
