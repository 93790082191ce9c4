//! External process execution for the storage tool.
//!
//! Every interaction with the remote service goes through a
//! [`CommandExecutor`]. The production implementation, [`ProcessExecutor`],
//! spawns the tool, streams its merged stdout/stderr line by line so the
//! already-exists phrase can be spotted as soon as it is printed, and kills
//! the whole process group when the per-command timeout elapses.

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command as AsyncCommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::shutdown::ShutdownSignal;

/// Exit code reported when a command was killed for exceeding its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the process ended without one (killed by a signal)
pub const NO_EXIT_CODE: i32 = -1;

/// How long to wait for the pipes to close after killing a process
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A fully rendered invocation of the external tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// What a single invocation produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: i32,
    /// An output line matched the already-exists pattern
    pub already_exists: bool,
    /// Merged stdout/stderr in arrival order
    pub output: String,
    pub timed_out: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// First argument, which names the tool's subcommand
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote an argument so the rendered command can be pasted into a POSIX shell
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Human-readable failure text for reports
    pub fn error_text(&self, timeout: Option<Duration>) -> String {
        let output = self.output.trim_end();
        let headline = if self.timed_out {
            match timeout {
                Some(limit) => format!("timed out after {}s", limit.as_secs()),
                None => "timed out".to_string(),
            }
        } else {
            format!("exit code {}", self.exit_code)
        };
        if output.is_empty() {
            headline
        } else {
            format!("{}\n{}", headline, output)
        }
    }
}

/// Runs tool commands. Implementations must be usable from a single task at a time.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion, or until its timeout or an interrupt
    async fn execute(&self, command: &ToolCommand) -> Result<CommandOutcome, ToolError>;

    /// Per-invocation timeout, if the executor enforces one
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Spawns the real tool as a child process
pub struct ProcessExecutor {
    timeout: Duration,
    already_exists: Regex,
    shutdown: ShutdownSignal,
}

enum Wait {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Interrupted,
}

/// Output collected so far from one invocation
#[derive(Default)]
struct Capture {
    output: String,
    already_exists: bool,
}

impl Capture {
    fn push(&mut self, line: String, pattern: &Regex) {
        debug!(target: "cloudpush::tool", "{}", line);
        if !self.already_exists && pattern.is_match(&line) {
            debug!("Already-exists phrase detected: {}", line);
            self.already_exists = true;
        }
        self.output.push_str(&line);
        self.output.push('\n');
    }
}

impl ProcessExecutor {
    /// Create an executor. `already_exists_pattern` is matched case-insensitively.
    pub fn new(
        timeout: Duration,
        already_exists_pattern: &str,
        shutdown: ShutdownSignal,
    ) -> Result<Self, regex::Error> {
        let already_exists = Regex::new(&format!("(?i){}", already_exists_pattern))?;
        Ok(Self {
            timeout,
            already_exists,
            shutdown,
        })
    }

    fn spawn(&self, command: &ToolCommand) -> Result<Child, ToolError> {
        let mut cmd = AsyncCommand::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a timeout can take down helpers the tool forks.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|source| ToolError::Spawn {
            program: command.program.clone(),
            source,
        })
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, command: &ToolCommand) -> Result<CommandOutcome, ToolError> {
        info!("Running: {}", command);
        let started = Instant::now();

        let mut child = self.spawn(command)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, tx.clone()));
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut shutdown = self.shutdown.clone();

        let mut capture = Capture::default();

        // Drain output until both pipes close, then reap the process.
        let mut streams_open = true;
        let wait = loop {
            if streams_open {
                tokio::select! {
                    line = rx.recv() => match line {
                        Some(line) => capture.push(line, &self.already_exists),
                        None => streams_open = false,
                    },
                    _ = &mut deadline => break Wait::TimedOut,
                    _ = shutdown.triggered() => break Wait::Interrupted,
                }
            } else {
                tokio::select! {
                    status = child.wait() => break Wait::Exited(status),
                    _ = &mut deadline => break Wait::TimedOut,
                    _ = shutdown.triggered() => break Wait::Interrupted,
                }
            }
        };

        match wait {
            Wait::Exited(status) => {
                let status = status.map_err(|source| ToolError::Io {
                    command: command.to_string(),
                    source,
                })?;
                let exit_code = status.code().unwrap_or(NO_EXIT_CODE);
                debug!(
                    "Command finished in {:.2}s with exit code {}",
                    started.elapsed().as_secs_f64(),
                    exit_code
                );
                Ok(CommandOutcome {
                    exit_code,
                    already_exists: capture.already_exists,
                    output: capture.output,
                    timed_out: false,
                })
            }
            Wait::TimedOut => {
                warn!(
                    "Command timed out after {}s: {}",
                    self.timeout.as_secs(),
                    command
                );
                terminate(&mut child).await;
                // Lines printed before the kill may still be queued or unterminated.
                let remaining = async {
                    while let Some(line) = rx.recv().await {
                        capture.push(line, &self.already_exists);
                    }
                };
                if tokio::time::timeout(DRAIN_GRACE, remaining).await.is_err() {
                    debug!("Output pipes still open after kill: {}", command);
                }
                Ok(CommandOutcome {
                    exit_code: TIMEOUT_EXIT_CODE,
                    already_exists: capture.already_exists,
                    output: capture.output,
                    timed_out: true,
                })
            }
            Wait::Interrupted => {
                warn!("Interrupted, killing: {}", command);
                terminate(&mut child).await;
                Err(ToolError::Interrupted {
                    command: command.to_string(),
                })
            }
        }
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}

/// Forward lines from one pipe into the merged channel
async fn pump_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

/// Kill the child's process group, then the child itself, and reap it
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }

    if let Err(e) = child.kill().await {
        debug!("Failed to kill child process: {}", e);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
