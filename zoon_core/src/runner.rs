//! Runs a command line under a wall-clock budget and classifies the outcome.
//!
//! Every way a target program can behave (clean exit, failing exit, missing
//! executable, hang) becomes a [`RunResult`]. Only failures of the harness
//! environment itself surface as [`ZoonError`].

use crate::error::{Result, ZoonError};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Exit code reported when the program could not be found at launch.
pub const FILE_NOT_FOUND_EXIT_CODE: i32 = 2;
/// Exit code reported when the budget expired, as `timeout(1)` does.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Closed classification of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Success,
    CalledProcessError,
    FileNotFoundError,
    TimeoutExpired,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Success => "success",
            StatusKind::CalledProcessError => "calledprocesserror",
            StatusKind::FileNotFoundError => "filenotfounderror",
            StatusKind::TimeoutExpired => "timeoutexpired",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized outcome of running a command.
///
/// `stdout` is only populated for `Success`; `error_detail` only for
/// `FileNotFoundError` (and for `CalledProcessError` when the runner is
/// configured to surface stderr).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub exit_code: i32,
    pub status: StatusKind,
    pub stdout: String,
    pub error_detail: String,
}

impl RunResult {
    fn success(stdout: String) -> Self {
        Self {
            exit_code: 0,
            status: StatusKind::Success,
            stdout,
            error_detail: String::new(),
        }
    }

    fn called_process_error(exit_code: i32, error_detail: String) -> Self {
        Self {
            exit_code,
            status: StatusKind::CalledProcessError,
            stdout: String::new(),
            error_detail,
        }
    }

    fn file_not_found(program: &str, err: &io::Error) -> Self {
        Self {
            exit_code: FILE_NOT_FOUND_EXIT_CODE,
            status: StatusKind::FileNotFoundError,
            stdout: String::new(),
            error_detail: format!("{err}: '{program}'"),
        }
    }

    fn timeout_expired() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            status: StatusKind::TimeoutExpired,
            stdout: String::new(),
            error_detail: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusKind::Success
    }
}

impl From<RunResult> for (i32, StatusKind, String, String) {
    fn from(result: RunResult) -> Self {
        (
            result.exit_code,
            result.status,
            result.stdout,
            result.error_detail,
        )
    }
}

/// How a command line is turned into a process.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Launch {
    /// Split into words with shell quoting rules and exec the first word.
    /// A missing program is reported as `FileNotFoundError`.
    #[default]
    Direct,
    /// Hand the whole line to `sh -c`. A missing program is whatever exit
    /// code the shell chooses (127 for POSIX shells).
    Shell,
}

/// Bytes of stdout, and separately of stderr, kept from one run.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub launch: Launch,
    /// Put the child's stderr into `error_detail` on a failing exit instead
    /// of discarding it.
    pub surface_stderr: bool,
    /// Output beyond this many bytes per stream is drained and dropped.
    pub output_limit_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            launch: Launch::default(),
            surface_stderr: false,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Runner {
    config: RunnerConfig,
}

/// Runs `command` with the default runner configuration.
pub fn run(command: &str, timeout: Duration) -> Result<RunResult> {
    Runner::default().run(command, timeout)
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs `command` to completion or until `timeout` elapses.
    ///
    /// Blocks the calling thread. On timeout the child is killed and reaped
    /// before returning; its output is abandoned.
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64, launch = ?self.config.launch))]
    pub fn run(&self, command: &str, timeout: Duration) -> Result<RunResult> {
        check_timeout(timeout)?;
        let (cmd, program) = self.build_command(command)?;
        self.execute(cmd, program, timeout)
    }

    /// Runs the program at `path` with the argument string `args` appended.
    ///
    /// The path is used as-is: it is never split into words, and a bare file
    /// name refers to the current directory rather than to `PATH`.
    #[instrument(skip(self, path), fields(path = %path.display(), timeout_ms = timeout.as_millis() as u64, launch = ?self.config.launch))]
    pub fn run_program(&self, path: &Path, args: &str, timeout: Duration) -> Result<RunResult> {
        check_timeout(timeout)?;
        let program = program_path(path);
        let cmd = match self.config.launch {
            Launch::Direct => {
                let mut cmd = Command::new(&program);
                cmd.args(split_command_line(args)?);
                cmd
            }
            Launch::Shell => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c")
                    .arg(format!("{} {}", shell_quote(&program.to_string_lossy()), args));
                cmd
            }
        };
        self.execute(cmd, program.display().to_string(), timeout)
    }

    fn execute(&self, mut cmd: Command, program: String, timeout: Duration) -> Result<RunResult> {
        let deadline = Instant::now() + timeout;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning child process");
        let mut child = match spawn(&mut cmd) {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(program = %program, "program not found");
                return Ok(RunResult::file_not_found(&program, &e));
            }
            Err(e) => {
                error!(program = %program, err = %e, "failed to spawn command");
                return Err(ZoonError::Launch { program, source: e });
            }
        };

        // Readers that outlive the run keep draining but retain at most
        // `output_limit_bytes`, then exit once the last writer closes.
        let (stdout_rx, stderr_rx) =
            spawn_output_readers(&mut child, self.config.output_limit_bytes)?;

        let status = match child
            .wait_timeout(deadline.saturating_duration_since(Instant::now()))
            .map_err(|e| ZoonError::io("wait for command", e))?
        {
            Some(status) => status,
            None => {
                warn!(program = %program, "command timed out, killing");
                kill_and_reap(&mut child)?;
                return Ok(RunResult::timeout_expired());
            }
        };

        // The child has exited, but a process it left behind may still hold
        // the pipes open. The output must also arrive before the deadline.
        let (Some(stdout), Some(stderr)) = (
            receive_output(&stdout_rx, deadline)?,
            receive_output(&stderr_rx, deadline)?,
        ) else {
            warn!(program = %program, "output still open at deadline, abandoning");
            return Ok(RunResult::timeout_expired());
        };

        if stdout.truncated > 0 || stderr.truncated > 0 {
            warn!(
                stdout_truncated = stdout.truncated,
                stderr_truncated = stderr.truncated,
                "output truncated"
            );
        }

        let exit_code = exit_code_of(status);
        debug!(exit_code, "command finished");

        if exit_code == 0 {
            return Ok(RunResult::success(
                String::from_utf8_lossy(&stdout.bytes).into_owned(),
            ));
        }

        let error_detail = if self.config.surface_stderr {
            String::from_utf8_lossy(&stderr.bytes).into_owned()
        } else {
            String::new()
        };
        Ok(RunResult::called_process_error(exit_code, error_detail))
    }

    fn build_command(&self, command: &str) -> Result<(Command, String)> {
        match self.config.launch {
            Launch::Direct => {
                let mut words = split_command_line(command)?.into_iter();
                let program = words.next().ok_or_else(|| {
                    ZoonError::InvalidArgument("command line is empty".to_string())
                })?;
                let mut cmd = Command::new(&program);
                cmd.args(words);
                Ok((cmd, program))
            }
            Launch::Shell => {
                if command.trim().is_empty() {
                    return Err(ZoonError::InvalidArgument(
                        "command line is empty".to_string(),
                    ));
                }
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                Ok((cmd, "sh".to_string()))
            }
        }
    }
}

fn check_timeout(timeout: Duration) -> Result<()> {
    if timeout.is_zero() {
        return Err(ZoonError::InvalidArgument(
            "timeout must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// A bare file name such as `variant` would be searched on `PATH`; anchor it
/// to the current directory instead.
fn program_path(path: &Path) -> PathBuf {
    if path.parent() == Some(Path::new("")) {
        Path::new(".").join(path)
    } else {
        path.to_path_buf()
    }
}

/// Quotes `word` for `sh` so it is passed through as a single word.
pub fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// `ETXTBSY`: the freshly written target is still open for writing in a
/// process forked concurrently by another thread.
const TEXT_FILE_BUSY: i32 = 26;
const SPAWN_ATTEMPTS: u32 = 5;

fn spawn(cmd: &mut Command) -> io::Result<Child> {
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < SPAWN_ATTEMPTS => {
                debug!(attempt, "target busy, retrying spawn");
                thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[derive(Debug, Default)]
struct CapturedOutput {
    bytes: Vec<u8>,
    truncated: usize,
}

type OutputReceiver = Receiver<io::Result<CapturedOutput>>;

fn spawn_output_readers(child: &mut Child, limit: usize) -> Result<(OutputReceiver, OutputReceiver)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ZoonError::io("capture stdout", io::Error::other("stdout was not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ZoonError::io("capture stderr", io::Error::other("stderr was not piped")))?;

    Ok((spawn_reader(stdout, limit), spawn_reader(stderr, limit)))
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> OutputReceiver {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone when the run was abandoned.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> io::Result<CapturedOutput> {
    let mut output = CapturedOutput::default();
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(output.bytes.len());
        let keep = n.min(remaining);
        output.bytes.extend_from_slice(&chunk[..keep]);
        output.truncated += n - keep;
    }

    Ok(output)
}

/// Waits for a reader until `deadline`. `None` means the stream was still
/// open when the deadline passed.
fn receive_output(rx: &OutputReceiver, deadline: Instant) -> Result<Option<CapturedOutput>> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => result
            .map(Some)
            .map_err(|e| ZoonError::io("read command output", e)),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(ZoonError::io(
            "read command output",
            io::Error::other("output reader thread panicked"),
        )),
    }
}

/// Sends SIGKILL (TerminateProcess on Windows), which the child cannot
/// ignore, then reaps it so no zombie is left behind.
fn kill_and_reap(child: &mut Child) -> Result<()> {
    if let Err(e) = child.kill() {
        // The child may have exited between the deadline and the kill.
        if e.kind() != io::ErrorKind::InvalidInput {
            return Err(ZoonError::io("kill timed-out command", e));
        }
    }
    child
        .wait()
        .map_err(|e| ZoonError::io("wait for killed command", e))?;
    Ok(())
}

/// Exit code of a finished process. A process ended by a signal reports
/// `128 + signal`, as POSIX shells do.
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

/// Splits a command line into words the way a POSIX shell would, honoring
/// single quotes, double quotes and backslash escapes. No expansion of any
/// kind is performed.
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => word.push(inner),
                        None => return Err(unterminated("single quote")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => word.push(escaped),
                            Some(other) => {
                                word.push('\\');
                                word.push(other);
                            }
                            None => return Err(unterminated("double quote")),
                        },
                        Some(inner) => word.push(inner),
                        None => return Err(unterminated("double quote")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => word.push(escaped),
                    None => return Err(unterminated("backslash escape")),
                }
            }
            other => {
                in_word = true;
                word.push(other);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

fn unterminated(what: &str) -> ZoonError {
    ZoonError::InvalidArgument(format!("unterminated {what} in command line"))
}
