//! Child process execution with a wall-clock limit and bounded output capture.

use std::io::{Read, Write};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to keep draining pipes after the child has been reaped. A
/// descendant that inherited the pipes can otherwise hold them open forever.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Captured result of a finished (or killed) child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Exit code, with signal deaths mapped to `128 + signal` on unix.
    pub fn exit_code(&self) -> i32 {
        if let Some(code) = self.status.code() {
            return code;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = self.status.signal() {
                return 128 + signal;
            }
        }
        -1
    }

    pub fn stdout_text(&self) -> String {
        with_notice(&self.stdout, self.stdout_truncated)
    }

    pub fn stderr_text(&self) -> String {
        with_notice(&self.stderr, self.stderr_truncated)
    }
}

fn with_notice(bytes: &[u8], truncated: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        if !text.ends_with('\n') && !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("[output truncated {truncated} bytes]\n"));
    }
    text
}

/// Run `cmd` until it exits or `timeout` elapses. The child is killed and
/// reaped on timeout and on every error path after spawn.
///
/// stdout and stderr are drained concurrently so a chatty child cannot block
/// on a full pipe. At most `output_limit_bytes` of each stream are kept; the
/// rest is read and discarded.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let (stdout, stderr) = match take_pipes(&mut child, stdin) {
        Ok(pipes) => pipes,
        Err(err) => {
            reap(&mut child);
            return Err(err);
        }
    };

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let waited = match child.wait_timeout(timeout) {
        Ok(waited) => waited,
        Err(err) => {
            reap(&mut child);
            return Err(err).context("wait for command");
        }
    };
    let status = match waited {
        Some(status) => status,
        None => {
            warn!(timeout_ms = timeout.as_millis() as u64, "command timed out, killing");
            timed_out = true;
            // The child may exit on its own between the timeout and the kill.
            if let Err(e) = child.kill() {
                debug!(err = %e, "kill after timeout failed");
            }
            child.wait().context("wait command after kill")?
        }
    };
    let elapsed = started.elapsed();

    let (stdout, stdout_truncated) = collect_output(&stdout_rx, "stdout")?;
    let (stderr, stderr_truncated) = collect_output(&stderr_rx, "stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed,
    })
}

/// Feed `stdin` (closing it afterwards) and take the output pipes.
fn take_pipes(child: &mut Child, stdin: Option<&[u8]>) -> Result<(ChildStdout, ChildStderr)> {
    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    Ok((stdout, stderr))
}

/// Kill and reap a child that is being abandoned on an error path.
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(err = %e, "kill of abandoned child failed");
    }
    if let Err(e) = child.wait() {
        warn!(err = %e, "failed to reap abandoned child");
    }
}

type ReadResult = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<ReadResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only if the caller stopped waiting.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

fn collect_output(rx: &Receiver<ReadResult>, label: &str) -> Result<(Vec<u8>, usize)> {
    match rx.recv_timeout(DRAIN_GRACE) {
        Ok(result) => result.with_context(|| format!("read {label}")),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream = label, "pipe still open after child exit, dropping output");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{label} reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
