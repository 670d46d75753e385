//! Bounded child-process execution.
//!
//! Every call spawns exactly one process from a literal argv (no shell), optionally feeds it
//! stdin, and races its exit against a timer and an optional cancellation token. The timer is
//! polled first, so a process that exits in the same instant the deadline fires is reported as
//! timed out. On timeout or cancellation the whole process tree is killed before the call
//! returns. Dropping the returned future before the child is reaped kills the tree as well.
//!
//! Streaming reads stdout as raw bytes split on `\n`; invalid UTF-8 is replaced, never treated
//! as end of output. The child's exit is watched alongside the reader, so a background
//! descendant that keeps stdout open cannot hold a finished run until its deadline.
//!
//! Cancellation is observed only inside the wait loop: a process that is already being reaped
//! is not interrupted.

pub mod kill;

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use kill::{kill_process_group, kill_process_tree, KillReport};

/// Binary could not be found (or argv was empty).
pub const EXIT_NOT_FOUND: i32 = 127;
/// Binary exists but could not be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Synthetic code for a process killed on timeout.
pub const EXIT_TIMEOUT: i32 = 124;
/// Synthetic code for a process killed on cancellation.
pub const EXIT_CANCELLED: i32 = 130;

/// How long output pipes are drained after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub wall_time_ms: f64,
    pub timed_out: bool,
    pub cancelled: bool,
    /// First non-empty stdout line, relative to process start (streaming only).
    pub ttft_ms: Option<f64>,
    /// Stdout lines in arrival order (streaming only).
    pub chunks: Vec<String>,
}

impl ExecutorResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }

    fn spawn_failure(exit_code: i32, message: String, start: Instant) -> Self {
        Self {
            stderr: message,
            exit_code,
            wall_time_ms: elapsed_ms(start),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Executor {
    cancel: Option<CancellationToken>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

type Sink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Stdout split into lines on `\n` (a trailing `\r` is dropped too), decoded lossily.
struct LineReader {
    inner: BufReader<ChildStdout>,
    pending: Vec<u8>,
}

impl LineReader {
    fn new(out: ChildStdout) -> Self {
        Self {
            inner: BufReader::new(out),
            pending: Vec::new(),
        }
    }

    /// `None` at end of output or on a read error. Cancel safe: bytes of a line that was only
    /// partly read stay in `pending` for the next call.
    async fn next_line(&mut self) -> Option<String> {
        match self.inner.read_until(b'\n', &mut self.pending).await {
            Ok(0) if self.pending.is_empty() => None,
            Ok(_) => Some(self.take_line()),
            Err(e) => {
                tracing::debug!(error = %e, "stdout read failed");
                (!self.pending.is_empty()).then(|| self.take_line())
            }
        }
    }

    fn take_line(&mut self) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[derive(Default)]
struct StreamCapture {
    stdout: String,
    chunks: Vec<String>,
    ttft_ms: Option<f64>,
}

impl StreamCapture {
    fn push(&mut self, line: String, start: Instant, sink: &mut Option<Sink<'_>>) {
        if self.ttft_ms.is_none() && !line.trim().is_empty() {
            self.ttft_ms = Some(elapsed_ms(start));
        }
        if let Some(sink) = sink {
            sink(&line);
        }
        self.stdout.push_str(&line);
        self.stdout.push('\n');
        self.chunks.push(line);
    }
}

/// Kills the child's process group if `execute` is dropped mid-run. `kill_on_drop` alone only
/// reaches the direct child.
struct TreeGuard {
    pid: Option<u32>,
    reaped: bool,
    done: bool,
}

impl TreeGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            reaped: false,
            done: false,
        }
    }
}

impl Drop for TreeGuard {
    fn drop(&mut self) {
        let Some(pid) = self.pid else { return };
        if self.done {
            return;
        }
        tracing::debug!(pid, reaped = self.reaped, "execution dropped; killing process group");
        if self.reaped {
            kill_process_group(pid);
        } else {
            kill_process_tree(pid);
        }
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Runs `argv` to completion or until `timeout`, capturing stdout and stderr.
    pub async fn run(&self, argv: &[String], stdin: Option<&str>, timeout: Duration) -> ExecutorResult {
        self.execute(argv, stdin, timeout, None).await
    }

    /// Like [`Executor::run`], but hands each stdout line to `sink` as it arrives and records
    /// time-to-first-token.
    pub async fn run_streaming<F>(
        &self,
        argv: &[String],
        stdin: Option<&str>,
        timeout: Duration,
        mut sink: F,
    ) -> ExecutorResult
    where
        F: FnMut(&str) + Send,
    {
        self.execute(argv, stdin, timeout, Some(&mut sink)).await
    }

    async fn execute(
        &self,
        argv: &[String],
        stdin: Option<&str>,
        timeout: Duration,
        mut sink: Option<Sink<'_>>,
    ) -> ExecutorResult {
        let start = Instant::now();
        let Some((program, args)) = argv.split_first() else {
            return ExecutorResult::spawn_failure(EXIT_NOT_FOUND, "empty command".into(), start);
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let code = match e.kind() {
                    std::io::ErrorKind::NotFound => EXIT_NOT_FOUND,
                    std::io::ErrorKind::PermissionDenied => EXIT_NOT_EXECUTABLE,
                    _ => 1,
                };
                tracing::debug!(program = %program, error = %e, "spawn failed");
                return ExecutorResult::spawn_failure(
                    code,
                    format!("failed to start '{program}': {e}"),
                    start,
                );
            }
        };
        // With `process_group(0)` the pid is also the group id, and it is recorded before reaping.
        let pid = child.id();
        let mut guard = TreeGuard::new(pid);
        tracing::debug!(program = %program, args = args.len(), ?pid, ?timeout, "spawned");

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let bytes = input.as_bytes().to_vec();
            tokio::spawn(async move {
                // A child that exits without reading stdin closes the pipe; that is not an error.
                let _ = pipe.write_all(&bytes).await;
                let _ = pipe.shutdown().await;
            });
        }

        let mut stderr_task = child.stderr.take().map(spawn_reader);
        let streaming = sink.is_some();
        let (mut reader, mut stdout_task) = match child.stdout.take() {
            Some(out) if streaming => (Some(LineReader::new(out)), None),
            Some(out) => (None, Some(spawn_reader(out))),
            None => (None, None),
        };
        let mut stdout_open = reader.is_some();
        let mut capture = StreamCapture::default();

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let cancel = self.cancel.clone();
        let cancelled = async {
            match &cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(cancelled);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break Outcome::TimedOut,
                _ = &mut cancelled => break Outcome::Cancelled,
                line = next_line(&mut reader), if stdout_open => match line {
                    Some(line) => capture.push(line, start, &mut sink),
                    None => stdout_open = false,
                },
                status = child.wait() => break Outcome::Exited(status),
            }
        };

        let mut stderr_note = None;
        let (exit_code, timed_out, was_cancelled) = match outcome {
            Outcome::Exited(Ok(status)) => (exit_code_of(status), false, false),
            Outcome::Exited(Err(e)) => {
                stderr_note = Some(format!("wait failed: {e}"));
                terminate(&mut child, pid).await;
                (1, false, false)
            }
            Outcome::TimedOut => {
                tracing::warn!(program = %program, ?timeout, "process timed out; killing tree");
                terminate(&mut child, pid).await;
                (EXIT_TIMEOUT, true, false)
            }
            Outcome::Cancelled => {
                tracing::info!(program = %program, "cancelled; killing tree");
                terminate(&mut child, pid).await;
                (EXIT_CANCELLED, false, true)
            }
        };
        guard.reaped = true;
        let wall_time_ms = elapsed_ms(start);

        if stdout_open {
            let drained = tokio::time::timeout(
                DRAIN_GRACE,
                read_remaining(&mut reader, &mut capture, start, &mut sink),
            )
            .await
            .is_ok();
            if !drained {
                // A descendant still holds stdout; the exit code already recorded stands.
                if let Some(pgid) = pid {
                    let _ = tokio::task::spawn_blocking(move || kill_process_group(pgid)).await;
                }
                let drained = tokio::time::timeout(
                    DRAIN_GRACE,
                    read_remaining(&mut reader, &mut capture, start, &mut sink),
                )
                .await
                .is_ok();
                if !drained {
                    tracing::debug!(program = %program, "stdout still open after group kill");
                }
            }
        }
        let mut stdout_buf = capture.stdout;
        if let Some(task) = stdout_task.as_mut() {
            stdout_buf = drain(task, pid).await;
        }
        let mut stderr = match stderr_task.as_mut() {
            Some(task) => drain(task, pid).await,
            None => String::new(),
        };
        if let Some(note) = stderr_note {
            stderr.push_str(&note);
        }
        guard.done = true;

        ExecutorResult {
            stdout: stdout_buf,
            stderr,
            exit_code,
            wall_time_ms,
            timed_out,
            cancelled: was_cancelled,
            ttft_ms: capture.ttft_ms,
            chunks: capture.chunks,
        }
    }
}

fn spawn_reader<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn next_line(reader: &mut Option<LineReader>) -> Option<String> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => None,
    }
}

async fn read_remaining(
    reader: &mut Option<LineReader>,
    capture: &mut StreamCapture,
    start: Instant,
    sink: &mut Option<Sink<'_>>,
) {
    while let Some(line) = next_line(reader).await {
        capture.push(line, start, sink);
    }
}

/// Waits for a reader task once the child has been reaped. A descendant that outlived the child
/// can hold the pipe open, in which case its process group is killed and the reader gets one
/// more grace period.
async fn drain(task: &mut JoinHandle<String>, pgid: Option<u32>) -> String {
    if let Ok(joined) = tokio::time::timeout(DRAIN_GRACE, &mut *task).await {
        return joined.unwrap_or_default();
    }
    if let Some(pgid) = pgid {
        let _ = tokio::task::spawn_blocking(move || kill_process_group(pgid)).await;
    }
    match tokio::time::timeout(DRAIN_GRACE, &mut *task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

async fn terminate(child: &mut tokio::process::Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        let _ = tokio::task::spawn_blocking(move || kill_process_tree(pid)).await;
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
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
    1
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
