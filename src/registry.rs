//! Single source of truth for all exec sessions in this process.
//!
//! Running sessions own the child process handles and a capped output buffer;
//! finished sessions are frozen records retained until deleted explicitly or
//! reclaimed after their TTL. A session id resolves to at most one of the two
//! maps at any time.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::DEFAULT_SESSION_TTL_MS;
use crate::errors::ProcessToolError;
use crate::errors::SpawnError;
use crate::session_id::SessionId;
use crate::spawn;
use crate::spawn::LaunchSpec;

const OUTPUT_RETENTION_BYTES: usize = 200_000;
const TAIL_RETENTION_BYTES: usize = 2_048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainedOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Default)]
pub struct OutputSnapshot {
    pub tail: String,
    pub aggregated: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct OutputState {
    pending_stdout: String,
    pending_stderr: String,
    aggregated: String,
    tail: String,
    truncated: bool,
}

impl OutputState {
    fn push_chunk(&mut self, stream: OutputStream, text: &str) {
        match stream {
            OutputStream::Stdout => {
                self.pending_stdout.push_str(text);
                trim_front(&mut self.pending_stdout, OUTPUT_RETENTION_BYTES);
            }
            OutputStream::Stderr => {
                self.pending_stderr.push_str(text);
                trim_front(&mut self.pending_stderr, OUTPUT_RETENTION_BYTES);
            }
        }
        self.aggregated.push_str(text);
        if trim_front(&mut self.aggregated, OUTPUT_RETENTION_BYTES) {
            // Monotonic: stays set for the rest of the session's life.
            self.truncated = true;
        }
        self.tail = tail_of(&self.aggregated, TAIL_RETENTION_BYTES);
    }

    fn drain(&mut self) -> DrainedOutput {
        DrainedOutput {
            stdout: std::mem::take(&mut self.pending_stdout),
            stderr: std::mem::take(&mut self.pending_stderr),
        }
    }

    fn snapshot(&self) -> OutputSnapshot {
        OutputSnapshot {
            tail: self.tail.clone(),
            aggregated: self.aggregated.clone(),
            truncated: self.truncated,
        }
    }
}

/// Drops leading bytes beyond `max_bytes`, keeping the cut on a char
/// boundary. Returns whether anything was dropped.
fn trim_front(buf: &mut String, max_bytes: usize) -> bool {
    if buf.len() <= max_bytes {
        return false;
    }
    let mut cut = buf.len() - max_bytes;
    while cut < buf.len() && !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
    true
}

fn tail_of(buf: &str, max_bytes: usize) -> String {
    if buf.len() <= max_bytes {
        return buf.to_string();
    }
    let mut start = buf.len() - max_bytes;
    while start < buf.len() && !buf.is_char_boundary(start) {
        start += 1;
    }
    buf[start..].to_string()
}

pub(crate) fn system_time_to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

#[derive(Debug, Default)]
struct ExitState {
    exited: AtomicBool,
    info: StdMutex<Option<ExitInfo>>,
}

impl ExitState {
    fn record(&self, status: Option<std::process::ExitStatus>) {
        let info = ExitInfo {
            code: status.and_then(|s| s.code()),
            signal: status.and_then(exit_signal_name),
        };
        if let Ok(mut guard) = self.info.lock() {
            guard.get_or_insert(info);
        }
        self.exited.store(true, Ordering::SeqCst);
    }
}

#[cfg(unix)]
fn exit_signal_name(status: std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(spawn::signal_name)
}

#[cfg(not(unix))]
fn exit_signal_name(_status: std::process::ExitStatus) -> Option<String> {
    None
}

/// One live backgrounded process and its captured I/O state.
#[derive(Debug)]
pub struct RunningSession {
    id: SessionId,
    pid: Option<u32>,
    command: String,
    cwd: PathBuf,
    scope_key: Option<String>,
    backgrounded: bool,
    started_at: Instant,
    started_at_wall: SystemTime,
    output: Arc<Mutex<OutputState>>,
    stdin: Mutex<Option<ChildStdin>>,
    exit: Arc<ExitState>,
    kill_signal: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn scope_key(&self) -> Option<&str> {
        self.scope_key.as_deref()
    }

    pub fn backgrounded(&self) -> bool {
        self.backgrounded
    }

    pub fn started_at_ms(&self) -> u64 {
        system_time_to_millis(self.started_at_wall)
    }

    pub fn runtime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn has_exited(&self) -> bool {
        self.exit.exited.load(Ordering::SeqCst)
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit.info.lock().ok().and_then(|guard| guard.clone())
    }

    /// Output accumulated since the previous drain. Returns empty strings
    /// when nothing new arrived; does not affect the aggregated history.
    pub async fn drain(&self) -> DrainedOutput {
        self.output.lock().await.drain()
    }

    pub async fn output_snapshot(&self) -> OutputSnapshot {
        self.output.lock().await.snapshot()
    }

    /// Writes raw bytes to the child's stdin, awaiting completion. With
    /// `eof` the stream is closed after the write.
    pub async fn write_stdin(&self, bytes: &[u8], eof: bool) -> Result<(), ProcessToolError> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(ProcessToolError::StdinClosed {
                session_id: self.id,
            });
        };
        stdin
            .write_all(bytes)
            .await
            .map_err(|source| ProcessToolError::WriteFailed {
                session_id: self.id,
                source,
            })?;
        stdin
            .flush()
            .await
            .map_err(|source| ProcessToolError::WriteFailed {
                session_id: self.id,
                source,
            })?;
        if eof {
            guard.take();
        }
        Ok(())
    }

    /// Signals the wait task to forcefully terminate the process. Does not
    /// wait for confirmation; the eventual exit event is absorbed by
    /// `mark_exited` idempotence.
    pub fn kill(&self) {
        self.kill_signal.notify_one();
    }
}

impl Drop for RunningSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Frozen record of a session that has exited or been killed.
#[derive(Debug)]
pub struct FinishedSession {
    pub id: SessionId,
    pub pid: Option<u32>,
    pub command: String,
    pub cwd: PathBuf,
    pub scope_key: Option<String>,
    pub backgrounded: bool,
    pub started_at: Instant,
    pub started_at_wall: SystemTime,
    pub ended_at: Instant,
    pub ended_at_wall: SystemTime,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    pub tail: String,
    pub aggregated: String,
    pub truncated: bool,
}

impl FinishedSession {
    pub fn started_at_ms(&self) -> u64 {
        system_time_to_millis(self.started_at_wall)
    }

    pub fn ended_at_ms(&self) -> u64 {
        system_time_to_millis(self.ended_at_wall)
    }

    pub fn runtime_ms(&self) -> u64 {
        self.ended_at
            .saturating_duration_since(self.started_at)
            .as_millis() as u64
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    next_session_id: AtomicU32,
    running: Mutex<HashMap<SessionId, Arc<RunningSession>>>,
    finished: Mutex<HashMap<SessionId, Arc<FinishedSession>>>,
    ttl_ms: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_session_id: AtomicU32::new(0),
            running: Mutex::new(HashMap::new()),
            finished: Mutex::new(HashMap::new()),
            ttl_ms: AtomicU64::new(DEFAULT_SESSION_TTL_MS),
        }
    }

    /// Configures how long a finished session survives before reclamation.
    pub fn set_ttl_ms(&self, ttl_ms: u64) {
        self.ttl_ms.store(ttl_ms, Ordering::SeqCst);
    }

    /// Spawns the process described by `spec` and registers a running
    /// session for it, wiring the stdout/stderr readers and the wait task.
    pub async fn launch(&self, spec: LaunchSpec) -> Result<Arc<RunningSession>, SpawnError> {
        let launched = spawn::launch_shell(&spec.command, &spec.cwd)?;
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::SeqCst));

        let output = Arc::new(Mutex::new(OutputState::default()));
        let exit = Arc::new(ExitState::default());
        let kill_signal = Arc::new(Notify::new());

        let stdout_task = launched
            .stdout
            .map(|stdout| spawn_reader(OutputStream::Stdout, stdout, Arc::clone(&output)));
        let stderr_task = launched
            .stderr
            .map(|stderr| spawn_reader(OutputStream::Stderr, stderr, Arc::clone(&output)));

        let mut child = launched.child;
        let exit_clone = Arc::clone(&exit);
        let kill_clone = Arc::clone(&kill_signal);
        let tasks = vec![tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status.ok(),
                _ = kill_clone.notified() => {
                    let _ = child.start_kill();
                    child.wait().await.ok()
                }
            };
            // Let the readers flush final chunks before the exit becomes
            // observable, so a finished record never misses trailing output.
            // The timeout covers grandchildren holding the pipes open.
            let flush = async {
                if let Some(task) = stdout_task {
                    let _ = task.await;
                }
                if let Some(task) = stderr_task {
                    let _ = task.await;
                }
            };
            let _ = tokio::time::timeout(Duration::from_secs(2), flush).await;
            exit_clone.record(status);
        })];

        let session = Arc::new(RunningSession {
            id,
            pid: launched.pid,
            command: spec.command,
            cwd: spec.cwd,
            scope_key: spec.scope_key,
            backgrounded: spec.backgrounded,
            started_at: Instant::now(),
            started_at_wall: SystemTime::now(),
            output,
            stdin: Mutex::new(launched.stdin),
            exit,
            kill_signal,
            tasks,
        });

        self.running.lock().await.insert(id, Arc::clone(&session));
        debug!(session_id = id.0, pid = session.pid, "registered exec session");
        Ok(session)
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<RunningSession>> {
        self.running.lock().await.get(&id).cloned()
    }

    pub async fn get_finished(&self, id: SessionId) -> Option<Arc<FinishedSession>> {
        self.finished.lock().await.get(&id).cloned()
    }

    /// Snapshot of the running set, unsorted; callers order by recency.
    pub async fn list_running(&self) -> Vec<Arc<RunningSession>> {
        self.running.lock().await.values().cloned().collect()
    }

    pub async fn list_finished(&self) -> Vec<Arc<FinishedSession>> {
        self.finished.lock().await.values().cloned().collect()
    }

    /// Idempotent terminal transition: converts a running session into a
    /// finished record and removes it from the running set. Calling it again
    /// for the same session returns the existing record unchanged.
    pub async fn mark_exited(
        &self,
        session: &Arc<RunningSession>,
        exit_code: Option<i32>,
        exit_signal: Option<String>,
        status: SessionStatus,
    ) -> Arc<FinishedSession> {
        {
            let finished = self.finished.lock().await;
            if let Some(existing) = finished.get(&session.id) {
                return Arc::clone(existing);
            }
        }

        self.running.lock().await.remove(&session.id);
        let snapshot = session.output_snapshot().await;
        let record = Arc::new(FinishedSession {
            id: session.id,
            pid: session.pid,
            command: session.command.clone(),
            cwd: session.cwd.clone(),
            scope_key: session.scope_key.clone(),
            backgrounded: session.backgrounded,
            started_at: session.started_at,
            started_at_wall: session.started_at_wall,
            ended_at: Instant::now(),
            ended_at_wall: SystemTime::now(),
            status,
            exit_code,
            exit_signal,
            tail: snapshot.tail,
            aggregated: snapshot.aggregated,
            truncated: snapshot.truncated,
        });

        let mut finished = self.finished.lock().await;
        Arc::clone(finished.entry(session.id).or_insert(record))
    }

    /// Removes a finished session. Returns false if the id is unknown or
    /// still refers to a running session.
    pub async fn delete(&self, id: SessionId) -> bool {
        self.finished.lock().await.remove(&id).is_some()
    }

    /// Reclamation sweep: drops every finished session whose TTL elapsed.
    /// Invoked at the top of each tool action and callable on a timer.
    pub async fn prune_finished(&self) {
        let ttl = Duration::from_millis(self.ttl_ms.load(Ordering::SeqCst));
        let mut finished = self.finished.lock().await;
        let before = finished.len();
        finished.retain(|_, record| record.ended_at.elapsed() <= ttl);
        let removed = before - finished.len();
        if removed > 0 {
            debug!(removed, "pruned finished sessions past ttl");
        }
    }
}

fn spawn_reader<R>(
    stream: OutputStream,
    mut reader: R,
    output: Arc<Mutex<OutputState>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    let mut guard = output.lock().await;
                    guard.push_chunk(stream, &text);
                }
            }
        }
    })
}
