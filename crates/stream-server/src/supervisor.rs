use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::StreamCommand;
use crate::error::{StreamError, StreamResult};
use crate::launcher::{ProcessLauncher, SpawnedProcess, SystemLauncher};
use crate::log_sink::LogSink;
use crate::relay::LineRelay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(Uuid);

impl JobHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobHandle {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| StreamError::not_found(format!("stream {s}")))
    }
}

/// What to stream and where. The stream key is kept out of `Debug` output.
#[derive(Clone, Deserialize)]
pub struct StreamRequest {
    pub source: String,
    pub stream_key: String,
    #[serde(default)]
    pub vertical: bool,
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequest")
            .field("source", &self.source)
            .field("stream_key", &"<redacted>")
            .field("vertical", &self.vertical)
            .finish()
    }
}

impl StreamRequest {
    pub fn new(source: impl Into<String>, stream_key: impl Into<String>, vertical: bool) -> Self {
        Self {
            source: source.into(),
            stream_key: stream_key.into(),
            vertical,
        }
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.source.trim().is_empty() {
            return Err(StreamError::invalid_input("source path is empty"));
        }
        if self.stream_key.trim().is_empty() {
            return Err(StreamError::invalid_input("stream key is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    state: JobState,
    exit_code: Option<i32>,
    pid: Option<u32>,
}

/// Serializable view of a job. Never carries the stream key.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobHandle,
    pub source: String,
    pub vertical: bool,
    pub state: JobState,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub logs: Vec<String>,
}

/// One supervised transcoder run.
///
/// `Idle -> Running -> {Completed | Failed | Cancelled}`; a job whose
/// process cannot be launched goes straight from `Idle` to `Failed`.
pub struct StreamJob {
    id: JobHandle,
    request: StreamRequest,
    sink: LogSink,
    progress: watch::Sender<Progress>,
    cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl fmt::Debug for StreamJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamJob")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamJob {
    pub fn new(request: StreamRequest) -> StreamResult<Self> {
        request.validate()?;

        let (progress, _) = watch::channel(Progress::default());
        Ok(Self {
            id: JobHandle::new(),
            request,
            sink: LogSink::new(),
            progress,
            cancel_tx: Mutex::new(None),
        })
    }

    pub fn id(&self) -> JobHandle {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.progress.borrow().state
    }

    pub fn logs(&self) -> Vec<String> {
        self.sink.snapshot()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let progress = *self.progress.borrow();
        JobSnapshot {
            id: self.id,
            source: self.request.source.clone(),
            vertical: self.request.vertical,
            state: progress.state,
            exit_code: progress.exit_code,
            pid: progress.pid,
            logs: self.sink.snapshot(),
        }
    }

    /// Launches the transcoder and hands its output to a relay worker.
    ///
    /// Returns as soon as the process is spawned. Must be called from within
    /// a Tokio runtime.
    pub fn start(&self, program: &Path, launcher: &dyn ProcessLauncher) -> StreamResult<()> {
        if self.state() != JobState::Idle {
            return Err(StreamError::Conflict(format!(
                "stream {} was already started",
                self.id
            )));
        }

        let command = StreamCommand::new(
            program,
            self.request.source.as_str(),
            self.request.stream_key.as_str(),
            self.request.vertical,
        );
        let redacted = command.redacted();
        info!("[Stream {}] Running: {}", self.id, redacted);
        self.sink.push(format!("CMD: {redacted}"));

        let args = command.build_args();
        let SpawnedProcess { child, output } = match launcher.launch(program, &args) {
            Ok(spawned) => spawned,
            Err(source) => {
                let err = StreamError::Spawn {
                    program: program.to_path_buf(),
                    source,
                };
                error!("[Stream {}] {}", self.id, err);
                self.sink.push(format!("ERROR: {err}"));
                self.sink.seal();
                self.progress.send_modify(|p| p.state = JobState::Failed);
                return Err(err);
            }
        };

        let pid = child.id();
        info!("[Stream {}] Transcoder started (pid {:?})", self.id, pid);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.cancel_tx.lock() = Some(cancel_tx);
        self.progress.send_modify(|p| {
            p.state = JobState::Running;
            p.pid = pid;
        });

        let (relay_tx, relay_rx) = oneshot::channel();
        let sink = self.sink.clone();
        let id = self.id;
        thread::spawn(move || {
            let mut read_failed = false;
            for line in LineRelay::new(output) {
                match line {
                    Ok(line) => {
                        sink.push(line);
                    }
                    Err(err) => {
                        warn!("[Stream {id}] Output read failed: {err}");
                        sink.push(format!("ERROR: {}", StreamError::StreamRead(err)));
                        read_failed = true;
                    }
                }
            }
            let _ = relay_tx.send(read_failed);
        });

        tokio::spawn(supervise(
            self.id,
            child,
            relay_rx,
            cancel_rx,
            self.sink.clone(),
            self.progress.clone(),
        ));

        Ok(())
    }

    /// Kills this job's transcoder and waits until it is reaped.
    ///
    /// A no-op for jobs that are not running. Once this returns no further
    /// output lines are recorded for the job.
    pub async fn cancel(&self) {
        if self.state() != JobState::Running {
            return;
        }

        self.sink.seal();
        let cancel_tx = self.cancel_tx.lock().take();
        if let Some(tx) = cancel_tx {
            info!("[Stream {}] Cancellation requested", self.id);
            let _ = tx.send(());
        }

        self.wait().await;
    }

    /// Waits for a terminal state. Returns at once for jobs never started.
    pub async fn wait(&self) -> JobState {
        let mut rx = self.progress.subscribe();
        let result = rx
            .wait_for(|p| p.state == JobState::Idle || p.state.is_terminal())
            .await
            .map(|p| p.state);

        result.unwrap_or_else(|_| self.state())
    }
}

// `progress` is a sender clone, so the channel stays open for the job's lifetime.
async fn supervise(
    id: JobHandle,
    mut child: Child,
    relay_rx: oneshot::Receiver<bool>,
    cancel_rx: oneshot::Receiver<()>,
    sink: LogSink,
    progress: watch::Sender<Progress>,
) {
    // Resolves only on an explicit cancel; a dropped sender never fires.
    let cancelled = async move {
        if cancel_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(cancelled);

    let relay = tokio::select! {
        biased;

        () = &mut cancelled => {
            return kill_cancelled(id, &mut child, &sink, &progress).await;
        }
        relay = relay_rx => relay,
    };
    if relay.is_err() {
        sink.push("ERROR: output relay stopped unexpectedly");
    }

    // The child may close its output and keep running.
    let status = tokio::select! {
        biased;

        () = &mut cancelled => {
            return kill_cancelled(id, &mut child, &sink, &progress).await;
        }
        status = child.wait() => status,
    };

    let (state, exit_code) = match status {
        Ok(status) if status.success() => (JobState::Completed, status.code()),
        Ok(status) => (JobState::Failed, status.code()),
        Err(err) => {
            sink.push(format!("ERROR: could not determine exit status: {err}"));
            (JobState::Failed, None)
        }
    };

    match state {
        JobState::Completed => info!("[Stream {id}] Transcoder exited normally"),
        _ => warn!("[Stream {id}] Transcoder failed (exit code {exit_code:?})"),
    }
    progress.send_modify(|p| {
        p.state = state;
        p.exit_code = exit_code;
    });
}

async fn kill_cancelled(
    id: JobHandle,
    child: &mut Child,
    sink: &LogSink,
    progress: &watch::Sender<Progress>,
) {
    if let Err(err) = child.kill().await {
        warn!("[Stream {id}] Failed to kill transcoder: {err}");
    }
    sink.seal();
    let exit_code = child.try_wait().ok().flatten().and_then(|s| s.code());
    progress.send_modify(|p| {
        p.state = JobState::Cancelled;
        p.exit_code = exit_code;
    });
    info!("[Stream {id}] Cancelled");
}

/// Finished jobs kept for status and log queries. Older ones are dropped
/// when a new job starts; running jobs are never dropped.
pub const FINISHED_JOB_RETENTION: usize = 16;

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobHandle, Arc<StreamJob>>,
    // Start order, oldest first.
    order: Vec<JobHandle>,
}

impl Registry {
    fn insert(&mut self, job: Arc<StreamJob>) {
        self.order.push(job.id());
        self.jobs.insert(job.id(), job);
    }

    fn prune_finished(&mut self, keep: usize) {
        let finished: Vec<JobHandle> = self
            .order
            .iter()
            .filter(|id| {
                self.jobs
                    .get(*id)
                    .is_some_and(|job| job.state().is_terminal())
            })
            .copied()
            .collect();
        let excess = finished.len().saturating_sub(keep);
        if excess == 0 {
            return;
        }

        for id in &finished[..excess] {
            self.jobs.remove(id);
        }
        let jobs = &self.jobs;
        self.order.retain(|id| jobs.contains_key(id));
        debug!("Dropped {excess} finished stream(s) from the registry");
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<StreamJob>> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }
}

/// Registry of stream jobs sharing one transcoder binary and launcher.
#[derive(Clone)]
pub struct Supervisor {
    program: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
    registry: Arc<RwLock<Registry>>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("program", &self.program)
            .field("jobs", &self.registry.read().jobs.len())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self::with_launcher(program, Arc::new(SystemLauncher))
    }

    pub fn with_launcher(program: impl Into<PathBuf>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            program: program.into(),
            launcher,
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Creates and starts a fresh job.
    ///
    /// Invalid input is rejected before anything is spawned. A launch
    /// failure still yields a handle; the job is `Failed` and its log holds
    /// the cause.
    pub fn start(&self, request: StreamRequest) -> StreamResult<JobHandle> {
        let job = Arc::new(StreamJob::new(request)?);
        let id = job.id();
        {
            let mut registry = self.registry.write();
            registry.prune_finished(FINISHED_JOB_RETENTION);
            registry.insert(Arc::clone(&job));
        }

        match job.start(&self.program, self.launcher.as_ref()) {
            Ok(()) | Err(StreamError::Spawn { .. }) => Ok(id),
            Err(err) => Err(err),
        }
    }

    pub async fn cancel(&self, handle: &JobHandle) {
        let job = self.job(handle);
        if let Some(job) = job {
            job.cancel().await;
        }
    }

    pub fn poll_logs(&self, handle: &JobHandle) -> Option<Vec<String>> {
        self.job(handle).map(|job| job.logs())
    }

    pub fn status(&self, handle: &JobHandle) -> Option<JobState> {
        self.job(handle).map(|job| job.state())
    }

    pub fn snapshot(&self, handle: &JobHandle) -> Option<JobSnapshot> {
        self.job(handle).map(|job| job.snapshot())
    }

    /// Snapshots of all retained jobs, in start order.
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.registry
            .read()
            .ordered()
            .map(|job| job.snapshot())
            .collect()
    }

    pub fn running(&self) -> Vec<JobHandle> {
        self.registry
            .read()
            .ordered()
            .filter(|job| job.state() == JobState::Running)
            .map(|job| job.id())
            .collect()
    }

    pub fn job(&self, handle: &JobHandle) -> Option<Arc<StreamJob>> {
        self.registry.read().jobs.get(handle).cloned()
    }

    /// Cancels every running job.
    pub async fn shutdown(&self) {
        let jobs: Vec<Arc<StreamJob>> = self.registry.read().ordered().cloned().collect();
        for job in jobs {
            job.cancel().await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::process::Command;

    use super::*;
    use crate::launcher::spawn_merged;
    use crate::log_sink::LOG_CAPACITY;

    /// Runs a shell script instead of the transcoder and records what it was
    /// asked to launch.
    struct ScriptLauncher {
        script: String,
        calls: AtomicUsize,
        last_args: Mutex<Vec<String>>,
    }

    impl ScriptLauncher {
        fn new(script: &str) -> Arc<Self> {
            Arc::new(Self {
                script: script.to_string(),
                calls: AtomicUsize::new(0),
                last_args: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProcessLauncher for ScriptLauncher {
        fn launch(&self, _program: &Path, args: &[String]) -> std::io::Result<SpawnedProcess> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_args.lock() = args.to_vec();
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.script);
            spawn_merged(cmd)
        }
    }

    async fn finish(supervisor: &Supervisor, handle: &JobHandle) -> JobState {
        let job = supervisor.job(handle).expect("job registered");
        tokio::time::timeout(Duration::from_secs(10), job.wait())
            .await
            .expect("job did not finish in time")
    }

    async fn wait_for_line(supervisor: &Supervisor, handle: &JobHandle, needle: &str) {
        for _ in 0..200 {
            let logs = supervisor.poll_logs(handle).unwrap_or_default();
            if logs.iter().any(|l| l == needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("line {needle:?} never appeared");
    }

    fn is_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_empty_source_is_rejected_before_spawn() {
        let launcher = ScriptLauncher::new("exit 0");
        let supervisor = Supervisor::with_launcher("ffmpeg", launcher.clone());

        let err = supervisor
            .start(StreamRequest::new("", "abcd1234", false))
            .expect_err("empty source must fail");

        assert!(matches!(err, StreamError::InvalidInput(_)));
        assert_eq!(launcher.calls(), 0);
        assert!(supervisor.list().is_empty());
    }

    #[tokio::test]
    async fn test_blank_stream_key_is_rejected_before_spawn() {
        let launcher = ScriptLauncher::new("exit 0");
        let supervisor = Supervisor::with_launcher("ffmpeg", launcher.clone());

        let err = supervisor
            .start(StreamRequest::new("clip.mp4", "   ", false))
            .expect_err("blank key must fail");

        assert!(matches!(err, StreamError::InvalidInput(_)));
        assert_eq!(launcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_launcher_receives_stream_arguments() {
        let launcher = ScriptLauncher::new("exit 0");
        let supervisor = Supervisor::with_launcher("ffmpeg", launcher.clone());

        let handle = supervisor
            .start(StreamRequest::new("clip.mp4", "abcd1234", true))
            .expect("start");
        finish(&supervisor, &handle).await;

        let expected = StreamCommand::new("ffmpeg", "clip.mp4", "abcd1234", true).build_args();
        assert_eq!(launcher.calls(), 1);
        assert_eq!(*launcher.last_args.lock(), expected);
    }

    #[tokio::test]
    async fn test_first_log_line_is_redacted_command() {
        let launcher = ScriptLauncher::new("exit 0");
        let supervisor = Supervisor::with_launcher("ffmpeg", launcher);

        let handle = supervisor
            .start(StreamRequest::new("clip.mp4", "abcd1234", false))
            .expect("start");
        finish(&supervisor, &handle).await;

        let logs = supervisor.poll_logs(&handle).expect("logs");
        assert!(logs[0].starts_with("CMD: ffmpeg -re -stream_loop -1 -i clip.mp4"));
        assert!(logs.iter().all(|l| !l.contains("abcd1234")));
    }

    #[tokio::test]
    async fn test_clean_exit_completes_with_ordered_output() {
        let launcher = ScriptLauncher::new("echo one; echo two 1>&2; echo three");
        let supervisor = Supervisor::with_launcher("ffmpeg", launcher);

        let handle = supervisor
            .start(StreamRequest::new("clip.mp4", "key", false))
            .expect("start");

        assert_eq!(finish(&supervisor, &handle).await, JobState::Completed);
        let logs = supervisor.poll_logs(&handle).expect("logs");
        assert_eq!(logs[1..].to_vec(), vec!["one", "two", "three"]);
        let snapshot = supervisor.snapshot(&handle).expect("snapshot");
        assert_eq!(snapshot.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let launcher = ScriptLauncher::new("echo 'Connection refused' 1>&2; exit 3");
        let supervisor = Supervisor::with_launcher("ffmpeg", launcher);

        let handle = supervisor
            .start(StreamRequest::new("clip.mp4", "key", false))
            .expect("start");

        assert_eq!(finish(&supervisor, &handle).await, JobState::Failed);
        let snapshot = supervisor.snapshot(&handle).expect("snapshot");
        assert_eq!(snapshot.exit_code, Some(3));
        assert_eq!(
            snapshot.logs.last().map(String::as_str),
            Some("Connection refused")
        );
    }

    #[tokio::test]
    async fn test_log_keeps_only_most_recent_lines() {
        let launcher =
            ScriptLauncher::new("i=0; while [ $i -lt 50 ]; do echo line $i; i=$((i+1)); done");
        let supervisor = Supervisor::with_launcher("ffmpeg", launcher);

        let handle = supervisor
            .start(StreamRequest::new("clip.mp4", "key", false))
            .expect("start");
        finish(&supervisor, &handle).await;

        let logs = supervisor.poll_logs(&handle).expect("logs");
        let expected: Vec<String> = (30..50).map(|i| format!("line {i}")).collect();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert_eq!(logs, expected);
    }

    #[tokio::test]
    async fn test_cancel_kills_only_its_own_process() {
        let looping = "while true; do echo tick; sleep 0.05; done";
        let supervisor = Supervisor::with_launcher("ffmpeg", ScriptLauncher::new(looping));

        let first = supervisor
            .start(StreamRequest::new("a.mp4", "key-a", false))
            .expect("start first");
        let second = supervisor
            .start(StreamRequest::new("b.mp4", "key-b", false))
            .expect("start second");
        wait_for_line(&supervisor, &first, "tick").await;
        wait_for_line(&supervisor, &second, "tick").await;

        let pid = supervisor
            .snapshot(&first)
            .and_then(|s| s.pid)
            .expect("pid recorded");
        supervisor.cancel(&first).await;

        assert_eq!(supervisor.status(&first), Some(JobState::Cancelled));
        assert!(!is_alive(pid));
        assert_eq!(supervisor.status(&second), Some(JobState::Running));

        let frozen = supervisor.poll_logs(&first).expect("logs");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(supervisor.poll_logs(&first).expect("logs"), frozen);

        supervisor.shutdown().await;
        assert_eq!(supervisor.status(&second), Some(JobState::Cancelled));
        assert!(supervisor.running().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_child_closes_its_output() {
        let script = "echo started; exec >&- 2>&-; exec sleep 30";
        let supervisor = Supervisor::with_launcher("ffmpeg", ScriptLauncher::new(script));

        let handle = supervisor
            .start(StreamRequest::new("clip.mp4", "key", false))
            .expect("start");
        wait_for_line(&supervisor, &handle, "started").await;
        // Let the relay reach end of stream while the process lives on.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(supervisor.status(&handle), Some(JobState::Running));

        let pid = supervisor
            .snapshot(&handle)
            .and_then(|s| s.pid)
            .expect("pid recorded");
        tokio::time::timeout(Duration::from_secs(5), supervisor.cancel(&handle))
            .await
            .expect("cancel returned");

        assert_eq!(supervisor.status(&handle), Some(JobState::Cancelled));
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_finished_jobs_are_pruned_on_start() {
        let supervisor = Supervisor::with_launcher("ffmpeg", ScriptLauncher::new("exit 0"));

        let mut handles = Vec::new();
        for i in 0..FINISHED_JOB_RETENTION + 3 {
            let handle = supervisor
                .start(StreamRequest::new(format!("clip{i}.mp4"), "key", false))
                .expect("start");
            finish(&supervisor, &handle).await;
            handles.push(handle);
        }

        let retained = supervisor.list();
        assert_eq!(retained.len(), FINISHED_JOB_RETENTION + 1);
        assert_eq!(supervisor.status(&handles[0]), None);
        assert_eq!(supervisor.status(&handles[1]), None);
        let ids: Vec<JobHandle> = retained.iter().map(|s| s.id).collect();
        assert_eq!(ids, handles[2..].to_vec());
    }

    #[tokio::test]
    async fn test_running_jobs_survive_pruning() {
        let looping = "while true; do echo tick; sleep 0.05; done";
        let supervisor = Supervisor::with_launcher("ffmpeg", ScriptLauncher::new(looping));
        let live = supervisor
            .start(StreamRequest::new("live.mp4", "key", false))
            .expect("start");

        let quick = Supervisor {
            launcher: ScriptLauncher::new("exit 0"),
            ..supervisor.clone()
        };
        for i in 0..FINISHED_JOB_RETENTION + 2 {
            let handle = quick
                .start(StreamRequest::new(format!("clip{i}.mp4"), "key", false))
                .expect("start");
            finish(&quick, &handle).await;
        }

        assert_eq!(supervisor.status(&live), Some(JobState::Running));
        supervisor.shutdown().await;
        assert_eq!(supervisor.status(&live), Some(JobState::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_is_a_no_op_outside_running() {
        let supervisor = Supervisor::with_launcher("ffmpeg", ScriptLauncher::new("exit 1"));

        let idle = StreamJob::new(StreamRequest::new("clip.mp4", "key", false)).expect("job");
        idle.cancel().await;
        assert_eq!(idle.state(), JobState::Idle);

        let handle = supervisor
            .start(StreamRequest::new("clip.mp4", "key", false))
            .expect("start");
        assert_eq!(finish(&supervisor, &handle).await, JobState::Failed);
        supervisor.cancel(&handle).await;
        supervisor.cancel(&handle).await;
        assert_eq!(supervisor.status(&handle), Some(JobState::Failed));

        supervisor.cancel(&JobHandle::new()).await;
    }

    #[tokio::test]
    async fn test_repeated_cancel_stays_cancelled() {
        let supervisor = Supervisor::with_launcher(
            "ffmpeg",
            ScriptLauncher::new("while true; do echo tick; sleep 0.05; done"),
        );
        let handle = supervisor
            .start(StreamRequest::new("clip.mp4", "key", false))
            .expect("start");
        wait_for_line(&supervisor, &handle, "tick").await;

        supervisor.cancel(&handle).await;
        supervisor.cancel(&handle).await;
        assert_eq!(supervisor.status(&handle), Some(JobState::Cancelled));
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_job_failed() {
        let supervisor = Supervisor::new("/definitely/not/here/ffmpeg");

        let handle = supervisor
            .start(StreamRequest::new("clip.mp4", "abcd1234", false))
            .expect("launch failures still yield a handle");

        assert_eq!(supervisor.status(&handle), Some(JobState::Failed));
        let logs = supervisor.poll_logs(&handle).expect("logs");
        assert_eq!(logs.len(), 2);
        assert!(logs[1].starts_with("ERROR: failed to launch /definitely/not/here/ffmpeg"));
    }

    #[tokio::test]
    async fn test_job_cannot_start_twice() {
        let launcher = ScriptLauncher::new("exit 0");
        let job = StreamJob::new(StreamRequest::new("clip.mp4", "key", false)).expect("job");

        job.start(Path::new("ffmpeg"), launcher.as_ref()).expect("first start");
        let err = job
            .start(Path::new("ffmpeg"), launcher.as_ref())
            .expect_err("second start");

        assert!(matches!(err, StreamError::Conflict(_)));
        assert_eq!(launcher.calls(), 1);
        job.wait().await;
    }

    #[test]
    fn test_request_debug_hides_stream_key() {
        let request = StreamRequest::new("clip.mp4", "abcd1234", false);
        assert!(!format!("{request:?}").contains("abcd1234"));
    }

    #[test]
    fn test_handle_parse_rejects_garbage() {
        assert!(matches!(
            "not-a-uuid".parse::<JobHandle>(),
            Err(StreamError::NotFound(_))
        ));
    }
}
