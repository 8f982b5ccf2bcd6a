use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use retouch_contracts::credentials::CredentialGate;
use retouch_contracts::errors::SessionError;
use retouch_contracts::events::EventWriter;
use retouch_contracts::history::ImageState;
use serde_json::json;

use crate::client::{source_base64, GenerationClient, JobHandle, VideoArtifact, VIDEO_MEDIA_TYPE};
use crate::config::EngineConfig;
use crate::map_object;
use crate::ticker::{ProgressTicker, TickerLease};

const CANCEL_SLICE: Duration = Duration::from_millis(100);
const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Submitting,
    Polling { attempt: u32 },
    Ready(VideoArtifact),
    Failed(SessionError),
}

impl AnimationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Polling { .. } => "polling",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Polling,
    Done,
    Failed,
}

/// Bookkeeping for the one animation the session currently cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub epoch: u64,
    pub requested_at: DateTime<Utc>,
    pub status: JobStatus,
    pub poll_attempt: u32,
    pub handle: Option<JobHandle>,
    pub result_ref: Option<String>,
}

#[derive(Debug)]
enum WorkerUpdate {
    Submitted {
        epoch: u64,
        handle: JobHandle,
    },
    Polled {
        epoch: u64,
        attempt: u32,
    },
    Finished {
        epoch: u64,
        outcome: Result<VideoArtifact, SessionError>,
    },
}

struct ActiveWorker {
    epoch: u64,
    cancel: Arc<AtomicBool>,
    lease: TickerLease,
    handle: Option<thread::JoinHandle<()>>,
}

struct JobRunner {
    epoch: u64,
    client: Arc<dyn GenerationClient>,
    sender: mpsc::Sender<WorkerUpdate>,
    cancel: Arc<AtomicBool>,
    lease: TickerLease,
    payload: String,
    media_type: String,
    instruction: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
    max_wait: Duration,
}

impl JobRunner {
    fn run(self) {
        let outcome = {
            let _release = self.lease.release_on_drop();
            self.run_job()
        };
        let _ = self.sender.send(WorkerUpdate::Finished {
            epoch: self.epoch,
            outcome,
        });
    }

    fn run_job(&self) -> Result<VideoArtifact, SessionError> {
        self.ensure_live()?;
        let handle = self
            .client
            .animate_submit(&self.payload, &self.media_type, &self.instruction)?;
        let _ = self.sender.send(WorkerUpdate::Submitted {
            epoch: self.epoch,
            handle: handle.clone(),
        });

        let started = Instant::now();
        let mut attempts = 0u32;
        let artifact_uri = loop {
            if attempts >= self.max_poll_attempts || started.elapsed() >= self.max_wait {
                return Err(SessionError::Timeout {
                    attempts,
                    elapsed_s: started.elapsed().as_secs(),
                });
            }
            self.sleep_cancellable(self.poll_interval)?;
            attempts += 1;
            let status = self.client.animate_poll(&handle)?;
            let _ = self.sender.send(WorkerUpdate::Polled {
                epoch: self.epoch,
                attempt: attempts,
            });
            if status.done {
                break status.artifact_uri;
            }
        };

        let uri = artifact_uri.ok_or_else(|| SessionError::Remote {
            message: "Video generation failed or returned no data.".to_string(),
            status: None,
        })?;
        self.ensure_live()?;
        let bytes = self.client.fetch_artifact(&uri)?;
        Ok(VideoArtifact {
            uri,
            media_type: VIDEO_MEDIA_TYPE.to_string(),
            bytes,
        })
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(SessionError::Abandoned);
        }
        Ok(())
    }

    fn sleep_cancellable(&self, total: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + total;
        loop {
            self.ensure_live()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(CANCEL_SLICE));
        }
    }
}

/// Long-running animate protocol: submit, poll until done, fetch. The
/// network work runs on a worker thread; every state change is applied on
/// the owning thread through `pump`/`wait`, and results from an abandoned
/// epoch are dropped.
pub struct AnimationSession {
    client: Arc<dyn GenerationClient>,
    ticker: Arc<dyn ProgressTicker>,
    config: EngineConfig,
    events: EventWriter,
    state: AnimationState,
    job: Option<GenerationJob>,
    epoch: u64,
    sender: mpsc::Sender<WorkerUpdate>,
    receiver: mpsc::Receiver<WorkerUpdate>,
    active: Option<ActiveWorker>,
    stale_results: u64,
}

impl AnimationSession {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        ticker: Arc<dyn ProgressTicker>,
        config: EngineConfig,
        events: EventWriter,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            client,
            ticker,
            config,
            events,
            state: AnimationState::Idle,
            job: None,
            epoch: 0,
            sender,
            receiver,
            active: None,
            stale_results: 0,
        }
    }

    pub fn state(&self) -> &AnimationState {
        &self.state
    }

    pub fn job(&self) -> Option<&GenerationJob> {
        self.job.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn stale_results(&self) -> u64 {
        self.stale_results
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            AnimationState::Submitting | AnimationState::Polling { .. }
        )
    }

    pub fn artifact(&self) -> Option<&VideoArtifact> {
        match &self.state {
            AnimationState::Ready(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn progress_message(&self) -> Option<String> {
        if self.is_active() {
            self.ticker.current()
        } else {
            None
        }
    }

    /// Starts a job for `image` and returns its epoch. The ticker starts
    /// here and is stopped exactly once when the job ends or is abandoned.
    pub fn generate_animation(
        &mut self,
        image: &ImageState,
        instruction: &str,
        gate: &CredentialGate,
    ) -> Result<u64, SessionError> {
        if self.is_active() {
            return Err(SessionError::AlreadyBusy("animation"));
        }
        if !gate.is_open() {
            return Err(SessionError::GateClosed);
        }
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(SessionError::InvalidInput(
                "animation prompt is empty".to_string(),
            ));
        }
        source_base64(&image.payload)?;

        self.reap_worker();
        self.epoch += 1;
        let epoch = self.epoch;
        self.job = Some(GenerationJob {
            epoch,
            requested_at: Utc::now(),
            status: JobStatus::Pending,
            poll_attempt: 0,
            handle: None,
            result_ref: None,
        });
        self.state = AnimationState::Submitting;

        let lease = TickerLease::acquire(
            Arc::clone(&self.ticker),
            self.config.tips.clone(),
            self.config.tip_interval,
        );
        let cancel = Arc::new(AtomicBool::new(false));
        let runner = JobRunner {
            epoch,
            client: Arc::clone(&self.client),
            sender: self.sender.clone(),
            cancel: Arc::clone(&cancel),
            lease: lease.clone(),
            payload: image.payload.clone(),
            media_type: image.media_type.clone(),
            instruction: instruction.to_string(),
            poll_interval: self.config.poll_interval,
            max_poll_attempts: self.config.max_poll_attempts,
            max_wait: self.config.max_animation_wait,
        };
        let handle = match thread::Builder::new()
            .name(format!("retouch-animation-{epoch}"))
            .spawn(move || runner.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                lease.release();
                let failure = SessionError::Remote {
                    message: format!("Animation worker spawn failed: {err}"),
                    status: None,
                };
                self.fail_job(failure.clone());
                return Err(failure);
            }
        };
        self.active = Some(ActiveWorker {
            epoch,
            cancel,
            lease,
            handle: Some(handle),
        });
        self.events.record(
            "animation_started",
            map_object(json!({
                "epoch": epoch,
                "instruction": instruction,
                "client": self.client.name(),
                "poll_interval_s": self.config.poll_interval.as_secs_f64(),
                "max_poll_attempts": self.config.max_poll_attempts,
            })),
        );
        Ok(epoch)
    }

    /// Applies every queued worker update without blocking. Returns the
    /// terminal outcome if the current job finished during this call.
    pub fn pump(&mut self, gate: &mut CredentialGate) -> Option<Result<(), SessionError>> {
        let mut finished = None;
        while let Ok(update) = self.receiver.try_recv() {
            if let Some(outcome) = self.apply(update, gate) {
                finished = Some(outcome);
            }
        }
        finished.or_else(|| self.reap_dead_worker(gate))
    }

    /// Blocks until the current job reaches a terminal state or `timeout`
    /// elapses.
    pub fn wait(&mut self, gate: &mut CredentialGate, timeout: Option<Duration>) -> &AnimationState {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        self.pump(gate);
        while self.is_active() {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    (deadline - now).min(WAIT_SLICE)
                }
                None => WAIT_SLICE,
            };
            match self.receiver.recv_timeout(slice) {
                Ok(update) => {
                    self.apply(update, gate);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    self.reap_dead_worker(gate);
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        &self.state
    }

    /// Stops the ticker and drops the link to any in-flight job. Calls that
    /// are already on the wire are not aborted; their results arrive under
    /// an old epoch and are discarded.
    pub fn abandon(&mut self) {
        let was_active = self.is_active();
        if let Some(mut worker) = self.active.take() {
            worker.cancel.store(true, Ordering::SeqCst);
            worker.lease.release();
            // Detach: the worker exits at its next cancellation check.
            worker.handle.take();
        }
        self.epoch += 1;
        self.job = None;
        self.state = AnimationState::Idle;
        if was_active {
            self.events.record(
                "animation_abandoned",
                map_object(json!({ "epoch": self.epoch - 1 })),
            );
        }
    }

    /// Drops a finished artifact or failure. No effect while a job runs.
    pub fn discard_artifact(&mut self) {
        if matches!(
            self.state,
            AnimationState::Ready(_) | AnimationState::Failed(_)
        ) {
            self.state = AnimationState::Idle;
            self.job = None;
        }
    }

    fn apply(
        &mut self,
        update: WorkerUpdate,
        gate: &mut CredentialGate,
    ) -> Option<Result<(), SessionError>> {
        let update_epoch = match &update {
            WorkerUpdate::Submitted { epoch, .. }
            | WorkerUpdate::Polled { epoch, .. }
            | WorkerUpdate::Finished { epoch, .. } => *epoch,
        };
        let current = self
            .active
            .as_ref()
            .map(|worker| worker.epoch == update_epoch)
            .unwrap_or(false);
        if !current {
            if let WorkerUpdate::Finished { outcome, .. } = &update {
                self.stale_results += 1;
                let outcome_code = match outcome {
                    Ok(_) => "ready",
                    Err(err) => err.code(),
                };
                self.events.record(
                    "animation_discarded",
                    map_object(json!({
                        "epoch": update_epoch,
                        "current_epoch": self.epoch,
                        "outcome": outcome_code,
                    })),
                );
            }
            return None;
        }

        match update {
            WorkerUpdate::Submitted { handle, .. } => {
                self.events.record(
                    "animation_submitted",
                    map_object(json!({ "epoch": update_epoch, "job": handle.as_str() })),
                );
                if let Some(job) = self.job.as_mut() {
                    job.status = JobStatus::Polling;
                    job.handle = Some(handle);
                }
                self.state = AnimationState::Polling { attempt: 0 };
                None
            }
            WorkerUpdate::Polled { attempt, .. } => {
                if let Some(job) = self.job.as_mut() {
                    job.poll_attempt = attempt;
                }
                self.state = AnimationState::Polling { attempt };
                self.events.record(
                    "animation_poll",
                    map_object(json!({ "epoch": update_epoch, "attempt": attempt })),
                );
                None
            }
            WorkerUpdate::Finished { outcome, .. } => {
                self.reap_worker();
                match outcome {
                    Ok(artifact) => {
                        self.events.record(
                            "animation_ready",
                            map_object(json!({
                                "epoch": update_epoch,
                                "uri": artifact.uri,
                                "bytes": artifact.bytes.len(),
                            })),
                        );
                        if let Some(job) = self.job.as_mut() {
                            job.status = JobStatus::Done;
                            job.result_ref = Some(artifact.uri.clone());
                        }
                        self.state = AnimationState::Ready(artifact);
                        Some(Ok(()))
                    }
                    Err(err) => {
                        if err.is_credential() {
                            gate.invalidate();
                            self.events.record(
                                "credential_invalidated",
                                map_object(json!({ "source": "animation" })),
                            );
                        }
                        self.fail_job(err.clone());
                        Some(Err(err))
                    }
                }
            }
        }
    }

    fn fail_job(&mut self, err: SessionError) {
        self.events.record(
            "animation_failed",
            map_object(json!({
                "epoch": self.epoch,
                "code": err.code(),
                "error": err.to_string(),
            })),
        );
        if let Some(job) = self.job.as_mut() {
            job.status = JobStatus::Failed;
        }
        self.state = AnimationState::Failed(err);
    }

    /// Fails the current job when its thread has exited without reporting
    /// a result, as after a panic inside the client.
    fn reap_dead_worker(&mut self, gate: &mut CredentialGate) -> Option<Result<(), SessionError>> {
        let exited = self
            .active
            .as_ref()
            .and_then(|worker| worker.handle.as_ref())
            .map(|handle| handle.is_finished())
            .unwrap_or(false);
        if !exited || !self.is_active() {
            return None;
        }
        if let Some(handle) = self.active.as_mut().and_then(|worker| worker.handle.take()) {
            let _ = handle.join();
        }
        // A result sent just before exit is still queued.
        let mut finished = None;
        while let Ok(update) = self.receiver.try_recv() {
            if let Some(outcome) = self.apply(update, gate) {
                finished = Some(outcome);
            }
        }
        if finished.is_some() || !self.is_active() {
            return finished;
        }
        self.reap_worker();
        let failure = SessionError::Remote {
            message: "animation worker exited unexpectedly".to_string(),
            status: None,
        };
        self.fail_job(failure.clone());
        Some(Err(failure))
    }

    fn reap_worker(&mut self) {
        if let Some(mut worker) = self.active.take() {
            worker.lease.release();
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for AnimationSession {
    fn drop(&mut self) {
        if let Some(worker) = self.active.as_ref() {
            worker.cancel.store(true, Ordering::SeqCst);
            worker.lease.release();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::sync::Mutex;

    use retouch_contracts::credentials::CredentialState;
    use retouch_contracts::errors::RemoteFailure;

    use super::*;
    use crate::client::{ClientResult, PollStatus};
    use crate::orchestrator::tests::{open_gate, StaticProbe};
    use crate::ticker::tests::CountingTicker;

    /// Animation client: `pending_polls` not-done answers, then done.
    #[derive(Default)]
    pub(crate) struct ScriptedAnimation {
        pub pending_polls: u32,
        pub polls: AtomicU32,
        pub submits: AtomicUsize,
        pub fetches: AtomicUsize,
        pub submit_failure: Option<RemoteFailure>,
        pub poll_failure: Option<RemoteFailure>,
        pub panic_on_poll: bool,
        pub fetch_failure: Option<RemoteFailure>,
        pub missing_uri: bool,
        pub hold_submit: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl ScriptedAnimation {
        pub(crate) fn finishing_after(pending_polls: u32) -> Self {
            Self {
                pending_polls,
                ..Self::default()
            }
        }
    }

    impl GenerationClient for ScriptedAnimation {
        fn name(&self) -> &str {
            "scripted-animation"
        }

        fn edit(&self, payload: &str, _: &str, _: &str) -> ClientResult<String> {
            Ok(payload.to_string())
        }

        fn animate_submit(&self, _: &str, _: &str, _: &str) -> ClientResult<JobHandle> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            let hold = self.hold_submit.lock().ok().and_then(|mut slot| slot.take());
            if let Some(release) = hold {
                let _ = release.recv();
            }
            match &self.submit_failure {
                Some(failure) => Err(failure.clone()),
                None => Ok(JobHandle("operations/test-1".to_string())),
            }
        }

        fn animate_poll(&self, _: &JobHandle) -> ClientResult<PollStatus> {
            let seen = self.polls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_poll {
                panic!("scripted poll panic");
            }
            if let Some(failure) = &self.poll_failure {
                return Err(failure.clone());
            }
            if seen < self.pending_polls {
                return Ok(PollStatus::pending());
            }
            if self.missing_uri {
                return Ok(PollStatus {
                    done: true,
                    artifact_uri: None,
                });
            }
            Ok(PollStatus::finished("https://files.example/video.mp4"))
        }

        fn fetch_artifact(&self, _: &str) -> ClientResult<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match &self.fetch_failure {
                Some(failure) => Err(failure.clone()),
                None => Ok(b"mp4-bytes".to_vec()),
            }
        }
    }

    pub(crate) fn fast_config() -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::ZERO,
            ..EngineConfig::default()
        }
    }

    fn session(
        client: &Arc<ScriptedAnimation>,
        ticker: &Arc<CountingTicker>,
        config: EngineConfig,
    ) -> AnimationSession {
        AnimationSession::new(
            Arc::clone(client) as Arc<dyn GenerationClient>,
            Arc::clone(ticker) as Arc<dyn ProgressTicker>,
            config,
            EventWriter::disabled("test"),
        )
    }

    fn image() -> ImageState {
        ImageState::from_bytes(b"png", "image/png")
    }

    const WAIT: Option<Duration> = Some(Duration::from_secs(10));

    #[test]
    fn polls_until_done_then_fetches() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation::finishing_after(3));
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());
        let mut gate = open_gate();

        let epoch = session.generate_animation(&image(), "gentle zoom in", &gate)?;
        assert!(session.is_active());
        assert_eq!(ticker.starts(), 1);

        let state = session.wait(&mut gate, WAIT).clone();
        let AnimationState::Ready(artifact) = state else {
            anyhow::bail!("expected ready, got {state:?}");
        };
        assert_eq!(artifact.bytes, b"mp4-bytes".to_vec());
        assert_eq!(artifact.media_type, VIDEO_MEDIA_TYPE);
        assert_eq!(client.polls.load(Ordering::SeqCst), 4);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(ticker.stops(), 1);

        let job = session.job().cloned().ok_or_else(|| anyhow::anyhow!("job missing"))?;
        assert_eq!(job.epoch, epoch);
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.poll_attempt, 4);
        assert_eq!(job.handle, Some(JobHandle("operations/test-1".to_string())));
        assert_eq!(job.result_ref.as_deref(), Some("https://files.example/video.mp4"));
        Ok(())
    }

    #[test]
    fn fetch_failure_fails_and_stops_ticker_once() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation {
            fetch_failure: Some(RemoteFailure::remote("Failed to download video (500)").with_status(500)),
            ..ScriptedAnimation::default()
        });
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());
        let mut gate = open_gate();

        session.generate_animation(&image(), "zoom", &gate)?;
        let state = session.wait(&mut gate, WAIT).clone();
        assert_eq!(
            state,
            AnimationState::Failed(SessionError::Remote {
                message: "Failed to download video (500)".to_string(),
                status: Some(500),
            })
        );
        assert_eq!(ticker.stops(), 1);
        assert!(gate.is_open());
        assert_eq!(session.job().map(|job| job.status), Some(JobStatus::Failed));
        Ok(())
    }

    #[test]
    fn done_without_uri_is_a_failure() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation {
            missing_uri: true,
            ..ScriptedAnimation::default()
        });
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());
        let mut gate = open_gate();

        session.generate_animation(&image(), "zoom", &gate)?;
        let state = session.wait(&mut gate, WAIT).clone();
        assert!(matches!(
            state,
            AnimationState::Failed(SessionError::Remote { ref message, .. })
                if message == "Video generation failed or returned no data."
        ));
        assert_eq!(client.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(ticker.stops(), 1);
        Ok(())
    }

    #[test]
    fn credential_failure_on_submit_closes_gate() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation {
            submit_failure: Some(RemoteFailure::remote("Requested entity was not found.")),
            ..ScriptedAnimation::default()
        });
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());
        let mut gate = open_gate();

        session.generate_animation(&image(), "zoom", &gate)?;
        let state = session.wait(&mut gate, WAIT).clone();
        assert!(matches!(state, AnimationState::Failed(SessionError::Credential(_))));
        assert_eq!(gate.state(), CredentialState::Absent);
        assert_eq!(client.polls.load(Ordering::SeqCst), 0);
        assert_eq!(ticker.stops(), 1);
        Ok(())
    }

    #[test]
    fn poll_cap_yields_timeout() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation::finishing_after(u32::MAX));
        let ticker = Arc::new(CountingTicker::default());
        let config = EngineConfig {
            max_poll_attempts: 3,
            ..fast_config()
        };
        let mut session = session(&client, &ticker, config);
        let mut gate = open_gate();

        session.generate_animation(&image(), "zoom", &gate)?;
        let state = session.wait(&mut gate, WAIT).clone();
        assert_eq!(
            state,
            AnimationState::Failed(SessionError::Timeout {
                attempts: 3,
                elapsed_s: 0,
            })
        );
        assert_eq!(client.polls.load(Ordering::SeqCst), 3);
        assert_eq!(ticker.stops(), 1);
        Ok(())
    }

    #[test]
    fn preconditions_refuse_before_any_work() {
        let client = Arc::new(ScriptedAnimation::default());
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());

        let mut closed = CredentialGate::new(StaticProbe(false));
        closed.check();
        assert_eq!(
            session.generate_animation(&image(), "zoom", &closed),
            Err(SessionError::GateClosed)
        );
        let gate = open_gate();
        assert!(matches!(
            session.generate_animation(&ImageState::new("", "image/png"), "zoom", &gate),
            Err(SessionError::InvalidInput(_))
        ));
        assert!(matches!(
            session.generate_animation(&image(), "   ", &gate),
            Err(SessionError::InvalidInput(_))
        ));
        assert_eq!(client.submits.load(Ordering::SeqCst), 0);
        assert_eq!(ticker.starts(), 0);
        assert_eq!(session.state(), &AnimationState::Idle);
    }

    #[test]
    fn abandoned_job_result_is_discarded() -> anyhow::Result<()> {
        let (release, hold) = mpsc::channel();
        let client = Arc::new(ScriptedAnimation {
            hold_submit: Mutex::new(Some(hold)),
            ..ScriptedAnimation::default()
        });
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());
        let mut gate = open_gate();

        let first = session.generate_animation(&image(), "zoom", &gate)?;
        assert_eq!(
            session.generate_animation(&image(), "zoom again", &gate),
            Err(SessionError::AlreadyBusy("animation"))
        );

        session.abandon();
        assert_eq!(session.state(), &AnimationState::Idle);
        assert!(session.epoch() > first);
        assert_eq!(ticker.stops(), 1);

        release.send(())?;
        let deadline = Instant::now() + Duration::from_secs(10);
        while session.stale_results() == 0 && Instant::now() < deadline {
            assert_eq!(session.pump(&mut gate), None);
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(session.stale_results(), 1);
        assert_eq!(session.state(), &AnimationState::Idle);
        assert_eq!(ticker.stops(), 1);
        assert_eq!(client.polls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn discard_artifact_returns_to_idle() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation::default());
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());
        let mut gate = open_gate();

        session.generate_animation(&image(), "zoom", &gate)?;
        session.wait(&mut gate, WAIT);
        assert!(session.artifact().is_some());
        session.discard_artifact();
        assert_eq!(session.state(), &AnimationState::Idle);
        assert!(session.job().is_none());

        session.generate_animation(&image(), "zoom", &gate)?;
        session.wait(&mut gate, WAIT);
        assert_eq!(ticker.starts(), 2);
        assert_eq!(ticker.stops(), 2);
        Ok(())
    }

    #[test]
    fn poll_failure_fails_without_fetch() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation {
            poll_failure: Some(RemoteFailure::transport("connection reset").with_status(503)),
            ..ScriptedAnimation::default()
        });
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());
        let mut gate = open_gate();

        session.generate_animation(&image(), "zoom", &gate)?;
        let state = session.wait(&mut gate, WAIT).clone();
        assert_eq!(
            state,
            AnimationState::Failed(SessionError::Remote {
                message: "connection reset".to_string(),
                status: Some(503),
            })
        );
        assert!(gate.is_open());
        assert_eq!(client.polls.load(Ordering::SeqCst), 1);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(ticker.stops(), 1);
        Ok(())
    }

    #[test]
    fn credential_failure_on_poll_closes_gate() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation {
            poll_failure: Some(RemoteFailure::credential("API key expired").with_status(401)),
            ..ScriptedAnimation::default()
        });
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());
        let mut gate = open_gate();

        session.generate_animation(&image(), "zoom", &gate)?;
        let state = session.wait(&mut gate, WAIT).clone();
        assert_eq!(
            state,
            AnimationState::Failed(SessionError::Credential("API key expired".to_string()))
        );
        assert_eq!(gate.state(), CredentialState::Absent);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(ticker.stops(), 1);
        Ok(())
    }

    #[test]
    fn wall_clock_cap_yields_timeout() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation::finishing_after(u32::MAX));
        let ticker = Arc::new(CountingTicker::default());
        let config = EngineConfig {
            poll_interval: Duration::from_millis(50),
            max_poll_attempts: 1_000,
            max_animation_wait: Duration::from_millis(200),
            ..EngineConfig::default()
        };
        let mut session = session(&client, &ticker, config);
        let mut gate = open_gate();

        session.generate_animation(&image(), "zoom", &gate)?;
        let state = session.wait(&mut gate, WAIT).clone();
        let AnimationState::Failed(SessionError::Timeout { attempts, .. }) = state else {
            anyhow::bail!("expected timeout, got {state:?}");
        };
        assert!(attempts >= 1 && attempts < 1_000);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(ticker.stops(), 1);
        Ok(())
    }

    #[test]
    fn worker_panic_fails_the_job() -> anyhow::Result<()> {
        let client = Arc::new(ScriptedAnimation {
            panic_on_poll: true,
            ..ScriptedAnimation::default()
        });
        let ticker = Arc::new(CountingTicker::default());
        let mut session = session(&client, &ticker, fast_config());
        let mut gate = open_gate();

        session.generate_animation(&image(), "zoom", &gate)?;
        let state = session.wait(&mut gate, WAIT).clone();
        assert_eq!(
            state,
            AnimationState::Failed(SessionError::Remote {
                message: "animation worker exited unexpectedly".to_string(),
                status: None,
            })
        );
        assert!(!session.is_active());
        assert_eq!(ticker.stops(), 1);
        assert_eq!(session.job().map(|job| job.status), Some(JobStatus::Failed));

        session.generate_animation(&image(), "zoom again", &gate)?;
        assert!(matches!(session.wait(&mut gate, WAIT), AnimationState::Failed(_)));
        assert_eq!(ticker.starts(), 2);
        assert_eq!(ticker.stops(), 2);
        Ok(())
    }
}
