//! The camera session state machine.
//!
//! [`CameraSession`] owns the single camera device. Commands move it between
//! [`CameraState::Stopped`], [`CameraState::Running`] and
//! [`CameraState::Paused`]; a background capture loop reads frames while
//! running.
//!
//! Locking:
//!
//! - An async command gate serializes `start`, `pause`, `resume` and `stop`,
//!   so two concurrent `start` calls acquire the device once.
//! - A plain mutex guards state, frame and error. It is held only to apply a
//!   transition or swap a frame, never across a device call or an `.await`.
//!
//! A capture loop (and with it the device lease) is attached exactly when
//! the state is `Running` or `Paused`. A loop whose read fails records the
//! cause and moves the session to `Stopped` before it releases the device;
//! it is then kept as retiring, and the next `start` waits for that release.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::device::{DeviceError, DeviceLease, DeviceProvider, ReleaseHandle};
use super::frame::Frame;
use crate::config::Config;
use crate::error::ErrorKind;

/// Camera session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    /// No device held. Initial and final state.
    #[default]
    Stopped,
    /// Device held, frames being captured.
    Running,
    /// Device held, capture suspended.
    Paused,
}

impl CameraState {
    /// Whether the device is held in this state.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// A recorded device failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraFault {
    /// Human-readable cause.
    pub message: String,
    /// When the failure was recorded.
    pub occurred_at: DateTime<Utc>,
}

impl CameraFault {
    fn from_error(err: &DeviceError) -> Self {
        Self {
            message: err.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// Outcome of a camera command. Commands are all-or-nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    /// Whether the command was carried out.
    pub accepted: bool,
    /// Session state after the command.
    pub state_after: CameraState,
    /// Why the command was refused, or what went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Extra context for `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Set when `stop` had to force the device release.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    /// Suggested wait for a rate-limited caller, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<f64>,
}

impl CommandResult {
    /// A command that was carried out.
    #[must_use]
    pub fn accepted(state_after: CameraState) -> Self {
        Self {
            accepted: true,
            state_after,
            error: None,
            detail: None,
            degraded: false,
            retry_after_secs: None,
        }
    }

    /// A command that changed nothing.
    #[must_use]
    pub fn rejected(state_after: CameraState, error: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            accepted: false,
            state_after,
            error: Some(error),
            detail: Some(detail.into()),
            degraded: false,
            retry_after_secs: None,
        }
    }

    /// A command refused by admission control.
    #[must_use]
    pub fn rate_limited(state_after: CameraState, retry_after: Duration) -> Self {
        Self {
            retry_after_secs: Some(retry_after.as_secs_f64()),
            ..Self::rejected(state_after, ErrorKind::RateLimited, "rate limit exceeded")
        }
    }

    fn degraded_stop(err: &DeviceError) -> Self {
        Self {
            accepted: true,
            state_after: CameraState::Stopped,
            error: Some(ErrorKind::DeviceUnavailable),
            detail: Some(err.to_string()),
            degraded: true,
            retry_after_secs: None,
        }
    }
}

/// The latest frame and state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Current state.
    pub state: CameraState,
    /// Most recent frame. Always `None` when stopped.
    pub frame: Option<Arc<Frame>>,
    /// Last recorded device failure. Only reported when stopped.
    pub error: Option<CameraFault>,
}

impl Snapshot {
    /// [`ErrorKind::DeviceUnavailable`] when a failure is recorded.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|_| ErrorKind::DeviceUnavailable)
    }
}

/// Counters and state for the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Current state.
    pub state: CameraState,
    /// Whether a frame is available.
    pub has_frame: bool,
    /// Sequence number of the latest frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sequence: Option<u64>,
    /// Frames stored since the process started.
    pub frames_captured: u64,
    /// Successful device acquisitions since the process started.
    pub acquisitions: u64,
    /// Last recorded device failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<CameraFault>,
}

/// Timing for the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Interval between frame reads while running.
    pub frame_interval: Duration,
    /// How long `stop` waits for the loop to release the device.
    pub stop_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(200),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for CaptureSettings {
    fn from(config: &Config) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopCommand {
    Run,
    Pause,
    Stop,
}

#[derive(Debug)]
struct LoopExit {
    release: Result<(), DeviceError>,
}

#[derive(Debug)]
struct CaptureLoop {
    epoch: u64,
    control: watch::Sender<LoopCommand>,
    task: JoinHandle<LoopExit>,
    release: ReleaseHandle,
}

#[derive(Debug, Default)]
struct Inner {
    state: CameraState,
    last_frame: Option<Arc<Frame>>,
    last_error: Option<CameraFault>,
    capture: Option<CaptureLoop>,
    retiring: Option<CaptureLoop>,
    epoch: u64,
    frames_captured: u64,
    acquisitions: u64,
}

impl Inner {
    fn owns(&self, epoch: u64) -> bool {
        self.capture.as_ref().is_some_and(|c| c.epoch == epoch)
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the camera device and its capture loop.
#[derive(Debug)]
pub struct CameraSession {
    provider: Arc<dyn DeviceProvider>,
    settings: CaptureSettings,
    inner: Arc<Mutex<Inner>>,
    commands: tokio::sync::Mutex<()>,
}

impl CameraSession {
    /// Create a stopped session over `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn DeviceProvider>, settings: CaptureSettings) -> Self {
        Self {
            provider,
            settings,
            inner: Arc::new(Mutex::new(Inner::default())),
            commands: tokio::sync::Mutex::new(()),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CameraState {
        lock(&self.inner).state
    }

    /// Acquire the device and start capturing.
    ///
    /// Returns once the device is open and the loop is scheduled, not once a
    /// first frame exists.
    pub async fn start(&self) -> CommandResult {
        let _gate = self.commands.lock().await;
        self.settle().await;

        let current = self.state();
        if current.is_active() {
            return CommandResult::rejected(
                current,
                ErrorKind::AlreadyActive,
                format!("camera is already {current}"),
            );
        }

        let provider = Arc::clone(&self.provider);
        let acquired =
            tokio::task::spawn_blocking(move || DeviceLease::acquire(&provider)).await;
        let lease = match acquired {
            Ok(Ok(lease)) => lease,
            Ok(Err(e)) => return self.reject_start(&e),
            Err(e) => return self.reject_start(&DeviceError::TaskFailed(e.to_string())),
        };

        let release = lease.release_handle();
        let (control, control_rx) = watch::channel(LoopCommand::Run);
        let mut inner = lock(&self.inner);
        inner.epoch += 1;
        inner.acquisitions += 1;
        let epoch = inner.epoch;
        let task = tokio::spawn(capture_loop(
            lease,
            control_rx,
            Arc::clone(&self.inner),
            epoch,
            self.settings.frame_interval,
        ));
        inner.capture = Some(CaptureLoop {
            epoch,
            control,
            task,
            release,
        });
        inner.state = CameraState::Running;
        inner.last_frame = None;
        inner.last_error = None;

        info!(source = self.provider.name(), epoch, "Camera started");
        CommandResult::accepted(CameraState::Running)
    }

    /// Suspend capture. The device stays open.
    pub async fn pause(&self) -> CommandResult {
        let _gate = self.commands.lock().await;
        self.switch(CameraState::Running, CameraState::Paused, LoopCommand::Pause, "pause")
    }

    /// Resume a paused capture.
    pub async fn resume(&self) -> CommandResult {
        let _gate = self.commands.lock().await;
        self.switch(CameraState::Paused, CameraState::Running, LoopCommand::Run, "resume")
    }

    /// Stop capturing and release the device.
    ///
    /// Waits for the loop to release the device, bounded by the stop
    /// timeout. If the loop does not exit in time it is aborted, the device
    /// is force-released through the provider, and the result is marked
    /// degraded.
    pub async fn stop(&self) -> CommandResult {
        let _gate = self.commands.lock().await;

        let capture = {
            let mut inner = lock(&self.inner);
            if !inner.state.is_active() {
                return CommandResult::rejected(
                    inner.state,
                    ErrorKind::InvalidTransition,
                    format!("cannot stop while {}", inner.state),
                );
            }
            inner.state = CameraState::Stopped;
            inner.last_frame = None;
            inner.capture.take()
        };

        let Some(capture) = capture else {
            return CommandResult::accepted(CameraState::Stopped);
        };

        match self.wind_down(capture).await {
            None => {
                info!("Camera stopped");
                CommandResult::accepted(CameraState::Stopped)
            }
            Some(e) => {
                warn!(error = %e, "Camera stop degraded");
                lock(&self.inner).last_error = Some(CameraFault::from_error(&e));
                CommandResult::degraded_stop(&e)
            }
        }
    }

    /// The latest frame, or the last failure when stopped.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let inner = lock(&self.inner);
        match inner.state {
            CameraState::Stopped => Snapshot {
                state: inner.state,
                frame: None,
                error: inner.last_error.clone(),
            },
            state => Snapshot {
                state,
                frame: inner.last_frame.clone(),
                error: None,
            },
        }
    }

    /// State and counters.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let inner = lock(&self.inner);
        SessionStatus {
            state: inner.state,
            has_frame: inner.state.is_active() && inner.last_frame.is_some(),
            last_sequence: inner.last_frame.as_ref().map(|f| f.sequence),
            frames_captured: inner.frames_captured,
            acquisitions: inner.acquisitions,
            last_error: inner.last_error.clone(),
        }
    }

    /// Stop the camera if it is active. Used on process shutdown.
    pub async fn shutdown(&self) {
        if self.state().is_active() {
            let result = self.stop().await;
            debug!(?result, "Camera shut down");
        }
        let _gate = self.commands.lock().await;
        self.settle().await;
    }

    /// Signal a loop to stop and wait for it to release the device, bounded
    /// by the stop timeout. Returns what went wrong, if anything.
    async fn wind_down(&self, capture: CaptureLoop) -> Option<DeviceError> {
        let CaptureLoop {
            control,
            mut task,
            release,
            ..
        } = capture;

        control.send_replace(LoopCommand::Stop);
        match tokio::time::timeout(self.settings.stop_timeout, &mut task).await {
            Ok(Ok(LoopExit { release: Ok(()) })) => None,
            Ok(Ok(LoopExit { release: Err(e) })) => Some(e),
            Ok(Err(e)) => Some(DeviceError::TaskFailed(e.to_string())),
            Err(_) => {
                task.abort();
                release.force();
                Some(DeviceError::StopTimedOut {
                    timeout_ms: u64::try_from(self.settings.stop_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Wait for a loop that stopped itself after a read failure to finish
    /// releasing the device. Its outcome is already in `last_error`.
    async fn settle(&self) {
        let retiring = lock(&self.inner).retiring.take();
        if let Some(capture) = retiring {
            if let Some(e) = self.wind_down(capture).await {
                warn!(error = %e, "Failed capture loop did not release cleanly");
            }
        }
    }

    fn switch(
        &self,
        from: CameraState,
        to: CameraState,
        command: LoopCommand,
        verb: &str,
    ) -> CommandResult {
        let mut inner = lock(&self.inner);
        if inner.state != from {
            return CommandResult::rejected(
                inner.state,
                ErrorKind::InvalidTransition,
                format!("cannot {verb} while {}", inner.state),
            );
        }
        if let Some(capture) = &inner.capture {
            capture.control.send_replace(command);
        }
        inner.state = to;
        debug!(from = %from, to = %to, "Camera transition");
        CommandResult::accepted(to)
    }

    fn reject_start(&self, err: &DeviceError) -> CommandResult {
        warn!(source = self.provider.name(), error = %err, "Camera start failed");
        let mut inner = lock(&self.inner);
        inner.last_error = Some(CameraFault::from_error(err));
        CommandResult::rejected(inner.state, ErrorKind::DeviceUnavailable, err.to_string())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        if let Some(capture) = inner.capture.take() {
            capture.control.send_replace(LoopCommand::Stop);
            inner.state = CameraState::Stopped;
        }
    }
}

async fn capture_loop(
    mut lease: DeviceLease,
    mut control: watch::Receiver<LoopCommand>,
    inner: Arc<Mutex<Inner>>,
    epoch: u64,
    frame_interval: Duration,
) -> LoopExit {
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: u64 = 0;

    loop {
        let command = *control.borrow_and_update();
        match command {
            LoopCommand::Stop => break,
            LoopCommand::Pause => {
                if control.changed().await.is_err() {
                    break;
                }
                continue;
            }
            LoopCommand::Run => {}
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        let read = tokio::task::spawn_blocking(move || {
            let frame = lease.read_frame();
            (lease, frame)
        })
        .await;

        let (returned, frame) = match read {
            Ok(pair) => pair,
            Err(e) => {
                // The lease was dropped, and so released, with the task.
                record_failure(&inner, epoch, &DeviceError::TaskFailed(e.to_string()));
                return LoopExit { release: Ok(()) };
            }
        };
        lease = returned;

        match frame {
            Ok(data) => {
                sequence += 1;
                let frame = Arc::new(Frame::jpeg(sequence, data));
                let mut guard = lock(&inner);
                if guard.owns(epoch) && guard.state.is_active() {
                    guard.last_frame = Some(frame);
                    guard.frames_captured += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, epoch, "Camera read failed, stopping capture");
                let retired = record_failure(&inner, epoch, &e);
                let release = release_blocking(lease).await;
                if let (true, Err(release_err)) = (retired, &release) {
                    record_release_failure(&inner, epoch, release_err);
                }
                return LoopExit { release };
            }
        }
    }

    LoopExit {
        release: release_blocking(lease).await,
    }
}

async fn release_blocking(lease: DeviceLease) -> Result<(), DeviceError> {
    tokio::task::spawn_blocking(move || lease.release())
        .await
        .unwrap_or_else(|e| Err(DeviceError::TaskFailed(e.to_string())))
}

/// Move the session to `Stopped` on behalf of a failed loop. Returns false
/// if a `stop` already claimed the loop.
fn record_failure(inner: &Mutex<Inner>, epoch: u64, err: &DeviceError) -> bool {
    let mut guard = lock(inner);
    if !guard.owns(epoch) {
        return false;
    }
    guard.state = CameraState::Stopped;
    guard.retiring = guard.capture.take();
    guard.last_frame = None;
    guard.last_error = Some(CameraFault::from_error(err));
    true
}

fn record_release_failure(inner: &Mutex<Inner>, epoch: u64, err: &DeviceError) {
    let mut guard = lock(inner);
    if guard.epoch != epoch || guard.state.is_active() {
        return;
    }
    if let Some(fault) = guard.last_error.as_mut() {
        fault.message = format!("{}; {err}", fault.message);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;
    use crate::camera::device::CameraDevice;

    #[derive(Debug, Default)]
    struct Counters {
        opens: AtomicU64,
        releases: AtomicU64,
        reads: AtomicU64,
        held: AtomicBool,
    }

    #[derive(Debug, Default, Clone)]
    struct Script {
        busy: bool,
        fail_read_after: Option<u64>,
        read_delay: Option<Duration>,
        release_delay: Option<Duration>,
        fail_release: bool,
    }

    #[derive(Debug, Default)]
    struct FakeProvider {
        counters: Arc<Counters>,
        script: Script,
    }

    #[derive(Debug)]
    struct FakeDevice {
        counters: Arc<Counters>,
        script: Script,
        reads: u64,
    }

    impl CameraDevice for FakeDevice {
        fn read_frame(&mut self) -> Result<Vec<u8>, DeviceError> {
            if let Some(delay) = self.script.read_delay {
                std::thread::sleep(delay);
            }
            self.reads += 1;
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            match self.script.fail_read_after {
                Some(limit) if self.reads > limit => {
                    Err(DeviceError::ReadFailed("cable unplugged".to_string()))
                }
                _ => Ok(self.reads.to_be_bytes().to_vec()),
            }
        }

        fn release(&mut self) -> Result<(), DeviceError> {
            if let Some(delay) = self.script.release_delay {
                std::thread::sleep(delay);
            }
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
            self.counters.held.store(false, Ordering::SeqCst);
            if self.script.fail_release {
                Err(DeviceError::ReleaseFailed("driver wedged".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl DeviceProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn open(&self) -> Result<Box<dyn CameraDevice>, DeviceError> {
            if self.script.busy || self.counters.held.swap(true, Ordering::SeqCst) {
                return Err(DeviceError::Busy("fake".to_string()));
            }
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDevice {
                counters: Arc::clone(&self.counters),
                script: self.script.clone(),
                reads: 0,
            }))
        }

        fn force_release(&self) {
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
            self.counters.held.store(false, Ordering::SeqCst);
        }
    }

    fn session(script: Script, settings: CaptureSettings) -> (CameraSession, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let provider = FakeProvider {
            counters: Arc::clone(&counters),
            script,
        };
        (CameraSession::new(Arc::new(provider), settings), counters)
    }

    fn fast() -> CaptureSettings {
        CaptureSettings {
            frame_interval: Duration::from_millis(5),
            stop_timeout: Duration::from_secs(2),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_commands_from_stopped_are_invalid() {
        let (session, counters) = session(Script::default(), fast());

        for result in [session.pause().await, session.resume().await, session.stop().await] {
            assert!(!result.accepted);
            assert_eq!(result.error, Some(ErrorKind::InvalidTransition));
            assert_eq!(result.state_after, CameraState::Stopped);
        }
        assert_eq!(session.state(), CameraState::Stopped);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_lifecycle_releases_once() {
        let (session, counters) = session(Script::default(), fast());

        assert_eq!(session.start().await, CommandResult::accepted(CameraState::Running));
        assert_eq!(session.pause().await, CommandResult::accepted(CameraState::Paused));
        assert_eq!(session.resume().await, CommandResult::accepted(CameraState::Running));
        assert_eq!(session.stop().await, CommandResult::accepted(CameraState::Stopped));

        assert_eq!(session.state(), CameraState::Stopped);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeated_start_stop_does_not_leak() {
        let (session, counters) = session(Script::default(), fast());

        for _ in 0..3 {
            assert!(session.start().await.accepted);
            assert!(session.stop().await.accepted);
        }
        assert_eq!(counters.opens.load(Ordering::SeqCst), 3);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 3);
        assert_eq!(session.status().acquisitions, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_start_acquires_once() {
        let (session, counters) = session(Script::default(), fast());

        let (a, b) = tokio::join!(session.start(), session.start());
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.accepted).count(), 1);
        let loser = results.iter().find(|r| !r.accepted).unwrap();
        assert_eq!(loser.error, Some(ErrorKind::AlreadyActive));
        assert_eq!(loser.state_after, CameraState::Running);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        session.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_transitions_while_active() {
        let (session, _counters) = session(Script::default(), fast());
        session.start().await;

        let result = session.resume().await;
        assert_eq!(result.error, Some(ErrorKind::InvalidTransition));
        assert_eq!(result.state_after, CameraState::Running);

        session.pause().await;
        let result = session.pause().await;
        assert_eq!(result.error, Some(ErrorKind::InvalidTransition));
        assert_eq!(result.state_after, CameraState::Paused);

        let result = session.start().await;
        assert_eq!(result.error, Some(ErrorKind::AlreadyActive));
        assert_eq!(result.state_after, CameraState::Paused);

        session.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_snapshot_while_running_has_frame() {
        let (session, _counters) = session(Script::default(), fast());
        session.start().await;

        wait_until(|| session.snapshot().frame.is_some()).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, CameraState::Running);
        assert!(snapshot.error.is_none());
        assert!(snapshot.frame.unwrap().sequence >= 1);

        session.stop().await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, CameraState::Stopped);
        assert!(snapshot.frame.is_none());
        assert!(snapshot.error.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pause_stops_reading() {
        let (session, counters) = session(Script::default(), fast());
        session.start().await;
        wait_until(|| counters.reads.load(Ordering::SeqCst) > 0).await;

        session.pause().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let reads = counters.reads.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counters.reads.load(Ordering::SeqCst), reads);

        // The last frame survives a pause.
        assert!(session.snapshot().frame.is_some());

        session.resume().await;
        wait_until(|| counters.reads.load(Ordering::SeqCst) > reads).await;
        session.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_failure_forces_stopped() {
        crate::logging::init_test_logging();
        let script = Script {
            fail_read_after: Some(2),
            ..Script::default()
        };
        let (session, counters) = session(script, fast());
        assert!(session.start().await.accepted);

        wait_until(|| session.state() == CameraState::Stopped).await;
        let snapshot = session.snapshot();
        assert!(snapshot.frame.is_none());
        let fault = snapshot.error.expect("failure should be recorded");
        assert!(fault.message.contains("cable unplugged"));

        wait_until(|| counters.releases.load(Ordering::SeqCst) == 1).await;
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        // Stopping again is an invalid transition, not a second release.
        let result = session.stop().await;
        assert_eq!(result.error, Some(ErrorKind::InvalidTransition));
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_after_failure_clears_error() {
        let script = Script {
            fail_read_after: Some(1),
            ..Script::default()
        };
        let (session, counters) = session(script, fast());
        session.start().await;
        wait_until(|| session.state() == CameraState::Stopped).await;
        assert!(session.status().last_error.is_some());

        assert!(session.start().await.accepted);
        assert!(session.status().last_error.is_none());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_busy_device_rejects_start() {
        let script = Script {
            busy: true,
            ..Script::default()
        };
        let (session, _counters) = session(script, fast());

        let result = session.start().await;
        assert!(!result.accepted);
        assert_eq!(result.error, Some(ErrorKind::DeviceUnavailable));
        assert_eq!(result.state_after, CameraState::Stopped);
        assert!(session.snapshot().error.unwrap().message.contains("busy"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_timeout_is_degraded_but_releases() {
        let script = Script {
            read_delay: Some(Duration::from_millis(300)),
            ..Script::default()
        };
        let settings = CaptureSettings {
            frame_interval: Duration::from_millis(1),
            stop_timeout: Duration::from_millis(50),
        };
        let (session, counters) = session(script, settings);
        session.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = session.stop().await;
        assert!(result.accepted);
        assert!(result.degraded);
        assert_eq!(result.error, Some(ErrorKind::DeviceUnavailable));
        assert_eq!(result.state_after, CameraState::Stopped);

        // Released right away, without waiting for the wedged read.
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(!counters.held.load(Ordering::SeqCst));

        let restarted = session.start().await;
        assert!(restarted.accepted, "restart failed: {restarted:?}");
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);

        // The wedged read returning later does not release a second time.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);

        session.stop().await;
        assert_eq!(counters.releases.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_failure_is_recorded_before_release() {
        let script = Script {
            fail_read_after: Some(0),
            release_delay: Some(Duration::from_millis(400)),
            ..Script::default()
        };
        let (session, counters) = session(script, fast());
        assert!(session.start().await.accepted);

        wait_until(|| session.state() == CameraState::Stopped).await;
        assert_eq!(counters.releases.load(Ordering::SeqCst), 0);
        let fault = session.snapshot().error.expect("cause recorded while releasing");
        assert!(fault.message.contains("cable unplugged"));

        // A stop in the release window cannot claim the loop or lose the cause.
        let result = session.stop().await;
        assert_eq!(result.error, Some(ErrorKind::InvalidTransition));
        assert_eq!(session.snapshot().error_kind(), Some(ErrorKind::DeviceUnavailable));

        // Start waits for the pending release instead of reporting busy.
        let restarted = session.start().await;
        assert!(restarted.accepted, "restart failed: {restarted:?}");
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_release_failure_after_read_failure_is_recorded() {
        let script = Script {
            fail_read_after: Some(0),
            fail_release: true,
            ..Script::default()
        };
        let (session, counters) = session(script, fast());
        session.start().await;

        wait_until(|| counters.releases.load(Ordering::SeqCst) == 1).await;
        wait_until(|| {
            session
                .status()
                .last_error
                .is_some_and(|fault| fault.message.contains("driver wedged"))
        })
        .await;
        let message = session.status().last_error.unwrap().message;
        assert!(message.contains("cable unplugged"));
        assert_eq!(session.state(), CameraState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_release_failure_is_degraded() {
        let script = Script {
            fail_release: true,
            ..Script::default()
        };
        let (session, counters) = session(script, fast());
        session.start().await;

        let result = session.stop().await;
        assert!(result.degraded);
        assert_eq!(result.error, Some(ErrorKind::DeviceUnavailable));
        assert!(result.detail.unwrap().contains("driver wedged"));
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), CameraState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_releases_device() {
        let (session, counters) = session(Script::default(), fast());
        session.start().await;
        drop(session);

        wait_until(|| counters.releases.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_active_camera() {
        let (session, counters) = session(Script::default(), fast());
        session.shutdown().await;
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);

        session.start().await;
        session.shutdown().await;
        assert_eq!(session.state(), CameraState::Stopped);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_command_result_serialization() {
        let json = serde_json::to_value(CommandResult::accepted(CameraState::Running)).unwrap();
        assert_eq!(json, serde_json::json!({"accepted": true, "state_after": "running"}));

        let limited = CommandResult::rate_limited(CameraState::Stopped, Duration::from_millis(500));
        let json = serde_json::to_value(limited).unwrap();
        assert_eq!(json["error"], "rate_limited");
        assert_eq!(json["retry_after_secs"], 0.5);
    }

    #[test]
    fn test_camera_state_display() {
        assert_eq!(CameraState::Stopped.to_string(), "stopped");
        assert_eq!(CameraState::Running.to_string(), "running");
        assert_eq!(CameraState::Paused.to_string(), "paused");
        assert!(!CameraState::Stopped.is_active());
        assert!(CameraState::Paused.is_active());
    }
}
