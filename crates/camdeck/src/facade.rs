//! The control surface.
//!
//! [`ControlFacade`] is the only thing the HTTP layer talks to. Every
//! operation is charged to the caller's bucket first; a denied request never
//! reaches the camera session or the analyzer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::analysis::{self, Analyzer, CodeReport, UnavailableAnalyzer};
use crate::camera::{self, CameraSession, CaptureSettings, SessionStatus, Snapshot};
use crate::config::{Config, CostConfig};
use crate::error::{ErrorKind, Result};
use crate::governor::{Admission, CallerId, Category, RateGovernor};

pub use crate::camera::CommandResult;

/// A camera command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Acquire the device and start capturing.
    Start,
    /// Suspend capture.
    Pause,
    /// Resume capture.
    Resume,
    /// Stop capturing and release the device.
    Stop,
}

impl Command {
    /// Lowercase name, as used in routes and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A read that passed, or was refused by, admission control.
#[derive(Debug, Clone, PartialEq)]
pub enum Gated<T> {
    /// The read was admitted.
    Admitted(T),
    /// The caller is over budget.
    RateLimited {
        /// How long until the same read would be admitted.
        retry_after: Duration,
    },
}

/// Outcome of a code analysis request. Never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutcome {
    /// Whether a report was produced.
    pub available: bool,
    /// The report, when available.
    #[serde(flatten)]
    pub report: Option<CodeReport>,
    /// Why no report was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Extra context for `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Suggested wait for a rate-limited caller, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<f64>,
}

impl AnalysisOutcome {
    /// A produced report.
    #[must_use]
    pub fn available(report: CodeReport) -> Self {
        Self {
            available: true,
            report: Some(report),
            error: None,
            detail: None,
            retry_after_secs: None,
        }
    }

    /// No report.
    #[must_use]
    pub fn unavailable(error: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            available: false,
            report: None,
            error: Some(error),
            detail: Some(detail.into()),
            retry_after_secs: None,
        }
    }

    fn rate_limited(retry_after: Duration) -> Self {
        Self {
            retry_after_secs: Some(retry_after.as_secs_f64()),
            ..Self::unavailable(ErrorKind::RateLimited, "rate limit exceeded")
        }
    }

    /// Suggested wait, if rate limited.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Rate-limited access to the camera session and the analyzer.
#[derive(Debug, Clone)]
pub struct ControlFacade {
    governor: Arc<RateGovernor>,
    camera: Arc<CameraSession>,
    analyzer: Arc<dyn Analyzer>,
    costs: CostConfig,
}

impl ControlFacade {
    /// Compose a facade. Analysis is unavailable until an analyzer is set
    /// with [`ControlFacade::with_analyzer`].
    #[must_use]
    pub fn new(governor: Arc<RateGovernor>, camera: Arc<CameraSession>, costs: CostConfig) -> Self {
        Self {
            governor,
            camera,
            analyzer: Arc::new(UnavailableAnalyzer),
            costs,
        }
    }

    /// Use `analyzer` for code analysis.
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Build the governor, camera session and analyzer from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera source or analyzer cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = camera::provider_from_config(&config.camera)?;
        let session = CameraSession::new(provider, CaptureSettings::from(config));
        let analyzer = analysis::from_config(&config.analysis)?;
        info!(
            capacity = config.governor.capacity,
            refill_per_sec = config.governor.refill_per_sec,
            analyzer = analyzer.name(),
            "Control surface ready"
        );

        Ok(Self::new(
            Arc::new(RateGovernor::from_config(&config.governor)),
            Arc::new(session),
            config.costs.clone(),
        )
        .with_analyzer(analyzer))
    }

    /// The shared governor.
    #[must_use]
    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// The camera session.
    #[must_use]
    pub fn camera(&self) -> &Arc<CameraSession> {
        &self.camera
    }

    /// Name of the configured analyzer.
    #[must_use]
    pub fn analyzer_name(&self) -> &'static str {
        self.analyzer.name()
    }

    /// Run a camera command on behalf of `caller`.
    pub async fn command(&self, caller: &CallerId, command: Command) -> CommandResult {
        let admission = self.governor.check(Category::Camera, caller, self.costs.command);
        if let Admission::Denied { retry_after } = admission {
            return CommandResult::rate_limited(self.camera.state(), retry_after);
        }

        let result = match command {
            Command::Start => self.camera.start().await,
            Command::Pause => self.camera.pause().await,
            Command::Resume => self.camera.resume().await,
            Command::Stop => self.camera.stop().await,
        };
        debug!(
            caller = %caller,
            %command,
            accepted = result.accepted,
            state = %result.state_after,
            "Camera command"
        );
        result
    }

    /// Acquire the device and start capturing.
    pub async fn start(&self, caller: &CallerId) -> CommandResult {
        self.command(caller, Command::Start).await
    }

    /// Suspend capture.
    pub async fn pause(&self, caller: &CallerId) -> CommandResult {
        self.command(caller, Command::Pause).await
    }

    /// Resume capture.
    pub async fn resume(&self, caller: &CallerId) -> CommandResult {
        self.command(caller, Command::Resume).await
    }

    /// Stop capturing and release the device.
    pub async fn stop(&self, caller: &CallerId) -> CommandResult {
        self.command(caller, Command::Stop).await
    }

    /// The latest frame and state.
    #[must_use]
    pub fn snapshot(&self, caller: &CallerId) -> Gated<Snapshot> {
        self.read(caller, || self.camera.snapshot())
    }

    /// Session state and counters.
    #[must_use]
    pub fn status(&self, caller: &CallerId) -> Gated<SessionStatus> {
        self.read(caller, || self.camera.status())
    }

    fn read<T>(&self, caller: &CallerId, f: impl FnOnce() -> T) -> Gated<T> {
        match self.governor.check(Category::Camera, caller, self.costs.snapshot) {
            Admission::Admitted { .. } => Gated::Admitted(f()),
            Admission::Denied { retry_after } => Gated::RateLimited { retry_after },
        }
    }

    /// Analyze a source text. Failures are reported in the outcome.
    pub async fn analyze_code(&self, caller: &CallerId, source: &str) -> AnalysisOutcome {
        let admission = self.governor.check(Category::Analysis, caller, self.costs.analyze);
        if let Admission::Denied { retry_after } = admission {
            return AnalysisOutcome::rate_limited(retry_after);
        }

        match self.analyzer.analyze(source).await {
            Ok(report) => AnalysisOutcome::available(report),
            Err(e) => {
                debug!(
                    caller = %caller,
                    analyzer = self.analyzer.name(),
                    error = %e,
                    "Analysis unavailable"
                );
                AnalysisOutcome::unavailable(ErrorKind::AnalyzerUnavailable, e.to_string())
            }
        }
    }

    /// Stop the camera. Used on process shutdown.
    pub async fn shutdown(&self) {
        self.camera.shutdown().await;
    }
}
