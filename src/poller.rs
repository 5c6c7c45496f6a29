use serde_json::Value;
use std::time::{Duration, Instant};

use crate::error::{ClientError, ClientResult};
use crate::transport::Transport;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_BACKOFF: f64 = 1.5;
pub const DEFAULT_POLL_MAX_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    /// Any other status string the service reports; treated as still running.
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "submitted" => JobStatus::Submitted,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What to do when the service reports `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureAction {
    #[default]
    Abort,
    /// Keep polling; the service has been seen to recover a failed session.
    KeepPolling,
}

/// Wait schedule between status checks: `interval`, growing by `backoff`
/// per attempt up to `max_interval`, bounded overall by `deadline`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff: f64,
    pub max_interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            backoff: DEFAULT_POLL_BACKOFF,
            max_interval: DEFAULT_POLL_MAX_INTERVAL,
            deadline: Some(DEFAULT_POLL_DEADLINE),
        }
    }
}

impl PollPolicy {
    /// Constant interval with no deadline.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            backoff: 1.0,
            max_interval: interval,
            deadline: None,
        }
    }

    /// Delay after the `attempt`-th status check (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.interval.as_secs_f64();
        let cap = self.max_interval.as_secs_f64().max(base);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let grown = base * self.backoff.max(1.0).powi(exponent);
        let secs = if grown.is_finite() { grown.min(cap) } else { cap };
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_interval.max(self.interval))
    }
}

pub fn status_path(session_id: &str) -> String {
    format!("/status/{session_id}")
}

pub fn result_path(session_id: &str) -> String {
    format!("/result/{session_id}")
}

pub fn read_status(response: &Value) -> ClientResult<JobStatus> {
    response
        .get("status")
        .and_then(Value::as_str)
        .map(JobStatus::parse)
        .ok_or_else(|| {
            ClientError::malformed(format!("status response has no status field: {response}"))
        })
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub session_id: String,
    pub attempts: u32,
    pub elapsed: Duration,
    /// Body of `GET /result/<session_id>`.
    pub result: Value,
}

pub struct JobPoller<'a, T: Transport + ?Sized> {
    transport: &'a T,
    policy: &'a PollPolicy,
    on_failed: FailureAction,
}

impl<'a, T: Transport + ?Sized> JobPoller<'a, T> {
    pub fn new(transport: &'a T, policy: &'a PollPolicy) -> Self {
        Self {
            transport,
            policy,
            on_failed: FailureAction::default(),
        }
    }

    pub fn on_failed(mut self, action: FailureAction) -> Self {
        self.on_failed = action;
        self
    }

    /// Polls the status endpoint until the job completes, then fetches the
    /// result exactly once.
    pub fn run(&self, session_id: &str) -> ClientResult<JobOutcome> {
        let started = Instant::now();
        let attempts = self.wait_for_completion(session_id, started)?;
        let result = self.transport.get_json(&result_path(session_id))?;
        let elapsed = started.elapsed();
        tracing::info!(
            session_id,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "job completed"
        );
        Ok(JobOutcome {
            session_id: session_id.to_string(),
            attempts,
            elapsed,
            result,
        })
    }

    fn wait_for_completion(&self, session_id: &str, started: Instant) -> ClientResult<u32> {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let response = self.transport.get_json(&status_path(session_id))?;
            let status = read_status(&response)?;
            tracing::info!(session_id, attempt, status = status.as_str(), "job status");

            match status {
                JobStatus::Completed => return Ok(attempt),
                JobStatus::Failed => match self.on_failed {
                    FailureAction::Abort => {
                        tracing::warn!(session_id, "job failed");
                        return Err(ClientError::JobFailed {
                            session_id: session_id.to_string(),
                            response,
                        });
                    }
                    FailureAction::KeepPolling => {
                        tracing::warn!(session_id, "job reported failed; continuing to poll");
                    }
                },
                _ => {}
            }

            let elapsed = started.elapsed();
            let mut delay = self.policy.delay_after(attempt);
            if let Some(deadline) = self.policy.deadline {
                if elapsed >= deadline {
                    return Err(ClientError::PollDeadlineExceeded {
                        session_id: session_id.to_string(),
                        last_status: status.as_str().to_string(),
                        elapsed,
                    });
                }
                delay = delay.min(deadline - elapsed);
            }
            std::thread::sleep(delay);
        }
    }
}
