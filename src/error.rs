use crate::config::{ConfigError, Delays};
use std::time::Duration;
use thiserror::Error;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Browser error: {0}")]
    Driver(#[from] DriverError),

    #[error("Navigation error: {0}")]
    Navigation(#[from] NavigationError),

    #[error("Login error: {0}")]
    Login(#[from] LoginError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation cancelled by user")]
    Interrupted,

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Failures reported by a page driver implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Browser session is closed")]
    SessionClosed,
}

impl DriverError {
    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        DriverError::Timeout {
            what: what.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

#[derive(Error, Debug, Clone)]
pub enum NavigationError {
    #[error("Failed to load {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: u32 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug, Clone)]
pub enum LoginError {
    #[error("Login not detected within {waited_secs} seconds")]
    TimedOut { waited_secs: u64 },
}

/// Why a single removal did not complete. Recorded on the follower, never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemovalFailure {
    #[error("More-actions menu button not found")]
    MenuButtonNotFound,

    #[error("Remove follower option not found in menu")]
    RemoveOptionNotFound,

    #[error("Follower @{username} not found in list")]
    UserNotFound { username: String },

    #[error("Browser error during removal: {0}")]
    Driver(#[from] DriverError),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV writing failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Error recovery strategies for different failure scenarios
pub struct ErrorRecovery;

impl ErrorRecovery {
    /// Determine if an error is worth retrying
    pub fn is_recoverable(error: &SweepError) -> bool {
        match error {
            SweepError::Driver(driver_error) => match driver_error {
                DriverError::Timeout { .. } => true,
                DriverError::ElementNotFound { .. } => true,
                DriverError::Protocol(_) => true,
                DriverError::Evaluation(_) => true,
                DriverError::Screenshot(_) => true,
                DriverError::LaunchFailed(_) => false,
                DriverError::SessionClosed => false,
            },

            // Navigation already exhausted its own retries
            SweepError::Navigation(_) => false,
            SweepError::Login(_) => false,
            SweepError::Config(_) => false,

            SweepError::Report(_) => true,
            SweepError::Io(_) => true,
            SweepError::Json(_) => false,
            SweepError::Interrupted => false,
            SweepError::InvalidData(_) => false,
        }
    }

    /// Wait before the next attempt: timeouts back off from a tenth of the rate-limit pause,
    /// everything else from the error-recovery pause. Doubles per attempt, capped at 60 seconds.
    pub fn retry_delay(error: &SweepError, attempt: u32, delays: &Delays) -> Duration {
        let base = match error {
            SweepError::Driver(DriverError::Timeout { .. }) => delays.rate_limit_backoff / 10,
            _ => delays.error_recovery,
        };
        base.saturating_mul(2_u32.pow(attempt.min(6)))
            .min(MAX_RETRY_DELAY)
    }

    /// Determine if an error should abort the run
    pub fn should_shutdown(error: &SweepError) -> bool {
        match error {
            SweepError::Config(_) => true,
            SweepError::Navigation(_) => true,
            SweepError::Login(_) => true,
            SweepError::Interrupted => true,
            SweepError::Driver(DriverError::LaunchFailed(_) | DriverError::SessionClosed) => true,
            _ => false,
        }
    }
}
