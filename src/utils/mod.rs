use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection timeout")]
    Timeout,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Malformed reply: {0}")]
    Protocol(String),
    #[error("Notification delivery failed: {0}")]
    Notification(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Other error: {0}")]
    Other(String),
}

impl NetworkError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NetworkError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;

#[must_use]
pub struct TestResult {
    pub test_name: String,
    pub success: bool,
    pub duration: Duration,
    pub details: String,
    pub error: Option<NetworkError>,
}

impl TestResult {
    pub const fn new(test_name: String) -> Self {
        Self {
            test_name,
            success: false,
            duration: Duration::ZERO,
            details: String::new(),
            error: None,
        }
    }

    pub fn success(mut self, duration: Duration, details: String) -> Self {
        self.success = true;
        self.duration = duration;
        self.details = details;
        self
    }

    pub fn failure(mut self, duration: Duration, error: NetworkError) -> Self {
        self.success = false;
        self.duration = duration;
        self.error = Some(error);
        self
    }

    /// A completed probe whose answer was negative, e.g. a closed port or a
    /// resolver that refuses recursion. Not an error, but not a pass either.
    pub fn negative(mut self, duration: Duration, details: String) -> Self {
        self.success = false;
        self.duration = duration;
        self.details = details;
        self
    }
}

pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.2}s", duration.as_secs_f32())
    }
}

/// Formats a signed clock offset such as an NTP skew.
pub fn format_offset(offset: chrono::Duration) -> String {
    let ms = offset.num_milliseconds();
    if ms.abs() < 1000 {
        format!("{ms:+}ms")
    } else {
        format!("{:+.2}s", ms as f64 / 1000.0)
    }
}

pub async fn measure_time<F, Fut, T>(f: F) -> (Duration, T)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f().await;
    let duration = start.elapsed();
    (duration, result)
}

mod tests;
