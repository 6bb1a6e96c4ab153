//! Failure injection for the mock backend
//!
//! Each operation can be told to fail with a given code, to fail only its
//! first N calls, or to stall before answering.

use std::collections::HashMap;
use std::time::Duration;

use attest_protocol::{ErrorCode, Operation, RemoteError};

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Error to return, if any
    pub error: Option<RemoteError>,
    /// Delay before responding
    pub delay: Option<Duration>,
    /// Calls to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Fail with `code`, using the code's default retryability
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: Some(RemoteError::new(code, message)),
            delay: None,
            fail_count: None,
        }
    }

    /// Transient outage
    pub fn unavailable() -> Self {
        Self::error(ErrorCode::Unavailable, "backend temporarily unavailable")
    }

    /// Rate limit with a retry-after hint
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        let mut config = Self::error(ErrorCode::RateLimited, "too many requests");
        config.error = config
            .error
            .map(|e| e.with_retry_after(retry_after_seconds));
        config
    }

    /// Stall without failing
    pub fn delay(duration: Duration) -> Self {
        Self {
            error: None,
            delay: Some(duration),
            fail_count: None,
        }
    }

    /// Fail only the first `count` calls
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    /// Override the error's retryable flag
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.error = self.error.map(|e| e.with_retryable(retryable));
        self
    }
}

/// Per-operation failure injector
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<Operation, FailureConfig>,
    call_counts: HashMap<Operation, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an operation, resetting its call count
    pub fn inject(&mut self, op: Operation, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_op(&mut self, op: Operation) {
        self.configs.remove(&op);
        self.call_counts.remove(&op);
    }

    /// Count a call and return the failure to apply, if any
    pub fn check(&mut self, op: Operation) -> Option<FailureConfig> {
        let config = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;
        if let Some(limit) = config.fail_count {
            if *count > limit {
                return None;
            }
        }
        Some(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_carries_hint() {
        let config = FailureConfig::rate_limited(7);
        let error = config.error.unwrap();
        assert_eq!(error.code, ErrorCode::RateLimited);
        assert_eq!(error.retry_after_seconds, Some(7));
    }

    #[test]
    fn test_injector_basic() {
        let mut injector = FailureInjector::new();
        assert!(injector.check(Operation::Health).is_none());

        injector.inject(
            Operation::UploadBlob,
            FailureConfig::error(ErrorCode::PayloadTooLarge, "too big"),
        );
        let config = injector.check(Operation::UploadBlob).unwrap();
        assert_eq!(config.error.unwrap().code, ErrorCode::PayloadTooLarge);
    }

    #[test]
    fn test_injector_fail_count() {
        let mut injector = FailureInjector::new();
        injector.inject(
            Operation::VerifyDomain,
            FailureConfig::unavailable().with_fail_count(2),
        );
        assert!(injector.check(Operation::VerifyDomain).is_some());
        assert!(injector.check(Operation::VerifyDomain).is_some());
        assert!(injector.check(Operation::VerifyDomain).is_none());
    }

    #[test]
    fn test_injector_clear_op() {
        let mut injector = FailureInjector::new();
        injector.inject(Operation::Health, FailureConfig::unavailable());
        injector.clear_op(Operation::Health);
        assert!(injector.check(Operation::Health).is_none());
    }
}
