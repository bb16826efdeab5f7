use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use uplink::{CheckResult, Target};

use super::checker::{CheckType, Checker, HttpChecker, PingChecker};

/// Monitoring executor - runs the check matching each target's address
pub struct MonitoringExecutor {
    http_checker: Arc<HttpChecker>,
    ping_checker: Arc<PingChecker>,
}

impl MonitoringExecutor {
    /// Create a new monitoring executor
    pub fn new(probe_timeout: Duration, ping_timeout: Duration, user_agent: &str) -> Result<Self> {
        Ok(Self {
            http_checker: Arc::new(HttpChecker::new(probe_timeout, user_agent)?),
            ping_checker: Arc::new(PingChecker::new(ping_timeout)),
        })
    }

    /// Execute a monitoring check
    pub async fn execute_check(&self, target: &Target) -> CheckResult {
        let checker: &dyn Checker = match CheckType::for_target(target) {
            CheckType::Http => self.http_checker.as_ref(),
            CheckType::Ping => self.ping_checker.as_ref(),
        };

        checker.check(target).await
    }
}

#[async_trait::async_trait]
impl Checker for MonitoringExecutor {
    async fn check(&self, target: &Target) -> CheckResult {
        self.execute_check(target).await
    }
}
