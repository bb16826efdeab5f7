use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::process::Command;
use tokio::time::timeout;
use uplink::{CheckResult, Target};

/// Type of monitoring check to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    Http,
    Ping,
}

impl CheckType {
    /// `ping://` addresses get a reachability check, everything else HTTP
    pub fn for_target(target: &Target) -> Self {
        if target.ping_host().is_some() { CheckType::Ping } else { CheckType::Http }
    }
}

/// Checker trait for different types of monitoring checks
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Perform one check. Every failure is captured in the returned result.
    async fn check(&self, target: &Target) -> CheckResult;
}

/// HTTP/HTTPS availability checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).user_agent(user_agent).build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, target: &Target) -> CheckResult {
        let start = Instant::now();
        let result = CheckResult::new(target.id);

        let request = match self.client.get(&target.address).build() {
            Ok(request) => request,
            Err(e) => {
                let elapsed = start.elapsed().as_secs_f64();
                return result
                    .failure(Some(elapsed), None, format!("Failed to create request: {e}"))
                    .completed();
            }
        };

        let response = self.client.execute(request).await;
        let elapsed = start.elapsed().as_secs_f64();

        let result = match response {
            Ok(response) => {
                let code = response.status().as_u16();
                if code < 400 {
                    result.success(elapsed, Some(i32::from(code)))
                } else {
                    result.failure(Some(elapsed), Some(i32::from(code)), format!("HTTP {code}"))
                }
            }
            Err(e) => result.failure(Some(elapsed), None, format!("Request failed: {e}")),
        };

        result.completed()
    }
}

/// Reachability checker backed by the system `ping` utility
pub struct PingChecker {
    timeout_duration: Duration,
}

impl PingChecker {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { timeout_duration }
    }

    fn command(&self, host: &str) -> Command {
        let mut command = Command::new("ping");
        if cfg!(windows) {
            let millis = self.timeout_duration.as_millis().max(1).to_string();
            command.args(["-n", "1", "-w", millis.as_str(), host]);
        } else {
            let secs = self.timeout_duration.as_secs().max(1).to_string();
            command.args(["-c", "1", "-W", secs.as_str(), host]);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }
}

#[async_trait::async_trait]
impl Checker for PingChecker {
    async fn check(&self, target: &Target) -> CheckResult {
        let start = Instant::now();
        let result = CheckResult::new(target.id);
        let host = target.ping_host().unwrap_or(&target.address);

        if host.is_empty() || host.starts_with('-') || host.contains(char::is_whitespace) {
            let elapsed = start.elapsed().as_secs_f64();
            return result
                .failure(Some(elapsed), None, format!("Ping failed: invalid host {host:?}"))
                .completed();
        }

        // ping's own deadline normally fires first
        let deadline = self.timeout_duration + Duration::from_secs(1);
        let output = timeout(deadline, self.command(host).output()).await;
        let elapsed = start.elapsed().as_secs_f64();

        let result = match output {
            Err(_) => result.failure(
                Some(elapsed),
                None,
                format!("Ping failed: no reply within {}s", deadline.as_secs()),
            ),
            Ok(Err(e)) => result.failure(Some(elapsed), None, format!("Ping failed: {e}")),
            Ok(Ok(output)) if !output.status.success() => {
                let code = output.status.code();
                let reason = match code {
                    Some(code) => format!("Ping failed: exit status {code}"),
                    None => "Ping failed: terminated by signal".to_string(),
                };
                result.failure(Some(elapsed), code, reason)
            }
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let response_time = parse_round_trip(&stdout).map_or(elapsed, |ms| ms / 1000.0);
                result.success(response_time, output.status.code())
            }
        };

        result.completed()
    }
}

/// Round-trip time in milliseconds from ping output (`time=12.3ms`,
/// `time=12.3 ms` or `time<1ms`)
pub fn parse_round_trip(output: &str) -> Option<f64> {
    output.match_indices("time").find_map(|(index, _)| {
        let rest = &output[index + "time".len()..];
        let rest = rest.strip_prefix('=').or_else(|| rest.strip_prefix('<'))?;

        let end = rest.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(rest.len());
        let (number, unit) = rest.split_at(end);
        if !unit.trim_start_matches(' ').starts_with("ms") {
            return None;
        }
        number.parse().ok()
    })
}
