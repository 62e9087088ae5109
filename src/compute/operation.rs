//! Operation polling
//!
//! Every insert or delete returns an [`Operation`]. The call is only complete
//! once that operation has been observed `DONE`; the accepted response alone
//! is never treated as success.

use super::error::ComputeError;
use super::types::Operation;
use super::ComputeClient;
use crate::gcp::client::extract_short_name;
use anyhow::Context;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};

/// Where an operation lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationScope {
    Zone(String),
    Region(String),
    Global,
}

/// Address of an operation resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRef {
    pub project: String,
    pub scope: OperationScope,
    pub name: String,
}

impl OperationRef {
    /// Derive the address from an operation returned by a mutating call
    pub fn for_operation(project: &str, operation: &Operation) -> Self {
        let scope = if let Some(zone) = operation.zone.as_deref() {
            OperationScope::Zone(extract_short_name(zone).to_string())
        } else if let Some(region) = operation.region.as_deref() {
            OperationScope::Region(extract_short_name(region).to_string())
        } else {
            OperationScope::Global
        };

        Self {
            project: project.to_string(),
            scope,
            name: operation.name.clone(),
        }
    }

    /// Path below `projects/{project}/`
    pub fn path(&self) -> String {
        match &self.scope {
            OperationScope::Zone(zone) => format!("zones/{}/operations/{}", zone, self.name),
            OperationScope::Region(region) => {
                format!("regions/{}/operations/{}", region, self.name)
            }
            OperationScope::Global => format!("global/operations/{}", self.name),
        }
    }
}

/// How long to wait between polls, and for how long overall
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Interval multiplier after each poll (values below 1.0 are treated as 1.0)
    pub backoff_factor: f64,
    /// `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            backoff_factor: 1.5,
            timeout: Some(Duration::from_secs(10 * 60)),
        }
    }
}

impl PollPolicy {
    /// Constant interval, no time limit
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            backoff_factor: 1.0,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Interval before the first poll, never above the cap
    pub fn first_interval(&self) -> Duration {
        self.initial_interval.min(self.max_interval)
    }

    /// Interval to use after waiting `current`
    pub fn next_interval(&self, current: Duration) -> Duration {
        let current = current.min(self.max_interval);
        let factor = if self.backoff_factor.is_finite() {
            self.backoff_factor.max(1.0)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .unwrap_or(self.max_interval)
            .max(current)
            .min(self.max_interval)
    }
}

impl ComputeClient {
    /// Fetch the current state of an operation
    pub async fn get_operation(&self, op_ref: &OperationRef) -> Result<Operation, ComputeError> {
        let url = self.gcp.compute_project_url(&op_ref.project, &op_ref.path());
        let value = self.gcp.get(&url).await?;
        let operation = serde_json::from_value(value).context("Malformed operation resource")?;
        Ok(operation)
    }

    /// Wait for an operation returned by a mutating call
    ///
    /// An operation that is already `DONE` resolves without a request.
    pub async fn wait_for_operation(&self, submitted: Operation) -> Result<Operation, ComputeError> {
        if submitted.is_done() {
            return finish(submitted);
        }

        let op_ref = OperationRef::for_operation(&self.gcp.project_id, &submitted);
        self.poll_until_done(&op_ref).await
    }

    /// Poll an operation until it is `DONE` or the policy's time limit passes
    ///
    /// The deadline covers the waits and the requests themselves, so a stalled
    /// GET still ends in [`ComputeError::PollTimeout`]. The error list is only
    /// looked at once the operation is `DONE`.
    pub async fn poll_until_done(&self, op_ref: &OperationRef) -> Result<Operation, ComputeError> {
        let policy = self.poll_policy;
        let started = Instant::now();
        let deadline = policy.timeout.and_then(|limit| started.checked_add(limit));
        let mut interval = policy.first_interval();
        let mut attempts: u32 = 0;

        loop {
            let step = async {
                sleep(interval).await;
                self.get_operation(op_ref).await
            };
            let operation = match deadline {
                Some(deadline) => match timeout_at(deadline, step).await {
                    Ok(result) => result?,
                    Err(_) => return Err(timed_out(op_ref, started, attempts)),
                },
                None => step.await?,
            };

            attempts += 1;
            tracing::debug!(
                "Operation {} poll #{}: {:?}",
                op_ref.name,
                attempts,
                operation.status
            );

            if operation.is_done() {
                return finish(operation);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(timed_out(op_ref, started, attempts));
            }

            interval = policy.next_interval(interval);
        }
    }
}

fn timed_out(op_ref: &OperationRef, started: Instant, attempts: u32) -> ComputeError {
    let elapsed = started.elapsed();
    tracing::warn!(
        "Gave up on operation {} after {:?} ({} polls)",
        op_ref.name,
        elapsed,
        attempts
    );
    ComputeError::PollTimeout {
        operation: op_ref.name.clone(),
        attempts,
        elapsed,
    }
}

fn finish(operation: Operation) -> Result<Operation, ComputeError> {
    match operation.into_result() {
        Ok(operation) => {
            tracing::info!("Operation {} completed", operation.name);
            Ok(operation)
        }
        Err(err) => {
            tracing::warn!("Operation {} finished with errors", err.operation);
            Err(ComputeError::Operation(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::types::OperationStatus;

    fn op(zone: Option<&str>, region: Option<&str>) -> Operation {
        Operation {
            name: "operation-42".to_string(),
            status: OperationStatus::Pending,
            zone: zone.map(String::from),
            region: region.map(String::from),
            operation_type: Some("insert".to_string()),
            target_link: None,
            error: None,
        }
    }

    #[test]
    fn test_operation_ref_scopes() {
        let zonal = OperationRef::for_operation(
            "p",
            &op(Some("https://www.googleapis.com/compute/v1/projects/p/zones/us-east1-b"), None),
        );
        assert_eq!(zonal.scope, OperationScope::Zone("us-east1-b".to_string()));
        assert_eq!(zonal.path(), "zones/us-east1-b/operations/operation-42");

        let regional = OperationRef::for_operation("p", &op(None, Some("regions/us-east1")));
        assert_eq!(regional.path(), "regions/us-east1/operations/operation-42");

        let global = OperationRef::for_operation("p", &op(None, None));
        assert_eq!(global.scope, OperationScope::Global);
        assert_eq!(global.path(), "global/operations/operation-42");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = PollPolicy::default();
        let mut interval = policy.initial_interval;
        let mut seen = vec![interval];
        for _ in 0..10 {
            interval = policy.next_interval(interval);
            seen.push(interval);
        }

        assert_eq!(seen[1], Duration::from_millis(1500));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), policy.max_interval);
    }

    #[test]
    fn test_initial_interval_above_cap_is_clamped() {
        let policy = PollPolicy {
            initial_interval: Duration::from_secs(30),
            ..PollPolicy::default()
        };

        assert_eq!(policy.first_interval(), policy.max_interval);
        assert_eq!(policy.next_interval(policy.first_interval()), policy.max_interval);
        assert_eq!(policy.next_interval(Duration::from_secs(30)), policy.max_interval);
    }

    #[test]
    fn test_huge_intervals_do_not_overflow() {
        let policy = PollPolicy {
            initial_interval: Duration::from_secs(u64::MAX),
            max_interval: Duration::from_secs(u64::MAX),
            backoff_factor: 1.5,
            timeout: None,
        };

        assert_eq!(policy.next_interval(policy.first_interval()), policy.max_interval);
    }

    #[test]
    fn test_fixed_policy_never_changes() {
        let policy = PollPolicy::fixed(Duration::from_secs(1));
        assert_eq!(policy.next_interval(Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(policy.timeout, None);
    }

    #[test]
    fn test_shrinking_factor_is_clamped() {
        let policy = PollPolicy {
            backoff_factor: 0.5,
            ..PollPolicy::fixed(Duration::from_millis(100))
        };
        assert_eq!(
            policy.next_interval(Duration::from_millis(100)),
            Duration::from_millis(100)
        );
    }
}
