//! Retrying runner for remote-affecting operations
//!
//! Runs one create-folder or upload command through a [`CommandExecutor`],
//! classifies each attempt, and retries non-zero exits with a linearly
//! growing delay. A name collision reported by the tool is success, never a
//! reason to retry.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ToolError;
use crate::exec::{CommandExecutor, ToolCommand, NO_EXIT_CODE};
use crate::shutdown::ShutdownSignal;

/// Bounded retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the `retry`-th retry (1-based): `base_delay * retry`
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        self.base_delay * retry
    }
}

/// Final classification of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Exit code zero with no already-exists signal
    Succeeded { output: String },
    /// The tool said the target is already there
    AlreadyExists,
    /// Every attempt failed; carries the last attempt's failure
    Exhausted { exit_code: i32, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub attempts: u32,
    pub result: OperationResult,
}

pub struct OperationRunner {
    executor: Arc<dyn CommandExecutor>,
    policy: RetryPolicy,
    already_exists_exit_code: Option<i32>,
    shutdown: ShutdownSignal,
}

impl OperationRunner {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        policy: RetryPolicy,
        already_exists_exit_code: Option<i32>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            executor,
            policy,
            already_exists_exit_code,
            shutdown,
        }
    }

    /// Run `command` until it succeeds, reports already-exists, or runs out of attempts.
    ///
    /// Only an interrupt is returned as `Err`; every other failure, including
    /// a tool that cannot be spawned, counts as a failed attempt.
    pub async fn run(&self, command: &ToolCommand) -> Result<RunReport, ToolError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_failure = (NO_EXIT_CODE, String::new());

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.policy.delay_before_retry(attempt - 1);
                info!(
                    "Retrying in {}s (attempt {}/{}): {}",
                    delay.as_secs_f64(),
                    attempt,
                    max_attempts,
                    command
                );
                self.wait(delay, command).await?;
            }

            match self.executor.execute(command).await {
                Ok(outcome) => {
                    if outcome.already_exists
                        || (!outcome.success()
                            && Some(outcome.exit_code) == self.already_exists_exit_code)
                    {
                        info!("Already exists: {}", command);
                        return Ok(RunReport {
                            attempts: attempt,
                            result: OperationResult::AlreadyExists,
                        });
                    }
                    if outcome.success() {
                        return Ok(RunReport {
                            attempts: attempt,
                            result: OperationResult::Succeeded {
                                output: outcome.output,
                            },
                        });
                    }
                    let error = outcome.error_text(self.executor.timeout());
                    warn!(
                        "Attempt {}/{} failed with exit code {}: {}",
                        attempt, max_attempts, outcome.exit_code, command
                    );
                    last_failure = (outcome.exit_code, error);
                }
                Err(e @ ToolError::Interrupted { .. }) => return Err(e),
                Err(e) => {
                    warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                    last_failure = (NO_EXIT_CODE, e.to_string());
                }
            }
        }

        let (exit_code, error) = last_failure;
        Ok(RunReport {
            attempts: max_attempts,
            result: OperationResult::Exhausted { exit_code, error },
        })
    }

    async fn wait(&self, delay: Duration, command: &ToolCommand) -> Result<(), ToolError> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = shutdown.triggered() => Err(ToolError::Interrupted {
                command: command.to_string(),
            }),
        }
    }
}
