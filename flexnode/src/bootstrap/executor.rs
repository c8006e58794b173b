//! Sequential step execution with per-mode failure policy.
//!
//! The runner drives an ordered list of steps through a fixed protocol:
//! validate, completion check, execute. Install runs halt on the first
//! failure; cleanup runs attempt every step regardless. Steps execute
//! strictly one at a time because they mutate shared host state (config
//! files, services) that later steps depend on.

use crate::errors::{FlexnodeError, FlexnodeResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Direction of a run, carrying its failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Install direction: halt on the first failed step. A half-provisioned
    /// node is unsafe to keep building on.
    Bootstrap,
    /// Cleanup direction: attempt every step, collecting failures. Cleanup is
    /// best-effort by design.
    Unbootstrap,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Bootstrap => "bootstrap",
            ExecutionMode::Unbootstrap => "unbootstrap",
        }
    }

    /// Whether a failed step halts the run.
    pub fn fails_fast(self) -> bool {
        match self {
            ExecutionMode::Bootstrap => true,
            ExecutionMode::Unbootstrap => false,
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of provisioning or cleanup work.
///
/// Contract for implementers:
/// - `is_completed` is a read-only probe of host state; it must not change
///   future behavior.
/// - `execute` is only called when `is_completed` returned false, and must
///   leave the host such that a repeated run converges (the skip on
///   `is_completed` is the system's idempotence strategy).
/// - `name` is stable across runs; it is used for logs and results, never as
///   a lookup key.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Pre-flight check; a failure here prevents `execute` from running and
    /// counts as a failed step. Steps without pre-conditions inherit this
    /// no-op.
    async fn validate(&self) -> FlexnodeResult<()> {
        Ok(())
    }

    /// Whether the step's end state is already satisfied.
    async fn is_completed(&self) -> bool;

    /// Perform the work.
    async fn execute(&self) -> FlexnodeResult<()>;
}

/// Outcome of one executed step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    pub duration: Duration,
    /// Set exactly when the step ran and failed.
    pub error: Option<String>,
}

impl StepResult {
    fn from_outcome(name: &str, started: Instant, error: Option<String>) -> Self {
        Self {
            step_name: name.to_string(),
            success: error.is_none(),
            duration: started.elapsed(),
            error,
        }
    }
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// True iff every attempted step succeeded.
    pub success: bool,
    /// Number of steps for which an execution attempt was recorded. Steps
    /// skipped as already completed are not counted.
    pub step_count: usize,
    /// Wall-clock span of the whole run.
    pub duration: Duration,
    /// First failure, for fail-fast runs.
    pub error: Option<String>,
    /// Per-step outcomes, in execution order.
    pub step_results: Vec<StepResult>,
}

impl ExecutionResult {
    /// Count of successful steps, for summary logging.
    pub fn successful_steps(&self) -> usize {
        count_successful_steps(&self.step_results)
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} steps succeeded in {:.1}s",
            self.successful_steps(),
            self.step_count,
            self.duration.as_secs_f64()
        )
    }
}

fn count_successful_steps(results: &[StepResult]) -> usize {
    results.iter().filter(|r| r.success).count()
}

/// Runs an ordered step list under a mode's failure policy.
pub struct StepRunner {
    cancel: CancellationToken,
}

impl StepRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Race a step phase against cancellation. A cancelled run surfaces as an
    /// ordinary step failure and is handled under the active mode's policy.
    async fn run_phase<F>(&self, phase: F) -> FlexnodeResult<()>
    where
        F: Future<Output = FlexnodeResult<()>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(FlexnodeError::Cancelled),
            result = phase => result,
        }
    }

    /// Execute `steps` in order under `mode`.
    ///
    /// Returns `Err(FlexnodeError::BootstrapFailed)` carrying the partial
    /// result exactly when the mode fails fast and a step failed; fail-soft
    /// runs always return `Ok`, with failures visible only in the result.
    pub async fn execute_steps(
        &self,
        steps: &[Box<dyn Step>],
        mode: ExecutionMode,
    ) -> FlexnodeResult<ExecutionResult> {
        let run_started = Instant::now();
        let mut step_results: Vec<StepResult> = Vec::new();
        let mut first_error: Option<String> = None;

        tracing::info!(mode = %mode, steps = steps.len(), "starting run");

        for (index, step) in steps.iter().enumerate() {
            let name = step.name();
            let position = format!("{}/{}", index + 1, steps.len());
            let started = Instant::now();

            if self.cancel.is_cancelled() {
                let message = format!("step '{}' not attempted: {}", name, FlexnodeError::Cancelled);
                tracing::warn!(step = name, position = %position, "run cancelled");
                step_results.push(StepResult::from_outcome(name, started, Some(message.clone())));
                first_error.get_or_insert(message);
                if mode.fails_fast() {
                    break;
                }
                continue;
            }

            // Validate phase: a failure counts as a failed step and is
            // subject to the same policy as an execute failure.
            if let Err(e) = self.run_phase(step.validate()).await {
                let message = format!("step '{}' failed validation: {}", name, e);
                tracing::error!(step = name, position = %position, error = %e, "validation failed");
                step_results.push(StepResult::from_outcome(name, started, Some(message.clone())));
                first_error.get_or_insert(message);
                if mode.fails_fast() {
                    break;
                }
                continue;
            }

            // Completion check: a satisfied step is never executed twice and
            // never contributes a failure.
            if step.is_completed().await {
                tracing::info!(step = name, position = %position, "already completed, skipping");
                continue;
            }

            tracing::info!(step = name, position = %position, "executing");
            match self.run_phase(step.execute()).await {
                Ok(()) => {
                    let result = StepResult::from_outcome(name, started, None);
                    tracing::info!(
                        step = name,
                        position = %position,
                        duration_ms = result.duration.as_millis() as u64,
                        "step completed"
                    );
                    step_results.push(result);
                }
                Err(e) => {
                    let message = format!("step '{}' failed: {}", name, e);
                    tracing::error!(step = name, position = %position, error = %e, "step failed");
                    step_results.push(StepResult::from_outcome(name, started, Some(message.clone())));
                    first_error.get_or_insert(message);
                    if mode.fails_fast() {
                        break;
                    }
                }
            }
        }

        let success = first_error.is_none();
        let result = ExecutionResult {
            success,
            step_count: step_results.len(),
            duration: run_started.elapsed(),
            error: first_error,
            step_results,
        };

        if success {
            tracing::info!(mode = %mode, summary = %result, "run succeeded");
        } else {
            tracing::warn!(mode = %mode, summary = %result, "run finished with failures");
        }

        if mode.fails_fast() && !result.success {
            return Err(FlexnodeError::BootstrapFailed(Box::new(result)));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Mock step recording whether it was executed, with configurable
    /// completion, execute failure, and validation failure.
    struct MockStep {
        name: &'static str,
        should_fail: bool,
        is_completed: bool,
        validate_error: Option<&'static str>,
        executed: Arc<AtomicBool>,
    }

    impl MockStep {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                should_fail: false,
                is_completed: false,
                validate_error: None,
                executed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                should_fail: true,
                ..Self::new(name)
            }
        }

        fn completed(name: &'static str) -> Self {
            Self {
                is_completed: true,
                ..Self::new(name)
            }
        }

        fn invalid(name: &'static str, message: &'static str) -> Self {
            Self {
                validate_error: Some(message),
                ..Self::new(name)
            }
        }

        fn executed_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.executed)
        }
    }

    #[async_trait]
    impl Step for MockStep {
        fn name(&self) -> &str {
            self.name
        }

        async fn validate(&self) -> FlexnodeResult<()> {
            match self.validate_error {
                Some(message) => Err(FlexnodeError::Validation(message.to_string())),
                None => Ok(()),
            }
        }

        async fn is_completed(&self) -> bool {
            self.is_completed
        }

        async fn execute(&self) -> FlexnodeResult<()> {
            self.executed.store(true, Ordering::SeqCst);
            if self.should_fail {
                Err(FlexnodeError::Internal("mock execution error".into()))
            } else {
                Ok(())
            }
        }
    }

    fn runner() -> StepRunner {
        StepRunner::new(CancellationToken::new())
    }

    fn boxed(steps: Vec<MockStep>) -> (Vec<Box<dyn Step>>, Vec<Arc<AtomicBool>>) {
        let flags = steps.iter().map(|s| s.executed_flag()).collect();
        let boxed = steps
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn Step>)
            .collect();
        (boxed, flags)
    }

    #[tokio::test]
    async fn all_steps_succeed() {
        let (steps, flags) = boxed(vec![
            MockStep::new("step1"),
            MockStep::new("step2"),
            MockStep::new("step3"),
        ]);

        let result = runner()
            .execute_steps(&steps, ExecutionMode::Bootstrap)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.step_count, 3);
        assert_eq!(result.step_results.len(), 3);
        assert!(result.error.is_none());
        assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_first_failure() {
        let (steps, flags) = boxed(vec![
            MockStep::new("step1"),
            MockStep::failing("step2"),
            MockStep::new("step3"),
        ]);

        let err = runner()
            .execute_steps(&steps, ExecutionMode::Bootstrap)
            .await
            .unwrap_err();

        let FlexnodeError::BootstrapFailed(result) = err else {
            panic!("expected BootstrapFailed");
        };
        assert!(!result.success);
        assert_eq!(result.step_count, 2);
        assert!(result.error.is_some());
        assert!(result.step_results[1].error.is_some());
        // step3 never ran
        assert!(!flags[2].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unbootstrap_continues_past_failures() {
        let (steps, flags) = boxed(vec![
            MockStep::new("step1"),
            MockStep::failing("step2"),
            MockStep::new("step3"),
        ]);

        let result = runner()
            .execute_steps(&steps, ExecutionMode::Unbootstrap)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.step_count, 3);
        assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn completed_steps_are_skipped() {
        let (steps, flags) = boxed(vec![
            MockStep::completed("step1"),
            MockStep::new("step2"),
            MockStep::completed("step3"),
        ]);

        let result = runner()
            .execute_steps(&steps, ExecutionMode::Bootstrap)
            .await
            .unwrap();

        assert!(result.success);
        // skipped steps are not counted as attempts
        assert_eq!(result.step_count, 1);
        assert!(!flags[0].load(Ordering::SeqCst));
        assert!(flags[1].load(Ordering::SeqCst));
        assert!(!flags[2].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn all_completed_rerun_executes_nothing() {
        let (steps, flags) = boxed(vec![
            MockStep::completed("step1"),
            MockStep::completed("step2"),
        ]);

        let result = runner()
            .execute_steps(&steps, ExecutionMode::Bootstrap)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.step_count, 0);
        assert!(flags.iter().all(|f| !f.load(Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn validation_failure_gates_execute_in_bootstrap() {
        let (steps, flags) = boxed(vec![MockStep::invalid("step1", "missing prerequisite")]);

        let err = runner()
            .execute_steps(&steps, ExecutionMode::Bootstrap)
            .await
            .unwrap_err();

        let FlexnodeError::BootstrapFailed(result) = err else {
            panic!("expected BootstrapFailed");
        };
        assert!(!result.success);
        assert_eq!(result.step_count, 1);
        assert!(result.step_results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("validation"));
        assert!(!flags[0].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn validation_failure_gates_execute_in_unbootstrap() {
        let (steps, flags) = boxed(vec![
            MockStep::invalid("step1", "missing prerequisite"),
            MockStep::new("step2"),
        ]);

        let result = runner()
            .execute_steps(&steps, ExecutionMode::Unbootstrap)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.step_count, 2);
        // failed validation never executes, but the run continues
        assert!(!flags[0].load(Ordering::SeqCst));
        assert!(flags[1].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn steps_run_in_list_order() {
        use std::sync::Mutex;

        struct OrderedStep {
            name: &'static str,
            log: Arc<Mutex<Vec<&'static str>>>,
        }

        #[async_trait]
        impl Step for OrderedStep {
            fn name(&self) -> &str {
                self.name
            }
            async fn is_completed(&self) -> bool {
                false
            }
            async fn execute(&self) -> FlexnodeResult<()> {
                self.log.lock().unwrap().push(self.name);
                Ok(())
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let steps: Vec<Box<dyn Step>> = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                Box::new(OrderedStep {
                    name,
                    log: Arc::clone(&log),
                }) as Box<dyn Step>
            })
            .collect();

        runner()
            .execute_steps(&steps, ExecutionMode::Unbootstrap)
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cancelled_token_halts_bootstrap_before_steps() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = StepRunner::new(cancel);

        let (steps, flags) = boxed(vec![MockStep::new("step1"), MockStep::new("step2")]);

        let err = runner
            .execute_steps(&steps, ExecutionMode::Bootstrap)
            .await
            .unwrap_err();

        let FlexnodeError::BootstrapFailed(result) = err else {
            panic!("expected BootstrapFailed");
        };
        assert_eq!(result.step_count, 1);
        assert!(result.step_results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("cancelled"));
        assert!(flags.iter().all(|f| !f.load(Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn cancellation_mid_step_surfaces_as_step_failure() {
        struct HangingStep {
            cancel: CancellationToken,
        }

        #[async_trait]
        impl Step for HangingStep {
            fn name(&self) -> &str {
                "hanging"
            }
            async fn is_completed(&self) -> bool {
                false
            }
            async fn execute(&self) -> FlexnodeResult<()> {
                // cancel our own run, then block
                self.cancel.cancel();
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let cancel = CancellationToken::new();
        let runner = StepRunner::new(cancel.clone());
        let steps: Vec<Box<dyn Step>> = vec![Box::new(HangingStep { cancel })];

        let err = runner
            .execute_steps(&steps, ExecutionMode::Bootstrap)
            .await
            .unwrap_err();

        let FlexnodeError::BootstrapFailed(result) = err else {
            panic!("expected BootstrapFailed");
        };
        assert_eq!(result.step_count, 1);
        assert!(!result.step_results[0].success);
    }

    #[tokio::test]
    async fn aggregation_invariants_hold() {
        let (steps, _) = boxed(vec![
            MockStep::new("step1"),
            MockStep::completed("step2"),
            MockStep::failing("step3"),
            MockStep::new("step4"),
        ]);

        let result = runner()
            .execute_steps(&steps, ExecutionMode::Unbootstrap)
            .await
            .unwrap();

        assert_eq!(result.step_count, result.step_results.len());
        assert_eq!(
            result.success,
            result.step_results.iter().all(|r| r.success)
        );
        assert_eq!(result.successful_steps(), 2);
        for step in &result.step_results {
            assert_eq!(step.error.is_none(), step.success);
        }
    }

    #[test]
    fn mode_policy_is_explicit() {
        assert!(ExecutionMode::Bootstrap.fails_fast());
        assert!(!ExecutionMode::Unbootstrap.fails_fast());
        assert_eq!(ExecutionMode::Bootstrap.as_str(), "bootstrap");
        assert_eq!(ExecutionMode::Unbootstrap.as_str(), "unbootstrap");
    }
}
