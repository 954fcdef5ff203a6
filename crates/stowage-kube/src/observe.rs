//! Install and uninstall timing hooks
//!
//! Monitoring records how long components take to install and uninstall.
//! The operator wraps those boundaries in a [`LifecycleTimer`] and reports
//! through a [`LifecycleObserver`]; exporting the numbers is left to the
//! observer implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

/// Lifecycle boundary being measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOperation {
    Install,
    Uninstall,
}

impl LifecycleOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Receives one sample per measured boundary
pub trait LifecycleObserver: Send + Sync {
    fn record(&self, component: &str, operation: LifecycleOperation, outcome: Outcome, elapsed: Duration);
}

/// Observer emitting each sample as a tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn record(&self, component: &str, operation: LifecycleOperation, outcome: Outcome, elapsed: Duration) {
        info!(
            component,
            operation = operation.as_str(),
            outcome = outcome.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "lifecycle"
        );
    }
}

/// Measures one install or uninstall
pub struct LifecycleTimer {
    observer: Arc<dyn LifecycleObserver>,
    component: String,
    operation: LifecycleOperation,
    started: Instant,
}

impl LifecycleTimer {
    pub fn start(observer: Arc<dyn LifecycleObserver>, component: impl Into<String>, operation: LifecycleOperation) -> Self {
        Self {
            observer,
            component: component.into(),
            operation,
            started: Instant::now(),
        }
    }

    /// Report the elapsed time, classifying by `result`
    pub fn finish<T, E>(self, result: &Result<T, E>) {
        let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Failure };
        self.observer
            .record(&self.component, self.operation, outcome, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        samples: Mutex<Vec<(String, LifecycleOperation, Outcome)>>,
    }

    impl LifecycleObserver for RecordingObserver {
        fn record(&self, component: &str, operation: LifecycleOperation, outcome: Outcome, _elapsed: Duration) {
            self.samples
                .lock()
                .unwrap()
                .push((component.to_string(), operation, outcome));
        }
    }

    #[test]
    fn test_timer_reports_outcome() {
        let observer = Arc::new(RecordingObserver::default());

        LifecycleTimer::start(observer.clone(), "metrics", LifecycleOperation::Install).finish(&Ok::<(), ()>(()));
        LifecycleTimer::start(observer.clone(), "metrics", LifecycleOperation::Uninstall).finish(&Err::<(), _>("boom"));

        let samples = observer.samples.lock().unwrap();
        assert_eq!(
            *samples,
            vec![
                ("metrics".to_string(), LifecycleOperation::Install, Outcome::Success),
                ("metrics".to_string(), LifecycleOperation::Uninstall, Outcome::Failure),
            ]
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(LifecycleOperation::Install.as_str(), "install");
        assert_eq!(Outcome::Failure.as_str(), "failure");
    }
}
