//! Bounded-parallel execution of one stage's analyzers
//!
//! Results come back indexed by the caller's name order, never in
//! completion order. Every name yields exactly one result: tasks that never
//! start (stop-on-error, cancellation) or that panic get an error
//! placeholder.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::models::{AnalyzerResult, AnalyzerStatus};

/// Hooks fired around each task, outside the task's own retry loop
#[async_trait]
pub trait StageObserver: Send + Sync {
    /// Task holds a concurrency slot and is about to run
    async fn task_started(&self, analyzer: &str);

    /// Task produced its result (including placeholders), before the
    /// stage as a whole is joined
    async fn task_finished(&self, result: &AnalyzerResult);
}

/// Runs tasks with a counting semaphore of `max_concurrency` slots
pub struct StageRunner {
    max_concurrency: usize,
    stop_on_error: bool,
    cancel: CancellationToken,
    observer: Option<Arc<dyn StageObserver>>,
}

impl StageRunner {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            stop_on_error: false,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    /// After the first error result, start no further tasks
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Tasks not yet started when `cancel` fires are skipped
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run one task per name; the i-th result belongs to the i-th name
    ///
    /// `task_factory` is called once per name up front; the returned future
    /// is not polled until a slot is free.
    pub async fn run_stage<F, Fut>(&self, names: &[String], task_factory: F) -> Vec<AnalyzerResult>
    where
        F: Fn(usize, String) -> Fut,
        Fut: Future<Output = AnalyzerResult> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let halted = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(names.len());

        for (index, name) in names.iter().enumerate() {
            let task = task_factory(index, name.clone());
            let semaphore = Arc::clone(&semaphore);
            let halted = Arc::clone(&halted);
            let cancel = self.cancel.clone();
            let observer = self.observer.clone();
            let stop_on_error = self.stop_on_error;
            let name = name.clone();

            handles.push(tokio::spawn(async move {
                // Held until the finish hook has run
                let permit = semaphore.acquire_owned().await;

                let result = if permit.is_err() {
                    AnalyzerResult::failed(name, "Not started: stage runner closed")
                } else if halted.load(Ordering::SeqCst) {
                    AnalyzerResult::failed(name, "Not started: an earlier analyzer in this stage failed")
                } else if cancel.is_cancelled() {
                    AnalyzerResult::failed(name, "Not started: job cancelled")
                } else {
                    if let Some(observer) = &observer {
                        observer.task_started(&name).await;
                    }

                    let mut result = task.await;
                    result.analyzer_name = name;

                    if stop_on_error && result.status == AnalyzerStatus::Error {
                        halted.store(true, Ordering::SeqCst);
                    }
                    result
                };

                if let Some(observer) = &observer {
                    observer.task_finished(&result).await;
                }
                result
            }));
        }

        let joined = futures::future::join_all(handles).await;

        let mut results = Vec::with_capacity(names.len());
        for (outcome, name) in joined.into_iter().zip(names) {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(analyzer = %name, error = %e, "Analyzer task aborted");
                    let placeholder =
                        AnalyzerResult::failed(name.clone(), format!("Analyzer task aborted: {}", e));
                    // A panicked task never reached its own finish hook
                    if let Some(observer) = &self.observer {
                        observer.task_finished(&placeholder).await;
                    }
                    placeholder
                }
            };
            results.push(result);
        }
        results
    }
}
