//! Ordered step log for multi-step kernel mutations
//!
//! The kernel offers no transactions, so every operation records the steps
//! it applied. Creation runs steps in abort mode ([`StepLog::run`]);
//! teardown runs them in continue mode ([`StepLog::attempt`]).

use crate::error::{Error, Result};
use crate::fabric::Operation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Failed(String),
    Skipped(String),
}

/// One named step and how it ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug)]
pub struct StepLog {
    operation: Operation,
    target: String,
    records: Vec<StepRecord>,
}

impl StepLog {
    pub fn new(operation: Operation, target: impl Into<String>) -> Self {
        Self {
            operation,
            target: target.into(),
            records: Vec::new(),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run a step; on failure stop with `StepFailed` naming the step and
    /// everything completed before it
    pub fn run<T>(&mut self, step: impl Into<String>, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let step = step.into();
        match f() {
            Ok(value) => {
                self.done(step);
                Ok(value)
            }
            Err(e) => Err(Error::StepFailed {
                operation: self.operation,
                target: self.target.clone(),
                step,
                completed: self.completed(),
                source: Box::new(e),
            }),
        }
    }

    /// Run a best-effort step; failures are recorded and never stop the caller
    pub fn attempt<T>(
        &mut self,
        step: impl Into<String>,
        f: impl FnOnce() -> Result<T>,
    ) -> Option<T> {
        let step = step.into();
        match f() {
            Ok(value) => {
                self.done(step);
                Some(value)
            }
            Err(e) => {
                tracing::warn!(
                    operation = %self.operation,
                    target = %self.target,
                    step = %step,
                    error = %e,
                    "step failed, continuing"
                );
                self.records.push(StepRecord {
                    name: step,
                    status: StepStatus::Failed(e.to_string()),
                });
                None
            }
        }
    }

    /// Record a step that was deliberately not performed
    pub fn skip(&mut self, step: impl Into<String>, reason: impl Into<String>) {
        let (step, reason) = (step.into(), reason.into());
        tracing::warn!(
            operation = %self.operation,
            target = %self.target,
            step = %step,
            reason = %reason,
            "step skipped"
        );
        self.records.push(StepRecord {
            name: step,
            status: StepStatus::Skipped(reason),
        });
    }

    fn done(&mut self, step: String) {
        tracing::info!(operation = %self.operation, target = %self.target, step = %step, "done");
        self.records.push(StepRecord {
            name: step,
            status: StepStatus::Done,
        });
    }

    /// Names of completed steps, in order
    pub fn completed(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.status == StepStatus::Done)
            .map(|r| r.name.clone())
            .collect()
    }

    /// `step: error` for every failed or skipped step
    pub fn failures(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| match &r.status {
                StepStatus::Done => None,
                StepStatus::Failed(why) | StepStatus::Skipped(why) => {
                    Some(format!("{}: {}", r.name, why))
                }
            })
            .collect()
    }

    pub fn into_records(self) -> Vec<StepRecord> {
        self.records
    }
}
