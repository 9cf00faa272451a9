//! Reversible multi-step operations.
//!
//! An operation is a linear list of (run, undo) step pairs. `execute` runs
//! each step in order; on the first failure it invokes the compensations of
//! every previously committed step in reverse order. Compensation errors
//! are logged and joined onto the primary error so the root cause is always
//! reported first.

use tracing::{debug, error};

use crate::error::Result;

type StepFn<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

struct Step<'a> {
    name: String,
    run: StepFn<'a>,
    undo: Option<StepFn<'a>>,
}

/// A sequence of reversible steps, executed once.
#[derive(Default)]
pub struct RollbackOp<'a> {
    steps: Vec<Step<'a>>,
}

impl<'a> RollbackOp<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a step with a compensation.
    pub fn step(
        mut self,
        name: impl Into<String>,
        run: impl FnOnce() -> Result<()> + 'a,
        undo: impl FnOnce() -> Result<()> + 'a,
    ) -> Self {
        self.steps.push(Step {
            name: name.into(),
            run: Box::new(run),
            undo: Some(Box::new(undo)),
        });
        self
    }

    /// Append a step without compensation.
    pub fn step_no_undo(
        mut self,
        name: impl Into<String>,
        run: impl FnOnce() -> Result<()> + 'a,
    ) -> Self {
        self.steps.push(Step {
            name: name.into(),
            run: Box::new(run),
            undo: None,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run all steps; on failure, compensate committed steps in reverse.
    pub fn execute(self) -> Result<()> {
        let mut committed: Vec<(String, StepFn<'a>)> = Vec::new();

        for step in self.steps {
            debug!(step = %step.name, "executing step");
            match (step.run)() {
                Ok(()) => {
                    if let Some(undo) = step.undo {
                        committed.push((step.name, undo));
                    }
                }
                Err(mut err) => {
                    error!(step = %step.name, error = %err, "step failed, rolling back");
                    for (name, undo) in committed.into_iter().rev() {
                        if let Err(undo_err) = undo() {
                            error!(step = %name, error = %undo_err, "compensation failed");
                            err = err.join(undo_err);
                        } else {
                            debug!(step = %name, "compensated");
                        }
                    }
                    return Err(err);
                }
            }
        }

        Ok(())
    }
}
