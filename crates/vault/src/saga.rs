//! Multi-step writes across stores that can't share a transaction.
//!
//! Each step that leaves something behind registers a compensation. When a
//! later step fails, the recorded compensations run newest first and the
//! step's error is returned untouched. Compensations are best effort: their
//! failures are logged, never returned.

use crate::error::Result;
use futures::future::BoxFuture;
use tracing::{debug, error};

pub(crate) struct Saga<'a> {
    name: &'static str,
    compensations: Vec<(&'static str, BoxFuture<'a, Result<()>>)>,
}

impl<'a> Saga<'a> {
    pub fn new(name: &'static str) -> Self {
        Self { name, compensations: Vec::new() }
    }

    /// Run a step that has nothing to undo.
    pub async fn run<T>(&mut self, step: &'static str, action: impl Future<Output = Result<T>>) -> Result<T> {
        match action.await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.unwind(step).await;
                Err(e)
            },
        }
    }

    /// Run a step and, if it succeeds, remember how to undo it.
    ///
    /// The compensation is built from the step's output but only polled if
    /// a later step fails.
    pub async fn run_compensable<T>(
        &mut self,
        step: &'static str,
        action: impl Future<Output = Result<T>>,
        compensation: impl FnOnce(&T) -> BoxFuture<'a, Result<()>>,
    ) -> Result<T> {
        let value = self.run(step, action).await?;
        self.compensations.push((step, compensation(&value)));
        Ok(value)
    }

    /// Keep every effect; nothing will be undone from here on.
    pub fn commit(mut self) {
        self.compensations.clear();
    }

    async fn unwind(&mut self, failed: &'static str) {
        while let Some((step, compensation)) = self.compensations.pop() {
            match compensation.await {
                Ok(()) => debug!(saga = self.name, step, failed, "compensated"),
                Err(e) => error!(saga = self.name, step, failed, error = ?e, "compensation failed"),
            }
        }
    }
}
