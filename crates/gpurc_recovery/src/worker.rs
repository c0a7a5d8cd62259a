//! Deferred interrupt worker.
//!
//! The top half runs on the caller: it drains pending signals through the
//! gate and queues them. A tokio task services the queue, running each
//! recovery on the blocking pool since recovery polls and takes std locks.

use crate::error::{RecoveryError, RecoveryResult};
use crate::gate::{DispatchOutcome, FaultDispatcher};
use gpurc_hal::RawSignal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Totals reported when the worker shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    /// Signals serviced
    pub serviced: u64,
    /// Signals that needed no recovery
    pub benign: u64,
    /// Completed recoveries
    pub recovered: u64,
    /// Failed recoveries
    pub failed: u64,
}

impl WorkerSummary {
    fn record(&mut self, outcome: &DispatchOutcome) {
        self.serviced += 1;
        match outcome {
            DispatchOutcome::Benign => self.benign += 1,
            DispatchOutcome::Recovered(_) => self.recovered += 1,
            DispatchOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Bottom-half worker servicing paused signals in order
#[derive(Debug)]
pub struct IrqWorker {
    dispatcher: Arc<FaultDispatcher>,
    tx: mpsc::UnboundedSender<RawSignal>,
    handle: JoinHandle<WorkerSummary>,
}

impl IrqWorker {
    /// Spawn the worker on the current tokio runtime
    #[must_use]
    pub fn spawn(dispatcher: Arc<FaultDispatcher>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RawSignal>();
        let task_dispatcher = dispatcher.clone();
        let handle = tokio::spawn(async move {
            let mut summary = WorkerSummary::default();
            while let Some(signal) = rx.recv().await {
                let dispatcher = task_dispatcher.clone();
                match tokio::task::spawn_blocking(move || dispatcher.service(signal)).await {
                    Ok(outcome) => summary.record(&outcome),
                    Err(e) => {
                        error!(error = %e, "recovery task panicked");
                        summary.serviced += 1;
                        summary.failed += 1;
                    }
                }
            }
            info!(
                serviced = summary.serviced,
                recovered = summary.recovered,
                "interrupt worker stopped"
            );
            summary
        });
        Self {
            dispatcher,
            tx,
            handle,
        }
    }

    /// Top half: pause and queue every pending signal
    ///
    /// Returns the number of signals queued.
    ///
    /// # Errors
    ///
    /// Returns error if the worker task has stopped
    pub fn on_interrupt(&self) -> RecoveryResult<usize> {
        let mut queued = 0;
        while let Some(signal) = self.dispatcher.isr() {
            self.submit(signal)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Queue a signal whose unit is already paused
    ///
    /// # Errors
    ///
    /// Returns error if the worker task has stopped
    pub fn submit(&self, signal: RawSignal) -> RecoveryResult<()> {
        self.tx
            .send(signal)
            .map_err(|_| RecoveryError::WorkerStopped)
    }

    /// Stop accepting signals, finish the queue and return the totals
    pub async fn shutdown(self) -> WorkerSummary {
        drop(self.tx);
        match self.handle.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "interrupt worker task failed");
                WorkerSummary::default()
            }
        }
    }
}
