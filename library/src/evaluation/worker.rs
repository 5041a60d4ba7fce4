//! Background execution of evaluation plans.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::thread;

use log::{debug, warn};

use super::plan::{EvaluationPlan, PlanOutcome};
use crate::error::DataflowError;

/// Cooperative cancellation flag shared between the controller and a worker.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

pub(crate) enum WorkerPoll {
    Pending,
    Done(PlanOutcome),
    /// The worker exited without reporting.
    Lost,
}

/// A plan running on its own thread.
pub(crate) struct PlanWorker {
    rx: Receiver<PlanOutcome>,
    token: CancellationToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl PlanWorker {
    pub fn spawn(plan: EvaluationPlan, label: &str) -> Result<Self, DataflowError> {
        let (tx, rx) = channel();
        let token = CancellationToken::new();
        let worker_token = token.clone();

        let handle = thread::Builder::new()
            .name(format!("dataflow-eval-{}", label))
            .spawn(move || {
                let outcome = plan.execute_buffered(&worker_token);
                if tx.send(outcome).is_err() {
                    debug!("Evaluation worker finished after its controller went away");
                }
            })
            .map_err(|e| DataflowError::Worker(e.to_string()))?;

        Ok(Self {
            rx,
            token,
            handle: Some(handle),
        })
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn try_result(&mut self) -> WorkerPoll {
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.join();
                WorkerPoll::Done(outcome)
            }
            Err(TryRecvError::Empty) => WorkerPoll::Pending,
            Err(TryRecvError::Disconnected) => {
                self.join();
                WorkerPoll::Lost
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Evaluation worker thread panicked");
            }
        }
    }
}

impl Drop for PlanWorker {
    fn drop(&mut self) {
        // Detach: the worker notices the flag between steps and exits on its own.
        self.token.cancel();
    }
}
