use crate::app::runner::{Evaluator, TurnOutcome};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("a turn is already in progress")]
    Busy,

    #[error("chat worker has stopped")]
    Closed,
}

struct TurnRequest {
    prompt: String,
    cancel: Arc<AtomicBool>,
    reply: oneshot::Sender<TurnOutcome>,
}

/// Front door for turns coming from a UI. Holds at most one turn, queued
/// or running; anything submitted meanwhile is turned away immediately.
#[derive(Clone)]
pub struct ChatWorker {
    requests: mpsc::Sender<TurnRequest>,
    busy: Arc<AtomicBool>,
    // Cancel flag of the most recently accepted turn.
    current: Arc<Mutex<Arc<AtomicBool>>>,
}

impl ChatWorker {
    pub fn spawn(evaluator: Arc<Evaluator>) -> (Self, JoinHandle<()>) {
        let (requests, mut incoming) = mpsc::channel::<TurnRequest>(1);
        let busy = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn({
            let busy = Arc::clone(&busy);
            async move {
                while let Some(request) = incoming.recv().await {
                    let outcome = evaluator.generate_with(&request.prompt, request.cancel).await;
                    busy.store(false, Ordering::SeqCst);
                    if request.reply.send(outcome).is_err() {
                        tracing::debug!("turn finished after its submitter went away");
                    }
                }
                tracing::debug!("chat worker stopped");
            }
        });

        let current = Arc::new(Mutex::new(Arc::new(AtomicBool::new(false))));
        (
            Self {
                requests,
                busy,
                current,
            },
            task,
        )
    }

    /// Queues `prompt`. The receiver resolves when the turn ends.
    pub fn submit(&self, prompt: impl Into<String>) -> Result<oneshot::Receiver<TurnOutcome>, SubmitError> {
        let mut current = self.current.lock();
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SubmitError::Busy);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (reply, outcome) = oneshot::channel();
        let request = TurnRequest {
            prompt: prompt.into(),
            cancel: Arc::clone(&cancel),
            reply,
        };
        match self.requests.try_send(request) {
            Ok(()) => {
                *current = cancel;
                Ok(outcome)
            }
            Err(err) => {
                self.busy.store(false, Ordering::SeqCst);
                match err {
                    mpsc::error::TrySendError::Full(_) => Err(SubmitError::Busy),
                    mpsc::error::TrySendError::Closed(_) => Err(SubmitError::Closed),
                }
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Cancels the accepted turn, if any, whether it is still queued or
    /// already running.
    pub fn cancel(&self) {
        let current = self.current.lock();
        if self.is_busy() {
            current.store(true, Ordering::SeqCst);
        }
    }
}
