use crate::core::{Disposition, GenerationParameters};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfSequence,
    MaxTokens,
    Cancelled,
    TimedOut,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            StopReason::EndOfSequence => "end of sequence",
            StopReason::MaxTokens => "token limit",
            StopReason::Cancelled => "cancelled",
            StopReason::TimedOut => "timed out",
        };
        f.write_str(reason)
    }
}

/// Per-token decisions for one turn: when to publish decoded output and
/// when to stop the stream. Publishing never influences stopping.
pub struct TurnMonitor {
    max_tokens: usize,
    display_every: usize,
    deadline: Option<Instant>,
    cancel: Arc<AtomicBool>,
    reason: Option<StopReason>,
}

impl TurnMonitor {
    pub fn new(parameters: &GenerationParameters, cancel: Arc<AtomicBool>) -> Self {
        Self {
            max_tokens: parameters.max_tokens,
            display_every: parameters.display_every.max(1),
            deadline: parameters.turn_timeout.map(|t| Instant::now() + t),
            cancel,
            reason: None,
        }
    }

    pub fn should_publish(&self, emitted: usize) -> bool {
        emitted % self.display_every == 0
    }

    pub fn observe(&mut self, emitted: usize) -> Disposition {
        let reason = if emitted >= self.max_tokens {
            Some(StopReason::MaxTokens)
        } else if self.cancel.load(Ordering::SeqCst) {
            Some(StopReason::Cancelled)
        } else if self.deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            Some(StopReason::TimedOut)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.reason = Some(reason);
                Disposition::Stop
            }
            None => Disposition::Continue,
        }
    }

    /// Why the stream ended; a stream the monitor never stopped ended on
    /// an end-of-sequence token.
    pub fn reason(&self) -> StopReason {
        self.reason.unwrap_or(StopReason::EndOfSequence)
    }
}
