pub mod policy;

pub use policy::{StopReason, TurnMonitor};

use crate::app::events::{Event, EventBus};
use crate::app::loader::ModelLoader;
use crate::core::generation::{self, GenerationParameters, StopTokens};
use crate::core::{GenerationError, Message, TokenId};
use crate::rng::{ClockSeed, SeedSource};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    pub token_count: usize,
    pub tokens_per_second: f64,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(GenerationResult),
    /// Another turn was running; nothing happened.
    Rejected,
    Failed(String),
}

/// Snapshot of the chat as an observer sees it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub running: bool,
    pub output: String,
    pub tokens_per_second: Option<f64>,
    pub last_result: Option<GenerationResult>,
}

/// Bookkeeping for a single turn on the publishing side.
#[derive(Debug)]
pub struct GenerationSession {
    pub id: Uuid,
    pub started_at: Instant,
    last_published: String,
    published_tokens: usize,
}

impl GenerationSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
            last_published: String::new(),
            published_tokens: 0,
        }
    }
}

// Text decoded on the generation thread, on its way to the publisher.
struct OutputUpdate {
    text: String,
    tokens: usize,
}

struct Production {
    tokens: Vec<TokenId>,
    text: String,
    elapsed: Duration,
    stop_reason: StopReason,
}

/// Runs chat turns against one model, at most one at a time.
pub struct Evaluator {
    loader: Arc<ModelLoader>,
    parameters: GenerationParameters,
    seeds: Arc<dyn SeedSource>,
    events: Arc<EventBus>,
    slot: Arc<TurnSlot>,
    cancel: Mutex<Arc<AtomicBool>>,
    history: Mutex<Conversation>,
}

#[derive(Default)]
struct TurnSlot {
    running: AtomicBool,
    state: RwLock<ChatState>,
}

#[derive(Default)]
struct Conversation {
    messages: Vec<Message>,
    resets: u64,
}

// Held by the turn future and by the blocking job producing its tokens.
// The slot frees up when the last holder drops.
struct TurnLease(Arc<TurnSlot>);

impl Drop for TurnLease {
    fn drop(&mut self) {
        self.0.state.write().running = false;
        self.0.running.store(false, Ordering::SeqCst);
    }
}

// Owned by the turn future. Dropping it before the turn finishes stops
// token production at the next token.
struct TurnGuard {
    lease: Arc<TurnLease>,
    cancel: Arc<AtomicBool>,
    finished: bool,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.store(true, Ordering::SeqCst);
        }
    }
}

impl Evaluator {
    pub fn new(loader: Arc<ModelLoader>, events: Arc<EventBus>) -> Self {
        Self {
            loader,
            parameters: GenerationParameters::default(),
            seeds: Arc::new(ClockSeed),
            events,
            slot: Arc::new(TurnSlot::default()),
            cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
            history: Mutex::new(Conversation::default()),
        }
    }

    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_seed_source(mut self, seeds: Arc<dyn SeedSource>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn parameters(&self) -> &GenerationParameters {
        &self.parameters
    }

    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.loader
    }

    pub fn state(&self) -> ChatState {
        self.slot.state.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.slot.running.load(Ordering::SeqCst)
    }

    /// Asks the running turn to stop at its next token.
    pub fn cancel(&self) {
        if self.is_running() {
            self.cancel.lock().store(true, Ordering::SeqCst);
        }
    }

    pub fn history(&self) -> Vec<Message> {
        self.history.lock().messages.clone()
    }

    /// Clears the conversation. A turn still running when this is called
    /// does not add its exchange afterwards.
    pub fn reset(&self) {
        let mut history = self.history.lock();
        history.messages.clear();
        history.resets += 1;
    }

    pub async fn generate(&self, prompt: &str) -> TurnOutcome {
        self.generate_with(prompt, Arc::new(AtomicBool::new(false))).await
    }

    /// Like [`Evaluator::generate`], stopping at the next token once
    /// `cancel` is set. A flag already set when the turn starts ends it
    /// after its first token.
    pub async fn generate_with(&self, prompt: &str, cancel: Arc<AtomicBool>) -> TurnOutcome {
        if self
            .slot
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("turn rejected: generation already running");
            self.events.publish(Event::TurnRejected);
            return TurnOutcome::Rejected;
        }
        let mut turn = TurnGuard {
            lease: Arc::new(TurnLease(Arc::clone(&self.slot))),
            cancel: Arc::clone(&cancel),
            finished: false,
        };
        *self.cancel.lock() = cancel;

        let mut session = GenerationSession::new();
        {
            let mut state = self.slot.state.write();
            state.running = true;
            state.output.clear();
            state.tokens_per_second = None;
        }
        tracing::info!(session = %session.id, "turn started");
        self.events.publish(Event::TurnStarted { session: session.id });

        let outcome = match self.run_turn(&mut session, prompt, &turn).await {
            Ok(result) => {
                {
                    let mut state = self.slot.state.write();
                    state.tokens_per_second = Some(result.tokens_per_second);
                    state.last_result = Some(result.clone());
                }
                self.events.publish(Event::TurnFinished {
                    session: session.id,
                    result: result.clone(),
                });
                TurnOutcome::Completed(result)
            }
            Err(err) => {
                let message = format!("Failed: {}", err);
                self.slot.state.write().output = message.clone();
                self.events.publish(Event::OutputUpdated {
                    session: session.id,
                    text: message,
                    tokens: session.published_tokens,
                });
                self.events.publish(Event::TurnFailed {
                    session: session.id,
                    error: err.to_string(),
                });
                TurnOutcome::Failed(err.to_string())
            }
        };
        turn.finished = true;
        outcome
    }

    async fn run_turn(
        &self,
        session: &mut GenerationSession,
        prompt: &str,
        turn: &TurnGuard,
    ) -> Result<GenerationResult, GenerationError> {
        self.parameters.validate()?;
        let handle = self.loader.load().await?;

        let (messages, resets) = self.conversation_with(prompt, handle.configuration().system_prompt.as_deref());
        let input = handle.prepare(&messages)?;
        let seed = self.seeds.next_seed();
        tracing::debug!(
            session = %session.id,
            prompt_tokens = input.tokens.len(),
            templated = input.templated,
            seed,
            "prompt prepared"
        );

        let sampling = self.parameters.sampling(seed);
        let stop = StopTokens::resolve(
            handle.tokenizer().as_ref(),
            handle
                .configuration()
                .extra_eos_tokens
                .iter()
                .chain(self.parameters.extra_eos_tokens.iter()),
        );
        let mut monitor = TurnMonitor::new(&self.parameters, Arc::clone(&turn.cancel));
        let lease = Arc::clone(&turn.lease);

        let (updates, mut received) = mpsc::unbounded_channel::<OutputUpdate>();
        let job = tokio::task::spawn_blocking(move || -> Result<Production, GenerationError> {
            let _lease = lease;
            let tokenizer = handle.tokenizer();
            let started = Instant::now();

            let tokens = generation::generate(
                &input.tokens,
                &sampling,
                handle.model().as_ref(),
                &stop,
                |prefix| {
                    if monitor.should_publish(prefix.len()) {
                        match tokenizer.decode(prefix) {
                            Ok(text) => {
                                let _ = updates.send(OutputUpdate { text, tokens: prefix.len() });
                            }
                            Err(err) => tracing::warn!("failed to decode partial output: {:#}", err),
                        }
                    }
                    monitor.observe(prefix.len())
                },
            )?;

            let elapsed = started.elapsed();
            let text = tokenizer.decode(&tokens)?;
            Ok(Production {
                tokens,
                text,
                elapsed,
                stop_reason: monitor.reason(),
            })
        });

        while let Some(update) = received.recv().await {
            self.publish_output(session, update.text, update.tokens);
        }

        let production = job
            .await
            .map_err(|e| GenerationError::Interrupted(e.to_string()))??;

        if production.text != session.last_published {
            self.publish_output(session, production.text.clone(), production.tokens.len());
        }

        let token_count = production.tokens.len();
        let seconds = production.elapsed.as_secs_f64();
        let tokens_per_second = if seconds > 0.0 { token_count as f64 / seconds } else { 0.0 };

        tracing::info!(
            session = %session.id,
            tokens = token_count,
            tokens_per_second,
            stop = %production.stop_reason,
            total_ms = session.started_at.elapsed().as_millis() as u64,
            "turn complete"
        );

        self.remember(prompt, &production.text, resets);

        Ok(GenerationResult {
            text: production.text,
            token_count,
            tokens_per_second,
            elapsed: production.elapsed,
            stop_reason: production.stop_reason,
        })
    }

    fn publish_output(&self, session: &mut GenerationSession, text: String, tokens: usize) {
        self.slot.state.write().output = text.clone();
        session.last_published = text.clone();
        session.published_tokens = tokens;
        self.events.publish(Event::OutputUpdated {
            session: session.id,
            text,
            tokens,
        });
    }

    fn conversation_with(&self, prompt: &str, system_prompt: Option<&str>) -> (Vec<Message>, u64) {
        let history = self.history.lock();
        let mut messages = Vec::with_capacity(history.messages.len() + 2);
        if let Some(system) = system_prompt {
            messages.push(Message::system(system));
        }
        messages.extend(history.messages.iter().cloned());
        messages.push(Message::user(prompt));
        (messages, history.resets)
    }

    fn remember(&self, prompt: &str, reply: &str, resets: u64) {
        let mut history = self.history.lock();
        if history.resets != resets {
            tracing::debug!("conversation reset during the turn; exchange not kept");
            return;
        }
        history.messages.push(Message::user(prompt));
        history.messages.push(Message::assistant(reply));
    }
}
