pub mod events;
pub mod loader;
pub mod runner;
pub mod worker;

pub use events::{Event, EventBus, EventHandler, LoggingHandler, RecordingHandler};
pub use loader::{LoadState, LocalSource, ModelLoader, ModelSource};
pub use runner::{ChatState, Evaluator, GenerationResult, GenerationSession, StopReason, TurnOutcome};
pub use worker::{ChatWorker, SubmitError};
