use crate::app::runner::GenerationResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ModelLoading { model: String, progress: f64 },
    ModelLoaded { model: String },
    ModelLoadFailed { model: String, error: String },
    ModelUnloaded { model: String },
    TurnStarted { session: Uuid },
    TurnRejected,
    /// Decoded output so far; `tokens` is the sequence length it covers.
    OutputUpdated { session: Uuid, text: String, tokens: usize },
    TurnFinished { session: Uuid, result: GenerationResult },
    TurnFailed { session: Uuid, error: String },
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
    fn name(&self) -> &str;
}

pub type HandlerId = usize;

/// Publish/subscribe hub between the model/turn machinery and whatever
/// presents it. Handlers run synchronously on the publishing task.
#[allow(clippy::type_complexity)]
pub struct EventBus {
    handlers: RwLock<HashMap<HandlerId, (String, Arc<dyn EventHandler>)>>,
    callbacks: RwLock<HashMap<String, Vec<EventCallback>>>,
    next_id: RwLock<HandlerId>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
            next_id: RwLock::new(0),
        }
    }

    pub fn subscribe<H: EventHandler + 'static>(&self, handler: H) -> HandlerId {
        self.subscribe_shared(Arc::new(handler))
    }

    pub fn subscribe_shared(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let handler_id = {
            let mut id = self.next_id.write();
            *id += 1;
            *id
        };

        let name = handler.name().to_string();
        self.handlers.write().insert(handler_id, (name, handler));

        handler_id
    }

    pub fn subscribe_to(&self, event_type: &str, callback: EventCallback) {
        self.callbacks
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(callback);
    }

    pub fn unsubscribe(&self, handler_id: HandlerId) {
        self.handlers.write().remove(&handler_id);
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().values().map(|(n, _)| n.clone()).collect();
        names.sort();
        names
    }

    pub fn publish(&self, event: Event) {
        let handlers: Vec<Arc<dyn EventHandler>> =
            self.handlers.read().values().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler.handle(&event);
        }

        let event_type = event_type_name(&event);
        if let Some(callbacks) = self.callbacks.read().get(event_type) {
            for callback in callbacks {
                callback(&event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn event_type_name(event: &Event) -> &'static str {
    match event {
        Event::ModelLoading { .. } => "model_loading",
        Event::ModelLoaded { .. } => "model_loaded",
        Event::ModelLoadFailed { .. } => "model_load_failed",
        Event::ModelUnloaded { .. } => "model_unloaded",
        Event::TurnStarted { .. } => "turn_started",
        Event::TurnRejected => "turn_rejected",
        Event::OutputUpdated { .. } => "output_updated",
        Event::TurnFinished { .. } => "turn_finished",
        Event::TurnFailed { .. } => "turn_failed",
    }
}

pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &Event) {
        match event {
            Event::OutputUpdated { tokens, .. } => tracing::trace!(tokens, "output updated"),
            Event::ModelLoading { model, progress } => tracing::debug!(%model, progress, "loading"),
            Event::ModelLoadFailed { model, error } => tracing::warn!(%model, %error, "model load failed"),
            Event::TurnFailed { session, error } => tracing::warn!(%session, %error, "turn failed"),
            Event::TurnFinished { session, result } => tracing::info!(
                %session,
                tokens = result.token_count,
                tokens_per_second = result.tokens_per_second,
                "turn finished"
            ),
            other => tracing::info!("event: {:?}", other),
        }
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Keeps every event it sees; handy for observers that poll.
#[derive(Default)]
pub struct RecordingHandler {
    events: parking_lot::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_and_callbacks() {
        let bus = EventBus::new();
        let recorder = Arc::new(RecordingHandler::new());
        let id = bus.subscribe_shared(recorder.clone());

        let loaded = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loaded);
        bus.subscribe_to("model_loaded", Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish(Event::ModelLoaded { model: "m".to_string() });
        bus.publish(Event::TurnRejected);

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(loaded.load(Ordering::SeqCst), 1);

        bus.unsubscribe(id);
        bus.publish(Event::ModelLoaded { model: "m".to_string() });
        assert_eq!(recorder.events().len(), 2);
        assert_eq!(loaded.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_names() {
        let bus = EventBus::new();
        bus.subscribe(LoggingHandler);
        bus.subscribe(RecordingHandler::new());
        assert_eq!(bus.handler_names(), vec!["logging".to_string(), "recording".to_string()]);
    }
}
