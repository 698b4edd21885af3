pub mod source;

pub use source::{LocalSource, ModelSource};

use crate::app::events::{Event, EventBus};
use crate::core::{LoadError, ModelConfiguration, ModelFactory, ModelHandle};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Unloaded,
    Loading(f64),
    Ready(ModelHandle),
    Failed(LoadError),
}

impl LoadState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }

    pub fn progress(&self) -> Option<f64> {
        match self {
            LoadState::Loading(p) => Some(*p),
            LoadState::Ready(_) => Some(1.0),
            _ => None,
        }
    }
}

/// Owns the load state of one model configuration.
///
/// `load` is single flight: concurrent callers wait for the attempt in
/// progress and share its outcome. A failed attempt is never retried on the
/// caller's behalf; the next call after the failure starts a new one.
pub struct ModelLoader {
    configuration: ModelConfiguration,
    source: Arc<dyn ModelSource>,
    factory: Arc<ModelFactory>,
    events: Arc<EventBus>,
    state: RwLock<LoadState>,
    gate: tokio::sync::Mutex<()>,
    completed: AtomicU64,
}

impl ModelLoader {
    pub fn new(
        configuration: ModelConfiguration,
        source: Arc<dyn ModelSource>,
        factory: Arc<ModelFactory>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            configuration,
            source,
            factory,
            events,
            state: RwLock::new(LoadState::Unloaded),
            gate: tokio::sync::Mutex::new(()),
            completed: AtomicU64::new(0),
        }
    }

    pub fn configuration(&self) -> &ModelConfiguration {
        &self.configuration
    }

    pub fn state(&self) -> LoadState {
        self.state.read().clone()
    }

    pub async fn load(&self) -> Result<ModelHandle, LoadError> {
        let seen = self.completed.load(Ordering::SeqCst);
        if let LoadState::Ready(handle) = self.state() {
            return Ok(handle);
        }

        let _gate = self.gate.lock().await;
        if let Some(outcome) = self.settled(seen) {
            return outcome;
        }

        tracing::info!(model = %self.configuration.id, "loading model");
        self.set_state(LoadState::Loading(0.0));
        self.events.publish(Event::ModelLoading {
            model: self.configuration.id.clone(),
            progress: 0.0,
        });

        let result = self.attempt().await;
        match &result {
            Ok(handle) => {
                self.set_state(LoadState::Ready(handle.clone()));
                tracing::info!(model = %self.configuration.id, "model ready");
                self.events.publish(Event::ModelLoaded {
                    model: self.configuration.id.clone(),
                });
            }
            Err(err) => {
                self.set_state(LoadState::Failed(err.clone()));
                tracing::error!(model = %self.configuration.id, "model load failed: {}", err);
                self.events.publish(Event::ModelLoadFailed {
                    model: self.configuration.id.clone(),
                    error: err.to_string(),
                });
            }
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        result
    }

    /// Drops the cached handle. Waits for an in-flight load to settle first.
    pub async fn unload(&self) {
        let _gate = self.gate.lock().await;
        let was_loaded = {
            let mut state = self.state.write();
            let was_loaded = !matches!(*state, LoadState::Unloaded);
            *state = LoadState::Unloaded;
            was_loaded
        };
        if was_loaded {
            self.events.publish(Event::ModelUnloaded {
                model: self.configuration.id.clone(),
            });
        }
    }

    // Outcome to hand back without a new attempt: the model became ready, or
    // an attempt this caller waited on failed.
    fn settled(&self, seen: u64) -> Option<Result<ModelHandle, LoadError>> {
        match &*self.state.read() {
            LoadState::Ready(handle) => Some(Ok(handle.clone())),
            LoadState::Failed(err) if self.completed.load(Ordering::SeqCst) != seen => Some(Err(err.clone())),
            _ => None,
        }
    }

    async fn attempt(&self) -> Result<ModelHandle, LoadError> {
        let progress = |fraction: f64| self.report_progress(fraction);
        let dir = self.source.fetch(&self.configuration, &progress).await?;

        let factory = Arc::clone(&self.factory);
        let configuration = self.configuration.clone();
        tokio::task::spawn_blocking(move || factory.load(&configuration, &dir))
            .await
            .map_err(|e| LoadError::Interrupted(e.to_string()))?
    }

    fn report_progress(&self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);

        let advanced = {
            let mut state = self.state.write();
            match &mut *state {
                LoadState::Loading(current) if fraction > *current => {
                    *current = fraction;
                    true
                }
                _ => false,
            }
        };

        if advanced {
            self.events.publish(Event::ModelLoading {
                model: self.configuration.id.clone(),
                progress: fraction,
            });
        }
    }

    fn set_state(&self, state: LoadState) {
        *self.state.write() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::RecordingHandler;
    use crate::testing::{counting_factory, StaticSource};
    use std::sync::atomic::AtomicUsize;

    fn loader(source: StaticSource, constructions: Arc<AtomicUsize>) -> (Arc<ModelLoader>, Arc<RecordingHandler>) {
        let events = Arc::new(EventBus::new());
        let recorder = Arc::new(RecordingHandler::new());
        events.subscribe_shared(recorder.clone());
        let loader = ModelLoader::new(
            ModelConfiguration::new("test/scripted"),
            Arc::new(source),
            Arc::new(counting_factory(constructions, vec![1, 2, 3])),
            events,
        );
        (Arc::new(loader), recorder)
    }

    #[tokio::test]
    async fn test_load_twice_constructs_once() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let (loader, _) = loader(StaticSource::scripted(), constructions.clone());

        let first = loader.load().await.unwrap();
        let second = loader.load().await.unwrap();

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert!(loader.state().is_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_share_one_construction() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let (loader, _) = loader(StaticSource::scripted().with_delay_ms(50), constructions.clone());

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let loader = Arc::clone(&loader);
                tokio::spawn(async move { loader.load().await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_is_shared_then_retried() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let source = StaticSource::failing().with_delay_ms(50);
        let fetches = source.fetch_count();
        let (loader, recorder) = loader(source, constructions);

        let a = tokio::spawn({
            let loader = Arc::clone(&loader);
            async move { loader.load().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let b = tokio::spawn({
            let loader = Arc::clone(&loader);
            async move { loader.load().await }
        });

        let a = a.await.unwrap().unwrap_err();
        let b = b.await.unwrap().unwrap_err();
        assert_eq!(a, b);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(matches!(loader.state(), LoadState::Failed(LoadError::Fetch { .. })));

        assert!(loader.load().await.is_err());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        let failures = recorder
            .events()
            .iter()
            .filter(|e| matches!(e, Event::ModelLoadFailed { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_clamped() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let source = StaticSource::scripted().with_progress(vec![0.5, 0.25, 2.0, f64::NAN]);
        let (loader, recorder) = loader(source, constructions);

        loader.load().await.unwrap();

        let progress: Vec<f64> = recorder
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::ModelLoading { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![0.0, 0.5, 1.0]);
    }

    #[tokio::test]
    async fn test_unsupported_type_surfaces() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let (loader, _) = loader(StaticSource::with_config(r#"{"model_type": "rwkv"}"#), constructions.clone());

        let err = loader.load().await.unwrap_err();
        assert_eq!(err, LoadError::UnsupportedModelType("rwkv".to_string()));
        assert_eq!(constructions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unload_resets_state() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let (loader, recorder) = loader(StaticSource::scripted(), constructions.clone());

        loader.load().await.unwrap();
        loader.unload().await;
        assert_eq!(loader.state(), LoadState::Unloaded);

        loader.load().await.unwrap();
        assert_eq!(constructions.load(Ordering::SeqCst), 2);
        assert!(recorder.events().contains(&Event::ModelUnloaded { model: "test/scripted".to_string() }));
    }
}
