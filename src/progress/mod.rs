use crate::app::events::{Event, EventHandler};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;

const STEPS: u64 = 100;

/// Renders `ModelLoading` events as a terminal progress bar.
pub struct LoadProgress {
    bar: Mutex<Option<ProgressBar>>,
    visible: bool,
}

impl LoadProgress {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            visible: true,
        }
    }

    pub fn hidden() -> Self {
        Self {
            bar: Mutex::new(None),
            visible: false,
        }
    }

    fn bar(&self, model: &str) -> ProgressBar {
        self.bar
            .lock()
            .get_or_insert_with(|| {
                let bar = if self.visible { ProgressBar::new(STEPS) } else { ProgressBar::hidden() };
                bar.set_length(STEPS);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg} [{bar:40.cyan/blue}] {percent}%")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar.set_message(format!("loading {}", model));
                bar
            })
            .clone()
    }

    pub fn position(&self) -> Option<u64> {
        self.bar.lock().as_ref().map(|b| b.position())
    }

    fn finish(&self, message: Option<String>) {
        if let Some(bar) = self.bar.lock().take() {
            match message {
                Some(message) => bar.abandon_with_message(message),
                None => bar.finish_and_clear(),
            }
        }
    }
}

impl Default for LoadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for LoadProgress {
    fn handle(&self, event: &Event) {
        match event {
            Event::ModelLoading { model, progress } => {
                self.bar(model).set_position((progress * STEPS as f64).round() as u64);
            }
            Event::ModelLoaded { .. } => self.finish(None),
            Event::ModelLoadFailed { model, .. } => self.finish(Some(format!("failed to load {}", model))),
            _ => {}
        }
    }

    fn name(&self) -> &str {
        "load-progress"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_loading_progress() {
        let progress = LoadProgress::hidden();
        assert_eq!(progress.position(), None);

        progress.handle(&Event::ModelLoading { model: "m".to_string(), progress: 0.0 });
        progress.handle(&Event::ModelLoading { model: "m".to_string(), progress: 0.42 });
        assert_eq!(progress.position(), Some(42));

        progress.handle(&Event::ModelLoaded { model: "m".to_string() });
        assert_eq!(progress.position(), None);
    }

    #[test]
    fn test_ignores_turn_events() {
        let progress = LoadProgress::hidden();
        progress.handle(&Event::TurnRejected);
        assert_eq!(progress.position(), None);
    }
}
