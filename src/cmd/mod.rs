use crate::app::events::{Event, EventBus, EventHandler, LoggingHandler};
use crate::app::loader::{LocalSource, ModelLoader};
use crate::app::runner::{Evaluator, GenerationResult, TurnOutcome};
use crate::app::worker::{ChatWorker, SubmitError};
use crate::core::{GenerationParameters, ModelFactory, ModelRegistry};
use crate::progress::LoadProgress;
use crate::rng::{ClockSeed, FixedSeed, SeedSource};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

const COLOR_GREY: &str = "\x1b[90m";
const COLOR_DEFAULT: &str = "\x1b[0m";

pub struct ChatOptions {
    pub model: String,
    pub models_dir: PathBuf,
    pub parameters: GenerationParameters,
    pub seed: Option<u64>,
}

pub async fn run(options: ChatOptions, prompt: Vec<String>) -> Result<()> {
    let evaluator = evaluator(&options, StreamPrinter::stdout())?;

    let prompt = if prompt.is_empty() {
        evaluator.loader().configuration().default_prompt.clone()
    } else {
        prompt.join(" ")
    };

    let outcome = tokio::select! {
        outcome = evaluator.generate(&prompt) => outcome,
        _ = tokio::signal::ctrl_c() => {
            evaluator.cancel();
            anyhow::bail!("interrupted");
        }
    };
    report(outcome)
}

pub async fn chat(options: ChatOptions) -> Result<()> {
    let evaluator = Arc::new(evaluator(&options, StreamPrinter::stdout())?);
    let (worker, task) = ChatWorker::spawn(Arc::clone(&evaluator));

    println!(">>> Chatting with {}", evaluator.loader().configuration().id);
    println!("Type /reset to start over, /quit to exit, Ctrl-C stops a reply");

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline(">>> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        match line {
            "/quit" | "/exit" | "/bye" => break,
            "/reset" => {
                evaluator.reset();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        let mut reply = match worker.submit(line) {
            Ok(reply) => reply,
            Err(SubmitError::Busy) => {
                println!("Still answering; wait for the reply to finish.");
                continue;
            }
            Err(err @ SubmitError::Closed) => return Err(err.into()),
        };

        let outcome = tokio::select! {
            outcome = &mut reply => outcome,
            _ = tokio::signal::ctrl_c() => {
                worker.cancel();
                reply.await
            }
        };

        match outcome {
            Ok(outcome) => {
                if let Err(e) = report(outcome) {
                    eprintln!("Error: {}", e);
                }
            }
            Err(_) => anyhow::bail!("chat worker stopped mid-turn"),
        }
    }

    drop(worker);
    task.await.context("chat worker panicked")?;
    Ok(())
}

pub fn list(models_dir: PathBuf) {
    let registry = ModelRegistry::with_defaults();
    let source = LocalSource::new(models_dir);

    println!("\n{:<40} {:<10} DIRECTORY", "NAME", "PRESENT");
    println!("{}", "-".repeat(80));
    for id in registry.ids() {
        let configuration = registry.configuration(&id);
        let dir = source.directory_for(&configuration);
        let present = if dir.join("config.json").is_file() { "yes" } else { "no" };
        println!("{:<40} {:<10} {}", id, present, dir.display());
    }

    let aliases = registry.aliases();
    if !aliases.is_empty() {
        println!("\nAliases:");
        for (alias, target) in aliases {
            println!("  {:<12} -> {}", alias, target);
        }
    }

    let types = ModelFactory::with_defaults().model_types();
    println!("\nSupported model types: {}", types.join(", "));
}

fn evaluator(options: &ChatOptions, printer: StreamPrinter) -> Result<Evaluator> {
    options
        .parameters
        .validate()
        .context("invalid generation settings")?;

    let registry = ModelRegistry::with_defaults();
    let configuration = registry.configuration(&options.model);
    tracing::debug!(model = %configuration.id, models_dir = %options.models_dir.display(), "resolved model");

    let events = Arc::new(EventBus::new());
    events.subscribe(LoggingHandler);
    events.subscribe(LoadProgress::new());
    events.subscribe(printer);

    let loader = ModelLoader::new(
        configuration,
        Arc::new(LocalSource::new(&options.models_dir)),
        Arc::new(ModelFactory::with_defaults()),
        Arc::clone(&events),
    );

    let seeds: Arc<dyn SeedSource> = match options.seed {
        Some(seed) => Arc::new(FixedSeed(seed)),
        None => Arc::new(ClockSeed),
    };

    Ok(Evaluator::new(Arc::new(loader), events)
        .with_parameters(options.parameters.clone())
        .with_seed_source(seeds))
}

fn report(outcome: TurnOutcome) -> Result<()> {
    match outcome {
        TurnOutcome::Completed(result) => {
            println!("\n{}{}{}", COLOR_GREY, summary(&result), COLOR_DEFAULT);
            Ok(())
        }
        TurnOutcome::Rejected => anyhow::bail!("a reply is already being generated"),
        TurnOutcome::Failed(message) => anyhow::bail!(message),
    }
}

fn summary(result: &GenerationResult) -> String {
    format!(
        "[{} tokens, {:.1} tokens/s, {}]",
        result.token_count, result.tokens_per_second, result.stop_reason
    )
}

/// Writes streamed output to the terminal as it grows, printing only the
/// part not yet shown.
pub struct StreamPrinter {
    shown: Mutex<String>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl StreamPrinter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            shown: Mutex::new(String::new()),
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    fn pending(&self, text: &str) -> String {
        let mut shown = self.shown.lock();
        let pending = match text.strip_prefix(shown.as_str()) {
            Some(rest) => rest.to_string(),
            None => format!("\n{}", text),
        };
        *shown = text.to_string();
        pending
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            tracing::warn!("failed to write output: {}", e);
        }
    }
}

impl EventHandler for StreamPrinter {
    fn handle(&self, event: &Event) {
        match event {
            Event::TurnStarted { .. } => self.shown.lock().clear(),
            Event::OutputUpdated { text, .. } => {
                let pending = self.pending(text);
                if !pending.is_empty() {
                    self.write(&pending);
                }
            }
            _ => {}
        }
    }

    fn name(&self) -> &str {
        "stream-printer"
    }
}
