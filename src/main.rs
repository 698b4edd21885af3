use clap::{Args, Parser, Subcommand};
use slmchat::cmd::{self, ChatOptions};
use slmchat::envconfig::{expand_home, EnvConfig};
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "slmchat")]
#[command(version)]
#[command(about = "Chat with small language models running locally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding model folders (default: $SLMCHAT_MODELS)
    #[arg(long, global = true)]
    models_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat
    Chat {
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// Answer a single prompt
    Run {
        #[command(flatten)]
        generation: GenerationArgs,
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Show known models
    #[command(alias = "ls")]
    List,
}

#[derive(Args)]
struct GenerationArgs {
    /// Model id or alias
    #[arg(short, long)]
    model: Option<String>,
    #[arg(long)]
    max_tokens: Option<usize>,
    #[arg(long)]
    temperature: Option<f32>,
    #[arg(long)]
    top_p: Option<f32>,
    /// Refresh streamed output every N tokens
    #[arg(long)]
    display_every: Option<usize>,
    /// Stop a reply after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Fixed sampling seed; defaults to a fresh seed every turn
    #[arg(long)]
    seed: Option<u64>,
}

impl GenerationArgs {
    fn into_options(self, config: &EnvConfig, models_dir: Option<String>) -> ChatOptions {
        let mut parameters = config
            .parameters()
            .max_tokens(self.max_tokens.unwrap_or(config.max_tokens))
            .temperature(self.temperature.unwrap_or(config.temperature))
            .top_p(self.top_p.unwrap_or(config.top_p))
            .display_every(self.display_every.unwrap_or(config.display_every));
        match self.timeout {
            Some(0) => parameters.turn_timeout = None,
            Some(secs) => parameters = parameters.turn_timeout(Duration::from_secs(secs)),
            None => {}
        }

        ChatOptions {
            model: self.model.unwrap_or_else(|| config.model.clone()),
            models_dir: models_dir.map(|d| expand_home(&d)).unwrap_or_else(|| config.models_dir.clone()),
            parameters,
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = EnvConfig::from_env();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(config.log.parse::<tracing::Level>().unwrap_or(tracing::Level::WARN))
        .init();

    let result = match cli.command {
        Commands::Chat { generation } => cmd::chat(generation.into_options(&config, cli.models_dir)).await,
        Commands::Run { generation, prompt } => {
            cmd::run(generation.into_options(&config, cli.models_dir), prompt).await
        }
        Commands::List => {
            cmd::list(cli.models_dir.map(|d| expand_home(&d)).unwrap_or(config.models_dir));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
