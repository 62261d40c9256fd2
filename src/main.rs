use anyhow::Context;
use clap::Parser;
use llm_docgen::{GeminiFactory, JsonConfigProvider, Runner, Selection, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "llm-docgen",
    version,
    author,
    about = "Generate per-file documentation with a hosted LLM",
    long_about = "Walk source directories and ask Gemini to document every matching file.\n\n\
    Each file is sent as the next turn of a conversation kept per role, and the answer is \
    written under <docs_dir>/<role>/. The configuration file is re-read before every pass, \
    so edits take effect without a restart.\n\n\
    USAGE EXAMPLES:\n  \
      # Run forever with ./code_assistant.json\n  \
      llm-docgen\n\n  \
      # Single pass for one role and language\n  \
      llm-docgen --once --role doc_writer --lang en\n\n  \
      # Override the configured roots\n  \
      llm-docgen --once --start-dir ./src --start-dir ./tools"
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "code_assistant.json", value_name = "FILE")]
    config: PathBuf,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API", hide_env_values = true)]
    api_key: String,

    /// Alternative API endpoint
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Only run these roles (can be used multiple times)
    #[arg(long, value_name = "ROLE")]
    role: Vec<String>,

    /// Only run these languages (can be used multiple times)
    #[arg(long, value_name = "LANG")]
    lang: Vec<String>,

    /// Walk these directories instead of the configured ones
    #[arg(long = "start-dir", value_name = "PATH")]
    start_dirs: Vec<PathBuf>,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_tracing(cli.verbose)?;

    let mut factory = GeminiFactory::new(cli.api_key);
    if let Some(url) = cli.base_url {
        factory = factory.with_base_url(url);
    }

    let runner = Runner::new(
        Box::new(JsonConfigProvider::new(cli.config)),
        Box::new(factory),
        Arc::new(SystemClock),
    )
    .selection(Selection {
        roles: cli.role,
        languages: cli.lang,
        start_dirs: cli.start_dirs,
    });

    tokio::select! {
        result = run(&runner, cli.once) => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, exiting");
            Ok(())
        }
    }
}

async fn run(runner: &Runner, once: bool) -> anyhow::Result<()> {
    if once {
        let stats = runner.run_once().await.context("Documentation pass failed")?;
        info!(
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            "Done in {:.2}s",
            stats.duration.as_secs_f64()
        );
        Ok(())
    } else {
        runner.run_forever().await.context("Documentation loop stopped")
    }
}

fn setup_tracing(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::new("llm_docgen=info"),
        1 => EnvFilter::new("llm_docgen=debug"),
        _ => EnvFilter::new("llm_docgen=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .init();

    Ok(())
}
