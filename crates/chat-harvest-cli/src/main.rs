//! Command-line entry point.
//!
//! Run with: chat-harvest --config config.ini --prompts prompts.txt

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, bail};
use chat_harvest_browser::{CdpPage, LaunchOptions};
use chat_harvest_core::{
    HarvestConfig, TokioClock, TurnEvents, UiContract, traits::format_turn,
};
use chat_harvest_session::{
    ConversationPlan, ConversationRunner, RunSettings, SessionManager, storage::FileRecorder,
};
use clap::Parser;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "chat-harvest", version, about)]
struct Args {
    /// INI configuration file.
    #[arg(short, long, default_value = "config.ini")]
    config: PathBuf,

    /// One prompt per non-empty line. Read from stdin when omitted.
    #[arg(short, long)]
    prompts: Option<PathBuf>,

    /// Enable extended reasoning mode.
    #[arg(long)]
    extended: bool,

    /// Show the browser window.
    #[arg(long)]
    headed: bool,

    /// Do not write the responses or transcript files.
    #[arg(long)]
    no_save: bool,
}

impl Args {
    fn apply(&self, config: &mut HarvestConfig) {
        if self.extended {
            config.browser.extended_mode = true;
        }
        if self.headed {
            config.browser.headless = false;
        }
        if self.no_save {
            config.output.save_responses = false;
            config.output.save_transcript = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = HarvestConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    args.apply(&mut config);

    let prompts = read_prompts(args.prompts.as_deref()).await?;
    if prompts.is_empty() {
        bail!("No prompts to send");
    }
    let plan = ConversationPlan {
        mode: config.mode(),
        priming_prompt: config.run.priming_prompt.clone(),
        prompts,
    };
    let settings = RunSettings::from_config(&config)?;
    let output = &config.output;
    let recorder = FileRecorder::new(
        output.save_responses.then(|| output.responses_path.clone()),
        output.save_transcript.then(|| output.transcript_path.clone()),
    );

    let page = CdpPage::launch(&LaunchOptions {
        chrome_path: config.browser.chrome_path.clone(),
        headless: config.browser.headless,
        ..LaunchOptions::default()
    })
    .await
    .context("Failed to start Chrome")?;

    let manager = SessionManager::new(
        page,
        UiContract::default(),
        config.session_settings(),
        Arc::new(TokioClock::new()),
    );
    let runner = ConversationRunner::new(manager, settings);
    let printer = tokio::spawn(print_turns(runner.events()));

    let outcome = tokio::select! {
        result = runner.drive(&config.credentials, &plan, Some(&recorder)) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, closing the browser");
            None
        }
    };
    runner.shutdown().await;
    if let Err(e) = printer.await {
        tracing::debug!(error = %e, "Turn printer stopped");
    }

    match outcome {
        Some(Ok(log)) => {
            tracing::info!(
                completed = log.completed_count(),
                total = log.len(),
                "All prompts processed"
            );
            Ok(())
        }
        Some(Err(e)) => Err(e).context("Login failed"),
        None => Ok(()),
    }
}

/// Echo each closed turn to stdout until the run finishes.
async fn print_turns(events: Arc<TurnEvents>) {
    let mut turns = events.closed_turns_stream();
    while let Some(turn) = turns.next().await {
        print!("{}", format_turn(&turn));
    }
}

async fn read_prompts(path: Option<&Path>) -> anyhow::Result<Vec<String>> {
    let text = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompts from {}", path.display()))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read prompts from stdin")?;
            text
        }
    };
    Ok(parse_prompts(&text))
}

fn parse_prompts(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
