use anyhow::Result;
use clap::{Parser, Subcommand};
use gemini_adapter::ai::gemini::Outcome;
use gemini_adapter::app::{App, GenerateRequest};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "gemini-adapter")]
#[command(about = "Generate content with Gemini and inspect its model catalog")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a response to a single prompt.
    Generate {
        prompt: String,
        /// System instruction sent ahead of the prompt.
        #[arg(long)]
        system: Option<String>,
        /// Model id, overriding GEMINI_MODEL.
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        max_output_tokens: Option<u64>,
        /// Print text as it streams in.
        #[arg(long)]
        stream: bool,
        /// Cancel the call after this many seconds.
        #[arg(long, value_name = "SECS", value_parser = parse_timeout_arg)]
        timeout: Option<Duration>,
    },
    /// List catalog models in priority order.
    Models,
}

fn parse_timeout_arg(input: &str) -> std::result::Result<Duration, String> {
    input
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| format!("Invalid timeout '{}'. Expected a positive number of seconds", input))
}

/// Cancels `cancel` on Ctrl-C or once `timeout` elapses.
fn spawn_canceller(cancel: CancellationToken, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted; cancelling request"),
            _ = deadline => info!("Timeout reached; cancelling request"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gemini_adapter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    let app = match App::new() {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    let mut stdout = std::io::stdout();
    let provider_error = match args.command {
        Command::Generate {
            prompt,
            system,
            model,
            temperature,
            max_output_tokens,
            stream,
            timeout,
        } => {
            let request = GenerateRequest {
                prompt,
                system,
                model,
                temperature,
                max_output_tokens,
                stream,
            };
            let cancel = CancellationToken::new();
            spawn_canceller(cancel.clone(), timeout);
            let result = app.generate(&request, &cancel, &mut stdout).await;
            cancel.cancel();
            match result {
                Ok(Outcome::Success(_)) => None,
                Ok(Outcome::ProviderError(err)) => Some(err),
                Err(e) => {
                    error!("Generation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Models => match app.list_models(&mut stdout).await {
            Ok(Outcome::Success(_)) => None,
            Ok(Outcome::ProviderError(err)) => Some(err),
            Err(e) => {
                error!("Failed to list models: {}", e);
                std::process::exit(1);
            }
        },
    };

    if let Some(err) = provider_error {
        error!("Gemini returned an error: {}", serde_json::to_string(&err)?);
        std::process::exit(1);
    }
    Ok(())
}
