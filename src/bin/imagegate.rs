//! imagegate - one-shot image generation from the command line
//!
//! Runs a single request through the full pipeline (rate limit, dedup,
//! fan-out, batch retry) and prints the result as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use imagegate::{
    CancellationToken, Config, GenerationRequest, ImageGateway, ImageSize, ImagegateError, Secrets,
    client_key,
};
use tracing::info;

/// imagegate CLI
#[derive(Parser)]
#[command(name = "imagegate")]
#[command(version = imagegate::PKG_VERSION)]
#[command(about = "Generate images through the imagegate pipeline")]
struct Args {
    /// Path to config file (default: ~/.imagegate/config.toml)
    #[arg(short, long, env = "IMAGEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Prompt describing the images
    prompt: String,

    /// Number of images (1-10)
    #[arg(short, long)]
    num_images: Option<u32>,

    /// Base seed; image i uses seed + i
    #[arg(short, long)]
    seed: Option<u64>,

    /// Image width in pixels
    #[arg(long, default_value_t = 1024)]
    width: u32,

    /// Image height in pixels
    #[arg(long, default_value_t = 1024)]
    height: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> imagegate::Result<()> {
    let config = Config::load_or_default(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    let gateway = ImageGateway::from_config(&config, &secrets)?;
    gateway.start_maintenance();
    info!(version = %imagegate::version_string(), "imagegate starting");

    let decision = gateway.check_rate_limit(client_key(None, None));
    if !decision.allowed {
        return Err(imagegate::ClassifiedError::new(
            imagegate::ErrorCategory::RateLimit,
            format!(
                "local rate limit exhausted, retry in {}s",
                decision.retry_after_secs.unwrap_or(0)
            ),
        )
        .into());
    }

    let mut request = GenerationRequest::new(args.prompt)
        .image_size(ImageSize::new(args.width, args.height));
    if let Some(n) = args.num_images {
        request = request.num_images(n);
    }
    if let Some(seed) = args.seed {
        request = request.seed(seed);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = gateway.generate(request, &cancel).await?;
    let json = serde_json::to_string_pretty(result.as_ref()).map_err(|e| {
        ImagegateError::from(imagegate::RawError::new(format!(
            "failed to render result: {e}"
        )))
    })?;
    println!("{json}");
    Ok(())
}

fn report(error: &ImagegateError) {
    match error.classified() {
        Some(e) => {
            let presentation = e.presentation();
            eprintln!("{}: {}", presentation.title, presentation.user_message);
            eprintln!("  {e}");
        }
        None => eprintln!("Cancelled."),
    }
}
