//! News digest: one batch run per invocation.
//! Fetches the configured sources, keeps only items not seen before, posts
//! them to Slack and exits. Meant to be driven by cron or a CI schedule.

use anyhow::{Context, Result};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use news_digest::config::sources::load_sources_default;
use news_digest::{Fetchers, RunCoordinator, RunOptions, Settings, SlackNotifier};

const EXIT_INTERRUPTED: u8 = 130;

/// `RUST_LOG` wins; otherwise info for this crate and warn for the rest.
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("news_digest=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.trim().eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn build(settings: &Settings) -> Result<RunCoordinator> {
    let sources = load_sources_default().context("loading source table")?;
    let fetchers = Fetchers::http(settings).context("building fetchers")?;
    let notifier = SlackNotifier::new(settings.webhook_url.clone())
        .with_timeout(settings.notify_timeout)
        .with_title(&settings.digest_title);

    Ok(RunCoordinator::new(
        sources,
        fetchers,
        Box::new(notifier),
        RunOptions::from(settings),
    ))
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional; real deployments inject the environment
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let coordinator = match build(&settings) {
        Ok(c) => c,
        Err(e) => {
            error!("startup failed: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        sources = coordinator.sources().len(),
        state = %settings.state_path.display(),
        "starting news digest run"
    );

    tokio::select! {
        report = coordinator.run(&settings.state_path) => {
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; pending items were not delivered");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}
