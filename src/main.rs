use std::sync::Arc;

use supplywatch::app::App;
use supplywatch::config::AppConfig;
use supplywatch::game::TornClient;
use supplywatch::notify::NotifyClient;
use supplywatch::profiles::RetryProfiles;
use supplywatch::providers;
use supplywatch::sheet::SheetsClient;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env before logging setup so LOGLEVEL from the file is honored.
    let dotenv = dotenvy::dotenv();
    init_logging();
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded environment from .env file"),
        Err(_) => tracing::debug!("no .env file found, using existing environment"),
    }

    tracing::debug!("starting application");
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration error");
            std::process::exit(1);
        }
    };

    // One top-level token threads through every call; Ctrl-C cancels it and
    // every in-flight wait unwinds cleanly.
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                token.cancel();
            }
        });
    }

    tracing::debug!("initializing clients");
    let game = Arc::new(TornClient::new(&config.torn_api_key, &config.faction_api_key));
    let sheet = Arc::new(SheetsClient::new(&config.sheets_token));
    let notify = Arc::new(NotifyClient::new(config.notify.clone()));
    let profiles = RetryProfiles::bounded();

    let roster =
        providers::load_providers(&token, &config.provider_keys, &profiles.api_request).await;
    tracing::debug!(providers = roster.len(), "clients initialized");

    let app = App::new(
        game,
        sheet,
        notify,
        roster,
        profiles,
        config.spreadsheet_id.clone(),
        config.sheet_range.clone(),
    );
    app.run(&token).await;
}

/// `LOGLEVEL` mirrors the usual level names and wins over `RUST_LOG`; with
/// neither set the default is `info`.
fn init_logging() {
    let level = std::env::var("LOGLEVEL").unwrap_or_default().to_lowercase();
    let filter = match level.as_str() {
        "" => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        "disabled" => EnvFilter::new("off"),
        "warning" => EnvFilter::new("warn"),
        other => EnvFilter::new(other),
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
