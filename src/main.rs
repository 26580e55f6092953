#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod cli;

use cli::{Cli, Command};
use critiq::catalog::{Catalog, CatalogSnapshot};
use critiq::config::Config;
use critiq::gateway::{self, AppState};
use critiq::providers::{ProviderKind, build_adapter};
use critiq::store::sqlite::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for Rustls TLS.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Probe { provider } => probe(&config, provider.as_deref()).await,
        Command::CheckConfig => check_config(&config),
    }
}

async fn serve(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let snapshot = CatalogSnapshot::from_config(&config)?;
    let store = SqliteStore::open(&config.store_path()).await?;
    let state = Arc::new(AppState::new(Catalog::new(snapshot), Arc::new(store)));

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    gateway::serve(state, &host, port).await
}

async fn probe(config: &Config, only: Option<&str>) -> Result<()> {
    let snapshot = CatalogSnapshot::from_config(config)?;
    let mut failures = 0usize;
    let mut probed = 0usize;

    for provider in snapshot.providers() {
        if only.is_some_and(|id| id != provider.id) {
            continue;
        }

        let model = snapshot
            .models()
            .find(|model| model.provider == provider.id)
            .map(|model| model.model_name.clone());

        let model_name = match (model, provider.kind) {
            (Some(name), _) => name,
            (None, ProviderKind::Ollama) => String::new(),
            (None, _) => {
                println!(
                    "{}: skipped (no model configured for this provider)",
                    provider.id
                );
                continue;
            }
        };

        let endpoints = [
            ("primary", Some(provider.primary_endpoint_config())),
            ("fallback", provider.fallback_endpoint_config()),
        ];

        for (role, endpoint) in endpoints {
            let Some(endpoint) = endpoint else { continue };
            let adapter = build_adapter(provider.kind, &endpoint);
            probed += 1;
            match adapter.probe(&model_name).await {
                Ok(()) => println!("{}: {role} endpoint ok ({})", provider.id, adapter.endpoint()),
                Err(error) => {
                    failures += 1;
                    println!("{}: {role} endpoint FAILED: {error}", provider.id);
                }
            }
        }
    }

    if probed == 0 {
        println!("nothing to probe");
    }
    if failures > 0 {
        anyhow::bail!("{failures} endpoint(s) failed");
    }
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    let snapshot = CatalogSnapshot::from_config(config)?;
    println!(
        "config ok: {} provider(s), {} model(s), {} feedback plan(s)",
        snapshot.providers().count(),
        snapshot.models().count(),
        snapshot.feedbacks().count(),
    );
    match snapshot.default_model() {
        Some(model) => println!("default model: {}", model.display_name),
        None => println!("no default model configured"),
    }
    Ok(())
}
