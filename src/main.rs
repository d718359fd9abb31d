// =============================================================================
// Matrixon State Resolution - Main Entry Point
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Command line front end of the state resolution engine. Loads a fixture
//   into an in-memory event store, then either resolves its state maps or
//   checks a single event, printing JSON to stdout. Logs go to stderr.
//
// Runtime Requirements:
//   • Optional TOML config via --config, overridden by MATRIXON_STATERES_*
//
// =============================================================================

use anyhow::{Context, Result};
use ruma::EventId;
use serde_json::json;
use tracing::{debug, error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

use matrixon_rooms::{AuthOutcome, Resolver};
use matrixon_stateres::{Config, Fixture};

mod clap;

#[tokio::main]
async fn main() {
    let args = clap::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("It looks like your config is invalid. The following error occurred: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&args, &config);
    info!("🚀 Starting matrixon-stateres {}", clap::version());

    if let Err(e) = run(args.command, config).await {
        error!("❌ {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(args: &clap::Args, config: &Config) {
    let directive = args
        .log_level
        .clone()
        .or_else(|| args.verbose.then(|| "debug".to_owned()))
        .or_else(|| config.log.clone())
        .unwrap_or_else(|| "warn".to_owned());

    let registry = tracing_subscriber::Registry::default();
    let fmt_layer = tracing_subscriber::fmt::Layer::new().with_writer(std::io::stderr);
    let filter_layer = match EnvFilter::try_new(&directive) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid log filter {directive:?}, falling back to warn: {e}");
            EnvFilter::new("warn")
        }
    };

    let subscriber = registry.with(filter_layer).with(fmt_layer);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {e}");
    }
}

async fn run(command: clap::Commands, config: Config) -> Result<()> {
    match command {
        clap::Commands::Resolve { fixture } => {
            let fixture = Fixture::from_file(&fixture)
                .with_context(|| format!("loading fixture {}", fixture.display()))?;
            let resolver = Resolver::new(fixture.store(), config.state_res)?;

            let resolution = resolver.resolve(&fixture.room_id, &fixture.state_maps).await?;
            debug!(stats = ?resolver.cache().stats(), "Resolution cache");
            println!("{}", serde_json::to_string_pretty(&json!({
                "room_id": fixture.room_id,
                "state": resolution.state,
                "rejected": resolution
                    .rejected
                    .iter()
                    .map(|r| json!({ "event_id": r.event_id, "reason": r.reason.to_string() }))
                    .collect::<Vec<_>>(),
            }))?);
        }
        clap::Commands::Check { fixture, event } => {
            let fixture = Fixture::from_file(&fixture)
                .with_context(|| format!("loading fixture {}", fixture.display()))?;
            let event_id = EventId::parse(&event).with_context(|| format!("invalid event id {event}"))?;
            let event = fixture.event(&event_id)?;
            let state = fixture.first_state_map()?;
            let resolver = Resolver::new(fixture.store(), config.state_res)?;

            let output = match resolver.check_event(event, state).await? {
                AuthOutcome::Accepted(event_id) => json!({ "event_id": event_id, "accepted": true }),
                AuthOutcome::Rejected { event_id, reason } => json!({
                    "event_id": event_id,
                    "accepted": false,
                    "reason": reason.to_string(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

