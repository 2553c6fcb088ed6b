mod cli;

use anyhow::Context;
use blob_mirror::config::DEFAULT_CONFIG_FILE;
use blob_mirror::{logging, store, Ledger, Settings, Supervisor, SystemClock};
use clap::Parser;
use cli::Cli;
use dotenv::dotenv;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    if let Err(err) = run(&args) {
        error!("{:#}", err);
        process::exit(1);
    }
}

fn run(args: &Cli) -> anyhow::Result<()> {
    let config_file = args.config.as_deref().filter(|c| !c.trim().is_empty());
    let settings = Settings::load(config_file, &args.overrides()).with_context(|| {
        format!(
            "Failed to read configuration from {}",
            config_file.unwrap_or(DEFAULT_CONFIG_FILE)
        )
    })?;
    settings.validate().context("Failed to proceed")?;

    let store = store::connect(&settings.connection_string, &settings.container)
        .context("Failed to set up object store client")?;

    let ledger = match settings.skip_uploaded.as_deref() {
        Some(path) => Ledger::load(path).unwrap_or_else(|err| {
            warn!("Failed to read upload log file {}: {}", path.display(), err);
            Ledger::new()
        }),
        None => Ledger::new(),
    };

    info!(
        "Mirroring {} into container {} (target folder {:?}) with {} threads, {} known uploads",
        settings.source,
        settings.container,
        settings.target_folder(),
        settings.thread_count(),
        ledger.len()
    );

    let mut supervisor = Supervisor::new(settings, Arc::from(store), ledger, Arc::new(SystemClock));
    supervisor.run().context("Upload stopped")?;

    Ok(())
}
