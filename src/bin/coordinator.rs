use std::{path::PathBuf, process, sync::Arc};

use anyhow::Context;
use fedconn::{
    settings::{ParametersSettings, RoundSettings, Settings, SitesSettings},
    sites::{LocalSite, Site},
    state_machine::RoundInitializer,
};
use structopt::StructOpt;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "Coordinator")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let Settings {
        round: round_settings,
        parameters: parameters_settings,
        sites: sites_settings,
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    if let Err(err) = run(round_settings, parameters_settings, sites_settings).await {
        error!("{:#}", err);
        process::exit(1);
    }
}

async fn run(
    round_settings: RoundSettings,
    parameters_settings: ParametersSettings,
    sites_settings: SitesSettings,
) -> anyhow::Result<()> {
    let sites = LocalSite::discover(&sites_settings)
        .await
        .context("failed to discover the sites")?
        .into_iter()
        .map(|site| Arc::new(site) as Arc<dyn Site>)
        .collect();

    let (state_machine, abort_handle, _event_subscriber) =
        RoundInitializer::new(round_settings, parameters_settings.path, sites).init();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("shutting down: aborting the round");
            abort_handle.abort();
        }
    });

    let outcome = state_machine.run().await.context("the round failed")?;
    info!(
        "round finished with {} contributors and {} acknowledgements",
        outcome.contributors.len(),
        outcome.acknowledged.len(),
    );
    if let Some(incomplete) = outcome.incomplete {
        warn!("{}", incomplete);
    }

    let json = serde_json::to_string_pretty(&outcome.aggregate)
        .context("failed to serialize the global aggregate")?;
    println!("{}", json);
    Ok(())
}
