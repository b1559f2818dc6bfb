use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::clickhouse::ClickHouseClient;
use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::interaction::{AllowList, Interaction};
use crate::report::ReportPipeline;
use crate::settings::SettingsStore;

mod aggregate;
mod charts;
mod clickhouse;
mod config;
mod error;
mod interaction;
mod period;
mod query;
mod report;
mod settings;
mod telegram;
mod timezone;

/// `-c <path>` / `--config <path>`, defaulting to `config.toml`.
fn config_path(mut args: impl Iterator<Item = String>) -> Result<PathBuf> {
    let mut path = PathBuf::from(DEFAULT_CONFIG_PATH);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                path = args.next().context("Expected a path after --config")?.into();
            }
            other => bail!("Unknown argument {other:?}"),
        }
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    shared::init_tracing!()?;

    let path = config_path(env::args().skip(1))?;
    let mut config = AppConfig::load(&path)?;
    let bot_config = shared::load_bot_config!(config.telegram.bot_token.as_deref())?;
    config.apply_env_overrides(|key| env::var(key).ok());

    let validated = config.validate().context("Invalid configuration")?;

    let settings = SettingsStore::open(config.telegram.user_timezones_file.clone())
        .await
        .context("Failed to open user timezone settings")?;

    let client = ClickHouseClient::new(
        &config.clickhouse.url,
        Duration::from_secs(config.clickhouse.timeout_sec),
    )
    .context("Error creating ClickHouse client")?;

    let pipeline = ReportPipeline::new(
        client,
        validated.bindings,
        validated.bytes,
        config.clickhouse.boundary_filter.clone(),
    );
    let allow_list = AllowList::new(config.telegram.allowed_chat_ids.iter().copied());
    let interaction = Interaction::new(allow_list, settings, pipeline, validated.default_zone);

    info!("Starting traffic bot");
    telegram::run(&bot_config.telegram_token, interaction).await
}
