use std::{env, path::Path};

use anyhow::{Result, bail};

pub struct BotConfig {
    /// Token allowing the bot to connect to Telegram
    pub telegram_token: String,
}

impl BotConfig {
    /// Resolve the bot token. `TELEGRAM_BOT_TOKEN` wins over the value read
    /// from the bot's own config file.
    pub fn load(manifest_dir: &Path, file_token: Option<&str>) -> Result<Self> {
        #[cfg(debug_assertions)]
        if let Err(e) = dotenvy::from_path(manifest_dir.join(".env")) {
            tracing::debug!("No .env loaded: {e}");
        }
        #[cfg(not(debug_assertions))]
        let _ = manifest_dir;

        let env_token = env::var("TELEGRAM_BOT_TOKEN").ok();
        Self::from_sources(env_token.as_deref(), file_token)
    }

    fn from_sources(env_token: Option<&str>, file_token: Option<&str>) -> Result<Self> {
        let token = [env_token, file_token]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|t| !t.is_empty());

        match token {
            Some(token) => Ok(Self {
                telegram_token: token.to_owned(),
            }),
            None => bail!("Expected TELEGRAM_BOT_TOKEN in environment or telegram.bot_token in config"),
        }
    }
}

/// Load bot config using the calling crate's manifest directory.
#[macro_export]
macro_rules! load_bot_config {
    ($file_token:expr) => {
        $crate::config::BotConfig::load(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")),
            $file_token,
        )
    };
}
