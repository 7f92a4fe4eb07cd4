use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, store::DEFAULT_LIST_LIMIT, Result};

/// Typed configuration for the bot.
///
/// Everything beyond the bot token has a sensible default so a bare
/// `TELEGRAM_BOT_TOKEN=... dtb` invocation works.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,

    /// SQLite database location.
    pub database_path: PathBuf,

    /// Maximum number of entries shown by the browse flow.
    pub list_page_size: u32,

    /// Idle timeout after which an abandoned session is cancelled.
    /// `None` disables the policy (the base design has no TTL).
    pub session_idle_timeout: Option<Duration>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let database_path =
            PathBuf::from(env_str("DIARY_DB_PATH").unwrap_or("diary.db".to_string()));

        let list_page_size = env_u32("LIST_PAGE_SIZE").unwrap_or(DEFAULT_LIST_LIMIT).max(1);

        let session_idle_timeout = match env_u64("SESSION_IDLE_TIMEOUT_SECS").unwrap_or(0) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            telegram_bot_token,
            database_path,
            list_page_size,
            session_idle_timeout,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}
