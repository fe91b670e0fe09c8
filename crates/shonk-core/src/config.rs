use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    archive::ArchiveLimits, errors::Error, moderation::ReviewPolicy, quota::QuotaPolicy, Result,
};

const DEFAULT_IMAGE_API_URL: &str = "https://blahaj.transgirl.dev/images/random";

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Chat platform
    pub telegram_bot_token: String,
    pub moderator_chat: i64,
    pub moderators: Vec<i64>,

    // Files
    pub data_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub storage_dir: PathBuf,
    pub export_dir: PathBuf,

    // Image API
    pub image_api_url: String,
    pub http_timeout: Duration,

    // Policies
    pub quota: QuotaPolicy,
    pub archive: ArchiveLimits,
    pub review: ReviewPolicy,
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

        let moderator_chat = env_str("SHONK_MODERATOR_CHAT")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                Error::Config("SHONK_MODERATOR_CHAT environment variable is required".to_string())
            })?;
        let mut moderators = parse_csv_i64(env_str("SHONK_MODERATORS"));
        if moderators.is_empty() {
            moderators.push(moderator_chat);
        }

        let data_dir = env_path("SHONK_DATA_DIR").unwrap_or_else(|| PathBuf::from("data"));
        let ledger_file =
            env_path("SHONK_LEDGER_FILE").unwrap_or_else(|| data_dir.join("user_data.json"));
        let storage_dir =
            env_path("SHONK_STORAGE_DIR").unwrap_or_else(|| data_dir.join("storage"));
        let export_dir =
            env_path("SHONK_EXPORT_DIR").unwrap_or_else(|| data_dir.join("temp_storage"));

        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&storage_dir)?;

        let image_api_url = env_str("SHONK_IMAGE_API_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_IMAGE_API_URL.to_string());
        let http_timeout =
            Duration::from_millis(env_u64("SHONK_HTTP_TIMEOUT_MS").unwrap_or(10_000));

        let quota = QuotaPolicy {
            monthly_limit: env_u32("SHONK_MONTHLY_LIMIT").unwrap_or(5),
            monthly_window: chrono::Duration::days(
                env_u64("SHONK_MONTHLY_WINDOW_DAYS").unwrap_or(30) as i64,
            ),
            daily_cooldown: chrono::Duration::hours(
                env_u64("SHONK_DAILY_COOLDOWN_HOURS").unwrap_or(24) as i64,
            ),
        };

        let archive = ArchiveLimits {
            part_bytes: env_u64("SHONK_ARCHIVE_PART_BYTES").unwrap_or(8 * 1024 * 1024),
        };

        let review = ReviewPolicy {
            max_reprompts: env_u32("SHONK_REVIEW_MAX_REPROMPTS").unwrap_or(3),
            decision_timeout: env_u64("SHONK_REVIEW_TIMEOUT_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            resume_after: Duration::from_secs(env_u64("SHONK_REVIEW_RESUME_SECS").unwrap_or(60)),
        };

        Ok(Self {
            telegram_bot_token,
            moderator_chat,
            moderators,
            data_dir,
            ledger_file,
            storage_dir,
            export_dir,
            image_api_url,
            http_timeout,
            quota,
            archive,
            review,
        })
    }

    pub fn is_moderator(&self, user_id: i64) -> bool {
        self.moderators.contains(&user_id)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
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

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
