use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::prelude::*;

use shonk_core::{
    config::Config,
    domain::{ChatId, RequestRef, UserId},
    errors::{Error, QuotaKind},
    moderation::ReviewState,
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArchiveAction {
    Export,
    Count,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
    Help,
    Balance,
    Daily,
    Review,
    QueueStatus,
    Collection,
    Archive(Option<ArchiveAction>),
    Blahaj,
    Unknown(String),
}

impl Command {
    fn parse(text: &str) -> Self {
        let (cmd, args) = parse_command(text);
        let option = args.split_whitespace().next().unwrap_or("");
        match cmd.as_str() {
            "start" | "help" => Command::Help,
            "balance" => Command::Balance,
            "daily" => Command::Daily,
            "isshonk" => match option {
                "-q" | "--queue-status" => Command::QueueStatus,
                _ => Command::Review,
            },
            "shonkcollect" => Command::Collection,
            "shonklib" => Command::Archive(match option {
                "-d" | "--export" => Some(ArchiveAction::Export),
                "-c" | "--count" => Some(ArchiveAction::Count),
                _ => None,
            }),
            "blahaj" => Command::Blahaj,
            _ => Command::Unknown(cmd),
        }
    }
}

const HELP: &str = "Commands:
/balance - your :3 points
/daily - claim today's Blahaj picture
/isshonk - attach (or reply to) a photo to ask a moderator if it is a Shonk
/isshonk -q - your position in the review queue
/shonkcollect - how many Shonks you have collected
/shonklib -c - count the stored Blahaj photos
/shonklib -d - download the stored Blahaj photos
/blahaj - a random Blahaj picture";

fn format_time_until(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff_sec = at.signed_duration_since(now).num_seconds();
    if diff_sec <= 0 {
        return "now".to_string();
    }

    let days = diff_sec / 86400;
    let hours = (diff_sec % 86400) / 3600;
    let mins = (diff_sec % 3600) / 60;

    if days > 0 {
        return format!("{days}d {hours}h");
    }
    if hours > 0 {
        return format!("{hours}h {mins}m");
    }
    format!("{}m", mins.max(1))
}

/// User-facing text for a refusal; `None` for failures that need the
/// command-specific fallback message.
fn refusal_text(err: &Error, cfg: &Config, now: DateTime<Utc>) -> Option<String> {
    let text = match err {
        Error::Banned(_) => "You are banned from using this bot.".to_string(),
        Error::DuplicateRequest(_) => "You already have a queued isshonk request.".to_string(),
        Error::NotFound(_) => "You have no queued isshonk request.".to_string(),
        Error::QuotaExceeded {
            kind: QuotaKind::Monthly,
            retry_at,
        } => {
            let mut t = format!(
                "You have reached the monthly limit of {} uses for this command.",
                cfg.quota.monthly_limit
            );
            if let Some(at) = retry_at {
                t.push_str(&format!(" It resets in {}.", format_time_until(*at, now)));
            }
            t
        }
        Error::QuotaExceeded {
            kind: QuotaKind::Daily,
            retry_at,
        } => match retry_at {
            Some(at) => format!(
                "You have already collected your daily Blahaj picture. Try again in {}!",
                format_time_until(*at, now)
            ),
            None => "You have already collected your daily Blahaj picture. Try again tomorrow!"
                .to_string(),
        },
        _ => return None,
    };
    Some(text)
}

async fn reply(state: &AppState, chat: ChatId, text: &str) {
    if let Err(e) = state.messenger.send_text(chat, text).await {
        tracing::warn!(chat = chat.0, error = %e, "failed to send reply");
    }
}

async fn reply_err(state: &AppState, chat: ChatId, user: UserId, err: Error, fallback: &str) {
    if err.is_operational() {
        tracing::error!(user = %user, error = %err, "command failed");
    } else {
        tracing::info!(user = %user, reason = %err, "command refused");
    }
    let text = refusal_text(&err, &state.cfg, Utc::now()).unwrap_or_else(|| match err {
        Error::External(e) => format!("{fallback} {e}"),
        _ => fallback.to_string(),
    });
    reply(state, chat, &text).await;
}

/// Largest photo on the message, else on the message it replies to.
fn photo_file_id(msg: &Message) -> Option<String> {
    let largest = |m: &Message| m.photo().and_then(|p| p.last()).map(|p| p.file.id.clone());
    largest(msg).or_else(|| msg.reply_to_message().and_then(largest))
}

pub async fn handle_command(
    _bot: Bot,
    msg: &Message,
    user: UserId,
    text: &str,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let chat = ChatId(msg.chat.id.0);
    let cmd = Command::parse(text);
    tracing::debug!(user = %user, command = ?cmd, "command received");

    match cmd {
        Command::Help => reply(&state, chat, HELP).await,

        Command::Balance => match state.service.balance(user).await {
            Ok(b) => {
                let mut t = format!("You have {} :3's.", b.points);
                if b.premium {
                    t.push_str(" Premium: unlimited isshonk requests.");
                } else {
                    t.push_str(&format!(
                        " isshonk uses this month: {}/{}.",
                        b.monthly_uses, b.monthly_limit
                    ));
                }
                reply(&state, chat, &t).await;
            }
            Err(e) => reply_err(&state, chat, user, e, "Failed to read your balance.").await,
        },

        Command::Daily => match state.service.claim_daily(user, Utc::now()).await {
            Ok(img) => reply(&state, chat, &img.url).await,
            Err(e) => {
                reply_err(&state, chat, user, e, "Failed to fetch Blahaj image.").await
            }
        },

        Command::Blahaj => match state.service.fetch_image(user).await {
            Ok(img) => reply(&state, chat, &img.url).await,
            Err(e) => {
                reply_err(&state, chat, user, e, "Failed to fetch Blahaj image.").await
            }
        },

        Command::QueueStatus => match state.service.queue_status(user).await {
            Ok((position, ReviewState::UnderReview)) => {
                let t = format!(
                    "You are position {position} in the isshonk queue; a moderator is looking at it now."
                );
                reply(&state, chat, &t).await;
            }
            Ok((position, ReviewState::Queued)) => {
                let t = format!("You are position {position} in the isshonk queue.");
                reply(&state, chat, &t).await;
            }
            Err(e) => reply_err(&state, chat, user, e, "Failed to read the queue.").await,
        },

        Command::Review => {
            let Some(content) = photo_file_id(msg) else {
                reply(
                    &state,
                    chat,
                    "You need to attach an image (or reply to one) to use this command.",
                )
                .await;
                return Ok(());
            };
            let request = RequestRef {
                content,
                reply_to: chat,
            };
            match state.service.request_review(user, request, Utc::now()).await {
                Ok(position) => {
                    let t = format!(
                        "Your isshonk request has been queued (position {position})."
                    );
                    reply(&state, chat, &t).await;
                }
                Err(e) => {
                    reply_err(&state, chat, user, e, "Failed to queue your request.").await
                }
            }
        }

        Command::Collection => match state.service.collection_count(user).await {
            Ok(n) => reply(&state, chat, &format!("You have collected {n} Shonks.")).await,
            Err(e) => reply_err(&state, chat, user, e, "Failed to read your collection.").await,
        },

        Command::Archive(None) => {
            reply(
                &state,
                chat,
                "Invalid option. Use /shonklib -d to download or /shonklib -c to count the Blahaj photos.",
            )
            .await
        }

        Command::Archive(Some(ArchiveAction::Count)) => {
            if let Err(e) = state.service.active_record(user).await {
                reply_err(&state, chat, user, e, "Failed to read your record.").await;
                return Ok(());
            }
            match state.service.archive_count().await {
                Ok(n) => {
                    let t = format!("There are {n} Blahaj photos in the storage folder.");
                    reply(&state, chat, &t).await;
                }
                Err(e) => reply_err(&state, chat, user, e, "Failed to count the ShonkLib.").await,
            }
        }

        Command::Archive(Some(ArchiveAction::Export)) => {
            if let Err(e) = state.service.active_record(user).await {
                reply_err(&state, chat, user, e, "Failed to read your record.").await;
                return Ok(());
            }
            export_archive(&state, chat, user).await;
        }

        Command::Unknown(name) => {
            tracing::debug!(user = %user, command = %name, "unknown command ignored");
        }
    }

    Ok(())
}

async fn export_archive(state: &AppState, chat: ChatId, user: UserId) {
    let out_dir = state.cfg.export_dir.join(format!(
        "{}-{}",
        user.0,
        Utc::now().timestamp_millis()
    ));

    let bundles = match state.service.archive_export(&out_dir).await {
        Ok(b) => b,
        Err(e) => {
            reply_err(state, chat, user, e, "Failed to create/send ShonkLib archive.").await;
            let _ = tokio::fs::remove_dir_all(&out_dir).await;
            return;
        }
    };

    if bundles.is_empty() {
        reply(state, chat, "The ShonkLib is empty.").await;
    }
    for bundle in &bundles {
        if let Err(e) = state.messenger.send_document(chat, bundle).await {
            tracing::warn!(bundle = %bundle.display(), error = %e, "failed to send archive part");
            reply(state, chat, "Failed to create/send ShonkLib archive.").await;
            break;
        }
    }

    if let Err(e) = tokio::fs::remove_dir_all(&out_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %out_dir.display(), error = %e, "failed to remove export dir");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn cfg() -> Config {
        Config {
            telegram_bot_token: "t".into(),
            moderator_chat: -100,
            moderators: vec![1],
            data_dir: "data".into(),
            ledger_file: "data/user_data.json".into(),
            storage_dir: "data/storage".into(),
            export_dir: "data/temp_storage".into(),
            image_api_url: "http://localhost".into(),
            http_timeout: std::time::Duration::from_secs(1),
            quota: Default::default(),
            archive: Default::default(),
            review: Default::default(),
        }
    }

    #[test]
    fn parse_command_strips_bot_name_and_splits_args() {
        assert_eq!(
            parse_command("/IsShonk@shonk_bot  -q extra"),
            ("isshonk".to_string(), "-q extra".to_string())
        );
        assert_eq!(parse_command("/balance"), ("balance".to_string(), String::new()));
    }

    #[test]
    fn commands_map_options() {
        assert_eq!(Command::parse("/isshonk"), Command::Review);
        assert_eq!(Command::parse("/isshonk -q"), Command::QueueStatus);
        assert_eq!(Command::parse("/isshonk --queue-status"), Command::QueueStatus);
        assert_eq!(
            Command::parse("/shonklib -d"),
            Command::Archive(Some(ArchiveAction::Export))
        );
        assert_eq!(
            Command::parse("/shonklib --count"),
            Command::Archive(Some(ArchiveAction::Count))
        );
        assert_eq!(Command::parse("/shonklib"), Command::Archive(None));
        assert_eq!(Command::parse("/daily"), Command::Daily);
        assert_eq!(Command::parse("/nope"), Command::Unknown("nope".into()));
    }

    #[test]
    fn time_until_is_compact() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_time_until(now, now), "now");
        assert_eq!(format_time_until(now + Duration::seconds(20), now), "1m");
        assert_eq!(format_time_until(now + Duration::minutes(90), now), "1h 30m");
        assert_eq!(format_time_until(now + Duration::hours(50), now), "2d 2h");
    }

    #[test]
    fn refusals_render_and_failures_fall_through() {
        let cfg = cfg();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let monthly = Error::QuotaExceeded {
            kind: QuotaKind::Monthly,
            retry_at: Some(now + Duration::days(3)),
        };
        assert_eq!(
            refusal_text(&monthly, &cfg, now).unwrap(),
            "You have reached the monthly limit of 5 uses for this command. It resets in 3d 0h."
        );

        let daily = Error::QuotaExceeded {
            kind: QuotaKind::Daily,
            retry_at: Some(now + Duration::hours(5)),
        };
        assert!(refusal_text(&daily, &cfg, now).unwrap().contains("Try again in 5h 0m"));

        assert_eq!(
            refusal_text(&Error::Banned(UserId(1)), &cfg, now).unwrap(),
            "You are banned from using this bot."
        );
        assert!(refusal_text(&Error::Persistence("disk".into()), &cfg, now).is_none());
        assert!(refusal_text(&Error::External("http".into()), &cfg, now).is_none());
    }
}
