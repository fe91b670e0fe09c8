//! Reviewer channel over a chat: the submitted photo goes to the moderator
//! chat with answer buttons, and the button callback completes the wait.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};

use crate::{
    domain::ChatId,
    errors::Error,
    messaging::{port::MessagingPort, types::InlineKeyboard},
    moderation::QueueEntry,
    ports::ReviewerChannel,
    Result,
};

pub const REVIEW_CALLBACK_PREFIX: &str = "review";

/// Parse `review:{ticket}:{answer}` callback data.
pub fn parse_review_callback(data: &str) -> Option<(u64, String)> {
    let mut parts = data.splitn(3, ':');
    if parts.next()? != REVIEW_CALLBACK_PREFIX {
        return None;
    }
    let ticket = parts.next()?.parse::<u64>().ok()?;
    let answer = parts.next().unwrap_or_default().to_string();
    Some((ticket, answer))
}

/// Outstanding review prompts keyed by queue ticket.
#[derive(Default)]
pub struct PendingDecisions {
    inner: Mutex<HashMap<u64, oneshot::Sender<String>>>,
}

impl PendingDecisions {
    async fn register(&self, ticket: u64) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(ticket, tx);
        rx
    }

    async fn forget(&self, ticket: u64) {
        self.inner.lock().await.remove(&ticket);
    }

    /// Deliver a raw answer. False if nobody is waiting on `ticket`.
    pub async fn answer(&self, ticket: u64, raw: impl Into<String>) -> bool {
        let Some(tx) = self.inner.lock().await.remove(&ticket) else {
            return false;
        };
        tx.send(raw.into()).is_ok()
    }

    pub async fn is_waiting(&self, ticket: u64) -> bool {
        self.inner.lock().await.contains_key(&ticket)
    }
}

pub struct ChatReviewer {
    messenger: Arc<dyn MessagingPort>,
    moderator_chat: ChatId,
    pending: Arc<PendingDecisions>,
}

impl ChatReviewer {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        moderator_chat: ChatId,
        pending: Arc<PendingDecisions>,
    ) -> Self {
        Self {
            messenger,
            moderator_chat,
            pending,
        }
    }
}

#[async_trait]
impl ReviewerChannel for ChatReviewer {
    async fn request_decision(&self, entry: &QueueEntry, attempt: u32) -> Result<String> {
        let rx = self.pending.register(entry.ticket).await;

        let caption = if attempt == 0 {
            format!(
                "Is this a Shonk? (request #{} from user {})",
                entry.ticket, entry.user
            )
        } else {
            format!(
                "Invalid response received, please answer again. Is this a Shonk? (request #{}, attempt {})",
                entry.ticket,
                attempt + 1
            )
        };
        let keyboard = InlineKeyboard::answers(
            REVIEW_CALLBACK_PREFIX,
            entry.ticket,
            &[("Yes, a Shonk", "yes"), ("Not a Shonk", "no")],
        );

        let prompt = match self
            .messenger
            .send_photo(
                self.moderator_chat,
                &entry.request.content,
                &caption,
                Some(keyboard),
            )
            .await
        {
            Ok(m) => m,
            Err(e) => {
                self.pending.forget(entry.ticket).await;
                return Err(e);
            }
        };

        let answer = rx
            .await
            .map_err(|_| Error::External(format!("review #{} abandoned", entry.ticket)))?;

        if let Err(e) = self.messenger.clear_keyboard(prompt).await {
            tracing::debug!(ticket = entry.ticket, error = %e, "failed to clear review keyboard");
        }
        Ok(answer)
    }
}
