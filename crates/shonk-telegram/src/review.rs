use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use shonk_core::{
    messaging::port::MessagingPort,
    moderation::{QueueEntry, Verdict},
    ports::ReviewSink,
    service::ShonkService,
    Result,
};

/// Books each resolved review in the ledger and tells the requester.
pub struct ReviewNotifier {
    service: Arc<ShonkService>,
    messenger: Arc<dyn MessagingPort>,
}

impl ReviewNotifier {
    pub fn new(service: Arc<ShonkService>, messenger: Arc<dyn MessagingPort>) -> Self {
        Self { service, messenger }
    }
}

pub fn verdict_text(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Approved => "Yes, this is a Shonk!",
        Verdict::Rejected => "No, this is not a Shonk.",
    }
}

#[async_trait]
impl ReviewSink for ReviewNotifier {
    async fn resolved(&self, entry: &QueueEntry, verdict: Verdict) -> Result<()> {
        let booked = self.service.record_review(entry, verdict, Utc::now()).await;

        if let Err(e) = self
            .messenger
            .send_text(entry.request.reply_to, verdict_text(verdict))
            .await
        {
            tracing::warn!(ticket = entry.ticket, user = %entry.user, error = %e, "failed to deliver review verdict");
        }

        booked.map(|_| ())
    }
}
