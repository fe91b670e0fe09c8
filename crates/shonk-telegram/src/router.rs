use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;

use shonk_core::{
    config::Config,
    domain::ChatId,
    messaging::{
        port::MessagingPort,
        reviewer::{ChatReviewer, PendingDecisions},
    },
    ports::{ReviewSink, ReviewerChannel},
    service::ShonkService,
};

use crate::handlers;
use crate::review::ReviewNotifier;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub service: Arc<ShonkService>,
    pub messenger: Arc<dyn MessagingPort>,
    pub pending: Arc<PendingDecisions>,
}

pub async fn run_polling(cfg: Arc<Config>, service: Arc<ShonkService>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed; continuing"),
    }
    tracing::info!(
        moderator_chat = cfg.moderator_chat,
        moderators = cfg.moderators.len(),
        users = service.ledger().len().await,
        "moderation configured"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let pending = Arc::new(PendingDecisions::default());

    let reviewer: Arc<dyn ReviewerChannel> = Arc::new(ChatReviewer::new(
        messenger.clone(),
        ChatId(cfg.moderator_chat),
        pending.clone(),
    ));
    let sink: Arc<dyn ReviewSink> = Arc::new(ReviewNotifier::new(service.clone(), messenger.clone()));

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(service.queue().clone().run(reviewer, sink, cancel.clone()));

    let state = Arc::new(AppState {
        cfg,
        service,
        messenger,
        pending,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    cancel.cancel();
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "moderation worker panicked");
    }
    tracing::info!("shutdown complete");
    Ok(())
}
