use std::sync::Arc;

use teloxide::prelude::*;

use shonk_core::messaging::reviewer::parse_review_callback;

use crate::router::AppState;

async fn answer(state: &AppState, cb_id: &str, text: Option<&str>) {
    if let Err(e) = state.messenger.answer_callback_query(cb_id, text).await {
        tracing::debug!(error = %e, "failed to answer callback query");
    }
}

pub async fn handle_callback(
    _bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let user_id = q.from.id.0 as i64;
    let data = q.data.as_deref().unwrap_or_default();

    // review:{ticket}:{answer}
    let Some((ticket, raw)) = parse_review_callback(data) else {
        answer(&state, &q.id, None).await;
        return Ok(());
    };

    if !state.cfg.is_moderator(user_id) {
        tracing::info!(user = user_id, ticket, "non-moderator pressed a review button");
        answer(&state, &q.id, Some("Only moderators can answer this.")).await;
        return Ok(());
    }

    let reply = if state.pending.answer(ticket, raw.clone()).await {
        tracing::info!(moderator = user_id, ticket, answer = %raw, "review answer received");
        "Recorded"
    } else {
        "This review is no longer waiting for an answer"
    };
    answer(&state, &q.id, Some(reply)).await;
    Ok(())
}
