//! Telegram update handlers.
//!
//! Every human message earns one point; slash commands (in the text or in a
//! photo caption) are then dispatched to `commands`.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use shonk_core::{domain::UserId, errors::Error};

use crate::router::AppState;

mod callback;
mod commands;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }
    let user = UserId(from.id.0 as i64);

    match state.service.credit_activity(user).await {
        Ok(_) | Err(Error::Banned(_)) => {}
        Err(e) => tracing::error!(user = %user, error = %e, "failed to credit activity"),
    }

    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };
    if !text.starts_with('/') {
        return Ok(());
    }

    commands::handle_command(bot, &msg, user, text, state).await
}
