use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::InlineKeyboard,
    Result,
};

/// Cross-messenger port.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;

    /// Send previously uploaded media (by platform reference) with an
    /// optional caption and keyboard.
    async fn send_photo(
        &self,
        chat_id: ChatId,
        content: &str,
        caption: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef>;

    async fn send_document(&self, chat_id: ChatId, path: &Path) -> Result<MessageRef>;

    /// Drop the inline keyboard from a sent message.
    async fn clear_keyboard(&self, msg: MessageRef) -> Result<()>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
