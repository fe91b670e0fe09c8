//! Cross-messenger abstractions (Telegram today; Discord later).

pub mod port;
pub mod reviewer;
pub mod types;
