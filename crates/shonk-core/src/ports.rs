use async_trait::async_trait;

use crate::{
    moderation::{QueueEntry, Verdict},
    Result,
};

/// Human-operated review channel.
///
/// Returns the reviewer's raw answer for `entry`; the queue decides whether
/// it is a recognizable decision. `attempt` starts at 0 and increases with
/// every re-prompt after an unrecognized answer.
#[async_trait]
pub trait ReviewerChannel: Send + Sync {
    async fn request_decision(&self, entry: &QueueEntry, attempt: u32) -> Result<String>;
}

/// Receives every resolved queue entry, in resolution order.
#[async_trait]
pub trait ReviewSink: Send + Sync {
    async fn resolved(&self, entry: &QueueEntry, verdict: Verdict) -> Result<()>;
}

/// An image already downloaded from the remote provider.
#[derive(Clone, Debug)]
pub struct FetchedImage {
    pub url: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl FetchedImage {
    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Source of random images.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn fetch_random(&self) -> Result<FetchedImage>;
}
