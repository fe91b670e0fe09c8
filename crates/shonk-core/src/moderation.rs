//! FIFO queue of human-reviewed requests, one live entry per user.
//!
//! Entries move `Queued -> UnderReview -> resolved`. A drain always works on
//! the true head of the queue, whoever triggered it, and an entry is either
//! resolved (and handed to the [`ReviewSink`]) or put back at the head when
//! the drain pauses. Nothing is ever dropped.
//!
//! The queue lock is never held while waiting on the reviewer, so position
//! queries and enqueues keep working while a review is pending.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{RequestRef, UserId},
    errors::Error,
    ports::{ReviewSink, ReviewerChannel},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReviewPolicy {
    /// Re-prompts allowed after unrecognized answers before the drain pauses.
    pub max_reprompts: u32,
    /// Give up waiting on the reviewer after this long (`None` waits forever).
    pub decision_timeout: Option<Duration>,
    /// How long the background worker waits before retrying a paused head.
    pub resume_after: Duration,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            max_reprompts: 3,
            decision_timeout: None,
            resume_after: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub ticket: u64,
    pub user: UserId,
    pub request: RequestRef,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewState {
    Queued,
    UnderReview,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected,
}

/// A reviewer answer after parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    InvalidResponse,
}

impl Decision {
    /// Anything outside the recognized vocabulary is `InvalidResponse`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "yes" | "y" | "approve" | "approved" => Decision::Approved,
            "no" | "n" | "reject" | "rejected" => Decision::Rejected,
            _ => Decision::InvalidResponse,
        }
    }

    pub fn verdict(self) -> Option<Verdict> {
        match self {
            Decision::Approved => Some(Verdict::Approved),
            Decision::Rejected => Some(Verdict::Rejected),
            Decision::InvalidResponse => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue was emptied.
    Drained,
    /// Another drain is in progress and will pick up any new entries.
    AlreadyRunning,
    /// The head entry could not be resolved; it is back at the head, queued.
    Paused { ticket: u64, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainReport {
    pub resolved: Vec<(QueueEntry, Verdict)>,
    pub outcome: DrainOutcome,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueueEntry>,
    in_review: Option<QueueEntry>,
    next_ticket: u64,
}

impl QueueState {
    fn rank_of(&self, user: UserId) -> Option<(usize, ReviewState)> {
        let offset = usize::from(self.in_review.is_some());
        if self.in_review.as_ref().is_some_and(|e| e.user == user) {
            return Some((1, ReviewState::UnderReview));
        }
        self.pending
            .iter()
            .position(|e| e.user == user)
            .map(|idx| (idx + 1 + offset, ReviewState::Queued))
    }

    fn live(&self) -> usize {
        self.pending.len() + usize::from(self.in_review.is_some())
    }

    fn pause_head(&mut self) -> Option<u64> {
        let entry = self.in_review.take()?;
        let ticket = entry.ticket;
        self.pending.push_front(entry);
        Some(ticket)
    }
}

pub struct ModerationQueue {
    policy: ReviewPolicy,
    state: Mutex<QueueState>,
    draining: Mutex<()>,
    wake: Notify,
}

impl Default for ModerationQueue {
    fn default() -> Self {
        Self::new(ReviewPolicy::default())
    }
}

impl ModerationQueue {
    pub fn new(policy: ReviewPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(QueueState {
                next_ticket: 1,
                ..Default::default()
            }),
            draining: Mutex::new(()),
            wake: Notify::new(),
        }
    }

    /// Append a request at the tail and return its 1-based position.
    pub async fn enqueue(
        &self,
        user: UserId,
        request: RequestRef,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let position = {
            let mut st = self.state.lock().await;
            if st.rank_of(user).is_some() {
                return Err(Error::DuplicateRequest(user));
            }
            let ticket = st.next_ticket;
            st.next_ticket += 1;
            st.pending.push_back(QueueEntry {
                ticket,
                user,
                request,
                enqueued_at: now,
            });
            st.live()
        };
        tracing::info!(user = %user, position, "review request queued");
        self.wake.notify_one();
        Ok(position)
    }

    /// 1-based rank of the user's live entry. The entry under review is rank 1.
    pub async fn position_of(&self, user: UserId) -> Result<usize> {
        self.status_of(user).await.map(|(rank, _)| rank)
    }

    pub async fn status_of(&self, user: UserId) -> Result<(usize, ReviewState)> {
        self.state
            .lock()
            .await
            .rank_of(user)
            .ok_or(Error::NotFound(user))
    }

    /// Number of live entries (queued plus under review).
    pub async fn len(&self) -> usize {
        self.state.lock().await.live()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Resolve entries from the head until the queue is empty or the drain
    /// pauses.
    pub async fn drain(&self, reviewer: &dyn ReviewerChannel, sink: &dyn ReviewSink) -> DrainReport {
        let mut resolved = Vec::new();
        loop {
            let Ok(guard) = self.draining.try_lock() else {
                return DrainReport {
                    resolved,
                    outcome: DrainOutcome::AlreadyRunning,
                };
            };
            let outcome = self.drain_locked(reviewer, sink, &mut resolved).await;
            drop(guard);

            if outcome != DrainOutcome::Drained {
                return DrainReport { resolved, outcome };
            }
            // An enqueue may have raced with our final empty check while the
            // drain lock was still held.
            if self.state.lock().await.pending.is_empty() {
                return DrainReport { resolved, outcome };
            }
        }
    }

    async fn drain_locked(
        &self,
        reviewer: &dyn ReviewerChannel,
        sink: &dyn ReviewSink,
        resolved: &mut Vec<(QueueEntry, Verdict)>,
    ) -> DrainOutcome {
        loop {
            let entry = {
                let mut st = self.state.lock().await;
                let Some(entry) = st.pending.pop_front() else {
                    return DrainOutcome::Drained;
                };
                st.in_review = Some(entry.clone());
                entry
            };

            let verdict = match self.review(reviewer, &entry).await {
                Ok(v) => v,
                Err(e) => {
                    self.state.lock().await.pause_head();
                    tracing::warn!(ticket = entry.ticket, user = %entry.user, error = %e, "review paused");
                    return DrainOutcome::Paused {
                        ticket: entry.ticket,
                        reason: e.to_string(),
                    };
                }
            };

            if let Err(e) = sink.resolved(&entry, verdict).await {
                if e.is_operational() {
                    tracing::error!(ticket = entry.ticket, user = %entry.user, error = %e, "failed to record review outcome");
                } else {
                    tracing::info!(ticket = entry.ticket, user = %entry.user, error = %e, "review outcome not recorded");
                }
            }

            self.state.lock().await.in_review = None;
            tracing::info!(ticket = entry.ticket, user = %entry.user, ?verdict, "review resolved");
            resolved.push((entry, verdict));
        }
    }

    /// Prompt until the reviewer gives a recognizable answer.
    async fn review(&self, reviewer: &dyn ReviewerChannel, entry: &QueueEntry) -> Result<Verdict> {
        let mut attempt = 0u32;
        loop {
            let ask = reviewer.request_decision(entry, attempt);
            let raw = match self.policy.decision_timeout {
                Some(limit) => tokio::time::timeout(limit, ask).await.map_err(|_| {
                    Error::External(format!("no reviewer decision within {limit:?}"))
                })??,
                None => ask.await?,
            };

            if let Some(verdict) = Decision::parse(&raw).verdict() {
                return Ok(verdict);
            }

            tracing::info!(ticket = entry.ticket, attempt, answer = %raw, "unrecognized reviewer answer");
            if attempt >= self.policy.max_reprompts {
                return Err(Error::InvalidDecision(raw));
            }
            attempt += 1;
        }
    }

    /// Background worker: drain whenever something is enqueued until `cancel`
    /// fires. A paused head is retried after `resume_after`.
    pub async fn run(
        self: Arc<Self>,
        reviewer: Arc<dyn ReviewerChannel>,
        sink: Arc<dyn ReviewSink>,
        cancel: CancellationToken,
    ) {
        loop {
            let report = tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(ticket) = self.state.lock().await.pause_head() {
                        tracing::info!(ticket, "moderation worker stopped mid-review; entry kept queued");
                    }
                    return;
                }
                report = self.drain(reviewer.as_ref(), sink.as_ref()) => report,
            };

            let retry = matches!(report.outcome, DrainOutcome::Paused { .. });
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.policy.resume_after), if retry => {}
            }
        }
    }
}
