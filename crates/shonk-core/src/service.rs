//! Typed operations behind the bot's commands.
//!
//! The chat adapter parses commands and renders replies; everything stateful
//! happens here. Refusals come back as [`Error`] variants and never change
//! state.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};

use crate::{
    archive::{self, ArchiveLimits, Partition},
    domain::{ItemRef, RequestRef, UserId},
    errors::{Error, QuotaKind},
    ledger::{Ledger, UserRecord},
    moderation::{ModerationQueue, QueueEntry, ReviewState, Verdict},
    ports::{FetchedImage, ImageProvider},
    quota::QuotaManager,
    storage::FileStore,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Balance {
    pub points: u64,
    pub premium: bool,
    pub monthly_uses: u32,
    pub monthly_limit: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimedImage {
    pub item: ItemRef,
    pub url: String,
    pub byte_size: u64,
    pub path: PathBuf,
}

pub struct ShonkService {
    ledger: Arc<Ledger>,
    quota: QuotaManager,
    queue: Arc<ModerationQueue>,
    files: Arc<dyn FileStore>,
    images: Arc<dyn ImageProvider>,
    archive: ArchiveLimits,
}

impl ShonkService {
    pub fn new(
        ledger: Arc<Ledger>,
        quota: QuotaManager,
        queue: Arc<ModerationQueue>,
        files: Arc<dyn FileStore>,
        images: Arc<dyn ImageProvider>,
        archive: ArchiveLimits,
    ) -> Self {
        Self {
            ledger,
            quota,
            queue,
            files,
            images,
            archive,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn queue(&self) -> &Arc<ModerationQueue> {
        &self.queue
    }

    /// The user's record, refused with [`Error::Banned`] for banned users.
    pub async fn active_record(&self, user: UserId) -> Result<UserRecord> {
        let rec = self.ledger.get(user).await;
        if rec.banned {
            return Err(Error::Banned(user));
        }
        Ok(rec)
    }

    /// One point per chat message.
    pub async fn credit_activity(&self, user: UserId) -> Result<u64> {
        Ok(self.ledger.credit_points(user, 1).await?.points)
    }

    pub async fn balance(&self, user: UserId) -> Result<Balance> {
        let rec = self.active_record(user).await?;
        Ok(Balance {
            points: rec.points,
            premium: rec.premium,
            monthly_uses: rec.monthly_uses,
            monthly_limit: self.quota.policy().monthly_limit,
        })
    }

    pub async fn collection_count(&self, user: UserId) -> Result<usize> {
        Ok(self.active_record(user).await?.collection.len())
    }

    /// Claim today's image.
    ///
    /// The user's record stays locked across the fetch so a second claim
    /// from the same user waits instead of racing. Nothing is committed if
    /// the fetch or the save fails.
    pub async fn claim_daily(&self, user: UserId, now: DateTime<Utc>) -> Result<ClaimedImage> {
        let txn = self.ledger.begin(user).await;
        if txn.record().banned {
            return Err(Error::Banned(user));
        }
        self.quota
            .daily_check(txn.record(), now)
            .into_result(QuotaKind::Daily)?;

        let claimed = self.fetch_and_store().await?;
        let next = self
            .quota
            .claim_daily(txn.record(), now, claimed.item.clone())
            .into_result(QuotaKind::Daily)?;
        txn.commit(next).await?;

        tracing::info!(user = %user, item = %claimed.item.0, "daily image claimed");
        Ok(claimed)
    }

    /// Fetch and store a random image without touching any quota.
    pub async fn fetch_image(&self, user: UserId) -> Result<ClaimedImage> {
        self.active_record(user).await?;
        self.fetch_and_store().await
    }

    async fn fetch_and_store(&self) -> Result<ClaimedImage> {
        let FetchedImage {
            url,
            file_name,
            bytes,
        } = self.images.fetch_random().await?;
        let byte_size = bytes.len() as u64;

        let files = self.files.clone();
        let name = file_name.clone();
        let path = tokio::task::spawn_blocking(move || files.save(&name, &bytes))
            .await
            .map_err(|e| Error::External(format!("image save task failed: {e}")))??;

        Ok(ClaimedImage {
            item: ItemRef(file_name),
            url,
            byte_size,
            path,
        })
    }

    /// Queue a request for human review. Checks (but does not consume) the
    /// monthly quota; the use is charged when the review resolves.
    pub async fn request_review(
        &self,
        user: UserId,
        request: RequestRef,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let rec = self.active_record(user).await?;
        self.quota
            .monthly_check(&rec, now)
            .into_result(QuotaKind::Monthly)?;
        self.queue.enqueue(user, request, now).await
    }

    pub async fn queue_status(&self, user: UserId) -> Result<(usize, ReviewState)> {
        self.active_record(user).await?;
        self.queue.status_of(user).await
    }

    /// Book a resolved review against the user's monthly quota.
    pub async fn record_review(
        &self,
        entry: &QueueEntry,
        verdict: Verdict,
        now: DateTime<Utc>,
    ) -> Result<UserRecord> {
        let txn = self.ledger.begin(entry.user).await;
        if txn.record().banned {
            return Err(Error::Banned(entry.user));
        }
        let next = self
            .quota
            .consume_monthly(txn.record(), now)
            .into_result(QuotaKind::Monthly)?;
        let rec = txn.commit(next).await?;
        tracing::debug!(user = %entry.user, ?verdict, uses = rec.monthly_uses, "review booked");
        Ok(rec)
    }

    pub async fn archive_count(&self) -> Result<usize> {
        let files = self.files.clone();
        tokio::task::spawn_blocking(move || files.count())
            .await
            .map_err(|e| Error::External(format!("archive count task failed: {e}")))?
    }

    pub async fn archive_plan(&self) -> Result<Vec<Partition>> {
        let files = self.files.clone();
        let cap = self.archive.part_bytes;
        tokio::task::spawn_blocking(move || files.list().map(|l| archive::partition(l, cap)))
            .await
            .map_err(|e| Error::External(format!("archive listing task failed: {e}")))?
    }

    /// Build the export bundles under `out_dir`, in partition order.
    pub async fn archive_export(&self, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let parts = self.archive_plan().await?;
        let files = self.files.clone();
        let out_dir = out_dir.to_path_buf();
        let bundles = tokio::task::spawn_blocking(move || {
            archive::export_partitions(files.root(), &parts, &out_dir)
        })
        .await
        .map_err(|e| Error::External(format!("archive export task failed: {e}")))??;

        tracing::info!(bundles = bundles.len(), "archive exported");
        Ok(bundles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::ChatId,
        ledger::MemoryStore,
        quota::QuotaPolicy,
        storage::DirStore,
    };
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeImages {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ImageProvider for FakeImages {
        async fn fetch_random(&self) -> Result<FetchedImage> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::External("api down".into()));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedImage {
                url: format!("https://img.example/shonk{n}.png"),
                file_name: format!("shonk{n}.png"),
                bytes: vec![7u8; 10 + n],
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        images: Arc<FakeImages>,
        service: ShonkService,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(Ledger::open(Arc::new(MemoryStore::new())).await.unwrap());
        let images = Arc::new(FakeImages::default());
        let service = ShonkService::new(
            ledger,
            QuotaManager::new(QuotaPolicy::default()),
            Arc::new(ModerationQueue::default()),
            Arc::new(DirStore::new(dir.path().join("storage"))),
            images.clone(),
            ArchiveLimits { part_bytes: 25 },
        );
        Fixture {
            _dir: dir,
            images,
            service,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn req(user: i64) -> RequestRef {
        RequestRef {
            content: "file-id".into(),
            reply_to: ChatId(user),
        }
    }

    #[tokio::test]
    async fn claim_daily_stores_image_and_enforces_cooldown() {
        let f = fixture().await;
        let user = UserId(1);

        let claimed = f.service.claim_daily(user, t0()).await.unwrap();
        assert_eq!(claimed.item, ItemRef("shonk0.png".into()));
        assert_eq!(claimed.byte_size, 10);
        assert!(claimed.path.exists());
        assert_eq!(f.service.collection_count(user).await.unwrap(), 1);

        let err = f
            .service
            .claim_daily(user, t0() + Duration::hours(23))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                kind: QuotaKind::Daily,
                ..
            }
        ));
        // Refused before reaching the provider.
        assert_eq!(f.images.calls.load(Ordering::SeqCst), 1);

        f.service
            .claim_daily(user, t0() + Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(f.service.collection_count(user).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_does_not_consume_daily_claim() {
        let f = fixture().await;
        let user = UserId(2);

        f.images.fail.store(true, Ordering::SeqCst);
        let err = f.service.claim_daily(user, t0()).await.unwrap_err();
        assert!(matches!(err, Error::External(_)));

        let rec = f.service.ledger().get(user).await;
        assert_eq!(rec.daily_claim_at, None);
        assert!(rec.collection.is_empty());

        f.images.fail.store(false, Ordering::SeqCst);
        f.service.claim_daily(user, t0()).await.unwrap();
    }

    #[tokio::test]
    async fn banned_users_are_refused_everywhere() {
        let f = fixture().await;
        let user = UserId(3);
        f.service.ledger().set_banned(user, true).await.unwrap();

        assert!(matches!(f.service.balance(user).await, Err(Error::Banned(_))));
        assert!(matches!(
            f.service.credit_activity(user).await,
            Err(Error::Banned(_))
        ));
        assert!(matches!(
            f.service.claim_daily(user, t0()).await,
            Err(Error::Banned(_))
        ));
        assert!(matches!(
            f.service.request_review(user, req(3), t0()).await,
            Err(Error::Banned(_))
        ));
        assert!(f.service.queue().is_empty().await);
        assert_eq!(f.images.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn review_requests_are_gated_by_monthly_quota() {
        let f = fixture().await;
        let user = UserId(4);

        for i in 0..5 {
            let now = t0() + Duration::days(i);
            assert_eq!(f.service.request_review(user, req(4), now).await.unwrap(), 1);
            let entry = QueueEntry {
                ticket: i as u64,
                user,
                request: req(4),
                enqueued_at: now,
            };
            // Simulate the drain resolving the entry.
            let rec = f
                .service
                .record_review(&entry, Verdict::Approved, now)
                .await
                .unwrap();
            assert_eq!(rec.monthly_uses, (i + 1) as u32);
            let _ = f.service.queue().drain(&AlwaysYes, &NoopSink).await;
        }

        let err = f
            .service
            .request_review(user, req(4), t0() + Duration::days(6))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                kind: QuotaKind::Monthly,
                ..
            }
        ));

        let later = t0() + Duration::days(30) + Duration::seconds(1);
        assert_eq!(f.service.request_review(user, req(4), later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn premium_reviews_are_not_counted() {
        let f = fixture().await;
        let user = UserId(5);
        f.service.ledger().set_premium(user, true).await.unwrap();

        let entry = QueueEntry {
            ticket: 1,
            user,
            request: req(5),
            enqueued_at: t0(),
        };
        let rec = f
            .service
            .record_review(&entry, Verdict::Rejected, t0())
            .await
            .unwrap();
        assert_eq!(rec.monthly_uses, 0);
        assert!(f.service.balance(user).await.unwrap().premium);
    }

    #[tokio::test]
    async fn archive_counts_and_exports_stored_images() {
        let f = fixture().await;
        for u in 10..13 {
            f.service.claim_daily(UserId(u), t0()).await.unwrap();
        }
        // Sizes 10, 11, 12 with a cap of 25.
        assert_eq!(f.service.archive_count().await.unwrap(), 3);

        let plan = f.service.archive_plan().await.unwrap();
        let sizes: Vec<u64> = plan.iter().map(|p| p.total_size).collect();
        assert_eq!(sizes, vec![23, 10]);

        let out = f._dir.path().join("export");
        let bundles = f.service.archive_export(&out).await.unwrap();
        assert_eq!(bundles.len(), 2);
        assert!(bundles.iter().all(|b| b.exists()));
    }

    struct AlwaysYes;

    #[async_trait]
    impl crate::ports::ReviewerChannel for AlwaysYes {
        async fn request_decision(&self, _entry: &QueueEntry, _attempt: u32) -> Result<String> {
            Ok("yes".into())
        }
    }

    struct NoopSink;

    #[async_trait]
    impl crate::ports::ReviewSink for NoopSink {
        async fn resolved(&self, _entry: &QueueEntry, _verdict: Verdict) -> Result<()> {
            Ok(())
        }
    }
}
