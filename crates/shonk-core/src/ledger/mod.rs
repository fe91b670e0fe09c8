//! Durable per-user ledger with atomic per-user read-modify-write.
//!
//! Every mutation goes through a [`UserTxn`], which holds that user's lock
//! from the read until the commit. Commits rewrite the whole store; the
//! in-memory copy only changes once the write succeeded.

mod record;
mod store;

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

pub use record::UserRecord;
pub use store::{JsonFileStore, LedgerStore, MemoryStore, Records};

use crate::{domain::UserId, errors::Error, Result};

#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    async fn lock_user(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(user)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    // Also serializes whole-store writes across users.
    records: Mutex<Records>,
    locks: UserLocks,
}

impl Ledger {
    /// Read the full record set from `store`.
    pub async fn open(store: Arc<dyn LedgerStore>) -> Result<Self> {
        let records = store.load().await?;
        tracing::info!(users = records.len(), "ledger loaded");
        Ok(Self {
            store,
            records: Mutex::new(records),
            locks: UserLocks::default(),
        })
    }

    /// Current record for `user`, creating and persisting a default one on
    /// first reference.
    ///
    /// Never fails: if persisting the new default record fails the error is
    /// logged and the default is still returned (it will be written with the
    /// next successful commit).
    pub async fn get(&self, user: UserId) -> UserRecord {
        let _guard = self.locks.lock_user(user).await;
        let mut records = self.records.lock().await;
        if let Some(rec) = records.get(&user) {
            return rec.clone();
        }

        let rec = UserRecord::default();
        records.insert(user, rec.clone());
        if let Err(e) = self.store.save(&records).await {
            tracing::error!(user = %user, error = %e, "failed to persist new ledger record");
        }
        rec
    }

    /// Begin a read-modify-write for `user`.
    ///
    /// Other transactions (and `get`) for the same user wait until the
    /// returned guard is committed or dropped. Do not call other ledger
    /// methods for the same user while holding it.
    pub async fn begin(&self, user: UserId) -> UserTxn<'_> {
        let guard = self.locks.lock_user(user).await;
        let record = self
            .records
            .lock()
            .await
            .get(&user)
            .cloned()
            .unwrap_or_default();
        UserTxn {
            ledger: self,
            user,
            record,
            _guard: guard,
        }
    }

    /// Apply `mutation` to the user's record and persist it as one step.
    pub async fn update<F>(&self, user: UserId, mutation: F) -> Result<UserRecord>
    where
        F: FnOnce(&mut UserRecord),
    {
        let txn = self.begin(user).await;
        let mut next = txn.record().clone();
        mutation(&mut next);
        txn.commit(next).await
    }

    /// Credit activity points.
    pub async fn credit_points(&self, user: UserId, points: u64) -> Result<UserRecord> {
        self.update(user, |rec| rec.points = rec.points.saturating_add(points))
            .await
    }

    pub async fn set_premium(&self, user: UserId, premium: bool) -> Result<UserRecord> {
        let txn = self.begin(user).await;
        let mut next = txn.record().clone();
        next.premium = premium;
        txn.commit_unchecked(next).await
    }

    pub async fn set_banned(&self, user: UserId, banned: bool) -> Result<UserRecord> {
        let txn = self.begin(user).await;
        let mut next = txn.record().clone();
        next.banned = banned;
        txn.commit_unchecked(next).await
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    async fn write(&self, user: UserId, next: UserRecord) -> Result<UserRecord> {
        let mut records = self.records.lock().await;
        let prev = records.insert(user, next.clone());

        if let Err(e) = self.store.save(&records).await {
            match prev {
                Some(p) => records.insert(user, p),
                None => records.remove(&user),
            };
            tracing::error!(user = %user, error = %e, "ledger write failed");
            return Err(match e {
                Error::Persistence(_) => e,
                other => Error::Persistence(other.to_string()),
            });
        }
        Ok(next)
    }
}

/// Exclusive handle on one user's record.
pub struct UserTxn<'a> {
    ledger: &'a Ledger,
    user: UserId,
    record: UserRecord,
    _guard: OwnedMutexGuard<()>,
}

impl UserTxn<'_> {
    pub fn user(&self) -> UserId {
        self.user
    }

    /// The record as it was when the transaction began.
    pub fn record(&self) -> &UserRecord {
        &self.record
    }

    /// Persist `next` as the user's record.
    ///
    /// Refused with [`Error::Banned`] for banned users; on
    /// [`Error::Persistence`] the stored value is unchanged.
    pub async fn commit(self, next: UserRecord) -> Result<UserRecord> {
        if self.record.banned {
            return Err(Error::Banned(self.user));
        }
        self.commit_unchecked(next).await
    }

    async fn commit_unchecked(self, next: UserRecord) -> Result<UserRecord> {
        self.ledger.write(self.user, next).await
    }
}
