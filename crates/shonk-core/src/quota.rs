//! Quota policies: a rolling monthly usage limit and a daily claim cooldown.
//!
//! Both are pure functions of `(record, now)`. They never touch the ledger;
//! the caller commits `QuotaDecision::record` once the gated action itself
//! succeeded.

use chrono::{DateTime, Duration, Utc};

use crate::{
    domain::ItemRef,
    errors::{Error, QuotaKind},
    ledger::UserRecord,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub monthly_limit: u32,
    pub monthly_window: Duration,
    pub daily_cooldown: Duration,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            monthly_limit: 5,
            monthly_window: Duration::days(30),
            daily_cooldown: Duration::hours(24),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Record to commit. Carries window seeding/reset even when refused.
    pub record: UserRecord,
    /// Earliest time the refused action could succeed, when known.
    pub retry_at: Option<DateTime<Utc>>,
}

impl QuotaDecision {
    /// `Ok(record)` when allowed, `QuotaExceeded` otherwise.
    pub fn into_result(self, kind: QuotaKind) -> Result<UserRecord> {
        if self.allowed {
            Ok(self.record)
        } else {
            Err(Error::QuotaExceeded {
                kind,
                retry_at: self.retry_at,
            })
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QuotaManager {
    policy: QuotaPolicy,
}

impl QuotaManager {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Apply the window reset (or first-use seeding) for `now`.
    fn roll_window(&self, rec: &mut UserRecord, now: DateTime<Utc>) {
        match rec.monthly_reset_at {
            Some(reset_at) if now > reset_at + self.policy.monthly_window => {
                rec.monthly_uses = 0;
                rec.monthly_reset_at = Some(now);
            }
            Some(_) => {}
            None => rec.monthly_reset_at = Some(now),
        }
    }

    /// Would a monthly-gated action be admitted right now? Does not consume.
    pub fn monthly_check(&self, rec: &UserRecord, now: DateTime<Utc>) -> QuotaDecision {
        let mut next = rec.clone();
        if rec.banned {
            return QuotaDecision {
                allowed: false,
                record: next,
                retry_at: None,
            };
        }

        self.roll_window(&mut next, now);
        let allowed = next.premium || next.monthly_uses < self.policy.monthly_limit;
        let retry_at = if allowed {
            None
        } else {
            next.monthly_reset_at
                .map(|r| r + self.policy.monthly_window + Duration::seconds(1))
        };

        QuotaDecision {
            allowed,
            record: next,
            retry_at,
        }
    }

    /// Admit and consume one monthly use. Premium users are never counted.
    pub fn consume_monthly(&self, rec: &UserRecord, now: DateTime<Utc>) -> QuotaDecision {
        let mut decision = self.monthly_check(rec, now);
        if decision.allowed && !decision.record.premium {
            decision.record.monthly_uses = decision.record.monthly_uses.saturating_add(1);
        }
        decision
    }

    /// Is the daily claim available at `now`? Does not claim.
    pub fn daily_check(&self, rec: &UserRecord, now: DateTime<Utc>) -> QuotaDecision {
        let retry_at = rec
            .daily_claim_at
            .map(|t| t + self.policy.daily_cooldown)
            .filter(|ready| now < *ready);
        QuotaDecision {
            allowed: !rec.banned && retry_at.is_none(),
            record: rec.clone(),
            retry_at,
        }
    }

    /// Claim the daily item: stamps `now` and appends `item` to the collection.
    pub fn claim_daily(&self, rec: &UserRecord, now: DateTime<Utc>, item: ItemRef) -> QuotaDecision {
        let mut decision = self.daily_check(rec, now);
        if decision.allowed {
            decision.record.daily_claim_at = Some(now);
            decision.record.collection.push(item);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_use_seeds_window_without_reset() {
        let qm = QuotaManager::default();
        let rec = UserRecord {
            monthly_uses: 2,
            ..Default::default()
        };

        let d = qm.consume_monthly(&rec, t0());
        assert!(d.allowed);
        assert_eq!(d.record.monthly_reset_at, Some(t0()));
        assert_eq!(d.record.monthly_uses, 3);
    }

    #[test]
    fn limit_refuses_until_window_passes() {
        let qm = QuotaManager::default();
        let rec = UserRecord {
            monthly_uses: 5,
            monthly_reset_at: Some(t0()),
            ..Default::default()
        };

        let refused = qm.consume_monthly(&rec, t0() + Duration::days(30));
        assert!(!refused.allowed);
        assert_eq!(refused.record, rec);
        assert_eq!(
            refused.retry_at,
            Some(t0() + Duration::days(30) + Duration::seconds(1))
        );

        let later = t0() + Duration::days(30) + Duration::seconds(1);
        let ok = qm.consume_monthly(&rec, later);
        assert!(ok.allowed);
        assert_eq!(ok.record.monthly_uses, 1);
        assert_eq!(ok.record.monthly_reset_at, Some(later));
    }

    #[test]
    fn check_does_not_consume() {
        let qm = QuotaManager::default();
        let rec = UserRecord {
            monthly_uses: 4,
            monthly_reset_at: Some(t0()),
            ..Default::default()
        };
        let d = qm.monthly_check(&rec, t0());
        assert!(d.allowed);
        assert_eq!(d.record.monthly_uses, 4);
    }

    #[test]
    fn premium_bypasses_monthly_limit_and_is_not_counted() {
        let qm = QuotaManager::default();
        let rec = UserRecord {
            premium: true,
            monthly_uses: 9,
            monthly_reset_at: Some(t0()),
            ..Default::default()
        };
        let d = qm.consume_monthly(&rec, t0());
        assert!(d.allowed);
        assert_eq!(d.record.monthly_uses, 9);
    }

    #[test]
    fn banned_users_are_refused_without_state_change() {
        let qm = QuotaManager::default();
        let rec = UserRecord {
            banned: true,
            premium: true,
            ..Default::default()
        };
        let d = qm.consume_monthly(&rec, t0());
        assert!(!d.allowed);
        assert_eq!(d.record, rec);

        let d = qm.claim_daily(&rec, t0(), ItemRef("x.png".into()));
        assert!(!d.allowed);
        assert!(d.record.collection.is_empty());
    }

    #[test]
    fn daily_cooldown_boundaries() {
        let qm = QuotaManager::default();
        let rec = UserRecord::default();

        let first = qm.claim_daily(&rec, t0(), ItemRef("a.png".into()));
        assert!(first.allowed);
        let rec = first.record;
        assert_eq!(rec.daily_claim_at, Some(t0()));
        assert_eq!(rec.collection, vec![ItemRef("a.png".into())]);

        let early = t0() + Duration::hours(23) + Duration::minutes(59);
        let refused = qm.claim_daily(&rec, early, ItemRef("b.png".into()));
        assert!(!refused.allowed);
        assert_eq!(refused.retry_at, Some(t0() + Duration::hours(24)));
        assert_eq!(refused.record.collection.len(), 1);

        let on_time = t0() + Duration::hours(24);
        let second = qm.claim_daily(&rec, on_time, ItemRef("b.png".into()));
        assert!(second.allowed);
        assert_eq!(
            second.record.collection,
            vec![ItemRef("a.png".into()), ItemRef("b.png".into())]
        );
    }

    #[test]
    fn refused_decision_maps_to_quota_error() {
        let qm = QuotaManager::default();
        let rec = UserRecord {
            daily_claim_at: Some(t0()),
            ..Default::default()
        };
        let err = qm.daily_check(&rec, t0()).into_result(QuotaKind::Daily).unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                kind: QuotaKind::Daily,
                retry_at: Some(_)
            }
        ));
    }
}
