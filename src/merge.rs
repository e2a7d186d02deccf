//! Merge resolver: graph contraction of duplicate actors.
//!
//! A merge holds exclusive keyed locks on both actors, validates lifecycle
//! invariants, and applies the whole contraction (identifier reassignment,
//! link re-ownership, tombstone, stats, audit record) through one atomic
//! store commit. A target that was concurrently absorbed is detected
//! before commit and the merge retries against its redirect.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, MergeError};
use crate::index::combine_confidence;
use crate::locks::{actor_key, LockManager};
use crate::models::{Identifier, IdentifierType, MergeRecord};
use crate::stats::{self, ConfidenceModel};
use crate::store::{follow_redirects, ActorSnapshot, IdentityStore, MergeCommit};

pub struct MergeResolver {
    store: Arc<dyn IdentityStore>,
    locks: Arc<LockManager>,
    model: Arc<dyn ConfidenceModel>,
    config: EngineConfig,
}

impl MergeResolver {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        locks: Arc<LockManager>,
        model: Arc<dyn ConfidenceModel>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            locks,
            model,
            config,
        }
    }

    /// Merge two actors proven to be the same identity.
    ///
    /// Ids may be tombstones; they are resolved to their active actors
    /// first. The primary is chosen deterministically: greater
    /// `signal_count`, tie-broken by earlier `first_seen`, then by id.
    pub async fn merge(
        &self,
        brand_id: Uuid,
        a: Uuid,
        b: Uuid,
        reason: &str,
    ) -> EngineResult<MergeRecord> {
        let mut left = a;
        let mut right = b;

        for _ in 0..=self.config.redirect_retries {
            left = follow_redirects(self.store.as_ref(), left).await?.actor_id;
            right = follow_redirects(self.store.as_ref(), right).await?.actor_id;
            if left == right {
                return Err(MergeError::SelfMerge { actor_id: left }.into());
            }

            let _guard = self
                .locks
                .acquire_all(&[actor_key(&left), actor_key(&right)])
                .await?;

            let snap_left = self
                .store
                .actor_snapshot(left)
                .await
                .ok_or(EngineError::ActorNotFound { actor_id: left })?;
            let snap_right = self
                .store
                .actor_snapshot(right)
                .await
                .ok_or(EngineError::ActorNotFound { actor_id: right })?;

            for snap in [&snap_left, &snap_right] {
                if snap.actor.brand_id != brand_id {
                    return Err(EngineError::TenantMismatch {
                        actor_id: snap.actor.actor_id,
                        brand_id,
                    });
                }
            }

            // Tombstoned between the redirect resolution and the lock
            // grant: release and chase the new redirect
            if !snap_left.actor.is_active() || !snap_right.actor.is_active() {
                debug!(%left, %right, "merge target tombstoned under race, retrying");
                continue;
            }

            let (primary, merged) = choose_primary(snap_left, snap_right);
            let record = self.build_record(brand_id, &primary, &merged, reason);
            let primary_stats = self.projected_stats(&primary, &merged);

            match self
                .store
                .apply_merge(MergeCommit {
                    record: record.clone(),
                    primary_stats,
                })
                .await
            {
                Ok(()) => {
                    info!(
                        primary = %record.primary_id,
                        merged = %record.merged_id,
                        reason = %record.reason,
                        "actors merged"
                    );
                    return Ok(record);
                }
                Err(
                    MergeError::SourceTombstoned { .. } | MergeError::TargetTombstoned { .. },
                ) => {
                    debug!(%left, %right, "merge lost the race, retrying against redirect");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(MergeError::Aborted {
            reason: format!("redirect retries exhausted merging {a} and {b}"),
        }
        .into())
    }

    /// Reconciliation sweep: find identifier values owned by more than
    /// one active actor under a brand and merge each group down to a
    /// single owner.
    pub async fn reconcile(&self, brand_id: Uuid) -> EngineResult<Vec<MergeRecord>> {
        let shared = self.store.shared_values(brand_id).await;
        let mut records = Vec::new();

        for (key, owners) in shared {
            let reason = format!("reconciliation: shared {} value", key.id_type);
            let anchor = owners[0];
            for other in owners.into_iter().skip(1) {
                match self.merge(brand_id, anchor, other, &reason).await {
                    Ok(record) => records.push(record),
                    // An earlier sweep iteration already united the pair
                    Err(EngineError::Merge(MergeError::SelfMerge { .. })) => continue,
                    Err(err) => {
                        warn!(%anchor, %other, %err, "reconciliation merge skipped");
                        continue;
                    }
                }
            }
        }

        if !records.is_empty() {
            info!(brand = %brand_id, merges = records.len(), "reconciliation sweep complete");
        }
        Ok(records)
    }

    fn build_record(
        &self,
        brand_id: Uuid,
        primary: &ActorSnapshot,
        merged: &ActorSnapshot,
        reason: &str,
    ) -> MergeRecord {
        let triggering: Vec<(IdentifierType, String)> = merged
            .identifiers
            .iter()
            .filter(|mi| {
                primary
                    .identifiers
                    .iter()
                    .any(|pi| pi.id_type == mi.id_type && pi.value == mi.value)
            })
            .map(|i| (i.id_type, i.value.clone()))
            .collect();

        // Confidence of the merge: the strongest shared evidence, or full
        // confidence for an explicitly requested merge with none
        let confidence = triggering
            .iter()
            .filter_map(|(id_type, value)| {
                primary
                    .identifiers
                    .iter()
                    .chain(merged.identifiers.iter())
                    .filter(|i| i.id_type == *id_type && &i.value == value)
                    .map(|i| i.confidence)
                    .max_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal))
            })
            .max_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(1.0);

        MergeRecord {
            merge_id: Uuid::new_v4(),
            brand_id,
            primary_id: primary.actor.actor_id,
            merged_id: merged.actor.actor_id,
            reason: reason.to_string(),
            confidence,
            triggering_identifiers: triggering,
            merged_at: Utc::now(),
        }
    }

    /// Stats for the primary as they will stand after the contraction,
    /// mirroring the store's reassignment semantics.
    fn projected_stats(
        &self,
        primary: &ActorSnapshot,
        merged: &ActorSnapshot,
    ) -> crate::stats::StatsUpdate {
        let mut identifiers: Vec<Identifier> = primary.identifiers.clone();
        for incoming in &merged.identifiers {
            match identifiers
                .iter_mut()
                .find(|i| i.id_type == incoming.id_type && i.value == incoming.value)
            {
                Some(existing) => {
                    existing.confidence =
                        combine_confidence(existing.confidence, incoming.confidence);
                    existing.verified |= incoming.verified;
                    existing.first_seen = existing.first_seen.min(incoming.first_seen);
                    if incoming.last_seen > existing.last_seen {
                        existing.last_seen = incoming.last_seen;
                        existing.provenance = incoming.provenance;
                    }
                }
                None => identifiers.push(incoming.clone()),
            }
        }

        let mut links = primary.links.clone();
        links.extend(merged.links.iter().cloned());
        links.sort_by_key(|l| l.occurred_at);

        let mut actor = primary.actor.clone();
        actor.first_seen = actor.first_seen.min(merged.actor.first_seen);

        stats::recompute(
            &actor,
            &identifiers,
            &links,
            self.model.as_ref(),
            &self.config.completeness,
            Utc::now(),
        )
    }
}

/// Deterministic primary choice: greater signal_count, earlier
/// first_seen, then smaller id as the final tie-break.
fn choose_primary(a: ActorSnapshot, b: ActorSnapshot) -> (ActorSnapshot, ActorSnapshot) {
    let a_wins = match a.actor.signal_count.cmp(&b.actor.signal_count) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => match a.actor.first_seen.cmp(&b.actor.first_seen) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => a.actor.actor_id <= b.actor.actor_id,
        },
    };
    if a_wins {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Actor;
    use chrono::Duration;

    fn snapshot(signal_count: u64, first_seen_days_ago: i64) -> ActorSnapshot {
        let now = Utc::now();
        let mut actor = Actor::new(Uuid::new_v4(), now - Duration::days(first_seen_days_ago));
        actor.signal_count = signal_count;
        ActorSnapshot {
            actor,
            identifiers: vec![],
            links: vec![],
        }
    }

    #[test]
    fn test_primary_is_actor_with_more_signals() {
        let big = snapshot(10, 1);
        let small = snapshot(2, 30);
        let big_id = big.actor.actor_id;
        let (primary, merged) = choose_primary(big, small);
        assert_eq!(primary.actor.actor_id, big_id);
        assert_ne!(merged.actor.actor_id, big_id);
    }

    #[test]
    fn test_signal_count_tie_broken_by_earlier_first_seen() {
        let older = snapshot(5, 60);
        let newer = snapshot(5, 2);
        let older_id = older.actor.actor_id;
        let (primary, _) = choose_primary(newer, older);
        assert_eq!(primary.actor.actor_id, older_id);
    }
}
