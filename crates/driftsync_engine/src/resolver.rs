//! Conflict detection and resolution.
//!
//! Remote changes pass through the resolver before reaching the entity
//! store. Three paths exist: a change with no local counterpart is forwarded
//! as-is; a change colliding with an unconfirmed local edit is merged
//! field-by-field; a rapid cluster of changes to one entity from several
//! actors is folded into a single merged value.

use crate::config::BurstConfig;
use driftsync_protocol::{
    fold_merge, merge_entities, sort_by_timestamp, ChangeType, Entity, Operation, SyncChange,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Record of one resolved conflict between a local edit and a remote change.
#[derive(Debug, Clone)]
pub struct ConflictResolution {
    /// The unconfirmed local operation that collided.
    pub local_operation: Operation,
    /// The remote change it collided with.
    pub remote_change: SyncChange,
    /// The merged entity that replaced both versions.
    pub merged_entity: Entity,
    /// Resolution strategy label.
    pub strategy: String,
    /// When the resolution happened, in milliseconds.
    pub timestamp: i64,
}

/// An unconfirmed local edit the resolver may have to merge against.
#[derive(Debug, Clone)]
pub struct PendingLocal {
    /// The operation awaiting confirmation.
    pub operation: Operation,
    /// The optimistically applied entity value.
    pub entity: Entity,
}

/// What the caller should do with an ingested remote change.
///
/// Actions are ordered; apply them in sequence.
#[derive(Debug, Clone)]
pub enum ResolverAction {
    /// Apply the change unmodified and surface it downstream.
    Forward(SyncChange),
    /// A local/remote collision was merged; apply the merged entity and
    /// surface the resolution.
    Resolved(ConflictResolution),
    /// A burst fold produced a consolidated entity; apply it over whatever
    /// the individual changes left behind.
    ApplyMerged(Entity),
    /// Surface a change downstream without applying it. Used to replay
    /// history that a merged entity supersedes, so consumers still see
    /// every individual signal.
    Replay(SyncChange),
}

/// Routes remote changes through conflict detection.
///
/// Holds a bounded per-entity buffer of recent upserts for burst detection.
/// Changes below the burst thresholds are forwarded immediately; once a
/// buffer holds [`BurstConfig::min_changes`] changes from
/// [`BurstConfig::min_actors`] distinct actors, the buffered versions are
/// sorted by timestamp and folded, and the fold result supersedes them.
pub struct ConflictResolver {
    config: BurstConfig,
    buffers: HashMap<String, Vec<SyncChange>>,
}

impl ConflictResolver {
    /// Creates a resolver with the given burst thresholds.
    pub fn new(config: BurstConfig) -> Self {
        Self {
            config,
            buffers: HashMap::new(),
        }
    }

    /// Returns how many changes are buffered for an entity.
    pub fn buffered(&self, entity_id: &str) -> usize {
        self.buffers.get(entity_id).map(Vec::len).unwrap_or(0)
    }

    /// Processes one remote change against the local pending edit, if any.
    ///
    /// A change from the same actor as the pending edit is an echo of our
    /// own operation, not a conflict, and takes the ordinary path.
    pub fn ingest(
        &mut self,
        change: SyncChange,
        pending: Option<&PendingLocal>,
        now: i64,
    ) -> Vec<ResolverAction> {
        if let Some(local) = pending {
            if change.user_id != local.operation.client_id {
                return self.resolve_against_local(change, local, now);
            }
        }

        match change.change_type {
            ChangeType::Delete => {
                // A delete invalidates any buffered versions.
                self.buffers.remove(&change.entity_id);
                vec![ResolverAction::Forward(change)]
            }
            ChangeType::Upsert => self.ingest_upsert(change, now),
        }
    }

    fn resolve_against_local(
        &mut self,
        change: SyncChange,
        local: &PendingLocal,
        now: i64,
    ) -> Vec<ResolverAction> {
        self.buffers.remove(&change.entity_id);

        let Some(remote_entity) = change.entity.as_ref() else {
            // Remote delete against an unconfirmed local edit: the local
            // edit is still heading to the server, so it wins for now.
            debug!(
                entity_id = %change.entity_id,
                "remote delete deferred to unconfirmed local edit"
            );
            return vec![];
        };

        let merged = merge_entities(&local.entity, remote_entity, now);
        info!(
            entity_id = %change.entity_id,
            local_op = local.operation.id,
            remote_op = change.operation_id,
            "merged concurrent edits"
        );

        // The original change is replayed so consumers see both signals:
        // the resolution and the raw remote edit it absorbed.
        vec![
            ResolverAction::Resolved(ConflictResolution {
                local_operation: local.operation.clone(),
                remote_change: change.clone(),
                merged_entity: merged,
                strategy: "operational_transform".to_string(),
                timestamp: now,
            }),
            ResolverAction::Replay(change),
        ]
    }

    fn ingest_upsert(&mut self, change: SyncChange, now: i64) -> Vec<ResolverAction> {
        let (changes, actors) = {
            let buffer = self.buffers.entry(change.entity_id.clone()).or_default();
            if buffer.len() >= self.config.buffer_cap {
                buffer.remove(0);
            }
            buffer.push(change.clone());

            let actors: HashSet<&str> = buffer.iter().map(|c| c.user_id.as_str()).collect();
            (buffer.len(), actors.len())
        };

        if changes < self.config.min_changes || actors < self.config.min_actors {
            return vec![ResolverAction::Forward(change)];
        }

        // Burst: fold every buffered version in timestamp order and let the
        // fold result supersede the individually applied changes.
        let mut burst = self
            .buffers
            .remove(&change.entity_id)
            .unwrap_or_default();
        sort_by_timestamp(&mut burst);

        let entities: Vec<&Entity> = burst.iter().filter_map(|c| c.entity.as_ref()).collect();
        let Some(merged) = fold_merge(entities, now) else {
            return vec![ResolverAction::Forward(change)];
        };

        info!(
            entity_id = %change.entity_id,
            changes,
            actors,
            "folded change burst"
        );

        // Merged value first, then every version in sorted order so
        // consumers can reconstruct the history the fold consumed.
        let mut actions = vec![ResolverAction::ApplyMerged(merged)];
        actions.extend(burst.into_iter().map(ResolverAction::Replay));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upsert(id: u64, user: &str, ts: i64, data: serde_json::Value) -> SyncChange {
        SyncChange::upsert(Entity::from_value("e1", "Note", data, ts), user, id)
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(BurstConfig::default())
    }

    #[test]
    fn lone_remote_change_is_forwarded() {
        let mut resolver = resolver();
        let change = upsert(1, "u1", 100, json!({"title": "x"}));

        let actions = resolver.ingest(change.clone(), None, 200);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], ResolverAction::Forward(c) if *c == change));
        assert_eq!(resolver.buffered("e1"), 1);
    }

    #[test]
    fn collision_with_pending_local_merges_fields() {
        let mut resolver = resolver();

        let local_entity = Entity::from_value(
            "e1",
            "Note",
            json!({"content": "line one", "message": "local note"}),
            100,
        );
        let pending = PendingLocal {
            operation: Operation::upsert(7, "Note", "e1", json!({}), "c1", 100),
            entity: local_entity,
        };

        let remote = upsert(9, "u2", 200, json!({"content": "line one\nline two", "message": ""}));
        let actions = resolver.ingest(remote.clone(), Some(&pending), 300);

        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[1], ResolverAction::Replay(c) if *c == remote));
        let ResolverAction::Resolved(resolution) = &actions[0] else {
            panic!("expected a resolution");
        };
        assert_eq!(resolution.local_operation.id, 7);
        assert_eq!(resolution.remote_change.operation_id, 9);
        assert_eq!(resolution.strategy, "operational_transform");
        assert_eq!(
            resolution.merged_entity.field_str("content"),
            Some("line one\nline two")
        );
        assert_eq!(
            resolution.merged_entity.field_str("message"),
            Some("local note")
        );
        assert_eq!(resolution.merged_entity.updated_at, 300);
    }

    #[test]
    fn own_echo_is_not_a_conflict() {
        let mut resolver = resolver();
        let pending = PendingLocal {
            operation: Operation::upsert(7, "Note", "e1", json!({}), "c1", 100),
            entity: Entity::from_value("e1", "Note", json!({"title": "x"}), 100),
        };

        // Same actor as the pending operation: an echo, forwarded as-is.
        let echo = upsert(7, "c1", 150, json!({"title": "x"}));
        let actions = resolver.ingest(echo.clone(), Some(&pending), 300);
        assert!(matches!(&actions[..], [ResolverAction::Forward(c)] if *c == echo));
    }

    #[test]
    fn remote_delete_defers_to_pending_local() {
        let mut resolver = resolver();
        let pending = PendingLocal {
            operation: Operation::upsert(7, "Note", "e1", json!({}), "c1", 100),
            entity: Entity::from_value("e1", "Note", json!({"title": "x"}), 100),
        };

        let delete = SyncChange::delete("Note", "e1", 200, "u2", 9);
        let actions = resolver.ingest(delete, Some(&pending), 300);
        assert!(actions.is_empty());
    }

    #[test]
    fn burst_folds_buffered_versions() {
        let mut resolver = resolver();

        let a = upsert(1, "u1", 100, json!({"content": "alpha", "status": "draft"}));
        let b = upsert(2, "u2", 300, json!({"status": "done"}));
        // Arrives last but timestamped between the others.
        let c = upsert(3, "u2", 200, json!({"status": "review"}));

        assert!(matches!(
            resolver.ingest(a, None, 400)[..],
            [ResolverAction::Forward(_)]
        ));
        assert!(matches!(
            resolver.ingest(b, None, 400)[..],
            [ResolverAction::Forward(_)]
        ));

        let actions = resolver.ingest(c, None, 400);
        assert_eq!(actions.len(), 4);
        let ResolverAction::ApplyMerged(merged) = &actions[0] else {
            panic!("expected a burst fold");
        };
        // Fold order is by timestamp, so the ts=300 version wins "status".
        assert_eq!(merged.field_str("status"), Some("done"));
        assert_eq!(merged.field_str("content"), Some("alpha"));

        // History is replayed in timestamp order.
        let replayed: Vec<i64> = actions[1..]
            .iter()
            .map(|action| match action {
                ResolverAction::Replay(c) => c.timestamp,
                other => panic!("expected a replay, got {other:?}"),
            })
            .collect();
        assert_eq!(replayed, vec![100, 200, 300]);
        assert_eq!(resolver.buffered("e1"), 0);
    }

    #[test]
    fn single_actor_stream_never_bursts() {
        let mut resolver = resolver();
        for id in 1..=6 {
            let actions = resolver.ingest(
                upsert(id, "u1", id as i64 * 100, json!({"n": id})),
                None,
                1000,
            );
            assert_eq!(actions.len(), 1, "change {id} should only forward");
        }
        assert_eq!(resolver.buffered("e1"), 6);
    }

    #[test]
    fn buffer_is_capped() {
        let mut resolver = ConflictResolver::new(BurstConfig {
            min_changes: 100,
            min_actors: 100,
            buffer_cap: 4,
        });
        for id in 1..=10 {
            resolver.ingest(upsert(id, "u1", id as i64, json!({})), None, 20);
        }
        assert_eq!(resolver.buffered("e1"), 4);
    }

    #[test]
    fn delete_clears_the_buffer() {
        let mut resolver = resolver();
        resolver.ingest(upsert(1, "u1", 100, json!({})), None, 200);
        assert_eq!(resolver.buffered("e1"), 1);

        let actions = resolver.ingest(SyncChange::delete("Note", "e1", 300, "u2", 2), None, 400);
        assert!(matches!(actions[..], [ResolverAction::Forward(_)]));
        assert_eq!(resolver.buffered("e1"), 0);
    }
}
