//! Field-level entity merging.
//!
//! The merge is a heuristic reconciliation, not a commutative CRDT join:
//! order of application matters, so multi-change merges must fold in
//! timestamp order (ties broken by arrival order).

use crate::change::SyncChange;
use crate::entity::Entity;
use serde_json::Value;

/// Merges two concurrent versions of one entity.
///
/// `local` is the older/ours side, `remote` the newer/theirs side. Field
/// rules:
///
/// - `content`: if remote extends local line-by-line, append only remote's
///   new trailing lines; otherwise the longer text wins.
/// - `message`: keep local unless it is empty or equal to remote.
/// - `title`: remote wins only if its modification time is strictly newer.
/// - anything else: remote wins.
///
/// The result's `updated_at` is the maximum of both inputs and `now`, so
/// merged entities always advance monotonically.
pub fn merge_entities(local: &Entity, remote: &Entity, now: i64) -> Entity {
    let mut data = local.data.clone();

    for (key, remote_value) in &remote.data {
        let merged = match local.data.get(key) {
            None => remote_value.clone(),
            Some(local_value) => merge_field(
                key,
                local_value,
                remote_value,
                local.updated_at,
                remote.updated_at,
            ),
        };
        data.insert(key.clone(), merged);
    }

    Entity {
        id: local.id.clone(),
        entity_type: local.entity_type.clone(),
        data,
        updated_at: local.updated_at.max(remote.updated_at).max(now),
    }
}

/// Folds several versions of one entity into a single merged value.
///
/// Entities must already be in merge order; callers sort by timestamp first
/// (see [`sort_by_timestamp`]). Returns `None` for an empty input.
pub fn fold_merge<'a, I>(entities: I, now: i64) -> Option<Entity>
where
    I: IntoIterator<Item = &'a Entity>,
{
    let mut iter = entities.into_iter();
    let first = iter.next()?.clone();
    Some(iter.fold(first, |acc, next| merge_entities(&acc, next, now)))
}

/// Sorts changes by timestamp, keeping arrival order for equal timestamps.
pub fn sort_by_timestamp(changes: &mut [SyncChange]) {
    changes.sort_by_key(|c| c.timestamp);
}

fn merge_field(name: &str, local: &Value, remote: &Value, local_ts: i64, remote_ts: i64) -> Value {
    match name {
        "content" => merge_content(local, remote),
        "message" => merge_message(local, remote),
        "title" => {
            if remote_ts > local_ts {
                remote.clone()
            } else {
                local.clone()
            }
        }
        // Remote is the source of truth for simple scalar fields.
        _ => remote.clone(),
    }
}

fn merge_content(local: &Value, remote: &Value) -> Value {
    let (Some(a), Some(b)) = (local.as_str(), remote.as_str()) else {
        return remote.clone();
    };
    if a == b {
        return local.clone();
    }
    if let Some(extended) = append_trailing_lines(a, b) {
        return Value::String(extended);
    }
    // More content = less information lost.
    if b.len() >= a.len() {
        remote.clone()
    } else {
        local.clone()
    }
}

/// If `b` extends `a` line-by-line, returns `a` with b's new trailing lines
/// appended; otherwise `None`.
fn append_trailing_lines(a: &str, b: &str) -> Option<String> {
    if a.is_empty() {
        return Some(b.to_string());
    }
    let a_lines: Vec<&str> = a.lines().collect();
    let b_lines: Vec<&str> = b.lines().collect();

    if b_lines.len() <= a_lines.len() {
        return None;
    }
    if !a_lines.iter().zip(&b_lines).all(|(x, y)| x == y) {
        return None;
    }

    let mut merged = a.to_string();
    for line in &b_lines[a_lines.len()..] {
        merged.push('\n');
        merged.push_str(line);
    }
    Some(merged)
}

fn merge_message(local: &Value, remote: &Value) -> Value {
    match local.as_str() {
        Some("") | None => remote.clone(),
        Some(_) => local.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn entity(ts: i64, data: Value) -> Entity {
        Entity::from_value("e1", "Note", data, ts)
    }

    #[test]
    fn content_suffix_extension_appends_new_lines() {
        let local = entity(100, json!({"content": "line one\nline two"}));
        let remote = entity(200, json!({"content": "line one\nline two\nline three"}));

        let merged = merge_entities(&local, &remote, 300);
        assert_eq!(
            merged.field_str("content"),
            Some("line one\nline two\nline three")
        );
    }

    #[test]
    fn content_divergent_longer_wins() {
        let local = entity(100, json!({"content": "a considerably longer local draft"}));
        let remote = entity(200, json!({"content": "short remote"}));

        let merged = merge_entities(&local, &remote, 300);
        assert_eq!(
            merged.field_str("content"),
            Some("a considerably longer local draft")
        );

        let merged = merge_entities(&remote, &local, 300);
        assert_eq!(
            merged.field_str("content"),
            Some("a considerably longer local draft")
        );
    }

    #[test]
    fn message_keeps_local_unless_empty() {
        let local = entity(100, json!({"message": "local note"}));
        let remote = entity(200, json!({"message": "remote note"}));
        let merged = merge_entities(&local, &remote, 300);
        assert_eq!(merged.field_str("message"), Some("local note"));

        let local = entity(100, json!({"message": ""}));
        let merged = merge_entities(&local, &remote, 300);
        assert_eq!(merged.field_str("message"), Some("remote note"));
    }

    #[test]
    fn title_needs_strictly_newer_remote() {
        let local = entity(100, json!({"title": "local"}));
        let newer_remote = entity(200, json!({"title": "remote"}));
        let merged = merge_entities(&local, &newer_remote, 300);
        assert_eq!(merged.field_str("title"), Some("remote"));

        let same_age_remote = entity(100, json!({"title": "remote"}));
        let merged = merge_entities(&local, &same_age_remote, 300);
        assert_eq!(merged.field_str("title"), Some("local"));
    }

    #[test]
    fn scalar_fields_remote_wins() {
        let local = entity(500, json!({"status": "open", "priority": 1}));
        let remote = entity(100, json!({"status": "closed", "priority": 3}));

        let merged = merge_entities(&local, &remote, 600);
        assert_eq!(merged.field("status"), Some(&json!("closed")));
        assert_eq!(merged.field("priority"), Some(&json!(3)));
    }

    #[test]
    fn local_only_fields_survive() {
        let local = entity(100, json!({"labels": ["a"], "status": "open"}));
        let remote = entity(200, json!({"status": "closed"}));

        let merged = merge_entities(&local, &remote, 300);
        assert_eq!(merged.field("labels"), Some(&json!(["a"])));
        assert_eq!(merged.field("status"), Some(&json!("closed")));
    }

    #[test]
    fn fold_merge_is_left_to_right() {
        let a = entity(100, json!({"status": "draft", "message": "keep me"}));
        let b = entity(200, json!({"status": "review"}));
        let c = entity(300, json!({"status": "done"}));

        let merged = fold_merge([&a, &b, &c], 400).unwrap();
        assert_eq!(merged.field("status"), Some(&json!("done")));
        assert_eq!(merged.field_str("message"), Some("keep me"));
        assert_eq!(merged.updated_at, 400);

        assert!(fold_merge(std::iter::empty::<&Entity>(), 0).is_none());
    }

    #[test]
    fn sort_is_stable_for_equal_timestamps() {
        let mut changes = vec![
            SyncChange::delete("Note", "e1", 200, "u1", 1),
            SyncChange::delete("Note", "e1", 100, "u2", 2),
            SyncChange::delete("Note", "e1", 200, "u3", 3),
        ];
        sort_by_timestamp(&mut changes);

        let order: Vec<u64> = changes.iter().map(|c| c.operation_id).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    proptest! {
        #[test]
        fn merged_timestamp_is_monotonic(a_ts in 0i64..1_000_000, b_ts in 0i64..1_000_000, now in 0i64..1_000_000) {
            let local = entity(a_ts, json!({"status": "a"}));
            let remote = entity(b_ts, json!({"status": "b"}));
            let merged = merge_entities(&local, &remote, now);
            prop_assert!(merged.updated_at >= a_ts);
            prop_assert!(merged.updated_at >= b_ts);
            prop_assert!(merged.updated_at >= now);
        }

        #[test]
        fn content_merge_never_loses_length(a in "[a-z\\n]{0,40}", b in "[a-z\\n]{0,40}") {
            let local = entity(1, json!({"content": a.clone()}));
            let remote = entity(2, json!({"content": b.clone()}));
            let merged = merge_entities(&local, &remote, 3);
            let out = merged.field_str("content").unwrap().len();
            prop_assert!(out >= a.len().min(b.len()));
        }
    }
}
