//! Field-level diffs, merge and replay
//!
//! A MODIFY payload carries new and changed keys with their new values and
//! removed keys with a tombstone. Merging a payload sets every key and then
//! drops tombstoned ones, so replaying an entity's change log from an empty
//! map reproduces its current state.

use crate::models::ChangeRecord;
use ncvoter_common::RowData;

/// Compute the delta that turns `existing` into `incoming`.
///
/// Changes to keys in `ignored` are not recorded when the key exists on both
/// sides; additions and removals of those keys still are.
pub fn diff_rows(existing: &RowData, incoming: &RowData, ignored: &[String]) -> RowData {
    let mut delta = RowData::new();

    for (key, value) in incoming {
        match existing.get(key) {
            None => {
                delta.insert(key.clone(), value.clone());
            }
            Some(old) if old != value && !ignored.iter().any(|f| f == key) => {
                delta.insert(key.clone(), value.clone());
            }
            Some(_) => {}
        }
    }

    for (key, old) in existing {
        if !incoming.contains_key(key) {
            delta.insert(key.clone(), old.tombstone());
        }
    }

    delta
}

/// Apply a payload onto `state` in place
pub fn merge_into(state: &mut RowData, payload: &RowData) {
    for (key, value) in payload {
        if value.is_tombstone() {
            state.remove(key);
        } else {
            state.insert(key.clone(), value.clone());
        }
    }
}

/// Rebuild current state from change records already in replay order
pub fn replay<'a>(changes: impl IntoIterator<Item = &'a ChangeRecord>) -> RowData {
    let mut state = RowData::new();
    for change in changes {
        merge_into(&mut state, &change.data);
    }
    state
}

/// Keys whose value is a tombstone in `payload`
pub fn cleared_fields(payload: &RowData) -> impl Iterator<Item = &str> {
    payload
        .iter()
        .filter(|(_, v)| v.is_tombstone())
        .map(|(k, _)| k.as_str())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::OpCode;
    use chrono::Utc;
    use ncvoter_common::FieldValue;

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    fn data(pairs: &[(&str, FieldValue)]) -> RowData {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn change(op_code: OpCode, payload: RowData) -> ChangeRecord {
        ChangeRecord {
            id: 0,
            voter_id: 1,
            op_code,
            md5_hash: String::new(),
            snapshot_dt: Utc::now(),
            file_id: 1,
            file_lineno: 1,
            data: payload,
        }
    }

    #[test]
    fn test_modified_value_only() {
        let existing = data(&[("ncid", text("A1")), ("first_name", text("MARY")), ("last_name", text("LAMBERT"))]);
        let incoming = data(&[("ncid", text("A1")), ("first_name", text("MARY")), ("last_name", text("LANGSTON"))]);

        let delta = diff_rows(&existing, &incoming, &[]);
        assert_eq!(delta, data(&[("last_name", text("LANGSTON"))]));
    }

    #[test]
    fn test_tombstones_keep_type_distinction() {
        let existing = data(&[
            ("ncid", text("A1")),
            ("middle_name", text("ANN")),
            ("county_id", FieldValue::Integer(92)),
        ]);
        let incoming = data(&[("ncid", text("A1")), ("suffix", text("JR"))]);

        let delta = diff_rows(&existing, &incoming, &[]);
        assert_eq!(
            delta,
            data(&[
                ("county_id", FieldValue::Null),
                ("middle_name", text("")),
                ("suffix", text("JR")),
            ])
        );
        let cleared: Vec<&str> = cleared_fields(&delta).collect();
        assert_eq!(cleared, vec!["county_id", "middle_name"]);
    }

    #[test]
    fn test_ignored_fields_do_not_produce_changes() {
        let ignored = vec!["age".to_string()];
        let existing = data(&[("ncid", text("A1")), ("age", FieldValue::Integer(40))]);
        let incoming = data(&[("ncid", text("A1")), ("age", FieldValue::Integer(41))]);

        assert!(diff_rows(&existing, &incoming, &ignored).is_empty());
    }

    #[test]
    fn test_replay_reproduces_clearing() {
        let first = data(&[("ncid", text("A1")), ("middle_name", text("ANN"))]);
        let second = data(&[("ncid", text("A1"))]);

        let changes = vec![
            change(OpCode::Add, first.clone()),
            change(OpCode::Modify, diff_rows(&first, &second, &[])),
        ];
        let state = replay(&changes);
        assert_eq!(state, second);
    }

    #[test]
    fn test_merge_then_diff_is_empty() {
        let mut state = data(&[("ncid", text("A1")), ("last_name", text("LAMBERT"))]);
        let incoming = data(&[("ncid", text("A1")), ("last_name", text("LANGSTON"))]);

        let payload = diff_rows(&state, &incoming, &[]);
        merge_into(&mut state, &payload);
        assert_eq!(state, incoming);
        assert!(diff_rows(&state, &incoming, &[]).is_empty());
    }
}
