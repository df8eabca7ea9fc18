use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of row-level change on a remote table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change notification for one table. Rows are in wire form
/// (snake_case).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// New row for inserts and updates
    #[serde(default)]
    pub record: Option<Value>,
    /// Previous row for updates and deletes. Backends may only send the
    /// primary key here.
    #[serde(default)]
    pub old_record: Option<Value>,
}

impl RowChange {
    pub fn insert(table: impl Into<String>, record: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert,
            record: Some(record),
            old_record: None,
        }
    }

    pub fn update(table: impl Into<String>, record: Value, old_record: Option<Value>) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Update,
            record: Some(record),
            old_record,
        }
    }

    pub fn delete(table: impl Into<String>, old_record: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(old_record),
        }
    }

    /// Id of the affected row, taken from whichever image carries one.
    pub fn row_id(&self) -> Option<&str> {
        [&self.record, &self.old_record]
            .into_iter()
            .flatten()
            .find_map(|row| row.get("id").and_then(Value::as_str))
    }
}

/// An ephemeral event on a thread channel. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub event: String,
    pub payload: Value,
}

/// Payload of the `typing` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub user_id: String,
    pub is_typing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_change_wire_shape() {
        let change: RowChange = serde_json::from_value(json!({
            "table": "leave_requests",
            "type": "DELETE",
            "old_record": {"id": "lr-1"}
        }))
        .unwrap();

        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.record, None);
        assert_eq!(change.row_id(), Some("lr-1"));
    }

    #[test]
    fn test_row_id_prefers_new_record() {
        let change = RowChange::update("students", json!({"id": "s1"}), Some(json!({})));
        assert_eq!(change.row_id(), Some("s1"));
        assert_eq!(RowChange::delete("students", json!({})).row_id(), None);
    }

    #[test]
    fn test_typing_event_field_names() {
        let value = serde_json::to_value(TypingEvent {
            user_id: "p1".into(),
            is_typing: true,
        })
        .unwrap();
        assert_eq!(value, json!({"userId": "p1", "isTyping": true}));
    }
}
